//! Admin HTTP module
//!
//! Read-only JSON endpoints for operators: liveness and the list of
//! configured storages.

mod handlers;
mod server;

pub use handlers::{HealthResponse, StorageListResponse};
pub use server::{router, run_web_server, serve_web};
