//! kvmux - one RPC front door for several key-value storages
//!
//! Requests name the storage they target; a `Set` may fan out to several
//! storages at once. Modules are kept loosely coupled:
//! - `storage` defines the backend contract and the shipped backends
//! - `protocol` knows frames and messages, nothing about storages
//! - `dispatch` routes messages to storages through the `registry`
//! - `server` and `web` are thin transports over a `service`

pub mod config;
pub mod dispatch;
pub mod error;
pub mod protocol;
pub mod registry;
pub mod server;
pub mod service;
pub mod storage;
pub mod web;

/// Re-export commonly used types
pub use config::Config;
pub use dispatch::Dispatcher;
pub use error::{KvError, Result};
pub use registry::StorageRegistry;
pub use service::Service;
pub use storage::{Context, Item, MemoryStorage, RedbStorage, Storage};
