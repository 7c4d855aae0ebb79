//! HTTP handlers for the admin interface

use axum::{extract::State, response::Json};
use serde::Serialize;
use std::sync::Arc;
use tracing::debug;

use crate::registry::StorageInfo;
use crate::service::Service;

/// Shared application state
pub type AppState = Arc<Service>;

/// Liveness report
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// "ok", or "stopping" once shutdown has begun
    pub status: &'static str,
    /// Number of open storages
    pub storages: usize,
}

/// Registered storages
#[derive(Debug, Serialize)]
pub struct StorageListResponse {
    pub storages: Vec<StorageInfo>,
}

/// Health check
pub async fn health_handler(State(service): State<AppState>) -> Json<HealthResponse> {
    let status = if service.is_shutting_down() {
        "stopping"
    } else {
        "ok"
    };

    Json(HealthResponse {
        status,
        storages: service.registry().len(),
    })
}

/// List storages with their driver
pub async fn storages_handler(State(service): State<AppState>) -> Json<StorageListResponse> {
    let storages = service.registry().describe();
    debug!("Listing {} storages", storages.len());
    Json(StorageListResponse { storages })
}
