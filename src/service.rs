//! Service assembly
//!
//! Builds the storage registry from configuration and owns the shutdown
//! token shared by the RPC and admin servers.

use crate::config::{Config, Driver, StorageConfig};
use crate::dispatch::Dispatcher;
use crate::error::{KvError, Result};
use crate::registry::StorageRegistry;
use crate::storage::{Context, MemoryStorage, RedbStorage, Storage, StripedMap};
use anyhow::Context as _;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// A running set of storages plus the knobs the servers need
pub struct Service {
    registry: Arc<StorageRegistry>,
    token: CancellationToken,
    config: Config,
}

impl Service {
    /// Open every configured storage
    ///
    /// Must be called from within a tokio runtime (memory storages start
    /// their reaper immediately).
    pub fn from_config(config: &Config) -> Result<Self> {
        if config.storages.is_empty() {
            return Err(KvError::NoConfig("no storages configured".to_string()));
        }

        let registry = Arc::new(StorageRegistry::new());
        for (name, storage_config) in &config.storages {
            let storage = open_storage(name, storage_config, config)?;
            registry.register(name.clone(), storage)?;
        }

        info!("Service ready with {} storages", registry.len());

        Ok(Service {
            registry,
            token: CancellationToken::new(),
            config: config.clone(),
        })
    }

    /// A dispatcher over this service's registry
    pub fn dispatcher(&self) -> Dispatcher {
        Dispatcher::new(self.registry.clone())
    }

    pub fn registry(&self) -> &Arc<StorageRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Token cancelled on shutdown
    pub fn shutdown_token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Context for one call: child of the service token, bounded by the
    /// configured call timeout
    pub fn call_context(&self) -> Context {
        Context::with_token(self.token.child_token()).with_timeout(self.config.call_timeout())
    }

    pub fn is_shutting_down(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Cancel in-flight calls and close every storage
    pub async fn shutdown(&self) -> Result<()> {
        info!("Shutting down service");
        self.token.cancel();
        self.registry.close_all().await
    }
}

fn open_storage(name: &str, storage: &StorageConfig, config: &Config) -> Result<Arc<dyn Storage>> {
    match storage.driver {
        Driver::Memory => {
            let stripes = storage.stripes.unwrap_or_else(StripedMap::default_stripes);
            Ok(Arc::new(MemoryStorage::with_options(
                stripes,
                config.reaper_interval(),
            )))
        }
        Driver::Redb => {
            let path = storage
                .path
                .as_ref()
                .ok_or_else(|| KvError::NoConfig(format!("storage '{}' needs a path", name)))?;
            let db = RedbStorage::open_with_interval(path, config.reaper_interval())
                .with_context(|| format!("Failed to open storage '{}'", name))?;
            Ok(Arc::new(db))
        }
    }
}
