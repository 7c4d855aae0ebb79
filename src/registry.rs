//! Storage registry
//!
//! Named backends behind one lookup table. The dispatcher never knows which
//! adapter sits behind a name.

use crate::error::{KvError, Result};
use crate::storage::Storage;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{info, warn};

/// Name and driver of a registered storage
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StorageInfo {
    pub name: String,
    pub driver: &'static str,
}

/// Registry of all open storages
#[derive(Default)]
pub struct StorageRegistry {
    storages: RwLock<HashMap<String, Arc<dyn Storage>>>,
}

impl StorageRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a storage under `name`. An existing name is never replaced.
    pub fn register(&self, name: impl Into<String>, storage: Arc<dyn Storage>) -> Result<()> {
        let name = name.into();
        let mut storages = self.storages.write().unwrap_or_else(PoisonError::into_inner);

        if storages.contains_key(&name) {
            return Err(KvError::Config(format!("storage '{}' registered twice", name)));
        }

        info!("Registered storage '{}' ({})", name, storage.kind());
        storages.insert(name, storage);
        Ok(())
    }

    /// Look up a storage by name
    pub fn get(&self, name: &str) -> Result<Arc<dyn Storage>> {
        self.storages
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
            .ok_or_else(|| KvError::UnknownStorage(name.to_string()))
    }

    /// Check if a storage exists
    pub fn contains(&self, name: &str) -> bool {
        self.storages
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(name)
    }

    /// Remove a storage and close it
    pub async fn close(&self, name: &str) -> Result<()> {
        // Lock released before awaiting the backend
        let storage = self
            .storages
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(name)
            .ok_or_else(|| KvError::UnknownStorage(name.to_string()))?;

        info!("Closing storage '{}'", name);
        storage.close().await
    }

    /// Sorted storage names
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .storages
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    /// Name and driver of every storage, sorted by name
    pub fn describe(&self) -> Vec<StorageInfo> {
        let mut infos: Vec<StorageInfo> = self
            .storages
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(name, storage)| StorageInfo {
                name: name.clone(),
                driver: storage.kind(),
            })
            .collect();
        infos.sort_by(|a, b| a.name.cmp(&b.name));
        infos
    }

    pub fn len(&self) -> usize {
        self.storages.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Close every storage. Failures are logged, the first one is returned.
    pub async fn close_all(&self) -> Result<()> {
        let drained: Vec<(String, Arc<dyn Storage>)> = self
            .storages
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
            .collect();

        let mut first_err = None;
        for (name, storage) in drained {
            if let Err(e) = storage.close().await {
                warn!("Failed to close storage '{}': {}", name, e);
                first_err.get_or_insert(e);
            }
        }

        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
