//! Service configuration
//!
//! Loaded from a TOML file. Every field has a default, so an empty file (or
//! no file at all) yields a single in-memory storage named `memory`.
//!
//! ```toml
//! rpc_addr = "127.0.0.1:6001"
//! admin_addr = "127.0.0.1:6002"
//! call_timeout_ms = 5000
//!
//! [storages.memory]
//! driver = "memory"
//!
//! [storages.disk]
//! driver = "redb"
//! path = "data/disk.redb"
//! ```

use anyhow::Context as _;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::protocol::DEFAULT_MAX_FRAME;

/// Storage driver selector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Driver {
    Memory,
    Redb,
}

/// One `[storages.<name>]` table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageConfig {
    pub driver: Driver,

    /// Database file, required by `redb`
    #[serde(default)]
    pub path: Option<PathBuf>,

    /// Lock stripes for `memory`, rounded up to a power of two
    #[serde(default)]
    pub stripes: Option<usize>,
}

impl StorageConfig {
    pub fn memory() -> Self {
        StorageConfig {
            driver: Driver::Memory,
            path: None,
            stripes: None,
        }
    }

    pub fn redb(path: impl Into<PathBuf>) -> Self {
        StorageConfig {
            driver: Driver::Redb,
            path: Some(path.into()),
            stripes: None,
        }
    }
}

/// Top-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Binary RPC listener
    pub rpc_addr: String,

    /// Admin HTTP listener
    pub admin_addr: String,

    /// Upper bound for a single RPC call
    pub call_timeout_ms: u64,

    /// Sweep period of in-memory reapers
    pub reaper_interval_ms: u64,

    /// Largest accepted frame body in bytes
    pub max_frame: usize,

    /// Default log filter when RUST_LOG is unset
    pub log_level: String,

    pub storages: BTreeMap<String, StorageConfig>,
}

impl Default for Config {
    fn default() -> Self {
        let mut storages = BTreeMap::new();
        storages.insert("memory".to_string(), StorageConfig::memory());

        Config {
            rpc_addr: "127.0.0.1:6001".to_string(),
            admin_addr: "127.0.0.1:6002".to_string(),
            call_timeout_ms: 5000,
            reaper_interval_ms: 1000,
            max_frame: DEFAULT_MAX_FRAME,
            log_level: "info".to_string(),
            storages,
        }
    }
}

impl Config {
    /// Parse configuration from TOML text
    pub fn from_toml(text: &str) -> anyhow::Result<Self> {
        toml::from_str(text).context("Failed to parse configuration")
    }

    /// Load configuration from a file
    pub fn load_from(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::from_toml(&text).with_context(|| format!("Invalid config file {}", path.display()))
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }

    pub fn reaper_interval(&self) -> Duration {
        Duration::from_millis(self.reaper_interval_ms)
    }
}
