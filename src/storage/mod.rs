//! Storage module
//!
//! Defines the capability set every storage backend exposes, the item type
//! they accept, and the two shipped backends: the lock-striped in-memory
//! engine and the redb-backed disk storage.

mod context;
mod entry;
mod memory;
mod reaper;
mod redb;
mod striped;
pub mod validate;

pub use context::Context;
pub use entry::Entry;
pub use memory::MemoryStorage;
pub use reaper::{Reaper, REAPER_INTERVAL};
pub use self::redb::RedbStorage;
pub use striped::StripedMap;

use crate::error::Result;
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::time::Duration;

/// A key/value pair with an optional relative TTL
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Item {
    pub key: String,
    pub value: Bytes,
    /// Time to live from the moment the item is applied, `None` = no expiry
    pub ttl: Option<Duration>,
}

impl Item {
    pub fn new(key: impl Into<String>, value: impl Into<Bytes>, ttl: Option<Duration>) -> Self {
        Item {
            key: key.into(),
            value: value.into(),
            ttl,
        }
    }
}

/// Capability set shared by every storage backend
///
/// Implementations must validate keys and items through [`validate`] so that
/// `EmptyKey`, `NoKeys`, `EmptyItem` and `BadTtl` behave the same everywhere.
/// Each call takes a [`Context`] and returns `Cancelled` promptly once it is
/// cancelled or past its deadline.
#[async_trait]
pub trait Storage: Send + Sync + 'static {
    /// Short driver name ("memory", "redb", ...)
    fn kind(&self) -> &'static str;

    /// For each key, true iff an unexpired entry exists
    async fn has(&self, ctx: &Context, keys: &[String]) -> Result<HashMap<String, bool>>;

    /// Value of a key. Absence is `Ok(None)`, not an error.
    async fn get(&self, ctx: &Context, key: &str) -> Result<Option<Bytes>>;

    /// Present values in request order; absent or expired keys are skipped
    async fn mget(&self, ctx: &Context, keys: &[String]) -> Result<Vec<(String, Bytes)>>;

    /// Store items in order, overwriting previous entries
    ///
    /// Not transactional: on the first invalid item processing stops and the
    /// items before it stay stored.
    async fn set(&self, ctx: &Context, items: &[Item]) -> Result<()>;

    /// Replace the expiry of keys that already exist; values are untouched
    /// and absent keys are ignored. An item with `ttl: None` clears the expiry.
    async fn mexpire(&self, ctx: &Context, items: &[Item]) -> Result<()>;

    /// Remaining whole seconds per present key (`None` = no expiry)
    async fn ttl(&self, ctx: &Context, keys: &[String]) -> Result<HashMap<String, Option<u64>>>;

    /// Remove keys; absent keys are not an error
    async fn delete(&self, ctx: &Context, keys: &[String]) -> Result<()>;

    /// Release all resources. Safe to call more than once; operations issued
    /// afterwards may fail but never corrupt state.
    async fn close(&self) -> Result<()>;
}
