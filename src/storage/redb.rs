//! Redb-backed storage
//!
//! Persists entries in a single redb table. Each row is
//! `[expires_at_unix_ms: u64 LE, 0 = none][value bytes]`, so deadlines are
//! wall-clock and survive restarts. Blocking database work runs on the
//! blocking pool, raced against the call context.

use super::reaper::{Reaper, REAPER_INTERVAL};
use super::validate::{validate_item, validate_key, validate_keys};
use super::{Context, Item, Storage};
use crate::error::{KvError, Result};
use anyhow::{anyhow, Context as _};
use async_trait::async_trait;
use bytes::Bytes;
use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, info, warn};

/// Table name for key-value rows with expiration header
const KV_TABLE: TableDefinition<'static, &'static str, &'static [u8]> = TableDefinition::new("kv");

/// Size of the expiration header in front of every value
const HEADER_LEN: usize = 8;

/// A decoded row
struct Row {
    expires_at_ms: Option<u64>,
    value: Bytes,
}

impl Row {
    fn encode(expires_at_ms: Option<u64>, value: &[u8]) -> Vec<u8> {
        let mut buf = Vec::with_capacity(HEADER_LEN + value.len());
        buf.extend_from_slice(&expires_at_ms.unwrap_or(0).to_le_bytes());
        buf.extend_from_slice(value);
        buf
    }

    fn decode(key: &str, raw: &[u8]) -> Result<Self> {
        if raw.len() < HEADER_LEN {
            return Err(anyhow!("corrupt row for key '{}'", key).into());
        }

        let (header, value) = raw.split_at(HEADER_LEN);
        let mut ms = [0u8; HEADER_LEN];
        ms.copy_from_slice(header);

        Ok(Row {
            expires_at_ms: match u64::from_le_bytes(ms) {
                0 => None,
                at => Some(at),
            },
            value: Bytes::copy_from_slice(value),
        })
    }

    fn is_expired_at(&self, now_ms: u64) -> bool {
        self.expires_at_ms.is_some_and(|at| now_ms >= at)
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Absolute wall-clock deadline for a relative TTL
fn deadline_ms(now_ms: u64, ttl: Option<Duration>) -> Result<Option<u64>> {
    match ttl {
        None => Ok(None),
        Some(ttl) => u64::try_from(ttl.as_millis())
            .ok()
            .and_then(|ms| now_ms.checked_add(ms))
            .map(Some)
            .ok_or_else(|| KvError::BadTtl(format!("{}s", ttl.as_secs()))),
    }
}

/// Disk-backed storage on top of redb
///
/// `Set` batches run in one write transaction. When an item fails
/// validation, the items before it are committed and the error is returned,
/// the same observable outcome as the in-memory engine.
///
/// A background task purges expired rows every sweep period; `close` stops
/// and joins it.
pub struct RedbStorage {
    db: RwLock<Option<Arc<Database>>>,
    reaper: Reaper,
}

impl RedbStorage {
    /// Opens or creates a redb database at the given path, purging every second
    ///
    /// Must be called from within a tokio runtime.
    pub fn open<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        Self::open_with_interval(path, REAPER_INTERVAL)
    }

    /// Opens or creates a redb database with a specific purge period
    ///
    /// Creates parent directories if needed and purges rows that expired
    /// while the database was closed.
    pub fn open_with_interval<P: AsRef<Path>>(path: P, purge_every: Duration) -> anyhow::Result<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create storage directory: {}", parent.display()))?;
        }

        let db = Database::create(path)
            .with_context(|| format!("Failed to open database: {}", path.display()))?;

        // Make sure the table exists for readers
        let write_txn = db
            .begin_write()
            .context("Failed to begin initialization transaction")?;
        {
            let _table = write_txn
                .open_table(KV_TABLE)
                .context("Failed to initialize KV table")?;
        }
        write_txn
            .commit()
            .context("Failed to commit initialization transaction")?;

        let purged = purge_expired_sync(&db, now_ms())?;
        info!("Opened redb storage at {} ({} expired rows purged)", path.display(), purged);

        let db = Arc::new(db);
        let task_db = db.clone();
        let reaper = Reaper::spawn_with(purge_every, move || {
            let db = task_db.clone();
            async move {
                match tokio::task::spawn_blocking(move || purge_expired_sync(&db, now_ms())).await {
                    Ok(Ok(purged)) => purged,
                    Ok(Err(e)) => {
                        warn!("Failed to purge expired rows: {:#}", e);
                        0
                    }
                    Err(e) => {
                        warn!("Purge task ended abnormally: {}", e);
                        0
                    }
                }
            }
        });

        Ok(RedbStorage {
            db: RwLock::new(Some(db)),
            reaper,
        })
    }

    fn db(&self) -> Result<Arc<Database>> {
        self.db
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or_else(|| KvError::backend(anyhow!("storage closed")))
    }

    /// Run blocking database work on the blocking pool
    ///
    /// Cancellation makes the call return early; a write already running on
    /// the pool may still commit.
    async fn blocking<T, F>(&self, ctx: &Context, f: F) -> Result<T>
    where
        F: FnOnce(&Database) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let db = self.db()?;
        ctx.run(async move {
            tokio::task::spawn_blocking(move || f(&db))
                .await
                .context("Task join error")?
        })
        .await
    }

    /// Number of stored rows, expired ones included
    pub async fn row_count(&self, ctx: &Context) -> Result<usize> {
        self.blocking(ctx, |db| {
            let read_txn = db.begin_read().context("Failed to begin read transaction")?;
            let table = read_txn
                .open_table(KV_TABLE)
                .context("Failed to open KV table")?;
            let rows = table.iter().context("Failed to iterate KV table")?.count();
            Ok(rows)
        })
        .await
    }

    /// Remove every row whose deadline has passed
    pub async fn purge_expired(&self, ctx: &Context) -> Result<usize> {
        let now = now_ms();
        self.blocking(ctx, move |db| Ok(purge_expired_sync(db, now)?))
            .await
    }
}

fn read_rows(db: &Database, keys: &[String]) -> Result<Vec<Option<Row>>> {
    let read_txn = db.begin_read().context("Failed to begin read transaction")?;
    let table = read_txn
        .open_table(KV_TABLE)
        .context("Failed to open KV table")?;

    let now = now_ms();
    keys.iter()
        .map(|key| -> Result<Option<Row>> {
            let guard = table
                .get(key.as_str())
                .with_context(|| format!("Failed to read key '{key}'"))?;
            match guard {
                Some(raw) => {
                    let row = Row::decode(key, raw.value())?;
                    Ok((!row.is_expired_at(now)).then_some(row))
                }
                None => Ok(None),
            }
        })
        .collect()
}

fn purge_expired_sync(db: &Database, now: u64) -> anyhow::Result<usize> {
    let write_txn = db.begin_write().context("Failed to begin write transaction")?;
    let purged = {
        let mut table = write_txn
            .open_table(KV_TABLE)
            .context("Failed to open KV table")?;

        let mut expired = Vec::new();
        for item in table.iter().context("Failed to iterate KV table")? {
            let (key, value) = item.context("Failed to read KV entry")?;
            let key = key.value().to_string();
            match Row::decode(&key, value.value()) {
                Ok(row) if row.is_expired_at(now) => expired.push(key),
                _ => {}
            }
        }

        for key in &expired {
            table
                .remove(key.as_str())
                .with_context(|| format!("Failed to remove key '{key}'"))?;
        }
        expired.len()
    };
    write_txn.commit().context("Failed to commit purge transaction")?;

    if purged > 0 {
        debug!("Purged {} expired rows", purged);
    }
    Ok(purged)
}

#[async_trait]
impl Storage for RedbStorage {
    fn kind(&self) -> &'static str {
        "redb"
    }

    async fn has(&self, ctx: &Context, keys: &[String]) -> Result<HashMap<String, bool>> {
        validate_keys(keys)?;
        let keys = keys.to_vec();

        self.blocking(ctx, move |db| {
            let rows = read_rows(db, &keys)?;
            Ok(keys.into_iter().zip(rows).map(|(k, r)| (k, r.is_some())).collect())
        })
        .await
    }

    async fn get(&self, ctx: &Context, key: &str) -> Result<Option<Bytes>> {
        validate_key(key)?;
        let keys = vec![key.to_string()];

        self.blocking(ctx, move |db| {
            Ok(read_rows(db, &keys)?.pop().flatten().map(|row| row.value))
        })
        .await
    }

    async fn mget(&self, ctx: &Context, keys: &[String]) -> Result<Vec<(String, Bytes)>> {
        validate_keys(keys)?;
        let keys = keys.to_vec();

        self.blocking(ctx, move |db| {
            let rows = read_rows(db, &keys)?;
            Ok(keys
                .into_iter()
                .zip(rows)
                .filter_map(|(k, r)| r.map(|row| (k, row.value)))
                .collect())
        })
        .await
    }

    async fn set(&self, ctx: &Context, items: &[Item]) -> Result<()> {
        if items.is_empty() {
            return Err(KvError::NoKeys);
        }
        let items = items.to_vec();

        self.blocking(ctx, move |db| {
            let write_txn = db.begin_write().context("Failed to begin write transaction")?;
            let mut outcome = Ok(());
            {
                let mut table = write_txn
                    .open_table(KV_TABLE)
                    .context("Failed to open KV table")?;

                let now = now_ms();
                for item in &items {
                    let deadline = validate_item(item).and_then(|_| deadline_ms(now, item.ttl));
                    let deadline = match deadline {
                        Ok(d) => d,
                        Err(e) => {
                            outcome = Err(e);
                            break;
                        }
                    };

                    let row = Row::encode(deadline, &item.value);
                    table
                        .insert(item.key.as_str(), row.as_slice())
                        .with_context(|| format!("Failed to insert key '{}'", item.key))?;
                }
            }
            write_txn.commit().context("Failed to commit set transaction")?;
            outcome
        })
        .await
    }

    async fn mexpire(&self, ctx: &Context, items: &[Item]) -> Result<()> {
        validate_keys(&items.iter().map(|i| i.key.as_str()).collect::<Vec<_>>())?;

        let now = now_ms();
        let updates = items
            .iter()
            .map(|item| deadline_ms(now, item.ttl).map(|d| (item.key.clone(), d)))
            .collect::<Result<Vec<_>>>()?;

        self.blocking(ctx, move |db| {
            let write_txn = db.begin_write().context("Failed to begin write transaction")?;
            {
                let mut table = write_txn
                    .open_table(KV_TABLE)
                    .context("Failed to open KV table")?;

                for (key, deadline) in &updates {
                    let current = match table
                        .get(key.as_str())
                        .with_context(|| format!("Failed to read key '{key}'"))?
                    {
                        Some(raw) => Row::decode(key, raw.value())?,
                        None => continue,
                    };

                    if current.is_expired_at(now) {
                        continue;
                    }

                    let row = Row::encode(*deadline, &current.value);
                    table
                        .insert(key.as_str(), row.as_slice())
                        .with_context(|| format!("Failed to update key '{key}'"))?;
                }
            }
            write_txn.commit().context("Failed to commit expire transaction")?;
            Ok(())
        })
        .await
    }

    async fn ttl(&self, ctx: &Context, keys: &[String]) -> Result<HashMap<String, Option<u64>>> {
        validate_keys(keys)?;
        let keys = keys.to_vec();

        self.blocking(ctx, move |db| {
            let rows = read_rows(db, &keys)?;
            let now = now_ms();
            Ok(keys
                .into_iter()
                .zip(rows)
                .filter_map(|(k, r)| {
                    r.map(|row| (k, row.expires_at_ms.map(|at| at.saturating_sub(now) / 1000)))
                })
                .collect())
        })
        .await
    }

    async fn delete(&self, ctx: &Context, keys: &[String]) -> Result<()> {
        validate_keys(keys)?;
        let keys = keys.to_vec();

        self.blocking(ctx, move |db| {
            let write_txn = db.begin_write().context("Failed to begin write transaction")?;
            {
                let mut table = write_txn
                    .open_table(KV_TABLE)
                    .context("Failed to open KV table")?;
                for key in &keys {
                    table
                        .remove(key.as_str())
                        .with_context(|| format!("Failed to remove key '{key}'"))?;
                }
            }
            write_txn.commit().context("Failed to commit delete transaction")?;
            Ok(())
        })
        .await
    }

    async fn close(&self) -> Result<()> {
        self.reaper.stop().await;

        // In-flight calls hold their own handle; the file is released when
        // the last of them finishes.
        let db = self.db.write().unwrap_or_else(PoisonError::into_inner).take();
        if db.is_some() {
            debug!("Redb storage closed");
        }
        Ok(())
    }
}
