//! In-memory storage implementation

use super::entry::Entry;
use super::reaper::{Reaper, REAPER_INTERVAL};
use super::striped::StripedMap;
use super::validate::{expires_at, validate_item, validate_key, validate_keys};
use super::{Context, Item, Storage};
use crate::error::{KvError, Result};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

/// In-memory key-value storage with a background reaper
///
/// Entries live in a [`StripedMap`]; every mutation replaces a whole entry
/// under its stripe's write lock. The reaper task is started on creation and
/// joined by [`Storage::close`].
pub struct MemoryStorage {
    map: Arc<StripedMap>,
    reaper: Reaper,
}

impl MemoryStorage {
    /// Create a storage with default striping and a 1 second sweep
    ///
    /// Must be called from within a tokio runtime.
    pub fn new() -> Self {
        Self::with_options(StripedMap::default_stripes(), REAPER_INTERVAL)
    }

    /// Create a storage with a specific stripe count and sweep period
    pub fn with_options(num_stripes: usize, sweep_every: Duration) -> Self {
        let map = Arc::new(StripedMap::new(num_stripes));
        let reaper = Reaper::spawn(map.clone(), sweep_every);
        debug!(
            "Memory storage created with {} stripes, sweep every {:?}",
            map.num_stripes(),
            sweep_every
        );
        MemoryStorage { map, reaper }
    }

    /// Number of stored entries, including expired ones not yet reaped
    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Live value for a key at `now`
    fn live(&self, key: &str, now: Instant) -> Option<Entry> {
        self.map
            .read(key, |entry| entry.filter(|e| !e.is_expired_at(now)).cloned())
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    fn kind(&self) -> &'static str {
        "memory"
    }

    async fn has(&self, ctx: &Context, keys: &[String]) -> Result<HashMap<String, bool>> {
        validate_keys(keys)?;
        ctx.check()?;

        let now = Instant::now();
        Ok(keys
            .iter()
            .map(|key| {
                let present = self.map.read(key, |e| e.is_some_and(|e| !e.is_expired_at(now)));
                (key.clone(), present)
            })
            .collect())
    }

    async fn get(&self, ctx: &Context, key: &str) -> Result<Option<Bytes>> {
        validate_key(key)?;
        ctx.check()?;

        Ok(self.live(key, Instant::now()).map(|e| e.value))
    }

    async fn mget(&self, ctx: &Context, keys: &[String]) -> Result<Vec<(String, Bytes)>> {
        validate_keys(keys)?;
        ctx.check()?;

        let now = Instant::now();
        Ok(keys
            .iter()
            .filter_map(|key| self.live(key, now).map(|e| (key.clone(), e.value)))
            .collect())
    }

    async fn set(&self, ctx: &Context, items: &[Item]) -> Result<()> {
        if items.is_empty() {
            return Err(KvError::NoKeys);
        }

        for item in items {
            ctx.check()?;
            validate_item(item)?;

            let deadline = expires_at(Instant::now(), item.ttl)?;
            self.map
                .insert(item.key.clone(), Entry::new(item.value.clone(), deadline));
        }

        Ok(())
    }

    async fn mexpire(&self, ctx: &Context, items: &[Item]) -> Result<()> {
        validate_keys(&items.iter().map(|i| i.key.as_str()).collect::<Vec<_>>())?;

        // Resolve every deadline before touching anything
        let now = Instant::now();
        let deadlines = items
            .iter()
            .map(|item| expires_at(now, item.ttl))
            .collect::<Result<Vec<_>>>()?;

        for (item, deadline) in items.iter().zip(deadlines) {
            ctx.check()?;
            self.map.replace_existing(&item.key, |current| {
                if current.is_expired() {
                    None
                } else {
                    Some(current.with_expiration(deadline))
                }
            });
        }

        Ok(())
    }

    async fn ttl(&self, ctx: &Context, keys: &[String]) -> Result<HashMap<String, Option<u64>>> {
        validate_keys(keys)?;
        ctx.check()?;

        let now = Instant::now();
        Ok(keys
            .iter()
            .filter_map(|key| {
                self.live(key, now)
                    .map(|e| (key.clone(), e.ttl_seconds(now)))
            })
            .collect())
    }

    async fn delete(&self, ctx: &Context, keys: &[String]) -> Result<()> {
        validate_keys(keys)?;

        for key in keys {
            ctx.check()?;
            self.map.remove(key);
        }

        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.reaper.stop().await;
        self.map.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_err, assert_ok};

    fn keys(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn storage() -> MemoryStorage {
        MemoryStorage::with_options(8, Duration::from_millis(50))
    }

    #[tokio::test]
    async fn test_never_set() {
        let s = storage();
        let ctx = Context::background();

        let has = s.has(&ctx, &keys(&["nope"])).await.unwrap();
        assert_eq!(has.get("nope"), Some(&false));
        assert_eq!(s.get(&ctx, "nope").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_set_has_get_delete() {
        let s = storage();
        let ctx = Context::background();

        assert_ok!(s.set(&ctx, &[Item::new("k", "v", None)]).await);
        assert_eq!(s.has(&ctx, &keys(&["k"])).await.unwrap()["k"], true);
        assert_eq!(s.get(&ctx, "k").await.unwrap(), Some(Bytes::from("v")));

        assert_ok!(s.delete(&ctx, &keys(&["k"])).await);
        assert_eq!(s.has(&ctx, &keys(&["k"])).await.unwrap()["k"], false);
    }

    #[tokio::test]
    async fn test_no_expiry_survives_sweeps() {
        let s = storage();
        let ctx = Context::background();

        s.set(&ctx, &[Item::new("forever", "v", None)]).await.unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert_eq!(s.get(&ctx, "forever").await.unwrap(), Some(Bytes::from("v")));
    }

    #[tokio::test]
    async fn test_expiry_evicted_by_reaper() {
        let s = storage();
        let ctx = Context::background();

        s.set(&ctx, &[Item::new("short", "v", Some(Duration::from_secs(1)))])
            .await
            .unwrap();
        assert_eq!(s.has(&ctx, &keys(&["short"])).await.unwrap()["short"], true);

        tokio::time::sleep(Duration::from_millis(1200)).await;
        assert_eq!(s.has(&ctx, &keys(&["short"])).await.unwrap()["short"], false);
        assert!(s.is_empty());
    }

    #[tokio::test]
    async fn test_set_delete_mget_empty() {
        let s = storage();
        let ctx = Context::background();
        let ks = keys(&["a", "b"]);

        s.set(&ctx, &[Item::new("a", "1", None), Item::new("b", "2", None)])
            .await
            .unwrap();
        assert_eq!(s.mget(&ctx, &ks).await.unwrap().len(), 2);

        s.delete(&ctx, &ks).await.unwrap();
        assert!(s.mget(&ctx, &ks).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_mget_keeps_order_and_skips_absent() {
        let s = storage();
        let ctx = Context::background();

        s.set(&ctx, &[Item::new("b", "2", None), Item::new("a", "1", None)])
            .await
            .unwrap();

        let got = s.mget(&ctx, &keys(&["a", "missing", "b"])).await.unwrap();
        assert_eq!(
            got,
            vec![
                ("a".to_string(), Bytes::from("1")),
                ("b".to_string(), Bytes::from("2")),
            ]
        );
    }

    #[tokio::test]
    async fn test_set_stops_at_first_bad_item() {
        let s = storage();
        let ctx = Context::background();

        let items = [
            Item::new("first", "1", None),
            Item::new("  ", "2", None),
            Item::new("third", "3", None),
        ];
        assert!(matches!(s.set(&ctx, &items).await, Err(KvError::EmptyKey)));

        assert_eq!(s.get(&ctx, "first").await.unwrap(), Some(Bytes::from("1")));
        assert_eq!(s.get(&ctx, "third").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_validation_errors() {
        let s = storage();
        let ctx = Context::background();

        assert!(matches!(s.has(&ctx, &[]).await, Err(KvError::NoKeys)));
        assert!(matches!(s.get(&ctx, " ").await, Err(KvError::EmptyKey)));
        assert!(matches!(s.set(&ctx, &[]).await, Err(KvError::NoKeys)));
        assert!(matches!(
            s.set(&ctx, &[Item::default()]).await,
            Err(KvError::EmptyItem)
        ));
        assert!(matches!(
            s.set(&ctx, &[Item::new("k", "v", Some(Duration::MAX))]).await,
            Err(KvError::BadTtl(_))
        ));
        assert!(matches!(s.ttl(&ctx, &keys(&[""])).await, Err(KvError::EmptyKey)));
        assert!(matches!(s.delete(&ctx, &[]).await, Err(KvError::NoKeys)));
    }

    #[tokio::test]
    async fn test_mexpire_absent_is_noop() {
        let s = storage();
        let ctx = Context::background();

        let items = [Item::new("ghost", "", Some(Duration::from_secs(10)))];
        assert_ok!(s.mexpire(&ctx, &items).await);
        assert!(s.is_empty());
    }

    #[tokio::test]
    async fn test_mexpire_changes_only_ttl() {
        let s = storage();
        let ctx = Context::background();

        s.set(&ctx, &[Item::new("k", "v", None)]).await.unwrap();
        assert_eq!(s.ttl(&ctx, &keys(&["k"])).await.unwrap()["k"], None);

        s.mexpire(&ctx, &[Item::new("k", "", Some(Duration::from_secs(30)))])
            .await
            .unwrap();

        let ttl = s.ttl(&ctx, &keys(&["k"])).await.unwrap()["k"].unwrap();
        assert!(ttl > 25 && ttl <= 30);
        assert_eq!(s.get(&ctx, "k").await.unwrap(), Some(Bytes::from("v")));
    }

    #[tokio::test]
    async fn test_ttl_omits_absent() {
        let s = storage();
        let ctx = Context::background();

        s.set(&ctx, &[Item::new("k", "v", Some(Duration::from_secs(5)))])
            .await
            .unwrap();
        let ttl = s.ttl(&ctx, &keys(&["k", "missing"])).await.unwrap();

        assert_eq!(ttl.len(), 1);
        assert!(ttl["k"].unwrap() <= 5);
    }

    #[tokio::test]
    async fn test_cancelled_context() {
        let s = storage();
        let ctx = Context::background();
        ctx.cancel();

        assert_err!(s.set(&ctx, &[Item::new("k", "v", None)]).await);
        assert!(matches!(s.get(&ctx, "k").await, Err(KvError::Cancelled)));
        assert!(s.is_empty());
    }

    #[tokio::test]
    async fn test_close_twice() {
        let s = storage();
        let ctx = Context::background();
        s.set(&ctx, &[Item::new("k", "v", None)]).await.unwrap();

        assert_ok!(s.close().await);
        assert_ok!(s.close().await);
        assert!(s.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_disjoint_writers() {
        let s = Arc::new(storage());
        let mut tasks = Vec::new();

        for worker in 0..8 {
            let s = s.clone();
            tasks.push(tokio::spawn(async move {
                let ctx = Context::background();
                for i in 0..200 {
                    let key = format!("w{}-k{}", worker, i);
                    s.set(&ctx, &[Item::new(key.clone(), "v", None)]).await.unwrap();
                    assert!(s.has(&ctx, &[key.clone()]).await.unwrap()[&key]);
                    // Odd keys are removed again
                    if i % 2 == 1 {
                        s.delete(&ctx, &[key]).await.unwrap();
                    }
                }
            }));
        }

        for task in tasks {
            task.await.unwrap();
        }

        let ctx = Context::background();
        assert_eq!(s.len(), 8 * 100);
        for worker in 0..8 {
            for i in 0..200 {
                let key = format!("w{}-k{}", worker, i);
                let present = s.get(&ctx, &key).await.unwrap().is_some();
                assert_eq!(present, i % 2 == 0, "{}", key);
            }
        }
    }
}
