//! Lock-striped map backing the in-memory storage
//!
//! Keys are routed to one of N stripes with SipHash13. Each stripe is its own
//! `RwLock<HashMap>`, so readers never block each other and writers only
//! contend when their keys land in the same stripe.

use super::entry::Entry;
use siphasher::sip::SipHasher13;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Instant;

type Stripe = HashMap<String, Entry>;

/// Upper bound on the stripe count
const MAX_STRIPES: usize = 256;

/// Concurrent key → entry map split into independently locked stripes
pub struct StripedMap {
    stripes: Box<[RwLock<Stripe>]>,
}

impl StripedMap {
    /// Create a map with `num_stripes` stripes (rounded up to a power of two)
    pub fn new(num_stripes: usize) -> Self {
        let n = num_stripes.clamp(1, MAX_STRIPES).next_power_of_two();
        let stripes = (0..n).map(|_| RwLock::new(Stripe::new())).collect();
        StripedMap { stripes }
    }

    /// Stripe count sized for this machine: 4 per CPU
    pub fn default_stripes() -> usize {
        (num_cpus::get() * 4).clamp(1, MAX_STRIPES)
    }

    /// Route a key to a stripe index
    pub fn stripe_for(&self, key: &str) -> usize {
        let mut hasher = SipHasher13::new();
        key.hash(&mut hasher);
        (hasher.finish() as usize) & (self.stripes.len() - 1)
    }

    /// Get the number of stripes
    pub fn num_stripes(&self) -> usize {
        self.stripes.len()
    }

    fn read_stripe(&self, idx: usize) -> RwLockReadGuard<'_, Stripe> {
        // A panic while holding the lock cannot leave a half-written entry
        // behind (entries are replaced whole), so poisoning is ignored.
        self.stripes[idx]
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn write_stripe(&self, idx: usize) -> RwLockWriteGuard<'_, Stripe> {
        self.stripes[idx]
            .write()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Look at the entry for a key under the stripe's read lock
    pub fn read<R>(&self, key: &str, f: impl FnOnce(Option<&Entry>) -> R) -> R {
        let stripe = self.read_stripe(self.stripe_for(key));
        f(stripe.get(key))
    }

    /// Store an entry, replacing any previous one
    pub fn insert(&self, key: String, entry: Entry) {
        let idx = self.stripe_for(&key);
        self.write_stripe(idx).insert(key, entry);
    }

    /// Replace an existing entry with `f(old)`
    ///
    /// `f` returning `None` leaves the entry untouched. Absent keys are not
    /// created. Returns whether a replacement happened.
    pub fn replace_existing(&self, key: &str, f: impl FnOnce(&Entry) -> Option<Entry>) -> bool {
        let mut stripe = self.write_stripe(self.stripe_for(key));
        match stripe.get_mut(key) {
            Some(current) => match f(current) {
                Some(next) => {
                    *current = next;
                    true
                }
                None => false,
            },
            None => false,
        }
    }

    /// Remove a key, returns true if the key existed
    pub fn remove(&self, key: &str) -> bool {
        let idx = self.stripe_for(key);
        self.write_stripe(idx).remove(key).is_some()
    }

    /// Snapshot the keys of one stripe whose deadline is due at `now`
    pub fn collect_due(&self, idx: usize, now: Instant) -> Vec<(String, Instant)> {
        self.read_stripe(idx)
            .iter()
            .filter_map(|(key, entry)| match entry.expires_at {
                Some(at) if now >= at => Some((key.clone(), at)),
                _ => None,
            })
            .collect()
    }

    /// Remove snapshotted keys from one stripe, re-checking each deadline
    ///
    /// A key is only removed if its deadline is unchanged since the snapshot.
    /// An entry rewritten in between (new value or extended expiry) stays.
    /// Returns the number of entries removed.
    pub fn remove_due(&self, idx: usize, due: &[(String, Instant)], now: Instant) -> usize {
        if due.is_empty() {
            return 0;
        }

        let mut stripe = self.write_stripe(idx);
        let mut removed = 0;
        for (key, snapshot) in due {
            let still_due = stripe
                .get(key)
                .is_some_and(|e| e.expires_at == Some(*snapshot) && e.is_expired_at(now));
            if still_due {
                stripe.remove(key);
                removed += 1;
            }
        }
        removed
    }

    /// Number of stored entries (including expired ones not yet reaped)
    pub fn len(&self) -> usize {
        (0..self.stripes.len())
            .map(|idx| self.read_stripe(idx).len())
            .sum()
    }

    /// Check if the map is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove all entries, one stripe at a time
    pub fn clear(&self) {
        for idx in 0..self.stripes.len() {
            self.write_stripe(idx).clear();
        }
    }
}

impl Default for StripedMap {
    fn default() -> Self {
        Self::new(Self::default_stripes())
    }
}
