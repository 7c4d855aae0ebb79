//! Entry structure for stored values

use bytes::Bytes;
use std::time::Instant;

/// Represents a single entry in an in-memory storage
///
/// An entry is always replaced as a whole, never mutated in place, so a
/// reader holding a clone never sees a half-written value/expiry pair.
#[derive(Debug, Clone, PartialEq)]
pub struct Entry {
    /// The value
    pub value: Bytes,

    /// Optional expiration time (absolute)
    pub expires_at: Option<Instant>,
}

impl Entry {
    /// Create a new entry
    pub fn new(value: impl Into<Bytes>, expires_at: Option<Instant>) -> Self {
        Entry {
            value: value.into(),
            expires_at,
        }
    }

    /// Check if the entry has expired at `now`
    pub fn is_expired_at(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }

    /// Check if the entry has expired
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Instant::now())
    }

    /// Same value, different deadline
    pub fn with_expiration(&self, expires_at: Option<Instant>) -> Self {
        Entry {
            value: self.value.clone(),
            expires_at,
        }
    }

    /// Remaining TTL in whole seconds
    ///
    /// Returns `None` for entries without expiration and `Some(0)` once the
    /// deadline has passed.
    pub fn ttl_seconds(&self, now: Instant) -> Option<u64> {
        self.expires_at
            .map(|at| at.saturating_duration_since(now).as_secs())
    }
}
