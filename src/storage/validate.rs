//! Key, item and TTL validation shared by every storage

use super::Item;
use crate::error::{KvError, Result};
use std::time::{Duration, Instant};

/// Reject empty and whitespace-only keys
pub fn validate_key(key: &str) -> Result<()> {
    if key.trim().is_empty() {
        return Err(KvError::EmptyKey);
    }
    Ok(())
}

/// Reject an empty key list, then every key individually
pub fn validate_keys<S: AsRef<str>>(keys: &[S]) -> Result<()> {
    if keys.is_empty() {
        return Err(KvError::NoKeys);
    }
    keys.iter().try_for_each(|k| validate_key(k.as_ref()))
}

/// Reject the zero item (no key, no value), then check the key
pub fn validate_item(item: &Item) -> Result<()> {
    if item.key.is_empty() && item.value.is_empty() {
        return Err(KvError::EmptyItem);
    }
    validate_key(&item.key)
}

/// Parse a wire TTL
///
/// `""` and `"0"` mean no expiry, a non-negative decimal integer is a
/// number of seconds from now. Anything else is rejected.
pub fn parse_ttl(raw: &str) -> Result<Option<Duration>> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }

    if !trimmed.bytes().all(|b| b.is_ascii_digit()) {
        return Err(KvError::BadTtl(raw.to_string()));
    }

    let seconds = trimmed
        .parse::<u64>()
        .map_err(|_| KvError::BadTtl(raw.to_string()))?;

    Ok(match seconds {
        0 => None,
        s => Some(Duration::from_secs(s)),
    })
}

/// Turn a relative TTL into an absolute deadline
pub fn expires_at(now: Instant, ttl: Option<Duration>) -> Result<Option<Instant>> {
    match ttl {
        None => Ok(None),
        Some(ttl) => now
            .checked_add(ttl)
            .map(Some)
            .ok_or_else(|| KvError::BadTtl(format!("{}s", ttl.as_secs()))),
    }
}
