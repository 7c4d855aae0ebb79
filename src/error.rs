//! Error types shared by every storage and by the RPC layer
//!
//! Validation and routing errors are detected before any storage is touched.
//! Backend errors are carried through unchanged; nothing here retries.

use crate::protocol::DecodeError;
use thiserror::Error;

/// Main error type for storage and dispatch operations
#[derive(Debug, Error)]
pub enum KvError {
    #[error("key is empty or whitespace only")]
    EmptyKey,

    #[error("at least one key is required")]
    NoKeys,

    #[error("item is empty")]
    EmptyItem,

    #[error("no configuration provided: {0}")]
    NoConfig(String),

    #[error("bad TTL value '{0}'")]
    BadTtl(String),

    #[error("unknown storage '{0}'")]
    UnknownStorage(String),

    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("backend error: {0:#}")]
    Backend(#[from] anyhow::Error),

    #[error("operation cancelled")]
    Cancelled,

    /// One backend of a multi-storage `Set` failed. Other backends may
    /// already hold the items; nothing is rolled back.
    #[error("storage '{storage}' failed: {source}")]
    Fanout {
        storage: String,
        #[source]
        source: Box<KvError>,
    },

    #[error("configuration error: {0}")]
    Config(String),
}

/// Convenience type alias for Results
pub type Result<T> = std::result::Result<T, KvError>;

impl KvError {
    /// Wrap an adapter failure
    pub fn backend(err: impl Into<anyhow::Error>) -> Self {
        KvError::Backend(err.into())
    }

    /// Numeric code written into error response frames
    pub fn code(&self) -> u8 {
        match self {
            KvError::EmptyKey => 1,
            KvError::NoKeys => 2,
            KvError::EmptyItem => 3,
            KvError::NoConfig(_) | KvError::Config(_) => 4,
            KvError::BadTtl(_) => 5,
            KvError::UnknownStorage(_) => 6,
            KvError::Decode(_) => 7,
            KvError::Backend(_) => 8,
            KvError::Cancelled => 9,
            KvError::Fanout { .. } => 10,
        }
    }

    /// Check if error should be logged as warning vs error
    pub fn is_client_error(&self) -> bool {
        match self {
            KvError::EmptyKey
            | KvError::NoKeys
            | KvError::EmptyItem
            | KvError::BadTtl(_)
            | KvError::UnknownStorage(_)
            | KvError::Decode(_)
            | KvError::Cancelled => true,
            KvError::Fanout { source, .. } => source.is_client_error(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_codes_are_distinct_per_kind() {
        let errors = [
            KvError::EmptyKey,
            KvError::NoKeys,
            KvError::EmptyItem,
            KvError::NoConfig("x".into()),
            KvError::BadTtl("x".into()),
            KvError::UnknownStorage("x".into()),
            KvError::Decode(DecodeError::Truncated),
            KvError::backend(anyhow::anyhow!("boom")),
            KvError::Cancelled,
            KvError::Fanout {
                storage: "x".into(),
                source: Box::new(KvError::Cancelled),
            },
        ];
        let codes: HashSet<u8> = errors.iter().map(|e| e.code()).collect();
        assert_eq!(codes.len(), errors.len());
        assert_eq!(codes, (1..=10).collect::<HashSet<u8>>());
    }

    #[test]
    fn test_fanout_names_storage() {
        let err = KvError::Fanout {
            storage: "disk".into(),
            source: Box::new(KvError::backend(anyhow::anyhow!("disk full"))),
        };
        let msg = err.to_string();
        assert!(msg.contains("disk"));
        assert!(msg.contains("disk full"));
        assert!(!err.is_client_error());
    }

    #[test]
    fn test_client_errors() {
        assert!(KvError::EmptyKey.is_client_error());
        assert!(KvError::UnknownStorage("nope".into()).is_client_error());
        assert!(!KvError::backend(anyhow::anyhow!("io")).is_client_error());
    }
}
