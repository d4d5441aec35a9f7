//! Error types for forge-state

use thiserror::Error;

/// Errors surfaced by every storage backend.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StorageError {
    /// Key or digest is absent
    #[error("not found: {key}")]
    NotFound { key: String },

    /// A compare-and-swap observed a different revision than expected
    #[error("revision conflict on '{key}': expected {expected:?}, found {actual:?}")]
    CasConflict {
        key: String,
        expected: Option<u64>,
        actual: Option<u64>,
    },

    /// Digest string is not 64 hex characters
    #[error("invalid content digest: {digest}")]
    InvalidDigest { digest: String },

    /// Backend connection could not be established
    #[error("storage connection failed: {0}")]
    Connection(String),

    /// Backend query or I/O failure
    #[error("storage backend error: {0}")]
    Backend(String),

    /// Stored document could not be (de)serialized
    #[error("storage serialization failed: {0}")]
    Serialization(String),
}

impl From<surrealdb::Error> for StorageError {
    fn from(err: surrealdb::Error) -> Self {
        StorageError::Backend(err.to_string())
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Serialization(err.to_string())
    }
}
