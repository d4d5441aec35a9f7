//! Storage trait definitions for Agent Forge
//!
//! These traits define the persistence seams of the engine:
//! - `DocumentStore`: keyed JSON documents with compare-and-swap
//! - `CasStore`: content-addressed storage (put/get by digest)
//! - `SemanticMemory`: vector store for task context
//!
//! All traits are async and backend-agnostic. In-memory fakes are provided
//! via the `fakes` module.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::error::StorageError;

/// Result type for storage operations
pub type StorageResult<T> = std::result::Result<T, StorageError>;

// ---------------------------------------------------------------------------
// DocumentStore
// ---------------------------------------------------------------------------

/// A stored JSON document together with its revision.
///
/// Revisions start at 1 and grow by one on every successful write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub key: String,
    pub value: serde_json::Value,
    pub revision: u64,
    pub updated_at: DateTime<Utc>,
}

impl Document {
    /// Deserialize the payload into a typed record.
    pub fn decode<T: serde::de::DeserializeOwned>(&self) -> StorageResult<T> {
        serde_json::from_value(self.value.clone()).map_err(StorageError::from)
    }
}

/// Keyed document store.
///
/// Guarantees:
/// - `compare_and_swap(key, None, v)` succeeds only if `key` is absent.
/// - `compare_and_swap(key, Some(r), v)` succeeds only if the stored revision is `r`.
/// - A failed compare-and-swap leaves the stored document untouched and
///   returns `StorageError::CasConflict`.
/// - `list_prefix` returns documents ordered by key.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Fetch a document, `None` if absent.
    async fn get(&self, key: &str) -> StorageResult<Option<Document>>;

    /// Unconditional upsert. Returns the new revision.
    async fn put(&self, key: &str, value: serde_json::Value) -> StorageResult<u64>;

    /// Conditional write against the expected revision (`None` = create-only).
    async fn compare_and_swap(
        &self,
        key: &str,
        expected_revision: Option<u64>,
        value: serde_json::Value,
    ) -> StorageResult<u64>;

    /// Remove a document. No-op if absent.
    async fn delete(&self, key: &str) -> StorageResult<()>;

    /// All documents whose key starts with `prefix`, ordered by key.
    async fn list_prefix(&self, prefix: &str) -> StorageResult<Vec<Document>>;
}

// ---------------------------------------------------------------------------
// CasStore: Content-Addressed Storage
// ---------------------------------------------------------------------------

/// Content digest (SHA-256 hex string).
///
/// The inner field is private so the string is always lowercase hex from
/// `from_bytes` or checked via `TryFrom<String>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ContentDigest(String);

impl ContentDigest {
    /// Compute the SHA-256 digest of the given bytes.
    pub fn from_bytes(data: &[u8]) -> Self {
        use sha2::Digest;
        let mut hasher = Sha256::new();
        hasher.update(data);
        ContentDigest(hex::encode(hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 12 hex chars, for logs.
    pub fn short(&self) -> &str {
        &self.0[..12.min(self.0.len())]
    }
}

impl TryFrom<String> for ContentDigest {
    type Error = StorageError;

    fn try_from(s: String) -> std::result::Result<Self, Self::Error> {
        if s.len() != 64 || !s.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(StorageError::InvalidDigest { digest: s });
        }
        Ok(ContentDigest(s.to_ascii_lowercase()))
    }
}

impl From<ContentDigest> for String {
    fn from(d: ContentDigest) -> Self {
        d.0
    }
}

impl std::fmt::Display for ContentDigest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Content-addressed blob store.
///
/// - `put(data)` always returns the SHA-256 digest of `data`.
/// - `get(digest)` returns the exact bytes previously stored.
#[async_trait]
pub trait CasStore: Send + Sync {
    async fn put(&self, data: &[u8]) -> StorageResult<ContentDigest>;

    /// Returns `StorageError::NotFound` if absent.
    async fn get(&self, digest: &ContentDigest) -> StorageResult<Vec<u8>>;

    async fn contains(&self, digest: &ContentDigest) -> StorageResult<bool>;

    async fn delete(&self, digest: &ContentDigest) -> StorageResult<()>;
}

// ---------------------------------------------------------------------------
// SemanticMemory
// ---------------------------------------------------------------------------

/// One hit from a similarity query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryMatch {
    pub id: String,
    pub score: f32,
    pub metadata: serde_json::Value,
}

/// Vector store used for context enrichment.
///
/// `query` returns at most `k` matches ordered by descending score.
#[async_trait]
pub trait SemanticMemory: Send + Sync {
    async fn upsert(
        &self,
        id: &str,
        vector: Vec<f32>,
        metadata: serde_json::Value,
    ) -> StorageResult<()>;

    async fn query(&self, vector: &[f32], k: usize) -> StorageResult<Vec<MemoryMatch>>;

    /// Drop every entry.
    async fn clear(&self) -> StorageResult<()>;

    async fn len(&self) -> StorageResult<usize>;
}

/// Cosine similarity; zero when either vector has zero norm or lengths differ.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let na: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let nb: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if na == 0.0 || nb == 0.0 {
        0.0
    } else {
        dot / (na * nb)
    }
}
