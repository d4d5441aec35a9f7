//! In-memory implementations of the storage traits
//!
//! `MemoryDocumentStore`, `MemoryCasStore` and `MemorySemanticMemory`
//! satisfy the trait contracts without any external service. The engine uses
//! them for tests and for single-process runs.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;

use crate::error::StorageError;
use crate::storage_traits::*;

fn lock<T>(m: &Mutex<T>) -> StorageResult<MutexGuard<'_, T>> {
    m.lock()
        .map_err(|_| StorageError::Backend("in-memory store lock poisoned".to_string()))
}

// ---------------------------------------------------------------------------
// MemoryDocumentStore
// ---------------------------------------------------------------------------

/// Document store backed by a `BTreeMap<key, Document>`.
#[derive(Debug, Default)]
pub struct MemoryDocumentStore {
    docs: Mutex<BTreeMap<String, Document>>,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn get(&self, key: &str) -> StorageResult<Option<Document>> {
        Ok(lock(&self.docs)?.get(key).cloned())
    }

    async fn put(&self, key: &str, value: serde_json::Value) -> StorageResult<u64> {
        let mut docs = lock(&self.docs)?;
        let revision = docs.get(key).map(|d| d.revision + 1).unwrap_or(1);
        docs.insert(
            key.to_string(),
            Document {
                key: key.to_string(),
                value,
                revision,
                updated_at: Utc::now(),
            },
        );
        Ok(revision)
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected_revision: Option<u64>,
        value: serde_json::Value,
    ) -> StorageResult<u64> {
        let mut docs = lock(&self.docs)?;
        let actual = docs.get(key).map(|d| d.revision);
        if actual != expected_revision {
            return Err(StorageError::CasConflict {
                key: key.to_string(),
                expected: expected_revision,
                actual,
            });
        }
        let revision = actual.map(|r| r + 1).unwrap_or(1);
        docs.insert(
            key.to_string(),
            Document {
                key: key.to_string(),
                value,
                revision,
                updated_at: Utc::now(),
            },
        );
        Ok(revision)
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        lock(&self.docs)?.remove(key);
        Ok(())
    }

    async fn list_prefix(&self, prefix: &str) -> StorageResult<Vec<Document>> {
        let docs = lock(&self.docs)?;
        Ok(docs
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(_, d)| d.clone())
            .collect())
    }
}

// ---------------------------------------------------------------------------
// MemoryCasStore
// ---------------------------------------------------------------------------

/// Content-addressed store backed by a `HashMap<digest, bytes>`.
#[derive(Debug, Default)]
pub struct MemoryCasStore {
    store: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryCasStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CasStore for MemoryCasStore {
    async fn put(&self, data: &[u8]) -> StorageResult<ContentDigest> {
        let digest = ContentDigest::from_bytes(data);
        lock(&self.store)?.insert(digest.as_str().to_string(), data.to_vec());
        Ok(digest)
    }

    async fn get(&self, digest: &ContentDigest) -> StorageResult<Vec<u8>> {
        lock(&self.store)?
            .get(digest.as_str())
            .cloned()
            .ok_or_else(|| StorageError::NotFound {
                key: digest.as_str().to_string(),
            })
    }

    async fn contains(&self, digest: &ContentDigest) -> StorageResult<bool> {
        Ok(lock(&self.store)?.contains_key(digest.as_str()))
    }

    async fn delete(&self, digest: &ContentDigest) -> StorageResult<()> {
        lock(&self.store)?.remove(digest.as_str());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// MemorySemanticMemory
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct Entry {
    vector: Vec<f32>,
    metadata: serde_json::Value,
}

/// Brute-force cosine-similarity store.
#[derive(Debug, Default)]
pub struct MemorySemanticMemory {
    entries: Mutex<BTreeMap<String, Entry>>,
}

impl MemorySemanticMemory {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SemanticMemory for MemorySemanticMemory {
    async fn upsert(
        &self,
        id: &str,
        vector: Vec<f32>,
        metadata: serde_json::Value,
    ) -> StorageResult<()> {
        lock(&self.entries)?.insert(id.to_string(), Entry { vector, metadata });
        Ok(())
    }

    async fn query(&self, vector: &[f32], k: usize) -> StorageResult<Vec<MemoryMatch>> {
        let entries = lock(&self.entries)?;
        let mut matches: Vec<MemoryMatch> = entries
            .iter()
            .map(|(id, e)| MemoryMatch {
                id: id.clone(),
                score: cosine_similarity(vector, &e.vector),
                metadata: e.metadata.clone(),
            })
            .collect();
        // Stable on ties: BTreeMap iteration already ordered by id.
        matches.sort_by(|a, b| b.score.total_cmp(&a.score));
        matches.truncate(k);
        Ok(matches)
    }

    async fn clear(&self) -> StorageResult<()> {
        lock(&self.entries)?.clear();
        Ok(())
    }

    async fn len(&self) -> StorageResult<usize> {
        Ok(lock(&self.entries)?.len())
    }
}
