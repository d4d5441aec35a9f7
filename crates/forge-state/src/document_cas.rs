//! `CasStore` layered over any `DocumentStore`.
//!
//! Blobs live under `cas/{digest}` as hex text, so a SurrealDB-backed
//! document store also persists generated agent sources.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use crate::error::StorageError;
use crate::storage_traits::{CasStore, ContentDigest, DocumentStore, StorageResult};

pub struct DocumentCasStore {
    documents: Arc<dyn DocumentStore>,
}

impl DocumentCasStore {
    pub fn new(documents: Arc<dyn DocumentStore>) -> Self {
        Self { documents }
    }
}

fn blob_key(digest: &ContentDigest) -> String {
    format!("cas/{digest}")
}

#[async_trait]
impl CasStore for DocumentCasStore {
    async fn put(&self, data: &[u8]) -> StorageResult<ContentDigest> {
        let digest = ContentDigest::from_bytes(data);
        let key = blob_key(&digest);
        // Same digest, same bytes: an existing blob is left alone.
        match self
            .documents
            .compare_and_swap(&key, None, json!({ "hex": hex::encode(data) }))
            .await
        {
            Ok(_) | Err(StorageError::CasConflict { .. }) => Ok(digest),
            Err(e) => Err(e),
        }
    }

    async fn get(&self, digest: &ContentDigest) -> StorageResult<Vec<u8>> {
        let key = blob_key(digest);
        let doc = self
            .documents
            .get(&key)
            .await?
            .ok_or_else(|| StorageError::NotFound { key: key.clone() })?;
        let encoded = doc
            .value
            .get("hex")
            .and_then(|v| v.as_str())
            .ok_or_else(|| StorageError::Backend(format!("blob '{key}' has no payload")))?;
        let bytes = hex::decode(encoded)
            .map_err(|e| StorageError::Backend(format!("blob '{key}' is corrupt: {e}")))?;
        if ContentDigest::from_bytes(&bytes) != *digest {
            return Err(StorageError::Backend(format!(
                "blob '{key}' does not match its digest"
            )));
        }
        Ok(bytes)
    }

    async fn contains(&self, digest: &ContentDigest) -> StorageResult<bool> {
        Ok(self.documents.get(&blob_key(digest)).await?.is_some())
    }

    async fn delete(&self, digest: &ContentDigest) -> StorageResult<()> {
        self.documents.delete(&blob_key(digest)).await
    }
}
