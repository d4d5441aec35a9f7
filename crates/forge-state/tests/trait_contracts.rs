//! Trait contract tests for DocumentStore, CasStore and SemanticMemory.
//!
//! Document store contracts run against both the in-memory fake and the
//! SurrealDB store (in-memory engine).

use forge_state::fakes::{MemoryCasStore, MemoryDocumentStore, MemorySemanticMemory};
use forge_state::storage_traits::*;
use forge_state::{StorageError, SurrealDocumentStore};
use serde_json::json;

// ===========================================================================
// DocumentStore contract
// ===========================================================================

async fn put_then_get_bumps_revision(store: &dyn DocumentStore) {
    assert!(store.get("a/1").await.unwrap().is_none());
    assert_eq!(store.put("a/1", json!({"n": 1})).await.unwrap(), 1);
    assert_eq!(store.put("a/1", json!({"n": 2})).await.unwrap(), 2);

    let doc = store.get("a/1").await.unwrap().unwrap();
    assert_eq!(doc.revision, 2);
    assert_eq!(doc.value, json!({"n": 2}));
}

async fn create_only_cas_rejects_existing(store: &dyn DocumentStore) {
    assert_eq!(
        store
            .compare_and_swap("head/x", None, json!(1))
            .await
            .unwrap(),
        1
    );
    let err = store
        .compare_and_swap("head/x", None, json!(2))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        StorageError::CasConflict {
            expected: None,
            actual: Some(1),
            ..
        }
    ));
    assert_eq!(store.get("head/x").await.unwrap().unwrap().value, json!(1));
}

async fn stale_revision_cas_conflicts(store: &dyn DocumentStore) {
    store.put("k", json!("v1")).await.unwrap();
    let rev = store.compare_and_swap("k", Some(1), json!("v2")).await.unwrap();
    assert_eq!(rev, 2);

    let err = store
        .compare_and_swap("k", Some(1), json!("v3"))
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::CasConflict { actual: Some(2), .. }));
    assert_eq!(store.get("k").await.unwrap().unwrap().value, json!("v2"));
}

async fn list_prefix_is_ordered_and_scoped(store: &dyn DocumentStore) {
    store.put("agents/b/v2", json!(2)).await.unwrap();
    store.put("agents/a/v1", json!(1)).await.unwrap();
    store.put("agents/b/v1", json!(3)).await.unwrap();
    store.put("tasks/t1", json!(4)).await.unwrap();

    let keys: Vec<String> = store
        .list_prefix("agents/")
        .await
        .unwrap()
        .into_iter()
        .map(|d| d.key)
        .collect();
    assert_eq!(keys, vec!["agents/a/v1", "agents/b/v1", "agents/b/v2"]);

    store.delete("agents/a/v1").await.unwrap();
    store.delete("agents/missing").await.unwrap();
    assert_eq!(store.list_prefix("agents/").await.unwrap().len(), 2);
}

#[tokio::test]
async fn memory_document_store_contract() {
    put_then_get_bumps_revision(&MemoryDocumentStore::new()).await;
    create_only_cas_rejects_existing(&MemoryDocumentStore::new()).await;
    stale_revision_cas_conflicts(&MemoryDocumentStore::new()).await;
    list_prefix_is_ordered_and_scoped(&MemoryDocumentStore::new()).await;
}

#[tokio::test]
async fn surreal_document_store_contract() {
    put_then_get_bumps_revision(&SurrealDocumentStore::in_memory().await.unwrap()).await;
    create_only_cas_rejects_existing(&SurrealDocumentStore::in_memory().await.unwrap()).await;
    stale_revision_cas_conflicts(&SurrealDocumentStore::in_memory().await.unwrap()).await;
    list_prefix_is_ordered_and_scoped(&SurrealDocumentStore::in_memory().await.unwrap()).await;
}

#[tokio::test]
async fn document_decode_into_typed_record() {
    #[derive(serde::Deserialize)]
    struct Head {
        latest: u64,
    }
    let store = MemoryDocumentStore::new();
    store.put("head", json!({"latest": 7})).await.unwrap();
    let head: Head = store.get("head").await.unwrap().unwrap().decode().unwrap();
    assert_eq!(head.latest, 7);
}

// ===========================================================================
// CasStore contract
// ===========================================================================

#[tokio::test]
async fn cas_put_returns_digest_and_round_trips() {
    let store = MemoryCasStore::new();
    let digest = store.put(b"fn name() { return \"x\"; }").await.unwrap();

    assert_eq!(digest, ContentDigest::from_bytes(b"fn name() { return \"x\"; }"));
    assert!(store.contains(&digest).await.unwrap());
    assert_eq!(
        store.get(&digest).await.unwrap(),
        b"fn name() { return \"x\"; }".to_vec()
    );
}

#[tokio::test]
async fn cas_missing_digest_is_not_found() {
    let store = MemoryCasStore::new();
    let bogus = ContentDigest::from_bytes(b"never stored");
    let err = store.get(&bogus).await.unwrap_err();
    assert!(matches!(err, StorageError::NotFound { .. }));

    store.delete(&bogus).await.unwrap();
}

// ===========================================================================
// SemanticMemory contract
// ===========================================================================

#[tokio::test]
async fn semantic_query_orders_by_similarity_and_truncates() {
    let mem = MemorySemanticMemory::new();
    mem.upsert("tip", vec![1.0, 0.0, 0.0], json!({"text": "tip"}))
        .await
        .unwrap();
    mem.upsert("sum", vec![0.0, 1.0, 0.0], json!({"text": "sum"}))
        .await
        .unwrap();
    mem.upsert("mix", vec![0.7, 0.7, 0.0], json!({"text": "mix"}))
        .await
        .unwrap();

    let hits = mem.query(&[1.0, 0.1, 0.0], 2).await.unwrap();
    assert_eq!(hits.len(), 2);
    assert_eq!(hits[0].id, "tip");
    assert_eq!(hits[1].id, "mix");
    assert!(hits[0].score >= hits[1].score);
}

#[tokio::test]
async fn semantic_upsert_replaces_and_clear_empties() {
    let mem = MemorySemanticMemory::new();
    mem.upsert("a", vec![1.0], json!(1)).await.unwrap();
    mem.upsert("a", vec![1.0], json!(2)).await.unwrap();
    assert_eq!(mem.len().await.unwrap(), 1);
    assert_eq!(mem.query(&[1.0], 5).await.unwrap()[0].metadata, json!(2));

    mem.clear().await.unwrap();
    assert_eq!(mem.len().await.unwrap(), 0);
}
