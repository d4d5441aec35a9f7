//! Forge-State: persistence layer for Agent Forge
//!
//! Everything the engine keeps across calls lives behind the traits in
//! [`storage_traits`]:
//!
//! - `DocumentStore`: JSON documents with per-key revisions and compare-and-swap
//! - `CasStore`: content-addressed blobs (generated agent sources)
//! - `SemanticMemory`: vector upsert/query for context enrichment
//!
//! ## Layer 0 - Data/Persistence
//!
//! In-memory fakes live in [`fakes`]; [`SurrealDocumentStore`] backs the
//! document store with SurrealDB (`mem://` or `surrealkv://`), and
//! [`DocumentCasStore`] keeps blobs in whichever document store is in use.

mod document_cas;
mod error;
pub mod fakes;
pub mod storage_traits;
mod surreal_store;

pub use document_cas::DocumentCasStore;
pub use error::StorageError;
pub use storage_traits::{
    cosine_similarity, CasStore, ContentDigest, Document, DocumentStore, MemoryMatch,
    SemanticMemory, StorageResult,
};
pub use surreal_store::SurrealDocumentStore;
