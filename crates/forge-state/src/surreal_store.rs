//! SurrealDB-backed `DocumentStore`
//!
//! Documents live in one SCHEMAFULL table with a UNIQUE index on `key`, so a
//! create-only write that races another create fails inside the database.
//! Conditional updates are a single `UPDATE ... WHERE revision = $expected`
//! statement.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use surrealdb::engine::any::Any;
use surrealdb::sql::Datetime as SurrealDatetime;
use surrealdb::Surreal;
use tracing::{debug, info, instrument};

use crate::error::StorageError;
use crate::storage_traits::{Document, DocumentStore, StorageResult};

const PUT_ATTEMPTS: usize = 3;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct DbDocument {
    key: String,
    value_json: String,
    revision: u64,
    updated_at: SurrealDatetime,
}

impl DbDocument {
    fn new(key: &str, value: &serde_json::Value, revision: u64) -> StorageResult<Self> {
        Ok(Self {
            key: key.to_string(),
            value_json: serde_json::to_string(value)?,
            revision,
            updated_at: SurrealDatetime::from(Utc::now()),
        })
    }

    fn into_document(self) -> StorageResult<Document> {
        Ok(Document {
            value: serde_json::from_str(&self.value_json)?,
            key: self.key,
            revision: self.revision,
            updated_at: DateTime::<Utc>::from(self.updated_at),
        })
    }
}

/// SurrealDB connection implementing [`DocumentStore`].
#[derive(Clone)]
pub struct SurrealDocumentStore {
    db: Surreal<Any>,
}

impl SurrealDocumentStore {
    /// Connect to an in-memory database.
    pub async fn in_memory() -> StorageResult<Self> {
        Self::connect("mem://").await
    }

    /// Connect to any SurrealDB endpoint (`mem://`, `surrealkv://path`, `ws://host`).
    #[instrument(skip_all, fields(url = %url))]
    pub async fn connect(url: &str) -> StorageResult<Self> {
        info!("Connecting to SurrealDB");
        let db = surrealdb::engine::any::connect(url)
            .await
            .map_err(|e| StorageError::Connection(format!("Failed to connect to {url}: {e}")))?;

        db.use_ns("forge")
            .use_db("main")
            .await
            .map_err(|e| StorageError::Connection(e.to_string()))?;

        let store = Self { db };
        store.init_schema().await?;
        Ok(store)
    }

    async fn init_schema(&self) -> StorageResult<()> {
        debug!("Initializing document schema");
        let schema = r#"
            DEFINE TABLE IF NOT EXISTS documents SCHEMAFULL;
            DEFINE FIELD IF NOT EXISTS key ON documents TYPE string;
            DEFINE FIELD IF NOT EXISTS value_json ON documents TYPE string;
            DEFINE FIELD IF NOT EXISTS revision ON documents TYPE int;
            DEFINE FIELD IF NOT EXISTS updated_at ON documents TYPE datetime;
            DEFINE INDEX IF NOT EXISTS idx_document_key ON documents FIELDS key UNIQUE;
        "#;
        self.db
            .query(schema)
            .await
            .map_err(|e| StorageError::Connection(format!("schema setup failed: {e}")))?
            .check()
            .map_err(|e| StorageError::Connection(format!("schema setup failed: {e}")))?;
        Ok(())
    }

    async fn current_revision(&self, key: &str) -> StorageResult<Option<u64>> {
        Ok(self.get(key).await?.map(|d| d.revision))
    }

    async fn create(&self, key: &str, value: &serde_json::Value) -> StorageResult<u64> {
        let record = DbDocument::new(key, value, 1)?;
        let outcome = self
            .db
            .query("CREATE documents CONTENT $doc")
            .bind(("doc", record))
            .await
            .and_then(|mut r| r.take::<Vec<DbDocument>>(0));

        match outcome {
            Ok(created) if !created.is_empty() => Ok(1),
            Ok(_) => Err(StorageError::Backend(format!("create of '{key}' returned nothing"))),
            Err(e) => {
                // The unique index rejects a second create for the same key.
                let actual = self.current_revision(key).await?;
                if actual.is_some() {
                    Err(StorageError::CasConflict {
                        key: key.to_string(),
                        expected: None,
                        actual,
                    })
                } else {
                    Err(StorageError::from(e))
                }
            }
        }
    }

    async fn update_if(
        &self,
        key: &str,
        expected: u64,
        value: &serde_json::Value,
    ) -> StorageResult<Option<u64>> {
        let next = expected + 1;
        let mut response = self
            .db
            .query(
                "UPDATE documents SET value_json = $value, revision = $next, updated_at = time::now() \
                 WHERE key = $key AND revision = $expected RETURN AFTER",
            )
            .bind(("value", serde_json::to_string(value)?))
            .bind(("next", next))
            .bind(("key", key.to_string()))
            .bind(("expected", expected))
            .await?;
        let updated: Vec<DbDocument> = response.take(0)?;
        Ok(if updated.is_empty() { None } else { Some(next) })
    }
}

#[async_trait]
impl DocumentStore for SurrealDocumentStore {
    async fn get(&self, key: &str) -> StorageResult<Option<Document>> {
        let mut response = self
            .db
            .query("SELECT * FROM documents WHERE key = $key")
            .bind(("key", key.to_string()))
            .await?;
        let docs: Vec<DbDocument> = response.take(0)?;
        docs.into_iter().next().map(DbDocument::into_document).transpose()
    }

    async fn put(&self, key: &str, value: serde_json::Value) -> StorageResult<u64> {
        for _ in 0..PUT_ATTEMPTS {
            match self.current_revision(key).await? {
                None => match self.create(key, &value).await {
                    Ok(rev) => return Ok(rev),
                    Err(StorageError::CasConflict { .. }) => continue,
                    Err(e) => return Err(e),
                },
                Some(rev) => {
                    if let Some(next) = self.update_if(key, rev, &value).await? {
                        return Ok(next);
                    }
                }
            }
        }
        Err(StorageError::Backend(format!(
            "put on '{key}' lost {PUT_ATTEMPTS} consecutive races"
        )))
    }

    #[instrument(skip(self, value))]
    async fn compare_and_swap(
        &self,
        key: &str,
        expected_revision: Option<u64>,
        value: serde_json::Value,
    ) -> StorageResult<u64> {
        match expected_revision {
            None => self.create(key, &value).await,
            Some(expected) => match self.update_if(key, expected, &value).await? {
                Some(next) => Ok(next),
                None => Err(StorageError::CasConflict {
                    key: key.to_string(),
                    expected: Some(expected),
                    actual: self.current_revision(key).await?,
                }),
            },
        }
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        self.db
            .query("DELETE documents WHERE key = $key")
            .bind(("key", key.to_string()))
            .await?
            .check()?;
        Ok(())
    }

    async fn list_prefix(&self, prefix: &str) -> StorageResult<Vec<Document>> {
        let mut response = self
            .db
            .query("SELECT * FROM documents WHERE string::starts_with(key, $prefix) ORDER BY key ASC")
            .bind(("prefix", prefix.to_string()))
            .await?;
        let docs: Vec<DbDocument> = response.take(0)?;
        docs.into_iter().map(DbDocument::into_document).collect()
    }
}
