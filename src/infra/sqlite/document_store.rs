//! SQLite document store
//!
//! `create` is `INSERT ... ON CONFLICT DO NOTHING` and `compare_and_set` is an
//! `UPDATE ... WHERE version = ?`, so both stay atomic across processes that
//! share the database file.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::FromRow;
use std::str::FromStr;
use std::time::Duration;

use crate::infra::document::merge_fields;
use crate::infra::{CheckinError, Document, DocumentStore, QueryOp, Result};

/// SQLite-backed document store
#[derive(Clone)]
pub struct SqliteDocumentStore {
    pool: SqlitePool,
}

impl SqliteDocumentStore {
    /// Create a store over an existing pool. Migrations must already have run.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Open (creating if missing) the database at `url` and run migrations.
    ///
    /// In-memory databases are private to a connection, so they get a
    /// single-connection pool that never recycles it.
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self> {
        let in_memory = url.contains(":memory:") || url.contains("mode=memory");
        let options = SqliteConnectOptions::from_str(url)?
            .create_if_missing(true)
            .busy_timeout(Duration::from_secs(5));

        let pool_options = if in_memory {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(max_connections.max(1))
        };

        let pool = pool_options.connect_with(options).await?;
        let store = Self { pool };
        store.initialize().await?;
        Ok(store)
    }

    /// Initialize the database schema
    pub async fn initialize(&self) -> Result<()> {
        crate::migrations::run_sqlite(&self.pool)
            .await
            .map_err(|e| CheckinError::Configuration(format!("migration failed: {e}")))
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn fetch_collection(&self, collection: &str) -> Result<Vec<Document>> {
        let rows = sqlx::query_as::<_, DocumentRow>(
            r#"
            SELECT id, fields, version
            FROM documents
            WHERE collection = ?
            ORDER BY id ASC
            "#,
        )
        .bind(collection)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Document::try_from).collect()
    }
}

#[async_trait]
impl DocumentStore for SqliteDocumentStore {
    async fn get(&self, collection: &str, id: &str) -> Result<Option<Document>> {
        let row = sqlx::query_as::<_, DocumentRow>(
            "SELECT id, fields, version FROM documents WHERE collection = ? AND id = ?",
        )
        .bind(collection)
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Document::try_from).transpose()
    }

    async fn set(&self, collection: &str, id: &str, fields: Value) -> Result<Document> {
        let fields_json = serde_json::to_string(&fields)?;
        let now = Utc::now().to_rfc3339();

        let (version,): (i64,) = sqlx::query_as(
            r#"
            INSERT INTO documents (collection, id, fields, version, updated_at)
            VALUES (?, ?, ?, 1, ?)
            ON CONFLICT(collection, id)
            DO UPDATE SET fields = excluded.fields,
                          version = documents.version + 1,
                          updated_at = excluded.updated_at
            RETURNING version
            "#,
        )
        .bind(collection)
        .bind(id)
        .bind(&fields_json)
        .bind(&now)
        .fetch_one(&self.pool)
        .await?;

        Ok(Document {
            id: id.to_string(),
            fields,
            version: version as u64,
        })
    }

    async fn update(&self, collection: &str, id: &str, patch: Value) -> Result<bool> {
        // Read-merge-CAS so a concurrent writer is never silently overwritten.
        for _ in 0..8 {
            let Some(mut doc) = self.get(collection, id).await? else {
                return Ok(false);
            };
            merge_fields(&mut doc.fields, patch.clone())?;
            if self
                .compare_and_set(collection, id, doc.version, doc.fields)
                .await?
            {
                return Ok(true);
            }
        }
        Err(CheckinError::VersionConflict {
            collection: collection.to_string(),
            id: id.to_string(),
        })
    }

    async fn create(&self, collection: &str, id: &str, fields: Value) -> Result<bool> {
        let fields_json = serde_json::to_string(&fields)?;
        let now = Utc::now().to_rfc3339();

        let result = sqlx::query(
            r#"
            INSERT INTO documents (collection, id, fields, version, updated_at)
            VALUES (?, ?, ?, 1, ?)
            ON CONFLICT(collection, id) DO NOTHING
            "#,
        )
        .bind(collection)
        .bind(id)
        .bind(&fields_json)
        .bind(&now)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn compare_and_set(
        &self,
        collection: &str,
        id: &str,
        expected_version: u64,
        fields: Value,
    ) -> Result<bool> {
        let fields_json = serde_json::to_string(&fields)?;
        let now = Utc::now().to_rfc3339();

        let result = sqlx::query(
            r#"
            UPDATE documents
            SET fields = ?, version = version + 1, updated_at = ?
            WHERE collection = ? AND id = ? AND version = ?
            "#,
        )
        .bind(&fields_json)
        .bind(&now)
        .bind(collection)
        .bind(id)
        .bind(expected_version as i64)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM documents WHERE collection = ? AND id = ?")
            .bind(collection)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn query(
        &self,
        collection: &str,
        field: &str,
        op: QueryOp,
        value: Value,
    ) -> Result<Vec<Document>> {
        let docs = self.fetch_collection(collection).await?;
        Ok(docs
            .into_iter()
            .filter(|doc| op.matches(doc.field(field), &value))
            .collect())
    }

    async fn list(&self, collection: &str) -> Result<Vec<Document>> {
        self.fetch_collection(collection).await
    }

    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

/// Raw row from the documents table
#[derive(Debug, FromRow)]
struct DocumentRow {
    id: String,
    fields: String,
    version: i64,
}

impl TryFrom<DocumentRow> for Document {
    type Error = CheckinError;

    fn try_from(row: DocumentRow) -> Result<Self> {
        Ok(Document {
            id: row.id,
            fields: serde_json::from_str(&row.fields)?,
            version: row.version as u64,
        })
    }
}
