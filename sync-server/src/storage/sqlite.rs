//! SQLite storage backend for sync-server.

use super::{AuditSink, PatchSummary, SynchronizableService};
use crate::error::StorageError;
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};
use sync_types::{DiffSyncEntity, PatchId};

/// SQLite-backed document store and audit log.
///
/// Uses WAL mode for concurrent reads/writes.
#[derive(Debug, Clone)]
pub struct SqliteStorage {
    pool: SqlitePool,
}

impl SqliteStorage {
    /// Open (creating if missing) the database at `path`.
    pub async fn new(path: &Path) -> Result<Self, StorageError> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            .busy_timeout(std::time::Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(10)
            .connect_with(options)
            .await?;

        let storage = Self { pool };
        storage.run_migrations().await?;
        Ok(storage)
    }

    /// Create an in-memory SQLite storage (for testing).
    pub async fn in_memory() -> Result<Self, StorageError> {
        let options = SqliteConnectOptions::from_str(":memory:")?;

        // Every connection to :memory: is its own database.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        let storage = Self { pool };
        storage.run_migrations().await?;
        Ok(storage)
    }

    /// Close the pool; later calls fail with a database error.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    async fn run_migrations(&self) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS documents (
                entity_type TEXT NOT NULL,
                entity_id TEXT NOT NULL,
                content TEXT NOT NULL,
                updated_at INTEGER NOT NULL,
                PRIMARY KEY (entity_type, entity_id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS patch_summaries (
                patch_id BLOB PRIMARY KEY,
                client_id TEXT NOT NULL,
                entity_id TEXT NOT NULL,
                entity_name TEXT NOT NULL,
                serialized_patches TEXT NOT NULL,
                n INTEGER NOT NULL,
                m INTEGER NOT NULL,
                recorded_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_summaries_entity ON patch_summaries(entity_name, entity_id)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Audit records for an entity, oldest first.
    pub async fn summaries(&self, entity: &DiffSyncEntity) -> Result<Vec<PatchSummary>, StorageError> {
        let rows = sqlx::query_as::<_, SummaryRow>(
            r#"
            SELECT patch_id, client_id, entity_id, entity_name, serialized_patches, n, m
            FROM patch_summaries
            WHERE entity_name = ?1 AND entity_id = ?2
            ORDER BY rowid ASC
            "#,
        )
        .bind(&entity.entity_type)
        .bind(&entity.entity_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(|row| row.try_into()).collect()
    }

    fn current_timestamp() -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0)
    }
}

#[async_trait]
impl SynchronizableService for SqliteStorage {
    async fn get_entity(&self, entity: &DiffSyncEntity) -> Result<String, StorageError> {
        let content: Option<String> = sqlx::query_scalar(
            "SELECT content FROM documents WHERE entity_type = ?1 AND entity_id = ?2",
        )
        .bind(&entity.entity_type)
        .bind(&entity.entity_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(content.unwrap_or_default())
    }

    async fn persist(&self, entity: &DiffSyncEntity, content: &str) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            INSERT INTO documents (entity_type, entity_id, content, updated_at)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(entity_type, entity_id) DO UPDATE
                SET content = excluded.content, updated_at = excluded.updated_at
            "#,
        )
        .bind(&entity.entity_type)
        .bind(&entity.entity_id)
        .bind(content)
        .bind(Self::current_timestamp())
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[async_trait]
impl AuditSink for SqliteStorage {
    async fn record(&self, summary: PatchSummary) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            INSERT INTO patch_summaries
                (patch_id, client_id, entity_id, entity_name, serialized_patches, n, m, recorded_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            ON CONFLICT(patch_id) DO NOTHING
            "#,
        )
        .bind(summary.patch_id.as_bytes())
        .bind(&summary.client_id)
        .bind(&summary.entity_id)
        .bind(&summary.entity_name)
        .bind(&summary.serialized_patches)
        .bind(summary.n)
        .bind(summary.m)
        .bind(Self::current_timestamp())
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

/// Internal row type for SQLite queries.
#[derive(sqlx::FromRow)]
struct SummaryRow {
    patch_id: Vec<u8>,
    client_id: String,
    entity_id: String,
    entity_name: String,
    serialized_patches: String,
    n: i64,
    m: i64,
}

impl TryFrom<SummaryRow> for PatchSummary {
    type Error = StorageError;

    fn try_from(row: SummaryRow) -> Result<Self, Self::Error> {
        Ok(PatchSummary {
            patch_id: PatchId::from_bytes(&row.patch_id).ok_or_else(|| {
                StorageError::InvalidRecord(format!("patch_id of {} bytes", row.patch_id.len()))
            })?,
            client_id: row.client_id,
            entity_id: row.entity_id,
            entity_name: row.entity_name,
            serialized_patches: row.serialized_patches,
            n: row.n,
            m: row.m,
        })
    }
}
