//! Chunk store trait and SQLite implementation.

use crate::error::{StoreError, StoreResult};
use crate::models::{ArtifactMeta, ChunkRow};
use async_trait::async_trait;
use futures::Stream;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::path::Path;
use std::pin::Pin;
use std::str::FromStr;
use std::time::Duration;
use time::OffsetDateTime;

/// SQLite schema (embedded).
const SQLITE_SCHEMA: &str = include_str!("sqlite_schema.sql");

/// A pull-based stream of chunk rows in ascending `chunk_index` order.
///
/// At most one row is materialized per consumer step, which is what keeps
/// restore memory bounded to a single chunk.
pub type ChunkStream = Pin<Box<dyn Stream<Item = StoreResult<ChunkRow>> + Send + 'static>>;

/// Relational persistence primitive for chunk rows.
///
/// The store is deliberately dumb: idempotent row writes, ordered reads,
/// wholesale deletes. Completeness checks, retry, and fallback policy all
/// live above it.
#[async_trait]
pub trait ChunkStore: Send + Sync {
    /// Upsert a single chunk row keyed by `(artifact_name, chunk_index)`.
    ///
    /// Safe to call repeatedly for the same key; a retried upload
    /// overwrites rather than duplicates.
    async fn upsert_chunk(&self, chunk: &ChunkRow) -> StoreResult<()>;

    /// Stamp the final chunk count on every existing row for `name`.
    ///
    /// Called once per upload, after the last chunk is written. Only after
    /// this does the artifact look potentially complete.
    async fn finalize_total_chunks(&self, name: &str, true_count: u32) -> StoreResult<()>;

    /// Artifact-level metadata, or `None` if no rows exist.
    async fn get_metadata(&self, name: &str) -> StoreResult<Option<ArtifactMeta>>;

    /// All chunk rows for `name`, sorted ascending by `chunk_index`.
    ///
    /// Yields whatever exists even if the set is incomplete; checking
    /// against `total_chunks` is the caller's responsibility.
    fn get_chunks_ordered(&self, name: &str) -> ChunkStream;

    /// Remove every row for `name` (invalidation / wholesale refresh).
    async fn delete_all(&self, name: &str) -> StoreResult<()>;

    /// Run schema migrations.
    async fn migrate(&self) -> StoreResult<()>;

    /// Check connectivity and health.
    async fn health_check(&self) -> StoreResult<()>;
}

/// SQLite-backed chunk store.
pub struct SqliteChunkStore {
    pool: Pool<Sqlite>,
}

impl SqliteChunkStore {
    /// Open (creating if missing) a SQLite chunk store at `path`.
    pub async fn new(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let opts = SqliteConnectOptions::from_str(&format!("sqlite:{}?mode=rwc", path.display()))?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            // Prevent transient "database is locked" errors under concurrent access.
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            // SQLite permits limited write concurrency; a single connection
            // avoids persistent "database is locked" failures.
            .max_connections(1)
            .connect_with(opts)
            .await?;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }
}

#[async_trait]
impl ChunkStore for SqliteChunkStore {
    async fn upsert_chunk(&self, chunk: &ChunkRow) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO chunks (artifact_name, chunk_index, chunk_data, chunk_hash,
                                uncompressed_size, total_chunks, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(artifact_name, chunk_index) DO UPDATE SET
                chunk_data = excluded.chunk_data,
                chunk_hash = excluded.chunk_hash,
                uncompressed_size = excluded.uncompressed_size,
                total_chunks = excluded.total_chunks,
                created_at = excluded.created_at
            "#,
        )
        .bind(&chunk.artifact_name)
        .bind(chunk.chunk_index)
        .bind(&chunk.chunk_data)
        .bind(&chunk.chunk_hash)
        .bind(chunk.uncompressed_size)
        .bind(chunk.total_chunks)
        .bind(chunk.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn finalize_total_chunks(&self, name: &str, true_count: u32) -> StoreResult<()> {
        let result = sqlx::query("UPDATE chunks SET total_chunks = ? WHERE artifact_name = ?")
            .bind(true_count as i32)
            .bind(name)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!(
                "no chunk rows to finalize for artifact '{name}'"
            )));
        }
        Ok(())
    }

    async fn get_metadata(&self, name: &str) -> StoreResult<Option<ArtifactMeta>> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunks WHERE artifact_name = ?")
            .bind(name)
            .fetch_one(&self.pool)
            .await?;
        if count == 0 {
            return Ok(None);
        }

        // MIN(total_chunks) is conservative: any unfinalized row drags the
        // whole artifact back to the pending sentinel.
        let (total_chunks, total_size, artifact_size, updated_at): (i64, i64, i64, OffsetDateTime) =
            sqlx::query_as(
                "SELECT MIN(total_chunks), COALESCE(SUM(LENGTH(chunk_data)), 0),
                        COALESCE(SUM(uncompressed_size), 0), MAX(created_at)
                 FROM chunks WHERE artifact_name = ?",
            )
            .bind(name)
            .fetch_one(&self.pool)
            .await?;

        Ok(Some(ArtifactMeta {
            chunks_present: count as u64,
            total_chunks: total_chunks as i32,
            total_size: total_size as u64,
            artifact_size: artifact_size as u64,
            updated_at,
        }))
    }

    fn get_chunks_ordered(&self, name: &str) -> ChunkStream {
        let pool = self.pool.clone();
        let name = name.to_string();
        // Keyset pagination: one row per pull, never the whole set.
        Box::pin(futures::stream::try_unfold(
            (pool, name, -1i32),
            |(pool, name, last_index)| async move {
                let row = sqlx::query_as::<_, ChunkRow>(
                    "SELECT * FROM chunks
                     WHERE artifact_name = ? AND chunk_index > ?
                     ORDER BY chunk_index LIMIT 1",
                )
                .bind(&name)
                .bind(last_index)
                .fetch_optional(&pool)
                .await
                .map_err(StoreError::from)?;

                Ok(row.map(|row| {
                    let next_index = row.chunk_index;
                    (row, (pool, name, next_index))
                }))
            },
        ))
    }

    async fn delete_all(&self, name: &str) -> StoreResult<()> {
        let result = sqlx::query("DELETE FROM chunks WHERE artifact_name = ?")
            .bind(name)
            .execute(&self.pool)
            .await?;
        tracing::debug!(
            artifact = %name,
            rows_deleted = result.rows_affected(),
            "Deleted chunk rows"
        );
        Ok(())
    }

    async fn migrate(&self) -> StoreResult<()> {
        sqlx::raw_sql(SQLITE_SCHEMA).execute(&self.pool).await?;
        Ok(())
    }

    async fn health_check(&self) -> StoreResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
