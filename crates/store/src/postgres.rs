//! PostgreSQL chunk store.

use crate::error::{StoreError, StoreResult};
use crate::models::{ArtifactMeta, ChunkRow};
use crate::store::{ChunkStore, ChunkStream};
use async_trait::async_trait;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::{Pool, Postgres};
use std::str::FromStr;
use time::OffsetDateTime;

const POSTGRES_SCHEMA: &str = include_str!("postgres_schema.sql");

/// PostgreSQL-backed chunk store for deployments where the chunk rows
/// live in a shared relational service instead of a local file.
pub struct PostgresChunkStore {
    pool: Pool<Postgres>,
}

impl PostgresChunkStore {
    /// Connect using a full connection URL.
    pub async fn from_url(
        url: &str,
        max_connections: u32,
        statement_timeout_ms: u64,
    ) -> StoreResult<Self> {
        let opts = PgConnectOptions::from_str(url)
            .map_err(|e| StoreError::Config(format!("invalid postgres url: {e}")))?;
        Self::connect(opts, max_connections, statement_timeout_ms).await
    }

    /// Connect from discrete host/port/credential parameters.
    #[allow(clippy::too_many_arguments)]
    pub async fn from_params(
        host: &str,
        port: u16,
        username: &str,
        password: &str,
        database: &str,
        max_connections: u32,
        statement_timeout_ms: u64,
    ) -> StoreResult<Self> {
        let opts = PgConnectOptions::new()
            .host(host)
            .port(port)
            .username(username)
            .password(password)
            .database(database);
        Self::connect(opts, max_connections, statement_timeout_ms).await
    }

    async fn connect(
        opts: PgConnectOptions,
        max_connections: u32,
        statement_timeout_ms: u64,
    ) -> StoreResult<Self> {
        // Chunk row round-trips move ~10 MiB per statement; a server-side
        // timeout stops a wedged transfer from pinning a connection forever.
        let opts = opts.options([("statement_timeout", statement_timeout_ms.to_string())]);

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect_with(opts)
            .await?;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    pub fn pool(&self) -> &Pool<Postgres> {
        &self.pool
    }
}

/// Split the embedded schema into individual statements, since a prepared
/// statement may only carry one.
fn schema_statements(schema: &str) -> Vec<&str> {
    schema
        .split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect()
}

#[async_trait]
impl ChunkStore for PostgresChunkStore {
    async fn upsert_chunk(&self, chunk: &ChunkRow) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO chunks (artifact_name, chunk_index, chunk_data, chunk_hash,
                                uncompressed_size, total_chunks, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (artifact_name, chunk_index) DO UPDATE SET
                chunk_data = EXCLUDED.chunk_data,
                chunk_hash = EXCLUDED.chunk_hash,
                uncompressed_size = EXCLUDED.uncompressed_size,
                total_chunks = EXCLUDED.total_chunks,
                created_at = EXCLUDED.created_at
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
        let result = sqlx::query("UPDATE chunks SET total_chunks = $1 WHERE artifact_name = $2")
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
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunks WHERE artifact_name = $1")
            .bind(name)
            .fetch_one(&self.pool)
            .await?;
        if count == 0 {
            return Ok(None);
        }

        let (total_chunks, total_size, artifact_size, updated_at): (i32, i64, i64, OffsetDateTime) =
            sqlx::query_as(
                "SELECT MIN(total_chunks), COALESCE(SUM(OCTET_LENGTH(chunk_data)), 0)::BIGINT,
                        COALESCE(SUM(uncompressed_size), 0)::BIGINT, MAX(created_at)
                 FROM chunks WHERE artifact_name = $1",
            )
            .bind(name)
            .fetch_one(&self.pool)
            .await?;

        Ok(Some(ArtifactMeta {
            chunks_present: count as u64,
            total_chunks,
            total_size: total_size as u64,
            artifact_size: artifact_size as u64,
            updated_at,
        }))
    }

    fn get_chunks_ordered(&self, name: &str) -> ChunkStream {
        let pool = self.pool.clone();
        let name = name.to_string();
        Box::pin(futures::stream::try_unfold(
            (pool, name, -1i32),
            |(pool, name, last_index)| async move {
                let row = sqlx::query_as::<_, ChunkRow>(
                    "SELECT * FROM chunks
                     WHERE artifact_name = $1 AND chunk_index > $2
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
        let result = sqlx::query("DELETE FROM chunks WHERE artifact_name = $1")
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
        for statement in schema_statements(POSTGRES_SCHEMA) {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    async fn health_check(&self) -> StoreResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_splits_into_statements() {
        let statements = schema_statements(POSTGRES_SCHEMA);
        assert!(!statements.is_empty());
        assert!(statements[0].to_uppercase().starts_with("CREATE TABLE"));
        assert!(statements.iter().all(|s| !s.is_empty()));
    }
}
