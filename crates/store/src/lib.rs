//! Relational persistence for chunked artifacts.
//!
//! An artifact is stored as independently-compressed chunk rows keyed by
//! `(artifact_name, chunk_index)`. This crate owns the row schema, the
//! [`ChunkStore`] trait, and its SQLite and PostgreSQL implementations;
//! chunking, compression, and cache policy live in `larder-cache`.

pub mod error;
pub mod models;
pub mod postgres;
pub mod store;

pub use error::{StoreError, StoreResult};
pub use models::{ArtifactMeta, ChunkRow, TOTAL_CHUNKS_PENDING};
pub use postgres::PostgresChunkStore;
pub use store::{ChunkStore, ChunkStream, SqliteChunkStore};

use larder_core::config::StoreConfig;
use std::sync::Arc;

/// Build a chunk store from configuration.
pub async fn from_config(config: &StoreConfig) -> StoreResult<Arc<dyn ChunkStore>> {
    match config {
        StoreConfig::Sqlite { path } => Ok(Arc::new(SqliteChunkStore::new(path).await?)),
        StoreConfig::Postgres {
            url,
            host,
            port,
            username,
            password,
            database,
            max_connections,
            statement_timeout_ms,
        } => {
            let timeout_ms = statement_timeout_ms.unwrap_or(120_000);
            let store = if let Some(url) = url {
                PostgresChunkStore::from_url(url, *max_connections, timeout_ms).await?
            } else {
                PostgresChunkStore::from_params(
                    host.as_deref().unwrap_or("localhost"),
                    port.unwrap_or(5432),
                    username.as_deref().unwrap_or_default(),
                    password.as_deref().unwrap_or_default(),
                    database.as_deref().unwrap_or_default(),
                    *max_connections,
                    timeout_ms,
                )
                .await?
            };
            Ok(Arc::new(store))
        }
    }
}
