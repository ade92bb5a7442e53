//! Shared fixtures and in-memory doubles for cache tests.
#![allow(dead_code)]

use async_trait::async_trait;
use futures::stream;
use larder_cache::error::{CacheError, CacheResult};
use larder_cache::restorer::ChunkSink;
use larder_cache::validator::IntegrityValidator;
use larder_store::{ArtifactMeta, ChunkRow, ChunkStore, ChunkStream, StoreError, StoreResult};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use std::collections::BTreeMap;
use std::path::Path;
use std::str::FromStr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use time::OffsetDateTime;

/// Deterministic pseudo-random bytes (LCG) for chunk payloads.
pub fn seeded_bytes(seed: u64, len: usize) -> Vec<u8> {
    let mut state = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
    let mut out = Vec::with_capacity(len);
    for _ in 0..len {
        state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
        out.push((state >> 33) as u8);
    }
    out
}

/// Validator that accepts anything; used when payloads are arbitrary bytes.
pub struct AcceptAll;

#[async_trait]
impl IntegrityValidator for AcceptAll {
    async fn validate(&self, _path: &Path) -> CacheResult<()> {
        Ok(())
    }
}

/// Validator that rejects everything.
pub struct RejectAll;

#[async_trait]
impl IntegrityValidator for RejectAll {
    async fn validate(&self, _path: &Path) -> CacheResult<()> {
        Err(CacheError::CorruptArtifact(
            "rejected by test validator".to_string(),
        ))
    }
}

fn transient_store_error() -> StoreError {
    StoreError::Io(std::io::Error::new(
        std::io::ErrorKind::ConnectionReset,
        "injected transient failure",
    ))
}

/// In-memory chunk store with transient-failure injection.
#[derive(Default)]
pub struct MemoryChunkStore {
    rows: Mutex<BTreeMap<(String, i32), ChunkRow>>,
    /// Number of upcoming `upsert_chunk` calls that fail transiently.
    pub fail_upserts: AtomicU32,
    /// Number of upcoming `get_metadata` calls that fail transiently.
    pub fail_metadata: AtomicU32,
    /// When set, reported instead of the computed `artifact_size`.
    pub artifact_size_override: Mutex<Option<u64>>,
}

impl MemoryChunkStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn should_fail(counter: &AtomicU32) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    pub fn row_count(&self, name: &str) -> usize {
        self.rows
            .lock()
            .unwrap()
            .keys()
            .filter(|(n, _)| n == name)
            .count()
    }

    /// Corrupt the stored payload of one chunk without touching its hash.
    pub fn corrupt_chunk(&self, name: &str, index: i32) {
        let mut rows = self.rows.lock().unwrap();
        if let Some(row) = rows.get_mut(&(name.to_string(), index)) {
            row.chunk_data[0] ^= 0xff;
        }
    }

    /// Remove a single chunk row, leaving a hole in the sequence.
    pub fn drop_chunk(&self, name: &str, index: i32) {
        self.rows.lock().unwrap().remove(&(name.to_string(), index));
    }

    /// Backdate every row for `name` by `days`.
    pub fn age_rows(&self, name: &str, days: i64) {
        let mut rows = self.rows.lock().unwrap();
        for ((n, _), row) in rows.iter_mut() {
            if n == name {
                row.created_at -= time::Duration::days(days);
            }
        }
    }
}

#[async_trait]
impl ChunkStore for MemoryChunkStore {
    async fn upsert_chunk(&self, chunk: &ChunkRow) -> StoreResult<()> {
        if Self::should_fail(&self.fail_upserts) {
            return Err(transient_store_error());
        }
        self.rows.lock().unwrap().insert(
            (chunk.artifact_name.clone(), chunk.chunk_index),
            chunk.clone(),
        );
        Ok(())
    }

    async fn finalize_total_chunks(&self, name: &str, true_count: u32) -> StoreResult<()> {
        let mut rows = self.rows.lock().unwrap();
        let mut touched = 0;
        for ((n, _), row) in rows.iter_mut() {
            if n == name {
                row.total_chunks = true_count as i32;
                touched += 1;
            }
        }
        if touched == 0 {
            return Err(StoreError::NotFound(format!(
                "no chunk rows to finalize for artifact '{name}'"
            )));
        }
        Ok(())
    }

    async fn get_metadata(&self, name: &str) -> StoreResult<Option<ArtifactMeta>> {
        if Self::should_fail(&self.fail_metadata) {
            return Err(transient_store_error());
        }
        let rows = self.rows.lock().unwrap();
        let matching: Vec<&ChunkRow> = rows
            .iter()
            .filter(|((n, _), _)| n == name)
            .map(|(_, row)| row)
            .collect();
        if matching.is_empty() {
            return Ok(None);
        }
        let artifact_size = self
            .artifact_size_override
            .lock()
            .unwrap()
            .unwrap_or_else(|| matching.iter().map(|r| r.uncompressed_size as u64).sum());
        Ok(Some(ArtifactMeta {
            chunks_present: matching.len() as u64,
            total_chunks: matching.iter().map(|r| r.total_chunks).min().unwrap_or(-1),
            total_size: matching.iter().map(|r| r.chunk_data.len() as u64).sum(),
            artifact_size,
            updated_at: matching
                .iter()
                .map(|r| r.created_at)
                .max()
                .unwrap_or_else(OffsetDateTime::now_utc),
        }))
    }

    fn get_chunks_ordered(&self, name: &str) -> ChunkStream {
        let rows = self.rows.lock().unwrap();
        let matching: Vec<StoreResult<ChunkRow>> = rows
            .iter()
            .filter(|((n, _), _)| n == name)
            .map(|(_, row)| Ok(row.clone()))
            .collect();
        Box::pin(stream::iter(matching))
    }

    async fn delete_all(&self, name: &str) -> StoreResult<()> {
        self.rows.lock().unwrap().retain(|(n, _), _| n != name);
        Ok(())
    }

    async fn migrate(&self) -> StoreResult<()> {
        Ok(())
    }

    async fn health_check(&self) -> StoreResult<()> {
        Ok(())
    }
}

/// Sink that records every write and enforces a per-write ceiling,
/// demonstrating that restore never buffers more than one window.
pub struct RecordingSink {
    pub max_write: usize,
    pub data: Vec<u8>,
    pub writes: Vec<usize>,
    pub finished: bool,
    pub aborted: bool,
}

impl RecordingSink {
    pub fn new(max_write: usize) -> Self {
        Self {
            max_write,
            data: Vec::new(),
            writes: Vec::new(),
            finished: false,
            aborted: false,
        }
    }
}

#[async_trait]
impl ChunkSink for RecordingSink {
    async fn write(&mut self, data: &[u8]) -> CacheResult<()> {
        assert!(
            data.len() <= self.max_write,
            "sink received {} bytes, ceiling is {}",
            data.len(),
            self.max_write
        );
        self.writes.push(data.len());
        self.data.extend_from_slice(data);
        Ok(())
    }

    async fn finish(&mut self) -> CacheResult<()> {
        self.finished = true;
        Ok(())
    }

    async fn abort(&mut self) -> CacheResult<()> {
        self.aborted = true;
        self.data.clear();
        Ok(())
    }
}

/// Create a SQLite article database at `path` with `articles` rows.
pub async fn build_article_db(path: &Path, articles: u64) -> CacheResult<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let opts = SqliteConnectOptions::from_str(&format!("sqlite:{}?mode=rwc", path.display()))
        .map_err(|e| CacheError::RebuildFailed(e.to_string()))?
        .create_if_missing(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(opts)
        .await
        .map_err(|e| CacheError::RebuildFailed(e.to_string()))?;
    sqlx::query("CREATE TABLE IF NOT EXISTS articles (id INTEGER PRIMARY KEY, title TEXT, body TEXT)")
        .execute(&pool)
        .await
        .map_err(|e| CacheError::RebuildFailed(e.to_string()))?;
    for i in 0..articles {
        sqlx::query("INSERT INTO articles (title, body) VALUES (?, ?)")
            .bind(format!("Article {i}"))
            .bind("Lorem ipsum dolor sit amet, consectetur adipiscing elit.")
            .execute(&pool)
            .await
            .map_err(|e| CacheError::RebuildFailed(e.to_string()))?;
    }
    pool.close().await;
    Ok(())
}
