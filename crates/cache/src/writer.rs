//! Chunked artifact upload.

use crate::compress::compress_chunk;
use crate::error::{CacheError, CacheResult};
use crate::retry::RetryPolicy;
use crate::validator::IntegrityValidator;
use larder_core::{plan_chunks, ChunkHash};
use larder_store::{ChunkRow, ChunkStore, TOTAL_CHUNKS_PENDING};
use std::path::Path;
use std::sync::Arc;
use time::OffsetDateTime;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

/// Outcome of a completed upload.
#[derive(Clone, Copy, Debug)]
pub struct WriteSummary {
    pub total_chunks: u32,
    pub total_bytes: u64,
    pub compressed_bytes: u64,
}

/// Splits an artifact into fixed windows, compresses each independently,
/// and persists them as chunk rows.
///
/// Rows are written with the pending sentinel and only stamped with the
/// true chunk count once every row is in place, so a crashed upload is
/// never mistaken for a complete one.
pub struct ChunkWriter {
    store: Arc<dyn ChunkStore>,
    validator: Arc<dyn IntegrityValidator>,
    window_size: u64,
    retry: RetryPolicy,
}

impl ChunkWriter {
    pub fn new(
        store: Arc<dyn ChunkStore>,
        validator: Arc<dyn IntegrityValidator>,
        window_size: u64,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            store,
            validator,
            window_size,
            retry,
        }
    }

    /// Upload the artifact at `path` under `name`, replacing any prior rows.
    pub async fn cache_artifact(&self, name: &str, path: &Path) -> CacheResult<WriteSummary> {
        larder_core::validate_artifact_name(name)?;
        // Never persist an artifact that would fail restore-side validation.
        self.validator.validate(path).await?;

        let total_bytes = tokio::fs::metadata(path).await?.len();
        let plan = plan_chunks(total_bytes, self.window_size);

        tracing::info!(
            artifact = %name,
            total_bytes,
            total_chunks = plan.len(),
            window_size = self.window_size,
            "Caching artifact"
        );

        // Stale rows from a previous upload would otherwise shadow the new
        // set once total_chunks is finalized.
        self.retry
            .run("delete_all", || async {
                self.store.delete_all(name).await.map_err(CacheError::from)
            })
            .await?;

        let mut file = tokio::fs::File::open(path).await?;
        let mut window = vec![0u8; self.window_size as usize];
        let mut compressed_bytes = 0u64;

        for piece in &plan {
            file.seek(std::io::SeekFrom::Start(piece.offset)).await?;
            let buf = &mut window[..piece.len as usize];
            file.read_exact(buf).await.map_err(|e| {
                if e.kind() == std::io::ErrorKind::UnexpectedEof {
                    CacheError::ReadIntegrity {
                        expected: total_bytes,
                        actual: piece.offset,
                    }
                } else {
                    CacheError::Io(e)
                }
            })?;

            let compressed = compress_chunk(buf).await?;
            compressed_bytes += compressed.len() as u64;

            let row = ChunkRow {
                artifact_name: name.to_string(),
                chunk_index: piece.index as i32,
                chunk_hash: ChunkHash::compute(&compressed).as_hex().to_string(),
                uncompressed_size: piece.len as i64,
                chunk_data: compressed,
                total_chunks: TOTAL_CHUNKS_PENDING,
                created_at: OffsetDateTime::now_utc(),
            };

            self.retry
                .run("upsert_chunk", || async {
                    self.store.upsert_chunk(&row).await.map_err(CacheError::from)
                })
                .await?;

            tracing::debug!(
                artifact = %name,
                chunk_index = piece.index,
                uncompressed = piece.len,
                compressed = row.chunk_data.len(),
                "Stored chunk"
            );
        }

        let total_chunks = plan.len() as u32;
        self.retry
            .run("finalize_total_chunks", || async {
                self.store
                    .finalize_total_chunks(name, total_chunks)
                    .await
                    .map_err(CacheError::from)
            })
            .await?;

        tracing::info!(
            artifact = %name,
            total_chunks,
            total_bytes,
            compressed_bytes,
            "Artifact cached"
        );

        Ok(WriteSummary {
            total_chunks,
            total_bytes,
            compressed_bytes,
        })
    }
}
