//! Streaming artifact restore.

use crate::compress::decompress_chunk;
use crate::error::{CacheError, CacheResult};
use crate::retry::RetryPolicy;
use crate::validator::IntegrityValidator;
use async_trait::async_trait;
use futures::TryStreamExt;
use larder_core::ChunkHash;
use larder_store::ChunkStore;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;

/// Outcome of a completed restore.
#[derive(Clone, Copy, Debug)]
pub struct RestoreSummary {
    pub chunks: u32,
    pub bytes_written: u64,
}

/// Destination for restored artifact bytes.
///
/// Writes are awaited before the next chunk is pulled from the store, so a
/// slow sink throttles the restore instead of forcing chunks to pile up in
/// memory.
#[async_trait]
pub trait ChunkSink: Send {
    /// Append decompressed chunk bytes.
    async fn write(&mut self, data: &[u8]) -> CacheResult<()>;
    /// Flush and close after the final chunk.
    async fn finish(&mut self) -> CacheResult<()>;
    /// Discard any partial output after a failure.
    async fn abort(&mut self) -> CacheResult<()>;
}

/// Sink writing the artifact to a file, removed again on abort.
pub struct FileSink {
    path: PathBuf,
    file: Option<tokio::fs::File>,
}

impl FileSink {
    pub async fn create(path: &Path) -> CacheResult<Self> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let file = tokio::fs::File::create(path).await?;
        Ok(Self {
            path: path.to_path_buf(),
            file: Some(file),
        })
    }
}

#[async_trait]
impl ChunkSink for FileSink {
    async fn write(&mut self, data: &[u8]) -> CacheResult<()> {
        match self.file.as_mut() {
            Some(file) => {
                file.write_all(data).await?;
                Ok(())
            }
            None => Err(CacheError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                "sink already closed",
            ))),
        }
    }

    async fn finish(&mut self) -> CacheResult<()> {
        if let Some(mut file) = self.file.take() {
            file.flush().await?;
            file.sync_all().await?;
        }
        Ok(())
    }

    async fn abort(&mut self) -> CacheResult<()> {
        self.file.take();
        if tokio::fs::try_exists(&self.path).await.unwrap_or(false) {
            tokio::fs::remove_file(&self.path).await?;
        }
        Ok(())
    }
}

/// Close the sink and validate the result, discarding the partial output
/// if either step fails. A failed `finish` must not leave bytes at the
/// destination: an unflushed file would otherwise look like a fresh,
/// validated artifact on the next run.
async fn seal(
    sink: &mut dyn ChunkSink,
    validator: &dyn IntegrityValidator,
    dest: &Path,
) -> CacheResult<()> {
    if let Err(err) = sink.finish().await {
        return Err(discard(sink, err).await);
    }
    if let Err(err) = validator.validate(dest).await {
        return Err(discard(sink, err).await);
    }
    Ok(())
}

/// Abort the sink, preserving the error that triggered the cleanup.
async fn discard(sink: &mut dyn ChunkSink, err: CacheError) -> CacheError {
    if let Err(abort_err) = sink.abort().await {
        tracing::warn!(error = %abort_err, "Failed to discard partial output");
    }
    err
}

/// Streams chunk rows out of the store in order, verifies and decompresses
/// each one, and hands the bytes to a sink one chunk at a time.
pub struct ChunkRestorer {
    store: Arc<dyn ChunkStore>,
    validator: Arc<dyn IntegrityValidator>,
    retry: RetryPolicy,
}

impl ChunkRestorer {
    pub fn new(
        store: Arc<dyn ChunkStore>,
        validator: Arc<dyn IntegrityValidator>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            store,
            validator,
            retry,
        }
    }

    /// Restore `name` into the file at `dest`, validating the result.
    ///
    /// On any failure the partial file is removed before the error is
    /// returned, so `dest` either holds a validated artifact or nothing.
    pub async fn restore_to_file(&self, name: &str, dest: &Path) -> CacheResult<RestoreSummary> {
        let mut sink = FileSink::create(dest).await?;
        match self.restore_artifact(name, &mut sink).await {
            Ok(summary) => {
                seal(&mut sink, self.validator.as_ref(), dest).await?;
                Ok(summary)
            }
            Err(err) => Err(discard(&mut sink, err).await),
        }
    }

    /// Restore `name` into an arbitrary sink.
    ///
    /// The caller owns `finish`/`abort`; only verification and streaming
    /// happen here.
    pub async fn restore_artifact(
        &self,
        name: &str,
        sink: &mut dyn ChunkSink,
    ) -> CacheResult<RestoreSummary> {
        larder_core::validate_artifact_name(name)?;
        let meta = self
            .retry
            .run("get_metadata", || async {
                self.store.get_metadata(name).await.map_err(CacheError::from)
            })
            .await?
            .ok_or_else(|| CacheError::NotCached(name.to_string()))?;

        // An unfinalized upload reports the pending sentinel and is treated
        // the same as a missing chunk.
        if !meta.is_complete() {
            return Err(CacheError::IncompleteCache {
                present: meta.chunks_present,
                total: meta.total_chunks as i64,
            });
        }

        tracing::info!(
            artifact = %name,
            total_chunks = meta.total_chunks,
            stored_bytes = meta.total_size,
            "Restoring artifact"
        );

        let mut stream = self.store.get_chunks_ordered(name);
        let mut next_index = 0i32;
        let mut bytes_written = 0u64;

        while let Some(row) = stream.try_next().await? {
            if row.chunk_index != next_index {
                return Err(CacheError::CorruptArtifact(format!(
                    "chunk sequence gap: expected index {next_index}, found {}",
                    row.chunk_index
                )));
            }

            // Verify the compressed payload before spending time
            // decompressing a corrupted row.
            let actual_hash = ChunkHash::compute(&row.chunk_data);
            if actual_hash.as_hex() != row.chunk_hash {
                return Err(CacheError::HashMismatch {
                    chunk_index: row.chunk_index,
                    expected: row.chunk_hash.clone(),
                    actual: actual_hash.as_hex().to_string(),
                });
            }

            let decompressed = decompress_chunk(&row.chunk_data).await?;
            if decompressed.len() as i64 != row.uncompressed_size {
                return Err(CacheError::CorruptArtifact(format!(
                    "chunk {} decompressed to {} bytes, recorded {}",
                    row.chunk_index,
                    decompressed.len(),
                    row.uncompressed_size
                )));
            }

            bytes_written += decompressed.len() as u64;
            // Awaiting the sink before pulling the next row is the
            // backpressure: at most one decompressed chunk is live.
            sink.write(&decompressed).await?;
            next_index += 1;

            tracing::debug!(
                artifact = %name,
                chunk_index = row.chunk_index,
                bytes = decompressed.len(),
                "Restored chunk"
            );
        }

        if next_index != meta.total_chunks {
            return Err(CacheError::IncompleteCache {
                present: next_index as u64,
                total: meta.total_chunks as i64,
            });
        }

        // Reconcile against the size recorded in the metadata snapshot
        // taken before streaming; the per-chunk checks cannot catch rows
        // that changed between the two reads.
        if bytes_written != meta.artifact_size {
            return Err(CacheError::SizeMismatch {
                expected: meta.artifact_size,
                actual: bytes_written,
            });
        }

        tracing::info!(
            artifact = %name,
            chunks = next_index,
            bytes_written,
            "Artifact restored"
        );

        Ok(RestoreSummary {
            chunks: next_index as u32,
            bytes_written,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StubSink {
        finish_fails: bool,
        aborted: bool,
    }

    #[async_trait]
    impl ChunkSink for StubSink {
        async fn write(&mut self, _data: &[u8]) -> CacheResult<()> {
            Ok(())
        }

        async fn finish(&mut self) -> CacheResult<()> {
            if self.finish_fails {
                return Err(CacheError::Io(std::io::Error::new(
                    std::io::ErrorKind::Other,
                    "flush failed",
                )));
            }
            Ok(())
        }

        async fn abort(&mut self) -> CacheResult<()> {
            self.aborted = true;
            Ok(())
        }
    }

    struct AcceptAll;

    #[async_trait]
    impl IntegrityValidator for AcceptAll {
        async fn validate(&self, _path: &Path) -> CacheResult<()> {
            Ok(())
        }
    }

    struct RejectAll;

    #[async_trait]
    impl IntegrityValidator for RejectAll {
        async fn validate(&self, _path: &Path) -> CacheResult<()> {
            Err(CacheError::CorruptArtifact("rejected".to_string()))
        }
    }

    #[tokio::test]
    async fn test_finish_failure_aborts_partial_output() {
        let mut sink = StubSink {
            finish_fails: true,
            aborted: false,
        };
        let err = seal(&mut sink, &AcceptAll, Path::new("/tmp/unused"))
            .await
            .unwrap_err();
        assert!(matches!(err, CacheError::Io(_)));
        assert!(sink.aborted);
    }

    #[tokio::test]
    async fn test_validation_failure_aborts_partial_output() {
        let mut sink = StubSink {
            finish_fails: false,
            aborted: false,
        };
        let err = seal(&mut sink, &RejectAll, Path::new("/tmp/unused"))
            .await
            .unwrap_err();
        assert!(matches!(err, CacheError::CorruptArtifact(_)));
        assert!(sink.aborted);
    }

    #[tokio::test]
    async fn test_clean_seal_does_not_abort() {
        let mut sink = StubSink {
            finish_fails: false,
            aborted: false,
        };
        seal(&mut sink, &AcceptAll, Path::new("/tmp/unused"))
            .await
            .unwrap();
        assert!(!sink.aborted);
    }
}
