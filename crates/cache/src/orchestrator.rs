//! Cache lifecycle orchestration.
//!
//! Decides, for one artifact, whether to serve the local copy, restore
//! from the chunk store, or rebuild from scratch, and keeps the store in
//! sync afterwards.

use crate::error::{CacheError, CacheResult};
use crate::restorer::ChunkRestorer;
use crate::retry::RetryPolicy;
use crate::validator::IntegrityValidator;
use crate::writer::ChunkWriter;
use async_trait::async_trait;
use larder_core::config::CacheConfig;
use larder_store::{ArtifactMeta, ChunkStore};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use time::OffsetDateTime;

/// Collaborator that can recreate the artifact from its upstream source.
#[async_trait]
pub trait ArtifactBuilder: Send + Sync {
    /// Build a fresh artifact at `dest`. Expected to be slow.
    async fn rebuild(&self, dest: &Path) -> CacheResult<()>;
}

/// Terminal outcome of [`CacheOrchestrator::ensure_ready`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Readiness {
    /// A validated artifact is available at this path.
    Ready(PathBuf),
    /// Validated artifact at this path, restored from a stale cache entry
    /// because the rebuild failed.
    Stale(PathBuf),
    /// Every source failed; the caller must run without the artifact.
    Degraded,
}

/// Local and cached state of one artifact, for status reporting.
#[derive(Clone, Debug)]
pub struct ArtifactStatus {
    pub local_path: PathBuf,
    pub local_fresh: Option<bool>,
    pub cached: Option<ArtifactMeta>,
}

/// Drives one artifact through local check, cache restore, rebuild, and
/// cache write-back.
pub struct CacheOrchestrator {
    store: Arc<dyn ChunkStore>,
    writer: ChunkWriter,
    restorer: ChunkRestorer,
    validator: Arc<dyn IntegrityValidator>,
    builder: Arc<dyn ArtifactBuilder>,
    config: CacheConfig,
}

impl CacheOrchestrator {
    pub fn new(
        store: Arc<dyn ChunkStore>,
        validator: Arc<dyn IntegrityValidator>,
        builder: Arc<dyn ArtifactBuilder>,
        config: CacheConfig,
    ) -> Self {
        let retry = RetryPolicy::new(&config.retry);
        let writer = ChunkWriter::new(
            store.clone(),
            validator.clone(),
            config.window_size,
            retry,
        );
        let restorer = ChunkRestorer::new(store.clone(), validator.clone(), retry);
        Self {
            store,
            writer,
            restorer,
            validator,
            builder,
            config,
        }
    }

    /// Path where the reconstructed artifact lives on local disk.
    pub fn local_path(&self, name: &str) -> PathBuf {
        self.config.cache_dir.join(format!("{name}.db"))
    }

    /// Bring the artifact to a usable state, preferring the cheapest source.
    ///
    /// Order: fresh local file, fresh and complete cache entry, rebuild
    /// with cache write-back, stale cache entry as a last resort. Only an
    /// invalid name or a filesystem error preparing the working directory
    /// is returned as `Err`; exhausting every source yields `Ok(Degraded)`.
    pub async fn ensure_ready(&self, name: &str) -> CacheResult<Readiness> {
        larder_core::validate_artifact_name(name)?;
        let local = self.local_path(name);
        tokio::fs::create_dir_all(&self.config.cache_dir).await?;

        if self.local_is_fresh(&local).await {
            tracing::info!(artifact = %name, path = %local.display(), "Local artifact is fresh");
            return Ok(Readiness::Ready(local));
        }

        let meta = match self.store.get_metadata(name).await {
            Ok(meta) => meta,
            Err(err) => {
                tracing::warn!(artifact = %name, error = %err, "Cache lookup failed, treating as miss");
                None
            }
        };

        if let Some(meta) = &meta {
            if meta.is_complete() && self.cache_is_fresh(meta) {
                match self.restorer.restore_to_file(name, &local).await {
                    Ok(summary) => {
                        tracing::info!(
                            artifact = %name,
                            chunks = summary.chunks,
                            bytes = summary.bytes_written,
                            "Restored from cache"
                        );
                        return Ok(Readiness::Ready(local));
                    }
                    Err(err) => {
                        tracing::warn!(
                            artifact = %name,
                            error = %err,
                            "Cache restore failed, invalidating and rebuilding"
                        );
                        self.invalidate(name).await;
                    }
                }
            } else {
                tracing::info!(
                    artifact = %name,
                    complete = meta.is_complete(),
                    "Cache entry unusable for direct restore"
                );
            }
        }

        match self.rebuild(name, &local).await {
            Ok(()) => {
                self.write_back(name, &local).await;
                Ok(Readiness::Ready(local))
            }
            Err(err) => {
                tracing::error!(artifact = %name, error = %err, "Rebuild failed");
                self.stale_fallback(name, &local, meta).await
            }
        }
    }

    /// Drop both the cached rows and the local file for `name`.
    pub async fn invalidate(&self, name: &str) {
        if let Err(err) = self.store.delete_all(name).await {
            tracing::warn!(artifact = %name, error = %err, "Failed to delete cached chunks");
        }
        let local = self.local_path(name);
        if tokio::fs::try_exists(&local).await.unwrap_or(false) {
            if let Err(err) = tokio::fs::remove_file(&local).await {
                tracing::warn!(artifact = %name, error = %err, "Failed to remove local artifact");
            }
        }
    }

    /// Report local and cached state without changing anything.
    pub async fn status(&self, name: &str) -> CacheResult<ArtifactStatus> {
        let local = self.local_path(name);
        let local_fresh = if tokio::fs::try_exists(&local).await.unwrap_or(false) {
            Some(self.local_is_fresh(&local).await)
        } else {
            None
        };
        let cached = self.store.get_metadata(name).await?;
        Ok(ArtifactStatus {
            local_path: local,
            local_fresh,
            cached,
        })
    }

    async fn local_is_fresh(&self, path: &Path) -> bool {
        let meta = match tokio::fs::metadata(path).await {
            Ok(meta) => meta,
            Err(_) => return false,
        };
        let modified = match meta.modified() {
            Ok(modified) => modified,
            Err(_) => return false,
        };
        match modified.elapsed() {
            Ok(age) => age.as_secs() < self.config.max_age().whole_seconds().max(0) as u64,
            // Clock skew puts the mtime in the future; treat as fresh.
            Err(_) => true,
        }
    }

    fn cache_is_fresh(&self, meta: &ArtifactMeta) -> bool {
        OffsetDateTime::now_utc() - meta.updated_at < self.config.max_age()
    }

    async fn rebuild(&self, name: &str, dest: &Path) -> CacheResult<()> {
        tracing::info!(artifact = %name, "Rebuilding artifact");
        let build = self.builder.rebuild(dest);
        match tokio::time::timeout(self.config.rebuild_timeout(), build).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                self.discard_local(dest).await;
                return Err(CacheError::RebuildFailed(err.to_string()));
            }
            Err(_) => {
                self.discard_local(dest).await;
                return Err(CacheError::RebuildTimeout);
            }
        }

        // A rebuild that produced an empty artifact must not be served or
        // cached; scrap it and fall through to the stale path.
        if let Err(err) = self.validator.validate(dest).await {
            self.discard_local(dest).await;
            return Err(err);
        }
        Ok(())
    }

    /// Cache write-back is best-effort: a store outage must not take down a
    /// successfully rebuilt artifact.
    async fn write_back(&self, name: &str, local: &Path) {
        match self.writer.cache_artifact(name, local).await {
            Ok(summary) => {
                tracing::info!(
                    artifact = %name,
                    chunks = summary.total_chunks,
                    compressed_bytes = summary.compressed_bytes,
                    "Cache write-back complete"
                );
            }
            Err(err) => {
                tracing::warn!(artifact = %name, error = %err, "Cache write-back failed");
            }
        }
    }

    async fn stale_fallback(
        &self,
        name: &str,
        local: &Path,
        meta: Option<ArtifactMeta>,
    ) -> CacheResult<Readiness> {
        let usable = meta.map(|m| m.is_complete()).unwrap_or(false);
        if usable {
            match self.restorer.restore_to_file(name, local).await {
                Ok(summary) => {
                    tracing::warn!(
                        artifact = %name,
                        chunks = summary.chunks,
                        "Serving stale cached artifact after rebuild failure"
                    );
                    return Ok(Readiness::Stale(local.to_path_buf()));
                }
                Err(err) => {
                    tracing::error!(artifact = %name, error = %err, "Stale restore failed");
                }
            }
        }
        tracing::error!(artifact = %name, "No usable artifact source, running degraded");
        Ok(Readiness::Degraded)
    }

    async fn discard_local(&self, path: &Path) {
        if tokio::fs::try_exists(path).await.unwrap_or(false) {
            if let Err(err) = tokio::fs::remove_file(path).await {
                tracing::warn!(path = %path.display(), error = %err, "Failed to remove artifact");
            }
        }
    }
}
