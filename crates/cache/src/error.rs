//! Cache-level error types.

use larder_store::StoreError;
use thiserror::Error;

/// Errors surfaced by the chunk writer, restorer, validator, and orchestrator.
#[derive(Debug, Error)]
pub enum CacheError {
    /// No chunk rows exist for the requested artifact.
    #[error("Artifact not cached: {0}")]
    NotCached(String),

    /// Chunk rows exist but the set is incomplete or unfinalized.
    #[error("Cached artifact incomplete: {present} of {total} chunks present")]
    IncompleteCache { present: u64, total: i64 },

    /// Reassembled artifact size differs from the recorded size.
    #[error("Restored size mismatch: expected {expected} bytes, got {actual}")]
    SizeMismatch { expected: u64, actual: u64 },

    /// A chunk's stored hash does not match its contents.
    #[error("Chunk {chunk_index} hash mismatch: expected {expected}, got {actual}")]
    HashMismatch {
        chunk_index: i32,
        expected: String,
        actual: String,
    },

    /// The source artifact changed size while being read for upload.
    #[error("Artifact changed during read: expected {expected} bytes, read {actual}")]
    ReadIntegrity { expected: u64, actual: u64 },

    /// Artifact failed semantic validation.
    #[error("Artifact validation failed: {0}")]
    CorruptArtifact(String),

    /// The rebuild collaborator failed.
    #[error("Rebuild failed: {0}")]
    RebuildFailed(String),

    /// The rebuild collaborator did not finish within the timeout.
    #[error("Rebuild timed out")]
    RebuildTimeout,

    /// Invalid input such as a malformed artifact name.
    #[error(transparent)]
    Invalid(#[from] larder_core::Error),

    /// Underlying store failure.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Filesystem failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type CacheResult<T> = Result<T, CacheError>;

impl CacheError {
    /// Whether retrying the same operation could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            CacheError::Store(e) => e.is_transient(),
            CacheError::Io(_) => true,
            _ => false,
        }
    }
}
