//! Chunk store error types.

use thiserror::Error;

/// Chunk store operation errors.
///
/// Storage failures are surfaced as-is; retry is the caller's decision,
/// the store itself never retries.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    /// Whether a bounded retry of the same call may succeed.
    ///
    /// Connection-level database failures are transient; everything else
    /// (constraint violations, decode errors, bad configuration) is not.
    pub fn is_transient(&self) -> bool {
        match self {
            StoreError::Database(e) => matches!(
                e,
                sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed
            ),
            StoreError::Io(_) => true,
            _ => false,
        }
    }
}

/// Result type for chunk store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;
