//! Chunked artifact cache.
//!
//! Persists a large binary artifact as independently-compressed chunk
//! rows in a relational store, and restores it under a strict memory
//! ceiling: at most one chunk is decompressed at a time, and the sink is
//! awaited before the next chunk is pulled.
//!
//! The pieces compose around small traits so each can be swapped in tests:
//! [`ChunkWriter`] uploads, [`ChunkRestorer`] streams a restore into a
//! [`ChunkSink`], [`IntegrityValidator`] gates both directions, and
//! [`CacheOrchestrator`] runs the miss/restore/rebuild lifecycle on top.

pub mod compress;
pub mod error;
pub mod orchestrator;
pub mod restorer;
pub mod retry;
pub mod validator;
pub mod writer;

pub use error::{CacheError, CacheResult};
pub use orchestrator::{ArtifactBuilder, ArtifactStatus, CacheOrchestrator, Readiness};
pub use restorer::{ChunkRestorer, ChunkSink, FileSink, RestoreSummary};
pub use retry::RetryPolicy;
pub use validator::{IntegrityValidator, SqliteArticleValidator};
pub use writer::{ChunkWriter, WriteSummary};
