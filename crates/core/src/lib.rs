//! Core domain types and shared logic for the larder artifact cache.
//!
//! This crate defines the data model used across the other crates:
//! - Chunk planning and hashing
//! - Configuration types for the cache and the backing store
//! - The core error type

pub mod chunk;
pub mod config;
pub mod error;

pub use chunk::{plan_chunks, validate_artifact_name, ChunkHash, ChunkPlan};
pub use config::{AppConfig, CacheConfig, RetryConfig, StoreConfig};
pub use error::{Error, Result};

/// Default window size: 10 MiB.
pub const DEFAULT_WINDOW_SIZE: u64 = 10 * 1024 * 1024;

/// Maximum window size: 32 MiB (keeps each row a single reasonable value).
pub const MAX_WINDOW_SIZE: u64 = 32 * 1024 * 1024;

/// Minimum window size: 64 KiB.
pub const MIN_WINDOW_SIZE: u64 = 64 * 1024;

/// Default freshness threshold for local and cached copies: 30 days.
pub const DEFAULT_MAX_AGE_DAYS: u64 = 30;
