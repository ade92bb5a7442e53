//! Configuration types shared across crates.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use time::Duration;

/// Cache behaviour configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Directory holding reconstructed artifacts (possibly ephemeral).
    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,
    /// Fixed window size in bytes for chunking.
    #[serde(default = "default_window_size")]
    pub window_size: u64,
    /// Age threshold in days before a local or cached copy is stale.
    #[serde(default = "default_max_age_days")]
    pub max_age_days: u64,
    /// Minimum number of article rows a restored artifact must contain.
    #[serde(default = "default_min_articles")]
    pub min_articles: u64,
    /// Rebuild collaborator timeout in seconds.
    #[serde(default = "default_rebuild_timeout_secs")]
    pub rebuild_timeout_secs: u64,
    /// Retry policy for individual chunk store calls.
    #[serde(default)]
    pub retry: RetryConfig,
}

fn default_cache_dir() -> PathBuf {
    PathBuf::from("./data/artifacts")
}

fn default_window_size() -> u64 {
    crate::DEFAULT_WINDOW_SIZE
}

fn default_max_age_days() -> u64 {
    crate::DEFAULT_MAX_AGE_DAYS
}

fn default_min_articles() -> u64 {
    1
}

fn default_rebuild_timeout_secs() -> u64 {
    1800 // 30 minutes; rebuilds download and process an external dataset
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            cache_dir: default_cache_dir(),
            window_size: default_window_size(),
            max_age_days: default_max_age_days(),
            min_articles: default_min_articles(),
            rebuild_timeout_secs: default_rebuild_timeout_secs(),
            retry: RetryConfig::default(),
        }
    }
}

impl CacheConfig {
    /// Get the freshness threshold as a Duration.
    pub fn max_age(&self) -> Duration {
        let days = i64::try_from(self.max_age_days).unwrap_or(i64::MAX);
        Duration::days(days)
    }

    /// Get the rebuild timeout as a std Duration.
    pub fn rebuild_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.rebuild_timeout_secs)
    }

    /// Validate cache configuration invariants.
    pub fn validate(&self) -> Result<(), String> {
        if self.window_size < crate::MIN_WINDOW_SIZE || self.window_size > crate::MAX_WINDOW_SIZE {
            return Err(format!(
                "cache.window_size {} out of range [{}, {}]",
                self.window_size,
                crate::MIN_WINDOW_SIZE,
                crate::MAX_WINDOW_SIZE
            ));
        }
        if self.max_age_days == 0 {
            return Err("cache.max_age_days must be at least 1".to_string());
        }
        Ok(())
    }
}

/// Retry policy for transient store errors on individual chunk calls.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum attempts per chunk operation (first try included).
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Base backoff in milliseconds; attempt n waits n * base.
    #[serde(default = "default_base_backoff_ms")]
    pub base_backoff_ms: u64,
}

fn default_max_attempts() -> u32 {
    4
}

fn default_base_backoff_ms() -> u64 {
    120
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_backoff_ms: default_base_backoff_ms(),
        }
    }
}

/// Backing store configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StoreConfig {
    /// SQLite database (recommended for testing and single-node deployments).
    Sqlite {
        /// Database file path.
        path: PathBuf,
    },
    /// PostgreSQL database.
    Postgres {
        /// Connection URL (takes precedence over individual fields).
        url: Option<String>,
        /// Database host.
        host: Option<String>,
        /// Database port (default: 5432).
        #[serde(default = "default_pg_port")]
        port: Option<u16>,
        /// Database username.
        username: Option<String>,
        /// Database password.
        /// WARNING: prefer the LARDER_STORE__PASSWORD env var over config files.
        password: Option<String>,
        /// Database name.
        database: Option<String>,
        /// Maximum connections in the pool.
        #[serde(default = "default_max_connections")]
        max_connections: u32,
        /// Statement timeout in milliseconds; PostgreSQL cancels queries
        /// that exceed this, bounding every chunk fetch and write.
        #[serde(default = "default_statement_timeout_ms")]
        statement_timeout_ms: Option<u64>,
    },
}

fn default_pg_port() -> Option<u16> {
    Some(5432)
}

fn default_max_connections() -> u32 {
    5
}

fn default_statement_timeout_ms() -> Option<u64> {
    Some(120_000) // 2 minutes; a single 10 MiB row transfer fits comfortably
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self::Sqlite {
            path: PathBuf::from("./data/chunks.db"),
        }
    }
}

impl StoreConfig {
    /// Validate store configuration invariants.
    pub fn validate(&self) -> Result<(), String> {
        match self {
            StoreConfig::Sqlite { .. } => Ok(()),
            StoreConfig::Postgres {
                url,
                host,
                database,
                ..
            } => match (url.as_ref(), host.as_ref(), database.as_ref()) {
                (Some(_), _, _) => Ok(()),
                (None, Some(_), Some(_)) => Ok(()),
                (None, None, _) => {
                    Err("postgres config requires either 'url' or 'host' + 'database'".to_string())
                }
                (None, Some(_), None) => {
                    Err("postgres config requires 'database' when using individual fields"
                        .to_string())
                }
            },
        }
    }
}

/// Complete application configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AppConfig {
    /// Cache behaviour configuration.
    #[serde(default)]
    pub cache: CacheConfig,
    /// Backing store configuration.
    #[serde(default)]
    pub store: StoreConfig,
}

impl AppConfig {
    /// Create a test configuration with sensible defaults.
    ///
    /// **For testing only.** Uses SQLite and a small window size so tests
    /// exercise multi-chunk paths without large fixtures.
    pub fn for_testing() -> Self {
        Self {
            cache: CacheConfig {
                window_size: crate::MIN_WINDOW_SIZE,
                ..CacheConfig::default()
            },
            store: StoreConfig::default(),
        }
    }

    /// Validate the whole configuration.
    pub fn validate(&self) -> Result<(), String> {
        self.cache.validate()?;
        self.store.validate()
    }
}
