//! Semantic artifact validation.
//!
//! Structural success (decompression worked, sizes add up) is not enough:
//! a rebuild can emit a structurally valid database with no content. The
//! validator opens the artifact and checks it actually holds data before
//! it is cached or served.

use crate::error::{CacheError, CacheResult};
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;

/// Semantic gate applied to an artifact before caching and after restore.
#[async_trait]
pub trait IntegrityValidator: Send + Sync {
    /// Check that the artifact at `path` is usable. Never mutates it.
    async fn validate(&self, path: &Path) -> CacheResult<()>;
}

/// Validates a SQLite article database by counting its article rows.
///
/// An artifact with fewer than `min_articles` rows, a missing `articles`
/// table, or an unreadable file is rejected as corrupt.
pub struct SqliteArticleValidator {
    min_articles: u64,
}

impl SqliteArticleValidator {
    pub fn new(min_articles: u64) -> Self {
        Self { min_articles }
    }
}

#[async_trait]
impl IntegrityValidator for SqliteArticleValidator {
    async fn validate(&self, path: &Path) -> CacheResult<()> {
        if !path.exists() {
            return Err(CacheError::CorruptArtifact(format!(
                "artifact file missing: {}",
                path.display()
            )));
        }

        // Read-only open: validation must never touch the artifact.
        let opts = SqliteConnectOptions::from_str(&format!("sqlite:{}", path.display()))
            .map_err(|e| CacheError::CorruptArtifact(format!("not a readable database: {e}")))?
            .read_only(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(opts)
            .await
            .map_err(|e| CacheError::CorruptArtifact(format!("cannot open database: {e}")))?;

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM articles")
            .fetch_one(&pool)
            .await
            .map_err(|e| {
                CacheError::CorruptArtifact(format!("articles table unreadable: {e}"))
            })?;

        pool.close().await;

        if (count as u64) < self.min_articles {
            return Err(CacheError::CorruptArtifact(format!(
                "only {count} articles present, need at least {}",
                self.min_articles
            )));
        }

        tracing::debug!(path = %path.display(), articles = count, "Artifact validated");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqliteConnectOptions;
    use std::path::PathBuf;

    async fn build_article_db(dir: &Path, articles: u64) -> PathBuf {
        let path = dir.join("articles.db");
        let opts = SqliteConnectOptions::from_str(&format!("sqlite:{}?mode=rwc", path.display()))
            .unwrap()
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(opts)
            .await
            .unwrap();
        sqlx::query("CREATE TABLE articles (id INTEGER PRIMARY KEY, title TEXT, body TEXT)")
            .execute(&pool)
            .await
            .unwrap();
        for i in 0..articles {
            sqlx::query("INSERT INTO articles (title, body) VALUES (?, ?)")
                .bind(format!("Article {i}"))
                .bind("body text")
                .execute(&pool)
                .await
                .unwrap();
        }
        pool.close().await;
        path
    }

    #[tokio::test]
    async fn test_accepts_populated_database() {
        let temp = tempfile::tempdir().unwrap();
        let path = build_article_db(temp.path(), 5).await;
        let validator = SqliteArticleValidator::new(1);
        assert!(validator.validate(&path).await.is_ok());
    }

    #[tokio::test]
    async fn test_rejects_empty_database() {
        let temp = tempfile::tempdir().unwrap();
        let path = build_article_db(temp.path(), 0).await;
        let validator = SqliteArticleValidator::new(1);
        assert!(matches!(
            validator.validate(&path).await,
            Err(CacheError::CorruptArtifact(_))
        ));
    }

    #[tokio::test]
    async fn test_rejects_below_threshold() {
        let temp = tempfile::tempdir().unwrap();
        let path = build_article_db(temp.path(), 3).await;
        let validator = SqliteArticleValidator::new(10);
        assert!(validator.validate(&path).await.is_err());
    }

    #[tokio::test]
    async fn test_rejects_missing_file() {
        let validator = SqliteArticleValidator::new(1);
        assert!(matches!(
            validator.validate(Path::new("/nonexistent/nothing.db")).await,
            Err(CacheError::CorruptArtifact(_))
        ));
    }

    #[tokio::test]
    async fn test_rejects_database_without_articles_table() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("other.db");
        let opts = SqliteConnectOptions::from_str(&format!("sqlite:{}?mode=rwc", path.display()))
            .unwrap()
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(opts)
            .await
            .unwrap();
        sqlx::query("CREATE TABLE unrelated (id INTEGER)")
            .execute(&pool)
            .await
            .unwrap();
        pool.close().await;

        let validator = SqliteArticleValidator::new(1);
        assert!(matches!(
            validator.validate(&path).await,
            Err(CacheError::CorruptArtifact(_))
        ));
    }
}
