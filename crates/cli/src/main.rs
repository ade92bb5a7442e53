//! `larder` command-line interface.

use anyhow::{bail, Context};
use async_trait::async_trait;
use clap::{Parser, Subcommand};
use figment::providers::{Env, Format, Toml};
use figment::Figment;
use larder_cache::error::{CacheError, CacheResult};
use larder_cache::{
    ArtifactBuilder, CacheOrchestrator, ChunkRestorer, ChunkWriter, Readiness, RetryPolicy,
    SqliteArticleValidator,
};
use larder_core::config::AppConfig;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "larder", version, about = "Chunked artifact cache")]
struct Cli {
    /// Path to a TOML configuration file.
    #[arg(long, env = "LARDER_CONFIG", default_value = "larder.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Bring an artifact to a usable state (restore or rebuild as needed).
    Ensure {
        /// Artifact name.
        name: String,
        /// Command run to rebuild the artifact from scratch; it receives
        /// the output path in the LARDER_OUTPUT environment variable.
        #[arg(long)]
        rebuild_cmd: Option<String>,
    },
    /// Chunk a local file and upload it to the store.
    Push {
        /// Artifact name.
        name: String,
        /// File to upload.
        file: PathBuf,
    },
    /// Restore a cached artifact to a local file.
    Pull {
        /// Artifact name.
        name: String,
        /// Output path (defaults to <cache_dir>/<name>.db).
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Show local and cached state of an artifact.
    Status {
        /// Artifact name.
        name: String,
    },
    /// Delete the cached chunks and local copy of an artifact.
    Invalidate {
        /// Artifact name.
        name: String,
    },
}

/// Rebuild collaborator that shells out to a user-provided command.
struct SubprocessBuilder {
    command: String,
}

#[async_trait]
impl ArtifactBuilder for SubprocessBuilder {
    async fn rebuild(&self, dest: &Path) -> CacheResult<()> {
        let status = tokio::process::Command::new("sh")
            .arg("-c")
            .arg(&self.command)
            .env("LARDER_OUTPUT", dest)
            .status()
            .await
            .map_err(|e| CacheError::RebuildFailed(format!("failed to spawn: {e}")))?;
        if !status.success() {
            return Err(CacheError::RebuildFailed(format!(
                "rebuild command exited with {status}"
            )));
        }
        Ok(())
    }
}

/// Placeholder used when no rebuild command is configured; forces the
/// orchestrator onto its cache and fallback paths.
struct NoBuilder;

#[async_trait]
impl ArtifactBuilder for NoBuilder {
    async fn rebuild(&self, _dest: &Path) -> CacheResult<()> {
        Err(CacheError::RebuildFailed(
            "no rebuild command configured".to_string(),
        ))
    }
}

fn load_config(path: &Path) -> anyhow::Result<AppConfig> {
    let mut figment = Figment::new();
    if path.exists() {
        figment = figment.merge(Toml::file(path));
    }
    let config: AppConfig = figment
        .merge(Env::prefixed("LARDER_").split("__"))
        .extract()
        .context("failed to load configuration")?;
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("invalid configuration: {e}"))?;
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli.config)?;

    let store = larder_store::from_config(&config.store)
        .await
        .context("failed to open chunk store")?;
    store.health_check().await.context("store health check failed")?;

    let validator = Arc::new(SqliteArticleValidator::new(config.cache.min_articles));
    let retry = RetryPolicy::new(&config.cache.retry);

    match cli.command {
        Command::Ensure { name, rebuild_cmd } => {
            let builder: Arc<dyn ArtifactBuilder> = match rebuild_cmd {
                Some(command) => Arc::new(SubprocessBuilder { command }),
                None => Arc::new(NoBuilder),
            };
            let orchestrator =
                CacheOrchestrator::new(store, validator, builder, config.cache.clone());
            match orchestrator.ensure_ready(&name).await? {
                Readiness::Ready(path) => {
                    println!("ready: {}", path.display());
                }
                Readiness::Stale(path) => {
                    println!("ready (stale): {}", path.display());
                }
                Readiness::Degraded => {
                    bail!("artifact '{name}' unavailable from every source");
                }
            }
        }
        Command::Push { name, file } => {
            let writer = ChunkWriter::new(store, validator, config.cache.window_size, retry);
            let summary = writer
                .cache_artifact(&name, &file)
                .await
                .with_context(|| format!("failed to cache '{name}'"))?;
            println!(
                "cached {} chunks ({} -> {} bytes)",
                summary.total_chunks, summary.total_bytes, summary.compressed_bytes
            );
        }
        Command::Pull { name, output } => {
            let dest = output.unwrap_or_else(|| config.cache.cache_dir.join(format!("{name}.db")));
            let restorer = ChunkRestorer::new(store, validator, retry);
            let summary = restorer
                .restore_to_file(&name, &dest)
                .await
                .with_context(|| format!("failed to restore '{name}'"))?;
            println!(
                "restored {} chunks, {} bytes -> {}",
                summary.chunks,
                summary.bytes_written,
                dest.display()
            );
        }
        Command::Status { name } => {
            let builder: Arc<dyn ArtifactBuilder> = Arc::new(NoBuilder);
            let orchestrator =
                CacheOrchestrator::new(store, validator, builder, config.cache.clone());
            let status = orchestrator.status(&name).await?;
            match status.local_fresh {
                Some(fresh) => println!(
                    "local:  {} ({})",
                    status.local_path.display(),
                    if fresh { "fresh" } else { "stale" }
                ),
                None => println!("local:  absent"),
            }
            match status.cached {
                Some(meta) => println!(
                    "cached: {}/{} chunks, {} bytes, updated {} ({})",
                    meta.chunks_present,
                    meta.total_chunks,
                    meta.total_size,
                    meta.updated_at,
                    if meta.is_complete() { "complete" } else { "incomplete" }
                ),
                None => println!("cached: absent"),
            }
        }
        Command::Invalidate { name } => {
            let builder: Arc<dyn ArtifactBuilder> = Arc::new(NoBuilder);
            let orchestrator =
                CacheOrchestrator::new(store, validator, builder, config.cache.clone());
            orchestrator.invalidate(&name).await;
            println!("invalidated '{name}'");
        }
    }

    Ok(())
}
