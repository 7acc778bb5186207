use anyhow::Result;
use clap::{Parser, Subcommand};
use rmd_offline::cache::{CacheCoordinator, PartitionKind, ReqwestFetcher};
use rmd_offline::Config;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "cache-admin")]
#[command(about = "Offline cache management utility")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Cache root directory (defaults to the configured one)
    #[arg(long)]
    cache_dir: Option<PathBuf>,

    /// Cache generation to operate as (defaults to the configured one)
    #[arg(long)]
    version: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// List all cache partitions
    List,
    /// Entry counts and sizes per partition
    Stats,
    /// Delete every partition
    Clear,
    /// Delete partitions that do not belong to the current generation
    Activate,
    /// Pre-populate the current generation from the backend
    Install,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter("info")
        .init();

    let cli = Cli::parse();

    let mut config = Config::load().unwrap_or_default();
    if let Some(dir) = cli.cache_dir {
        config.cache.cache_dir = dir;
    }
    if let Some(version) = cli.version {
        config.cache.version = version;
    }

    let network = Arc::new(ReqwestFetcher::new(&config.api.base_url, config.api.timeout())?);
    let cache = Arc::new(CacheCoordinator::from_config(&config.cache, network));
    cache.storage().initialize().await?;

    match cli.command {
        Commands::List => {
            let names = cache.storage().partition_names().await?;

            if names.is_empty() {
                info!("📭 No cache partitions found");
                return Ok(());
            }

            let current: Vec<String> = PartitionKind::ALL
                .iter()
                .map(|kind| cache.partition_name(*kind))
                .collect();

            info!("📚 Found {} cache partitions:", names.len());
            for name in names {
                let status = if current.contains(&name) { "✅ Current" } else { "❌ Stale" };
                info!("  {} - {}", name, status);
            }
        }

        Commands::Stats => {
            let stats = cache.partition_stats().await?;
            let entries: usize = stats.iter().map(|s| s.entries).sum();
            let bytes: u64 = stats.iter().map(|s| s.bytes).sum();

            info!("📊 Cache Statistics ({}):", cache.version());
            for partition in &stats {
                info!("  {}: {} entries, {} bytes", partition.name, partition.entries, partition.bytes);
            }
            info!("  Total entries: {}", entries);
            info!("  Total size: {:.1} KiB", bytes as f64 / 1024.0);
        }

        Commands::Clear => {
            // same path the control server uses: command plus acknowledgment
            let (control, _task) = cache.spawn_control();
            let count = control.clear_all().await?;
            info!("🧹 Cleared {} cache partitions", count);
        }

        Commands::Activate => {
            let deleted = cache.activate().await?;
            if deleted.is_empty() {
                info!("✅ No stale partitions, {} is current", cache.version());
            } else {
                info!("🗑️ Deleted {} stale partitions", deleted.len());
            }
        }

        Commands::Install => {
            let stored = cache.install().await?;
            if stored < config.cache.precache.len() {
                warn!(
                    "⚠️ Only {} of {} entry points cached, is the backend reachable?",
                    stored,
                    config.cache.precache.len()
                );
            } else {
                info!("✅ Cached {} entry points", stored);
            }
        }
    }

    Ok(())
}
