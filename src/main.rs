use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use rmd_offline::{
    Config, DownloadRequest, DownloadType, DrainOutcome, OfflineStack, QueueEvent, SubmitOutcome,
};

#[derive(Parser)]
#[command(name = "rmd-offline")]
#[command(version, author = "TigreRoll")]
#[command(about = "Offline-resilient client for the Rust Media Downloader backend")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (defaults to the standard search paths)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Override the backend base URL
    #[arg(long, global = true)]
    api_url: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Submit a download, queueing it if the backend is unreachable
    Submit {
        url: String,
        /// video, audio or instrumental
        #[arg(short = 't', long = "type", default_value = "video")]
        download_type: DownloadType,
        #[arg(short, long)]
        format: Option<String>,
        #[arg(short, long)]
        quality: Option<String>,
        #[arg(long)]
        filename: Option<String>,
        /// Download the whole playlist
        #[arg(long)]
        playlist: bool,
    },
    /// List jobs known to the backend
    List,
    /// Show one job
    Status { id: String },
    /// Delete a job
    Delete { id: String },
    /// Inspect or drain the offline queue
    Queue {
        #[command(subcommand)]
        action: QueueCommand,
    },
    /// Probe connectivity, drain on reconnect and reconcile jobs until Ctrl-C
    Watch,
    /// Run the local control server
    #[cfg(feature = "api")]
    Serve {
        #[arg(short, long, default_value_t = 8090)]
        port: u16,
    },
}

#[derive(Subcommand)]
enum QueueCommand {
    /// List queued downloads
    List,
    /// Remove one queued download
    Remove { id: String },
    /// Remove every queued download
    Clear,
    /// Submit everything queued now
    Drain,
}

fn load_config(cli: &Cli) -> Config {
    let mut config = match &cli.config {
        Some(path) => Config::load_from(path).unwrap_or_else(|e| {
            eprintln!("Failed to load {}, using defaults: {}", path.display(), e);
            Config::default()
        }),
        None => Config::load().unwrap_or_default(),
    };

    if let Some(url) = &cli.api_url {
        config.api.base_url = url.clone();
    }
    config
}

fn init_logging(config: &Config, verbose: bool) {
    let directive = if verbose {
        "rmd_offline=debug,info".to_string()
    } else {
        config.logging.log_level.clone()
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directive)))
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli);
    init_logging(&config, cli.verbose);

    if let Err(e) = config.validate() {
        error!("Invalid configuration: {}", e);
        return Err(e);
    }

    let stack = OfflineStack::from_config(&config).await?;

    match cli.command {
        Commands::Submit {
            url,
            download_type,
            format,
            quality,
            filename,
            playlist,
        } => {
            let mut request = DownloadRequest::new(url, download_type).with_playlist(playlist);
            request.format = format;
            request.quality = quality;
            request.custom_filename = filename;

            match stack.client.create_download(request).await? {
                SubmitOutcome::Created(job) => info!("✅ Download created: {} ({:?})", job.id, job.status),
                SubmitOutcome::Queued(item) => {
                    info!("📥 Backend unreachable, queued as {}", item.id);
                    info!("   Run `rmd-offline queue drain` or `rmd-offline watch` once back online");
                }
            }
        }

        Commands::List => {
            stack.client.load_jobs().await?;
            let jobs = stack.client.jobs().snapshot().await;
            if jobs.is_empty() {
                info!("📭 No downloads found");
                return Ok(());
            }

            info!("📚 Found {} downloads:", jobs.len());
            for job in jobs {
                let title = job.metadata.title.as_deref().unwrap_or(&job.url);
                info!("  {} - {:?} {:.0}% - {}", job.id, job.status, job.progress, title);
            }
        }

        Commands::Status { id } => {
            let job = stack.client.get_download(&id).await?;
            info!("{}", serde_json::to_string_pretty(&job)?);
        }

        Commands::Delete { id } => {
            stack.client.delete_download(&id).await?;
            info!("🗑️ Deleted download {}", id);
        }

        Commands::Queue { action } => run_queue_command(&stack, &config, action).await?,

        Commands::Watch => watch(stack, &config).await?,

        #[cfg(feature = "api")]
        Commands::Serve { port } => {
            let stack = std::sync::Arc::new(stack);
            rmd_offline::api::ApiServer::new(stack, port).start().await?;
        }
    }

    Ok(())
}

async fn run_queue_command(stack: &OfflineStack, config: &Config, action: QueueCommand) -> Result<()> {
    let queue = stack.client.queue();

    match action {
        QueueCommand::List => {
            let items = queue.snapshot().await?;
            if items.is_empty() {
                info!("📭 Offline queue is empty");
                return Ok(());
            }

            info!("📋 {} queued downloads (capacity {}):", items.len(), queue.capacity());
            for item in items {
                let error = item.error.as_deref().map(|e| format!(" - {}", e)).unwrap_or_default();
                info!("  {} [{:?}] {}{}", item.id, item.status, item.url(), error);
            }
        }

        QueueCommand::Remove { id } => {
            queue.dequeue(&id).await?;
            info!("✅ Removed {} from the offline queue", id);
        }

        QueueCommand::Clear => {
            queue.clear().await?;
            info!("🧹 Offline queue cleared");
        }

        QueueCommand::Drain => {
            if config.network.enable_probe {
                let online = stack.probe(config).check().await;
                stack.client.report_connectivity(online);
            }

            log_drain(stack.client.drain_queue().await);
        }
    }

    Ok(())
}

fn log_drain(outcome: DrainOutcome) {
    match outcome {
        DrainOutcome::Completed(report) => {
            info!("🎉 Drain finished: {} submitted, {} failed", report.succeeded, report.failed);
            for failure in report.errors {
                warn!("❌ {} ({}): {}", failure.url, failure.id, failure.error);
            }
        }
        DrainOutcome::Busy => warn!("⚠️ A drain is already running"),
        DrainOutcome::Offline => warn!("📴 Backend unreachable, nothing submitted"),
    }
}

async fn watch(stack: OfflineStack, config: &Config) -> Result<()> {
    info!("🚀 rmd-offline watching {}", config.api.base_url);
    info!("{}", config.summary());

    if let Some(cache) = &stack.cache {
        cache.install().await?;
        cache.skip_waiting().await?;
    }

    // reconnect drains only fire on transitions, so drain what is already queued
    let online = !config.network.enable_probe || stack.probe(config).check().await;
    stack.client.report_connectivity(online);
    if online && !stack.client.queue().is_empty().await? {
        log_drain(stack.client.drain_queue().await);
    }

    let mut handles = vec![stack.client.spawn_reconciliation()];
    if config.network.enable_probe {
        handles.push(stack.client.spawn_probe(stack.probe(config)));
    }

    let mut events = stack.client.queue().subscribe();
    let mut connectivity = stack.client.monitor().subscribe();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("🛑 Shutting down");
                break;
            }
            event = events.recv() => match event {
                Ok(QueueEvent { queue, action }) => info!("📋 Queue {:?}: {} items", action, queue.len()),
                Err(tokio::sync::broadcast::error::RecvError::Lagged(missed)) => {
                    warn!("Missed {} queue notifications", missed);
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            },
            changed = connectivity.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = *connectivity.borrow();
                info!("🌐 Connectivity: {:?}", state);
            }
        }
    }

    stack.client.shutdown();
    for handle in handles {
        let _ = handle.await;
    }
    Ok(())
}
