/// Rust Media Downloader - offline resilience layer
///
/// Keeps the download client usable while the backend is unreachable:
/// requests are queued durably and replayed on reconnect, API and asset
/// traffic is served from a versioned on-disk cache, and in-flight jobs are
/// reconciled against the server on a fixed interval.

pub mod cache;
pub mod client;
pub mod config;
pub mod error;
pub mod jobs;
pub mod models;
pub mod network;
pub mod offline;
pub mod queue;
pub mod reconcile;
pub mod scheduler;

#[cfg(feature = "api")]
pub mod api;

// Re-export main types for easy access
pub use crate::cache::{CacheCoordinator, CacheStorage, Fetcher, HttpRequest, HttpResponse, ReqwestFetcher, Strategy};
pub use crate::client::{DownloadApi, HttpDownloadApi};
pub use crate::config::{Config, ConfigBuilder};
pub use crate::error::{OfflineError, Result};
pub use crate::jobs::JobStore;
pub use crate::models::{DownloadRequest, DownloadType, Job, JobStatus};
pub use crate::network::{Connectivity, ConnectivityProbe, NetworkMonitor};
pub use crate::offline::{ClientOptions, OfflineClient, OfflineStack, SubmitOutcome};
pub use crate::queue::{DrainOutcome, DrainReport, QueueEvent, QueueItem, QueueItemStatus, QueueManager};
pub use crate::reconcile::ReconciliationLoop;
