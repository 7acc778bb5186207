//! Polling loop that keeps in-flight jobs current

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::client::DownloadApi;
use crate::config::ReconcileConfig;
use crate::error::Result;
use crate::jobs::JobStore;
use crate::scheduler::{spawn_delayed, Ticker};

/// Periodically re-fetches every pending, downloading or processing job
/// and overwrites the local copy with the server's.
pub struct ReconciliationLoop {
    api: Arc<dyn DownloadApi>,
    jobs: JobStore,
    interval: Duration,
    initial_refresh_delay: Duration,
}

impl ReconciliationLoop {
    pub fn new(api: Arc<dyn DownloadApi>, jobs: JobStore, interval: Duration, initial_refresh_delay: Duration) -> Self {
        Self {
            api,
            jobs,
            interval,
            initial_refresh_delay,
        }
    }

    pub fn from_config(config: &ReconcileConfig, api: Arc<dyn DownloadApi>, jobs: JobStore) -> Self {
        Self::new(api, jobs, config.interval(), config.initial_refresh_delay())
    }

    pub fn jobs(&self) -> &JobStore {
        &self.jobs
    }

    /// Replace the local view with the server's full listing
    pub async fn load_all(&self) -> Result<usize> {
        let jobs = self.api.list_downloads().await?;
        let count = jobs.len();
        self.jobs.replace_all(jobs).await;
        Ok(count)
    }

    /// Fetch one job and overwrite the local copy
    pub async fn refresh(&self, job_id: &str) -> Result<()> {
        refresh_job(self.api.as_ref(), &self.jobs, job_id).await
    }

    /// Dispatch one fetch per in-flight job without waiting for any of them
    pub async fn sweep(&self) -> Vec<JoinHandle<()>> {
        let ids = self.jobs.in_flight_ids().await;
        if !ids.is_empty() {
            debug!("Reconciling {} in-flight jobs", ids.len());
        }

        ids.into_iter()
            .map(|id| {
                let api = Arc::clone(&self.api);
                let jobs = self.jobs.clone();
                tokio::spawn(async move {
                    if let Err(e) = refresh_job(api.as_ref(), &jobs, &id).await {
                        warn!("Failed to refresh download {}: {}", id, e);
                    }
                })
            })
            .collect()
    }

    /// Single re-fetch shortly after a job is created, so its first status
    /// transition shows up before the next sweep
    pub fn schedule_initial_refresh(&self, job_id: String, token: CancellationToken) -> JoinHandle<()> {
        let api = Arc::clone(&self.api);
        let jobs = self.jobs.clone();
        spawn_delayed(self.initial_refresh_delay, token, async move {
            if let Err(e) = refresh_job(api.as_ref(), &jobs, &job_id).await {
                warn!("Failed to refresh new download {}: {}", job_id, e);
            }
        })
    }

    /// Load the job list, then sweep every interval until cancelled.
    ///
    /// The schedule restarts from a full interval whenever the set of jobs
    /// changes.
    pub async fn run(&self, token: CancellationToken) {
        match self.load_all().await {
            Ok(count) => info!("🔄 Reconciliation started with {} jobs", count),
            Err(e) => warn!("Initial job list failed, will poll what is known: {}", e),
        }

        let mut changes = self.jobs.subscribe();
        let mut ticker = Ticker::new(self.interval);

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                changed = changes.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    ticker.restart();
                }
                _ = ticker.tick() => {
                    self.sweep().await;
                }
            }
        }

        info!("⏹️ Reconciliation stopped");
    }

    pub fn spawn(self: &Arc<Self>, token: CancellationToken) -> JoinHandle<()> {
        let this = Arc::clone(self);
        tokio::spawn(async move { this.run(token).await })
    }
}

async fn refresh_job(api: &dyn DownloadApi, jobs: &JobStore, job_id: &str) -> Result<()> {
    let job = api.get_download(job_id).await?;
    if !jobs.update(job).await {
        debug!("Job {} was removed before its refresh landed", job_id);
    }
    Ok(())
}
