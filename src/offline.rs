//! Client facade: online submission with offline fallback

use futures::FutureExt;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::cache::{CacheCoordinator, Fetcher, ReqwestFetcher};
use crate::client::{DownloadApi, HttpDownloadApi};
use crate::config::Config;
use crate::error::Result;
use crate::jobs::JobStore;
use crate::models::{DownloadRequest, Job};
use crate::network::{Connectivity, ConnectivityProbe, NetworkMonitor, ReconnectHook};
use crate::queue::{DrainOutcome, FileKeyValueStore, QueueItem, QueueManager, QueueStore};
use crate::reconcile::ReconciliationLoop;

/// What happened to a submitted download
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", content = "value", rename_all = "lowercase")]
pub enum SubmitOutcome {
    /// The backend accepted it
    Created(Job),
    /// Stored for submission once connectivity returns
    Queued(QueueItem),
}

/// Timing and behaviour knobs for [`OfflineClient`]
#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub initial_connectivity: Connectivity,
    pub settle_delay: Duration,
    pub reconcile_interval: Duration,
    pub initial_refresh_delay: Duration,
    pub send_idempotency_key: bool,
}

impl ClientOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            initial_connectivity: Connectivity::Online,
            settle_delay: config.network.settle_delay(),
            reconcile_interval: config.reconcile.interval(),
            initial_refresh_delay: config.reconcile.initial_refresh_delay(),
            send_idempotency_key: config.api.send_idempotency_key,
        }
    }
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// Submits drained items; shared with the reconnect hook
struct Submitter {
    api: Arc<dyn DownloadApi>,
    queue: Arc<QueueManager>,
    jobs: JobStore,
    reconciler: Arc<ReconciliationLoop>,
    send_idempotency_key: bool,
    shutdown: CancellationToken,
}

impl Submitter {
    async fn accept(&self, job: Job) {
        let id = job.id.clone();
        self.jobs.insert_front(job).await;
        self.reconciler.schedule_initial_refresh(id, self.shutdown.child_token());
    }

    async fn submit_queued(&self, item: QueueItem) -> Result<Job> {
        let key = self.send_idempotency_key.then_some(item.id.as_str());
        let job = self.api.create_download(&item.payload, key).await?;
        self.accept(job.clone()).await;
        Ok(job)
    }

    async fn drain(self: &Arc<Self>) -> DrainOutcome {
        let outcome = self
            .queue
            .drain(|item| {
                let submitter = Arc::clone(self);
                async move { submitter.submit_queued(item).await }
            })
            .await;

        if let Some(report) = outcome.report() {
            if report.failed > 0 {
                warn!("{} queued downloads failed and stay queued", report.failed);
            }
        }
        outcome
    }
}

/// Entry point for hosts: submit, delete, drain, observe
///
/// While offline, new downloads go to the durable queue; reconnecting drains
/// it through the same submission path. Successfully created jobs land in
/// the [`JobStore`] and are kept current by the reconciliation loop.
pub struct OfflineClient {
    submitter: Arc<Submitter>,
    monitor: Arc<NetworkMonitor>,
}

impl OfflineClient {
    pub fn new(api: Arc<dyn DownloadApi>, queue: Arc<QueueManager>, options: ClientOptions) -> Self {
        let jobs = JobStore::new();
        let reconciler = Arc::new(ReconciliationLoop::new(
            Arc::clone(&api),
            jobs.clone(),
            options.reconcile_interval,
            options.initial_refresh_delay,
        ));

        let submitter = Arc::new(Submitter {
            api,
            queue: Arc::clone(&queue),
            jobs,
            reconciler,
            send_idempotency_key: options.send_idempotency_key,
            shutdown: CancellationToken::new(),
        });

        let hook_submitter = Arc::clone(&submitter);
        let on_reconnect: ReconnectHook = Arc::new(move || {
            let submitter = Arc::clone(&hook_submitter);
            async move {
                submitter.drain().await;
            }
            .boxed()
        });

        let monitor = Arc::new(NetworkMonitor::new(
            options.initial_connectivity,
            options.settle_delay,
            queue,
            on_reconnect,
        ));

        Self { submitter, monitor }
    }

    pub fn queue(&self) -> &Arc<QueueManager> {
        &self.submitter.queue
    }

    pub fn jobs(&self) -> &JobStore {
        &self.submitter.jobs
    }

    pub fn monitor(&self) -> &Arc<NetworkMonitor> {
        &self.monitor
    }

    pub fn reconciler(&self) -> &Arc<ReconciliationLoop> {
        &self.submitter.reconciler
    }

    /// Feed a connectivity signal to the monitor
    pub fn report_connectivity(&self, online: bool) -> Option<JoinHandle<()>> {
        self.monitor.report(online)
    }

    /// Create a download, or queue it when the backend cannot be reached.
    ///
    /// Backend rejections (4xx/5xx) are returned as errors, not queued.
    pub async fn create_download(&self, request: DownloadRequest) -> Result<SubmitOutcome> {
        if !self.monitor.is_online() {
            let item = self.submitter.queue.enqueue(request).await?;
            return Ok(SubmitOutcome::Queued(item));
        }

        match self.submitter.api.create_download(&request, None).await {
            Ok(job) => {
                info!("🎬 Download created: {} ({})", job.id, request.url);
                self.submitter.accept(job.clone()).await;
                Ok(SubmitOutcome::Created(job))
            }
            Err(e) if e.is_network() => {
                info!("Backend unreachable, queueing {}: {}", request.url, e);
                let item = self.submitter.queue.enqueue(request).await?;
                Ok(SubmitOutcome::Queued(item))
            }
            Err(e) => Err(e),
        }
    }

    /// Delete a job on the backend, then forget it locally
    pub async fn delete_download(&self, id: &str) -> Result<()> {
        self.submitter.api.delete_download(id).await?;
        self.submitter.jobs.remove(id).await;
        Ok(())
    }

    /// Fetch one job from the backend and track it
    pub async fn get_download(&self, id: &str) -> Result<Job> {
        let job = self.submitter.api.get_download(id).await?;
        if !self.submitter.jobs.update(job.clone()).await {
            self.submitter.jobs.insert_front(job.clone()).await;
        }
        Ok(job)
    }

    /// Replace the job view with the backend's listing
    pub async fn load_jobs(&self) -> Result<usize> {
        self.submitter.reconciler.load_all().await
    }

    /// Submit everything queued. Refuses while offline.
    pub async fn drain_queue(&self) -> DrainOutcome {
        if !self.monitor.is_online() {
            info!("Offline, queue drain deferred");
            return DrainOutcome::Offline;
        }
        self.submitter.drain().await
    }

    /// Start the reconciliation loop
    pub fn spawn_reconciliation(&self) -> JoinHandle<()> {
        self.submitter
            .reconciler
            .spawn(self.submitter.shutdown.child_token())
    }

    /// Start a connectivity probe feeding this client's monitor
    pub fn spawn_probe(&self, probe: ConnectivityProbe) -> JoinHandle<()> {
        probe.spawn(Arc::clone(&self.monitor), self.submitter.shutdown.child_token())
    }

    /// Stop background loops and pending timers; in-flight requests finish
    pub fn shutdown(&self) {
        self.submitter.shutdown.cancel();
        self.monitor.shutdown();
    }
}

/// Everything wired from a [`Config`]
pub struct OfflineStack {
    pub client: OfflineClient,
    /// Present when the cache is enabled; all API traffic goes through it
    pub cache: Option<Arc<CacheCoordinator>>,
    /// Direct network transport, bypassing the cache
    pub network: Arc<ReqwestFetcher>,
}

impl OfflineStack {
    pub async fn from_config(config: &Config) -> Result<Self> {
        let network = Arc::new(ReqwestFetcher::new(&config.api.base_url, config.api.timeout())?);

        let cache = config
            .cache
            .enabled
            .then(|| Arc::new(CacheCoordinator::from_config(&config.cache, network.clone())));
        let transport = match &cache {
            Some(cache) => {
                cache.storage().initialize().await?;
                cache.clone() as Arc<dyn Fetcher>
            }
            None => network.clone() as Arc<dyn Fetcher>,
        };

        let store = FileKeyValueStore::open(&config.queue.store_dir).await?;
        let queue = Arc::new(QueueManager::new(
            QueueStore::new(Arc::new(store)),
            config.queue.capacity,
            config.queue.drain_delay(),
        ));

        let api = Arc::new(HttpDownloadApi::new(transport));
        let client = OfflineClient::new(api, queue, ClientOptions::from_config(config));

        Ok(Self { client, cache, network })
    }

    /// Health probe over the direct transport
    pub fn probe(&self, config: &Config) -> ConnectivityProbe {
        ConnectivityProbe::new(
            self.network.clone(),
            config.network.probe_path.clone(),
            config.network.probe_interval(),
        )
    }
}
