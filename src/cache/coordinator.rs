use async_trait::async_trait;
use reqwest::Method;
use serde::Serialize;
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, warn};

use super::fetch::{Fetcher, HttpRequest, HttpResponse, ResponseSource};
use super::routes::{OfflineFallback, PartitionKind, Route, RouteTable, Strategy};
use super::storage::{CacheStorage, PartitionStats};
use crate::config::CacheConfig;
use crate::error::{OfflineError, Result};

const ROOT_DOCUMENT: &str = "/";

/// Where this coordinator generation is in its lifecycle
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum GenerationState {
    /// Pre-populating the static partition
    Installing,
    /// Installed, previous generation still in charge
    Waiting,
    /// Old generations deleted, this one serves
    Active,
}

/// Administrative commands accepted on the control channel
#[derive(Debug)]
pub enum ControlCommand {
    /// Delete every partition; the ack carries the number deleted
    ClearAll { ack: oneshot::Sender<Result<usize>> },
    /// Activate the waiting generation now
    SkipWaiting,
}

/// Sending half of the control channel
#[derive(Debug, Clone)]
pub struct CacheControl {
    tx: mpsc::Sender<ControlCommand>,
}

impl CacheControl {
    /// Clear every partition and wait for completion
    pub async fn clear_all(&self) -> Result<usize> {
        let (ack, done) = oneshot::channel();
        self.tx
            .send(ControlCommand::ClearAll { ack })
            .await
            .map_err(|_| OfflineError::ChannelClosed("cache control"))?;
        done.await
            .map_err(|_| OfflineError::ChannelClosed("cache control ack"))?
    }

    /// Fire-and-forget forced activation
    pub async fn skip_waiting(&self) -> Result<()> {
        self.tx
            .send(ControlCommand::SkipWaiting)
            .await
            .map_err(|_| OfflineError::ChannelClosed("cache control"))
    }
}

/// Network-interception layer
///
/// Every request is routed through the [`RouteTable`] and answered with
/// either network-first or cache-first semantics against one of three
/// versioned partitions. Transport failures degrade to stored responses,
/// a synthesized offline answer for API calls, or the cached root document.
pub struct CacheCoordinator {
    storage: CacheStorage,
    network: Arc<dyn Fetcher>,
    routes: RouteTable,
    version: String,
    precache: Vec<String>,
    state: StdMutex<GenerationState>,
    revalidations: Mutex<JoinSet<()>>,
}

impl CacheCoordinator {
    pub fn new(storage: CacheStorage, network: Arc<dyn Fetcher>, version: impl Into<String>, precache: Vec<String>) -> Self {
        Self {
            storage,
            network,
            routes: RouteTable::standard(),
            version: version.into(),
            precache,
            state: StdMutex::new(GenerationState::Installing),
            revalidations: Mutex::new(JoinSet::new()),
        }
    }

    pub fn from_config(config: &CacheConfig, network: Arc<dyn Fetcher>) -> Self {
        Self::new(
            CacheStorage::new(config.cache_dir.clone()),
            network,
            config.version.clone(),
            config.precache.clone(),
        )
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn storage(&self) -> &CacheStorage {
        &self.storage
    }

    pub fn state(&self) -> GenerationState {
        *self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn set_state(&self, state: GenerationState) {
        *self.state.lock().unwrap_or_else(|p| p.into_inner()) = state;
    }

    pub fn partition_name(&self, kind: PartitionKind) -> String {
        kind.name_for(&self.version)
    }

    fn belongs_to_current_version(&self, partition: &str) -> bool {
        partition.starts_with(&format!("{}-", self.version))
    }

    /// Create this generation's partitions and pre-populate the static one.
    ///
    /// Entry points that cannot be fetched are skipped with a warning;
    /// returns how many were stored.
    pub async fn install(&self) -> Result<usize> {
        info!("📦 Installing cache generation {}", self.version);
        self.set_state(GenerationState::Installing);
        self.storage.initialize().await?;
        for kind in PartitionKind::ALL {
            self.storage.open(&self.partition_name(kind)).await?;
        }

        let static_partition = self.partition_name(PartitionKind::Static);
        let mut stored = 0;
        for path in &self.precache {
            let request = HttpRequest::get(path.as_str());
            match self.network.fetch(request.clone()).await {
                Ok(response) if response.is_success() => {
                    self.storage.put(&static_partition, &request.cache_key(), &response).await?;
                    stored += 1;
                }
                Ok(response) => warn!("Precache of {} answered {}, skipped", path, response.status),
                Err(e) => warn!("Precache of {} failed: {}", path, e),
            }
        }

        self.set_state(GenerationState::Waiting);
        info!("✅ Cache generation {} installed ({} entry points)", self.version, stored);
        Ok(stored)
    }

    /// Take over: delete every partition of other generations.
    ///
    /// Returns the names of the deleted partitions.
    pub async fn activate(&self) -> Result<Vec<String>> {
        info!("🚀 Activating cache generation {}", self.version);
        let mut deleted = Vec::new();

        for name in self.storage.partition_names().await? {
            if self.belongs_to_current_version(&name) {
                continue;
            }
            if self.storage.delete_partition(&name).await? {
                info!("🗑️ Deleting old cache: {}", name);
                deleted.push(name);
            }
        }

        self.set_state(GenerationState::Active);
        Ok(deleted)
    }

    /// Activate now if installed and still waiting
    pub async fn skip_waiting(&self) -> Result<()> {
        if self.state() == GenerationState::Waiting {
            self.activate().await?;
        } else {
            debug!("skip_waiting ignored in state {:?}", self.state());
        }
        Ok(())
    }

    /// Delete every partition, whatever its generation
    pub async fn clear_all(&self) -> Result<usize> {
        let mut cleared = 0;
        for name in self.storage.partition_names().await? {
            if self.storage.delete_partition(&name).await? {
                cleared += 1;
            }
        }
        info!("🧹 Cleared {} cache partitions", cleared);
        Ok(cleared)
    }

    /// Start the task serving the administrative control channel
    pub fn spawn_control(self: &Arc<Self>) -> (CacheControl, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel(8);
        let coordinator = Arc::clone(self);

        let handle = tokio::spawn(async move {
            while let Some(command) = rx.recv().await {
                match command {
                    ControlCommand::ClearAll { ack } => {
                        let result = coordinator.clear_all().await;
                        let _ = ack.send(result);
                    }
                    ControlCommand::SkipWaiting => {
                        if let Err(e) = coordinator.skip_waiting().await {
                            warn!("Forced activation failed: {}", e);
                        }
                    }
                }
            }
            debug!("Cache control channel closed");
        });

        (CacheControl { tx }, handle)
    }

    /// Partition statistics for every partition on disk
    pub async fn partition_stats(&self) -> Result<Vec<PartitionStats>> {
        let names = self.storage.partition_names().await?;
        Ok(names.iter().map(|name| self.storage.stats(name)).collect())
    }

    /// Answer a request through the strategy its path selects
    pub async fn handle(&self, request: HttpRequest) -> Result<HttpResponse> {
        let route = *self.routes.resolve(request.pathname());
        debug!("{} {} → {} ({:?})", request.method, request.path, route.label, route.strategy);

        match route.strategy {
            Strategy::NetworkFirst => self.network_first(request, &route).await,
            Strategy::CacheFirst => self.cache_first(request, &route).await,
        }
    }

    async fn network_first(&self, request: HttpRequest, route: &Route) -> Result<HttpResponse> {
        let partition = self.partition_name(route.partition);
        let cache_key = request.cache_key();
        let cacheable = request.method == Method::GET;

        match self.network.fetch(request).await {
            Ok(response) => {
                if cacheable && response.is_success() {
                    if let Err(e) = self.storage.put(&partition, &cache_key, &response).await {
                        warn!("Could not cache {}: {}", cache_key, e);
                    }
                }
                Ok(response)
            }
            Err(network_error) => {
                debug!("Network failed, trying cache: {}", cache_key);

                if cacheable {
                    if let Some(cached) = self.storage.get(&partition, &cache_key).await {
                        return Ok(cached);
                    }
                }

                match route.fallback {
                    OfflineFallback::DegradedJson => Ok(Self::offline_response()),
                    OfflineFallback::RootDocument => self.root_document().await.ok_or(network_error),
                }
            }
        }
    }

    async fn cache_first(&self, request: HttpRequest, route: &Route) -> Result<HttpResponse> {
        let partition = self.partition_name(route.partition);
        let cache_key = request.cache_key();

        if request.method == Method::GET {
            if let Some(cached) = self.storage.get(&partition, &cache_key).await {
                self.revalidate_in_background(request, partition, cache_key).await;
                return Ok(cached);
            }
        }

        let cacheable = request.method == Method::GET;
        match self.network.fetch(request).await {
            Ok(response) => {
                if cacheable && response.is_success() {
                    if let Err(e) = self.storage.put(&partition, &cache_key, &response).await {
                        warn!("Could not cache {}: {}", cache_key, e);
                    }
                }
                Ok(response)
            }
            Err(network_error) => {
                warn!("Cache first error for {}: {}", cache_key, network_error);
                self.root_document().await.ok_or(network_error)
            }
        }
    }

    async fn revalidate_in_background(&self, request: HttpRequest, partition: String, cache_key: String) {
        let network = Arc::clone(&self.network);
        let storage = self.storage.clone();

        let mut tasks = self.revalidations.lock().await;
        while tasks.try_join_next().is_some() {}
        tasks.spawn(async move {
            match network.fetch(request).await {
                Ok(response) if response.is_success() => {
                    if let Err(e) = storage.put(&partition, &cache_key, &response).await {
                        debug!("Background refresh of {} not stored: {}", cache_key, e);
                    }
                }
                Ok(response) => debug!("Background refresh of {} answered {}", cache_key, response.status),
                Err(e) => debug!("Background refresh of {} failed: {}", cache_key, e),
            }
        });
    }

    /// Wait for every background revalidation started so far
    pub async fn settle_background(&self) {
        let mut tasks = std::mem::take(&mut *self.revalidations.lock().await);
        while tasks.join_next().await.is_some() {}
    }

    async fn root_document(&self) -> Option<HttpResponse> {
        self.storage.match_any(&HttpRequest::get(ROOT_DOCUMENT).cache_key()).await
    }

    /// The degraded answer for API calls with no network and no stored copy
    pub fn offline_response() -> HttpResponse {
        let body = serde_json::json!({
            "error": "offline",
            "message": "You are offline. Please check your connection.",
            "cached": true
        });
        HttpResponse {
            status: 503,
            headers: vec![("content-type".to_string(), "application/json".to_string())],
            body: body.to_string().into_bytes(),
            source: ResponseSource::Offline,
        }
    }
}

#[async_trait]
impl Fetcher for CacheCoordinator {
    async fn fetch(&self, request: HttpRequest) -> Result<HttpResponse> {
        self.handle(request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio::sync::Notify;

    /// Scripted network: fixed bodies per path, switchable offline, optional gate
    #[derive(Default)]
    struct MockNetwork {
        bodies: StdMutex<HashMap<String, (u16, String)>>,
        offline: AtomicBool,
        calls: AtomicUsize,
        gate: Option<Arc<Notify>>,
    }

    impl MockNetwork {
        fn serve(&self, path: &str, status: u16, body: &str) {
            self.bodies.lock().unwrap().insert(path.to_string(), (status, body.to_string()));
        }

        fn set_offline(&self, offline: bool) {
            self.offline.store(offline, Ordering::SeqCst);
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Fetcher for MockNetwork {
        async fn fetch(&self, request: HttpRequest) -> Result<HttpResponse> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            if self.offline.load(Ordering::SeqCst) {
                return Err(OfflineError::NetworkUnavailable("connection refused".into()));
            }
            let (status, body) = self
                .bodies
                .lock()
                .unwrap()
                .get(&request.path)
                .cloned()
                .unwrap_or((404, "not found".to_string()));
            Ok(HttpResponse {
                status,
                headers: Vec::new(),
                body: body.into_bytes(),
                source: ResponseSource::Network,
            })
        }
    }

    fn coordinator(dir: &TempDir, version: &str, network: Arc<MockNetwork>) -> CacheCoordinator {
        CacheCoordinator::new(
            CacheStorage::new(dir.path().to_path_buf()),
            network,
            version,
            vec!["/".to_string(), "/index.html".to_string(), "/manifest.json".to_string()],
        )
    }

    #[tokio::test]
    async fn test_network_first_stores_and_overwrites() {
        let dir = TempDir::new().unwrap();
        let network = Arc::new(MockNetwork::default());
        let cache = coordinator(&dir, "v1", network.clone());

        network.serve("/api/downloads", 200, "[1]");
        let first = cache.handle(HttpRequest::get("/api/downloads")).await.unwrap();
        assert_eq!(first.body, b"[1]");
        assert_eq!(first.source, ResponseSource::Network);

        network.serve("/api/downloads", 200, "[1,2]");
        let second = cache.handle(HttpRequest::get("/api/downloads")).await.unwrap();
        assert_eq!(second.body, b"[1,2]");

        let stored = cache.storage().get("v1-api", "GET /api/downloads").await.unwrap();
        assert_eq!(stored.body, b"[1,2]");
    }

    #[tokio::test]
    async fn test_network_first_skips_error_statuses() {
        let dir = TempDir::new().unwrap();
        let network = Arc::new(MockNetwork::default());
        let cache = coordinator(&dir, "v1", network.clone());

        network.serve("/api/downloads/x", 500, "boom");
        let response = cache.handle(HttpRequest::get("/api/downloads/x")).await.unwrap();
        assert_eq!(response.status, 500);
        assert!(cache.storage().get("v1-api", "GET /api/downloads/x").await.is_none());
    }

    #[tokio::test]
    async fn test_network_first_falls_back_to_cache() {
        let dir = TempDir::new().unwrap();
        let network = Arc::new(MockNetwork::default());
        let cache = coordinator(&dir, "v1", network.clone());

        network.serve("/api/downloads", 200, "[1]");
        cache.handle(HttpRequest::get("/api/downloads")).await.unwrap();

        network.set_offline(true);
        let response = cache.handle(HttpRequest::get("/api/downloads")).await.unwrap();
        assert_eq!(response.body, b"[1]");
        assert_eq!(response.source, ResponseSource::Cache);
    }

    #[tokio::test]
    async fn test_offline_api_without_cache_degrades() {
        let dir = TempDir::new().unwrap();
        let network = Arc::new(MockNetwork::default());
        network.set_offline(true);
        let cache = coordinator(&dir, "v1", network);

        let response = cache.handle(HttpRequest::get("/api/downloads/unknown")).await.unwrap();
        assert_eq!(response.status, 503);
        assert!(response.is_offline_marker());
        let body: serde_json::Value = response.json().unwrap();
        assert_eq!(body["error"], "offline");
        assert_eq!(body["cached"], true);
    }

    #[tokio::test]
    async fn test_offline_post_to_api_degrades_without_storing() {
        let dir = TempDir::new().unwrap();
        let network = Arc::new(MockNetwork::default());
        network.set_offline(true);
        let cache = coordinator(&dir, "v1", network);

        let request = HttpRequest::new(Method::POST, "/api/downloads")
            .with_json(&serde_json::json!({"url": "https://x/video1"}))
            .unwrap();
        let response = cache.handle(request).await.unwrap();
        assert!(response.is_offline_marker());
        assert!(cache.storage().partition_names().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_offline_default_route_uses_root_document_or_fails() {
        let dir = TempDir::new().unwrap();
        let network = Arc::new(MockNetwork::default());
        network.set_offline(true);
        let cache = coordinator(&dir, "v1", network);

        let err = cache.handle(HttpRequest::get("/settings")).await.unwrap_err();
        assert!(err.is_network());

        let root = HttpResponse {
            status: 200,
            headers: Vec::new(),
            body: b"<html>app</html>".to_vec(),
            source: ResponseSource::Network,
        };
        cache.storage().put("v1-static", "GET /", &root).await.unwrap();

        let response = cache.handle(HttpRequest::get("/settings")).await.unwrap();
        assert_eq!(response.body, b"<html>app</html>");
    }

    #[tokio::test]
    async fn test_cache_first_hit_does_not_wait_for_network() {
        let dir = TempDir::new().unwrap();
        let gate = Arc::new(Notify::new());
        let network = Arc::new(MockNetwork {
            gate: Some(gate.clone()),
            ..Default::default()
        });
        network.serve("/images/cover.png", 200, "fresh");
        let cache = coordinator(&dir, "v1", network.clone());

        let stale = HttpResponse {
            status: 200,
            headers: Vec::new(),
            body: b"stale".to_vec(),
            source: ResponseSource::Network,
        };
        cache.storage().put("v1-media", "GET /images/cover.png", &stale).await.unwrap();

        let response = tokio::time::timeout(
            Duration::from_secs(1),
            cache.handle(HttpRequest::get("/images/cover.png")),
        )
        .await
        .expect("cache hit must not block on the network")
        .unwrap();
        assert_eq!(response.body, b"stale");
        assert_eq!(response.source, ResponseSource::Cache);

        // release the background fetch and let it land
        gate.notify_one();
        cache.settle_background().await;

        assert_eq!(network.calls(), 1);
        let refreshed = cache.storage().get("v1-media", "GET /images/cover.png").await.unwrap();
        assert_eq!(refreshed.body, b"fresh");
    }

    #[tokio::test]
    async fn test_cache_first_miss_fetches_and_stores() {
        let dir = TempDir::new().unwrap();
        let network = Arc::new(MockNetwork::default());
        network.serve("/assets/app.js", 200, "console.log(1)");
        let cache = coordinator(&dir, "v1", network.clone());

        let response = cache.handle(HttpRequest::get("/assets/app.js")).await.unwrap();
        assert_eq!(response.source, ResponseSource::Network);
        assert!(cache.storage().get("v1-static", "GET /assets/app.js").await.is_some());
        cache.settle_background().await;
        assert_eq!(network.calls(), 1);
    }

    #[tokio::test]
    async fn test_cache_first_background_failure_keeps_entry() {
        let dir = TempDir::new().unwrap();
        let network = Arc::new(MockNetwork::default());
        let cache = coordinator(&dir, "v1", network.clone());

        network.serve("/icons/a.svg", 200, "<svg/>");
        cache.handle(HttpRequest::get("/icons/a.svg")).await.unwrap();

        network.set_offline(true);
        let response = cache.handle(HttpRequest::get("/icons/a.svg")).await.unwrap();
        cache.settle_background().await;
        assert_eq!(response.body, b"<svg/>");
        assert!(cache.storage().get("v1-media", "GET /icons/a.svg").await.is_some());
    }

    #[tokio::test]
    async fn test_install_precaches_entry_points() {
        let dir = TempDir::new().unwrap();
        let network = Arc::new(MockNetwork::default());
        network.serve("/", 200, "<html>");
        network.serve("/index.html", 200, "<html>");
        network.serve("/manifest.json", 200, "{}");
        let cache = coordinator(&dir, "v1", network);

        assert_eq!(cache.install().await.unwrap(), 3);
        assert_eq!(cache.state(), GenerationState::Waiting);
        assert!(cache.storage().get("v1-static", "GET /manifest.json").await.is_some());
        assert_eq!(
            cache.storage().partition_names().await.unwrap(),
            vec!["v1-api", "v1-media", "v1-static"]
        );
    }

    #[tokio::test]
    async fn test_activation_deletes_only_old_generations() {
        let dir = TempDir::new().unwrap();
        let storage = CacheStorage::new(dir.path().to_path_buf());
        for name in ["v1-static", "v1-api", "v1-media", "v2-static", "v2-api", "v20-api", "other"] {
            storage.open(name).await.unwrap();
        }

        let network = Arc::new(MockNetwork::default());
        let cache = coordinator(&dir, "v2", network);
        let mut deleted = cache.activate().await.unwrap();
        deleted.sort();

        assert_eq!(deleted, vec!["other", "v1-api", "v1-media", "v1-static", "v20-api"]);
        assert_eq!(cache.storage().partition_names().await.unwrap(), vec!["v2-api", "v2-static"]);
        assert_eq!(cache.state(), GenerationState::Active);
    }

    #[tokio::test]
    async fn test_control_channel_commands() {
        let dir = TempDir::new().unwrap();
        let network = Arc::new(MockNetwork::default());
        network.set_offline(true);
        let cache = Arc::new(coordinator(&dir, "v2", network));
        cache.storage().open("v1-static").await.unwrap();

        cache.install().await.unwrap();
        assert_eq!(cache.state(), GenerationState::Waiting);

        let (control, _task) = cache.spawn_control();
        control.skip_waiting().await.unwrap();
        // a clear round-trips through the same queue, so skip_waiting has run by then
        let cleared = control.clear_all().await.unwrap();

        assert_eq!(cache.state(), GenerationState::Active);
        assert_eq!(cleared, 3);
        assert!(cache.storage().partition_names().await.unwrap().is_empty());
    }
}
