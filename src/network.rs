//! Connectivity tracking and reconnect-triggered queue draining

use futures::future::BoxFuture;
use serde::Serialize;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cache::{Fetcher, HttpRequest};
use crate::queue::QueueManager;
use crate::scheduler::{spawn_delayed, Ticker};

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Connectivity {
    Online,
    Offline,
}

impl Connectivity {
    pub fn from_online(online: bool) -> Self {
        if online {
            Connectivity::Online
        } else {
            Connectivity::Offline
        }
    }

    pub fn is_online(&self) -> bool {
        *self == Connectivity::Online
    }
}

/// Callback the monitor runs once connectivity has settled
pub type ReconnectHook = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

/// Binary online/offline state fed by connectivity signals.
///
/// Going online schedules one drain after the settle delay. The drain only
/// runs if the state is still online, the queue has items and no other drain
/// is running. A newer transition supersedes a pending one.
pub struct NetworkMonitor {
    state: watch::Sender<Connectivity>,
    queue: Arc<QueueManager>,
    on_reconnect: ReconnectHook,
    settle_delay: Duration,
    shutdown: CancellationToken,
    pending_settle: Mutex<Option<CancellationToken>>,
}

impl NetworkMonitor {
    pub fn new(initial: Connectivity, settle_delay: Duration, queue: Arc<QueueManager>, on_reconnect: ReconnectHook) -> Self {
        let (state, _) = watch::channel(initial);
        Self {
            state,
            queue,
            on_reconnect,
            settle_delay,
            shutdown: CancellationToken::new(),
            pending_settle: Mutex::new(None),
        }
    }

    pub fn current(&self) -> Connectivity {
        *self.state.borrow()
    }

    pub fn is_online(&self) -> bool {
        self.current().is_online()
    }

    pub fn subscribe(&self) -> watch::Receiver<Connectivity> {
        self.state.subscribe()
    }

    /// Feed one connectivity signal. Returns the settle task when this signal
    /// was an offline → online transition.
    pub fn report(&self, online: bool) -> Option<JoinHandle<()>> {
        let next = Connectivity::from_online(online);
        let previous = self.state.send_replace(next);
        if previous == next {
            return None;
        }

        // any transition invalidates a settle still waiting
        let mut pending = self.pending_settle.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(token) = pending.take() {
            token.cancel();
        }

        match next {
            Connectivity::Offline => {
                info!("📴 Connection lost, downloads will be queued");
                None
            }
            Connectivity::Online => {
                info!("📶 Connection restored, draining queue in {:?}", self.settle_delay);
                let token = self.shutdown.child_token();
                *pending = Some(token.clone());
                Some(self.schedule_settle(token))
            }
        }
    }

    fn schedule_settle(&self, token: CancellationToken) -> JoinHandle<()> {
        let state = self.state.subscribe();
        let queue = Arc::clone(&self.queue);
        let on_reconnect = Arc::clone(&self.on_reconnect);

        spawn_delayed(self.settle_delay, token, async move {
            if !state.borrow().is_online() {
                debug!("Went offline again before the queue could drain");
                return;
            }
            if queue.is_draining() {
                debug!("Queue already draining, reconnect drain skipped");
                return;
            }
            match queue.is_empty().await {
                Ok(true) => debug!("Reconnected with an empty queue"),
                Ok(false) => on_reconnect().await,
                Err(e) => warn!("Cannot inspect offline queue after reconnect: {}", e),
            }
        })
    }

    /// Cancel any pending settle and stop accepting new ones
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }
}

/// Produces connectivity signals by polling the backend health endpoint
pub struct ConnectivityProbe {
    fetcher: Arc<dyn Fetcher>,
    path: String,
    interval: Duration,
}

impl ConnectivityProbe {
    /// `fetcher` must reach the network directly, not through the cache
    pub fn new(fetcher: Arc<dyn Fetcher>, path: impl Into<String>, interval: Duration) -> Self {
        Self {
            fetcher,
            path: path.into(),
            interval,
        }
    }

    pub async fn check(&self) -> bool {
        match self.fetcher.fetch(HttpRequest::get(self.path.as_str())).await {
            Ok(response) => response.is_success(),
            Err(e) => {
                debug!("Health probe failed: {}", e);
                false
            }
        }
    }

    /// Probe right away, then once per interval until cancelled
    pub async fn run(&self, monitor: Arc<NetworkMonitor>, token: CancellationToken) {
        monitor.report(self.check().await);

        let mut ticker = Ticker::new(self.interval);
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = ticker.tick() => {
                    monitor.report(self.check().await);
                }
            }
        }
    }

    pub fn spawn(self, monitor: Arc<NetworkMonitor>, token: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move { self.run(monitor, token).await })
    }
}
