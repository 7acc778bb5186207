use chrono::Utc;
use serde::Serialize;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, info, warn};

use super::{QueueAction, QueueEvent, QueueItem, QueueItemStatus, QueueStore};
use crate::error::{OfflineError, Result};
use crate::models::DownloadRequest;

const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Per-item failure collected during a drain pass
#[derive(Debug, Clone, Serialize)]
pub struct DrainFailure {
    pub id: String,
    pub url: String,
    pub error: String,
}

/// Summary of one drain pass
#[derive(Debug, Clone, Default, Serialize)]
pub struct DrainReport {
    pub processed: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub errors: Vec<DrainFailure>,
}

/// Result of asking for a drain
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DrainOutcome {
    Completed(DrainReport),
    /// Another pass is already running
    Busy,
    /// Connectivity is down, nothing attempted
    Offline,
}

impl DrainOutcome {
    pub fn report(&self) -> Option<&DrainReport> {
        match self {
            DrainOutcome::Completed(report) => Some(report),
            _ => None,
        }
    }
}

/// Clears the draining flag however the pass ends
struct DrainGuard<'a>(&'a AtomicBool);

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Owns the offline queue: dedup, capacity, item lifecycle, notifications.
///
/// Every mutation is a read-modify-write of the durable store under one
/// async mutex, so the store is always re-read right before it is written.
pub struct QueueManager {
    store: QueueStore,
    write_lock: Mutex<()>,
    capacity: usize,
    drain_delay: Duration,
    draining: AtomicBool,
    events: broadcast::Sender<QueueEvent>,
}

impl QueueManager {
    pub fn new(store: QueueStore, capacity: usize, drain_delay: Duration) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            store,
            write_lock: Mutex::new(()),
            capacity,
            drain_delay,
            draining: AtomicBool::new(false),
            events,
        }
    }

    /// Observe every queue mutation
    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.events.subscribe()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_draining(&self) -> bool {
        self.draining.load(Ordering::SeqCst)
    }

    /// Current durable queue, in enqueue order
    pub async fn snapshot(&self) -> Result<Vec<QueueItem>> {
        self.store.load().await
    }

    pub async fn len(&self) -> Result<usize> {
        Ok(self.store.load().await?.len())
    }

    pub async fn is_empty(&self) -> Result<bool> {
        Ok(self.len().await? == 0)
    }

    /// Persist a request for later submission
    pub async fn enqueue(&self, request: DownloadRequest) -> Result<QueueItem> {
        url::Url::parse(&request.url).map_err(|e| OfflineError::InvalidUrl(format!("{}: {}", request.url, e)))?;

        let _guard = self.write_lock.lock().await;
        let mut queue = self.store.load().await?;

        if queue.iter().any(|item| item.payload.url == request.url) {
            debug!("Rejected duplicate queue entry: {}", request.url);
            return Err(OfflineError::Duplicate { url: request.url });
        }

        if queue.len() >= self.capacity {
            warn!("Offline queue full ({} items), rejecting {}", queue.len(), request.url);
            return Err(OfflineError::Capacity { capacity: self.capacity });
        }

        let item = QueueItem::new(request);
        queue.push(item.clone());
        self.store.save(&queue).await?;

        info!("📥 Queued offline download {} ({} in queue)", item.payload.url, queue.len());
        self.notify(queue, QueueAction::Added);
        Ok(item)
    }

    /// Remove an item; absent ids are not an error
    pub async fn dequeue(&self, item_id: &str) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut queue = self.store.load().await?;
        queue.retain(|item| item.id != item_id);
        self.store.save(&queue).await?;

        debug!("Removed {} from offline queue ({} left)", item_id, queue.len());
        self.notify(queue, QueueAction::Removed);
        Ok(())
    }

    pub async fn clear(&self) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        self.store.clear().await?;

        info!("🧹 Offline queue cleared");
        self.notify(Vec::new(), QueueAction::Cleared);
        Ok(())
    }

    /// Set an item's status. Returns false when the item is gone.
    pub async fn update_status(&self, item_id: &str, status: QueueItemStatus, error: Option<String>) -> Result<bool> {
        let _guard = self.write_lock.lock().await;
        let mut queue = self.store.load().await?;

        let Some(item) = queue.iter_mut().find(|item| item.id == item_id) else {
            return Ok(false);
        };

        item.status = status;
        match status {
            QueueItemStatus::Processing => {
                item.processed_at = Some(Utc::now());
                item.error = None;
            }
            QueueItemStatus::Failed => item.error = error,
            QueueItemStatus::Pending => item.error = None,
        }

        self.store.save(&queue).await?;
        self.notify(queue, QueueAction::Updated);
        Ok(true)
    }

    /// Replay every queued request through `submit`, oldest first.
    ///
    /// Succeeded items are removed after `submit` returns, failed ones stay
    /// marked `failed` for the next pass. A crash between a successful submit
    /// and the removal leaves the item queued, so it can be submitted twice.
    pub async fn drain<F, Fut, T>(&self, mut submit: F) -> DrainOutcome
    where
        F: FnMut(QueueItem) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        if self
            .draining
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("Drain already in progress, skipping");
            return DrainOutcome::Busy;
        }
        let _drain_guard = DrainGuard(&self.draining);

        let snapshot = match self.store.load().await {
            Ok(queue) => queue,
            Err(e) => {
                warn!("Cannot read offline queue for draining: {}", e);
                return DrainOutcome::Completed(DrainReport::default());
            }
        };

        let mut report = DrainReport::default();
        if snapshot.is_empty() {
            return DrainOutcome::Completed(report);
        }

        info!("🔄 Draining {} queued downloads", snapshot.len());

        for (index, item) in snapshot.into_iter().enumerate() {
            if index > 0 && !self.drain_delay.is_zero() {
                tokio::time::sleep(self.drain_delay).await;
            }

            match self.update_status(&item.id, QueueItemStatus::Processing, None).await {
                Ok(true) => {}
                Ok(false) => {
                    debug!("Queue item {} removed before it was drained", item.id);
                    continue;
                }
                Err(e) => warn!("Could not mark {} as processing: {}", item.id, e),
            }

            let id = item.id.clone();
            let url = item.payload.url.clone();
            report.processed += 1;

            match submit(item).await {
                Ok(_) => {
                    if let Err(e) = self.dequeue(&id).await {
                        warn!("Submitted {} but could not remove it from the queue: {}", url, e);
                    }
                    report.succeeded += 1;
                    info!("✅ Submitted queued download {}", url);
                }
                Err(e) => {
                    let reason = e.to_string();
                    warn!("{}", OfflineError::Submission { id: id.clone(), reason: reason.clone() });
                    if let Err(store_err) = self
                        .update_status(&id, QueueItemStatus::Failed, Some(reason.clone()))
                        .await
                    {
                        warn!("Could not mark {} as failed: {}", id, store_err);
                    }
                    report.failed += 1;
                    report.errors.push(DrainFailure { id, url, error: reason });
                }
            }
        }

        info!(
            "📊 Drain finished: {} processed, {} succeeded, {} failed",
            report.processed, report.succeeded, report.failed
        );
        DrainOutcome::Completed(report)
    }

    fn notify(&self, queue: Vec<QueueItem>, action: QueueAction) {
        // no receivers is fine
        let _ = self.events.send(QueueEvent { queue, action });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DownloadType;
    use crate::queue::MemoryKeyValueStore;
    use std::sync::Arc;

    fn manager(capacity: usize) -> QueueManager {
        let store = QueueStore::new(Arc::new(MemoryKeyValueStore::new()));
        QueueManager::new(store, capacity, Duration::from_millis(500))
    }

    fn request(url: &str) -> DownloadRequest {
        DownloadRequest::new(url, DownloadType::Video)
    }

    #[tokio::test]
    async fn test_enqueue_persists_pending_item() {
        let queue = manager(100);
        let item = queue.enqueue(request("https://x/video1")).await.unwrap();

        let snapshot = queue.snapshot().await.unwrap();
        assert_eq!(snapshot, vec![item]);
        assert_eq!(snapshot[0].status, QueueItemStatus::Pending);
    }

    #[tokio::test]
    async fn test_duplicate_url_rejected_without_mutation() {
        let queue = manager(100);
        queue.enqueue(request("https://x/video1")).await.unwrap();
        let before = queue.snapshot().await.unwrap();

        let err = queue.enqueue(request("https://x/video1")).await.unwrap_err();
        assert!(matches!(err, OfflineError::Duplicate { .. }));
        assert_eq!(queue.snapshot().await.unwrap(), before);
    }

    #[tokio::test]
    async fn test_duplicate_rejected_while_failed() {
        let queue = manager(100);
        let item = queue.enqueue(request("https://x/video1")).await.unwrap();
        queue
            .update_status(&item.id, QueueItemStatus::Failed, Some("boom".into()))
            .await
            .unwrap();

        assert!(matches!(
            queue.enqueue(request("https://x/video1")).await,
            Err(OfflineError::Duplicate { .. })
        ));
    }

    #[tokio::test]
    async fn test_capacity_enforced() {
        let queue = manager(3);
        for i in 0..3 {
            queue.enqueue(request(&format!("https://x/{}", i))).await.unwrap();
        }

        let err = queue.enqueue(request("https://x/overflow")).await.unwrap_err();
        assert!(matches!(err, OfflineError::Capacity { capacity: 3 }));
        assert_eq!(queue.len().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_mixed_operations_respect_invariants() {
        let queue = manager(5);
        for round in 0..4 {
            for i in 0..4 {
                let _ = queue.enqueue(request(&format!("https://x/{}", (round + i) % 7))).await;
            }
            let snapshot = queue.snapshot().await.unwrap();
            if let Some(first) = snapshot.first() {
                queue.dequeue(&first.id).await.unwrap();
            }

            let snapshot = queue.snapshot().await.unwrap();
            assert!(snapshot.len() <= 5);
            let mut urls: Vec<_> = snapshot.iter().map(|i| i.url().to_string()).collect();
            urls.sort();
            urls.dedup();
            assert_eq!(urls.len(), snapshot.len());
        }
    }

    #[tokio::test]
    async fn test_dequeue_is_idempotent() {
        let queue = manager(100);
        let item = queue.enqueue(request("https://x/video1")).await.unwrap();
        queue.dequeue(&item.id).await.unwrap();
        tokio_test::assert_ok!(queue.dequeue(&item.id).await);
        assert!(queue.is_empty().await.unwrap());
    }

    #[tokio::test]
    async fn test_invalid_url_rejected() {
        let queue = manager(100);
        assert!(matches!(
            queue.enqueue(request("not a url")).await,
            Err(OfflineError::InvalidUrl(_))
        ));
        assert!(queue.is_empty().await.unwrap());
    }

    #[tokio::test]
    async fn test_notifications_for_each_mutation() {
        let queue = manager(100);
        let mut events = queue.subscribe();

        let item = queue.enqueue(request("https://x/a")).await.unwrap();
        queue.update_status(&item.id, QueueItemStatus::Processing, None).await.unwrap();
        queue.dequeue(&item.id).await.unwrap();
        queue.clear().await.unwrap();

        let added = events.recv().await.unwrap();
        assert_eq!(added.action, QueueAction::Added);
        assert_eq!(added.queue.len(), 1);
        assert_eq!(events.recv().await.unwrap().action, QueueAction::Updated);
        assert_eq!(events.recv().await.unwrap().action, QueueAction::Removed);
        let cleared = events.recv().await.unwrap();
        assert_eq!(cleared.action, QueueAction::Cleared);
        assert!(cleared.queue.is_empty());
    }

    #[tokio::test]
    async fn test_processing_sets_processed_at() {
        let queue = manager(100);
        let item = queue.enqueue(request("https://x/a")).await.unwrap();
        assert!(item.processed_at.is_none());

        queue.update_status(&item.id, QueueItemStatus::Processing, None).await.unwrap();
        let stored = &queue.snapshot().await.unwrap()[0];
        assert_eq!(stored.status, QueueItemStatus::Processing);
        assert!(stored.processed_at.is_some());
        assert!(stored.error.is_none());

        assert!(!queue.update_status("missing", QueueItemStatus::Failed, None).await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_drain_all_succeed_in_order() {
        let queue = manager(100);
        for url in ["https://x/1", "https://x/2", "https://x/3"] {
            queue.enqueue(request(url)).await.unwrap();
        }

        let mut submitted = Vec::new();
        let outcome = queue
            .drain(|item| {
                submitted.push(item.payload.url.clone());
                async move { Ok::<_, OfflineError>(()) }
            })
            .await;

        let report = outcome.report().unwrap();
        assert_eq!(report.succeeded, 3);
        assert_eq!(report.failed, 0);
        assert_eq!(submitted, vec!["https://x/1", "https://x/2", "https://x/3"]);
        assert!(queue.is_empty().await.unwrap());
        assert!(!queue.is_draining());
    }

    #[tokio::test(start_paused = true)]
    async fn test_drain_keeps_failed_item() {
        let queue = manager(100);
        for url in ["https://x/1", "https://x/2", "https://x/3"] {
            queue.enqueue(request(url)).await.unwrap();
        }

        let outcome = queue
            .drain(|item| async move {
                if item.payload.url == "https://x/2" {
                    Err(OfflineError::Api { status: 500, message: "backend exploded".into() })
                } else {
                    Ok(())
                }
            })
            .await;

        let report = outcome.report().unwrap();
        assert_eq!(report.succeeded, 2);
        assert_eq!(report.failed, 1);
        assert_eq!(report.errors[0].url, "https://x/2");

        let remaining = queue.snapshot().await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].url(), "https://x/2");
        assert_eq!(remaining[0].status, QueueItemStatus::Failed);
        assert!(remaining[0].error.as_deref().unwrap().contains("backend exploded"));

        // the next pass retries the failed item and removes it on success
        let mut retried = Vec::new();
        let outcome = queue
            .drain(|item| {
                retried.push(item.payload.url.clone());
                async { Ok::<_, OfflineError>(()) }
            })
            .await;

        let report = outcome.report().unwrap();
        assert_eq!(report.processed, 1);
        assert_eq!(report.succeeded, 1);
        assert_eq!(retried, vec!["https://x/2"]);
        assert!(queue.is_empty().await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_drain_spaces_items() {
        let queue = manager(100);
        for url in ["https://x/1", "https://x/2", "https://x/3"] {
            queue.enqueue(request(url)).await.unwrap();
        }

        let start = tokio::time::Instant::now();
        queue.drain(|_| async { Ok::<_, OfflineError>(()) }).await;
        assert!(start.elapsed() >= Duration::from_millis(1000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_drain_reports_busy() {
        let queue = Arc::new(manager(100));
        queue.enqueue(request("https://x/1")).await.unwrap();
        queue.enqueue(request("https://x/2")).await.unwrap();

        let first = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.drain(|_| async { Ok::<_, OfflineError>(()) }).await })
        };

        // let the first pass reach its inter-item delay
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(queue.is_draining());
        let second = queue.drain(|_| async { Ok::<_, OfflineError>(()) }).await;
        assert!(matches!(second, DrainOutcome::Busy));

        let first = first.await.unwrap();
        assert_eq!(first.report().unwrap().succeeded, 2);
        assert!(!queue.is_draining());
    }
}
