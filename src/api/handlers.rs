//! Request handlers for the control server

use anyhow::{anyhow, Result};
use serde_json::Value;

use super::models::{CacheActivated, CacheCleared, CacheStatus, OfflineStatus};
use crate::cache::CacheControl;
use crate::models::Job;
use crate::offline::OfflineStack;
use crate::queue::{DrainOutcome, QueueItem};

/// Health check endpoint
pub async fn health_check() -> Result<Value> {
    Ok(serde_json::json!({
        "status": "healthy",
        "service": "rmd-offline",
        "version": env!("CARGO_PKG_VERSION"),
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

pub async fn list_queue(stack: &OfflineStack) -> Result<Vec<QueueItem>> {
    Ok(stack.client.queue().snapshot().await?)
}

pub async fn clear_queue(stack: &OfflineStack) -> Result<()> {
    Ok(stack.client.queue().clear().await?)
}

pub async fn remove_queue_item(stack: &OfflineStack, id: &str) -> Result<()> {
    Ok(stack.client.queue().dequeue(id).await?)
}

pub async fn drain_queue(stack: &OfflineStack) -> DrainOutcome {
    stack.client.drain_queue().await
}

pub async fn list_jobs(stack: &OfflineStack) -> Vec<Job> {
    stack.client.jobs().snapshot().await
}

/// Clear every partition through the coordinator's control channel
pub async fn clear_cache(control: Option<&CacheControl>) -> Result<CacheCleared> {
    let control = control.ok_or_else(|| anyhow!("cache is disabled"))?;
    let partitions_cleared = control.clear_all().await?;
    Ok(CacheCleared { partitions_cleared })
}

pub async fn activate_cache(stack: &OfflineStack) -> Result<CacheActivated> {
    let cache = stack.cache.as_ref().ok_or_else(|| anyhow!("cache is disabled"))?;
    let deleted = cache.activate().await?;
    Ok(CacheActivated { deleted })
}

/// Aggregate status of queue, connectivity, jobs and cache
pub async fn get_status(stack: &OfflineStack) -> Result<OfflineStatus> {
    let queue = stack.client.queue();

    let cache = match &stack.cache {
        Some(cache) => Some(CacheStatus {
            version: cache.version().to_string(),
            state: cache.state(),
            partitions: cache.partition_stats().await?,
        }),
        None => None,
    };

    Ok(OfflineStatus {
        connectivity: stack.client.monitor().current(),
        queue_size: queue.len().await?,
        queue_capacity: queue.capacity(),
        draining: queue.is_draining(),
        jobs: stack.client.jobs().get_statistics().await,
        cache,
        timestamp: chrono::Utc::now().to_rfc3339(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigBuilder;
    use crate::models::{DownloadRequest, DownloadType};
    use crate::network::Connectivity;
    use tempfile::TempDir;

    async fn stack(dir: &TempDir, cache: bool) -> OfflineStack {
        let config = ConfigBuilder::new()
            .with_base_url("http://127.0.0.1:9")
            .with_store_dir(dir.path().join("store"))
            .with_cache_dir(dir.path().join("cache"))
            .enable_cache(cache)
            .build();
        OfflineStack::from_config(&config).await.unwrap()
    }

    #[tokio::test]
    async fn test_status_reports_queue() {
        let dir = TempDir::new().unwrap();
        let stack = stack(&dir, true).await;
        stack
            .client
            .queue()
            .enqueue(DownloadRequest::new("https://x/video1", DownloadType::Audio))
            .await
            .unwrap();

        let status = get_status(&stack).await.unwrap();
        assert_eq!(status.queue_size, 1);
        assert_eq!(status.queue_capacity, 100);
        assert_eq!(status.connectivity, Connectivity::Online);
        assert!(status.cache.is_some());
    }

    #[tokio::test]
    async fn test_cache_endpoints_require_cache() {
        let dir = TempDir::new().unwrap();
        let stack = stack(&dir, false).await;

        assert!(clear_cache(None).await.is_err());
        assert!(activate_cache(&stack).await.is_err());
    }

    #[tokio::test]
    async fn test_queue_handlers() {
        let dir = TempDir::new().unwrap();
        let stack = stack(&dir, false).await;
        let item = stack
            .client
            .queue()
            .enqueue(DownloadRequest::new("https://x/video1", DownloadType::Video))
            .await
            .unwrap();

        assert_eq!(list_queue(&stack).await.unwrap().len(), 1);
        remove_queue_item(&stack, &item.id).await.unwrap();
        assert!(list_queue(&stack).await.unwrap().is_empty());
    }
}
