/// Offline download queue
///
/// Requests made while the backend is unreachable are persisted here and
/// replayed through the normal submission path once connectivity returns.

pub mod manager;
pub mod store;

pub use manager::{DrainFailure, DrainOutcome, DrainReport, QueueManager};
pub use store::{FileKeyValueStore, KeyValueStore, MemoryKeyValueStore, QueueStore, QUEUE_STORAGE_KEY};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::DownloadRequest;

/// Lifecycle of a queued request. Succeeded items are removed, never stored.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum QueueItemStatus {
    Pending,
    Processing,
    Failed,
}

/// A persisted, not-yet-submitted download request
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct QueueItem {
    /// `offline-<millis>-<random>`, never reused
    pub id: String,

    /// Original job-creation request; `payload.url` is the dedup key
    pub payload: DownloadRequest,

    pub status: QueueItemStatus,

    pub queued_at: DateTime<Utc>,

    /// Last transition to processing
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processed_at: Option<DateTime<Utc>>,

    /// Last failure, only while status is failed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl QueueItem {
    pub fn new(payload: DownloadRequest) -> Self {
        let now = Utc::now();
        let suffix: String = uuid::Uuid::new_v4().simple().to_string().chars().take(9).collect();
        Self {
            id: format!("offline-{}-{}", now.timestamp_millis(), suffix),
            payload,
            status: QueueItemStatus::Pending,
            queued_at: now,
            processed_at: None,
            error: None,
        }
    }

    pub fn url(&self) -> &str {
        &self.payload.url
    }
}

/// Kind of mutation a queue notification reports
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum QueueAction {
    Added,
    Removed,
    Cleared,
    Updated,
}

/// Broadcast after every queue mutation so observers can resynchronize
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueEvent {
    pub queue: Vec<QueueItem>,
    pub action: QueueAction,
}
