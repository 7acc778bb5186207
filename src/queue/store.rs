//! Durable key-value storage backing the offline queue

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

use super::QueueItem;
use crate::error::{OfflineError, Result};

/// Fixed key the queue array is persisted under
pub const QUEUE_STORAGE_KEY: &str = "offline-download-queue";

/// String key-value store surviving process restarts
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;
    async fn set(&self, key: &str, value: &str) -> Result<()>;
    async fn remove(&self, key: &str) -> Result<()>;
}

/// One JSON file per key inside a directory
#[derive(Debug, Clone)]
pub struct FileKeyValueStore {
    dir: PathBuf,
}

impl FileKeyValueStore {
    /// Open (and create if needed) a store rooted at `dir`
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir).await?;
        info!("📁 Offline store initialized: {}", dir.display());
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let safe: String = key
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        self.dir.join(format!("{}.json", safe))
    }
}

#[async_trait]
impl KeyValueStore for FileKeyValueStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let path = self.path_for(key);
        match tokio::fs::read_to_string(&path).await {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        let path = self.path_for(key);
        // write-then-rename so a crash never leaves a half-written array
        let tmp = path.with_extension(format!("{}.tmp", uuid::Uuid::new_v4().simple()));
        if let Err(e) = tokio::fs::write(&tmp, value).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        if let Err(e) = tokio::fs::rename(&tmp, &path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        debug!("💾 Wrote key {} ({} bytes)", key, value.len());
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        match tokio::fs::remove_file(self.path_for(key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Volatile store for tests and ephemeral sessions
#[derive(Debug, Clone, Default)]
pub struct MemoryKeyValueStore {
    entries: Arc<Mutex<HashMap<String, String>>>,
}

impl MemoryKeyValueStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyValueStore for MemoryKeyValueStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let entries = self.entries.lock().unwrap_or_else(|p| p.into_inner());
        Ok(entries.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut entries = self.entries.lock().unwrap_or_else(|p| p.into_inner());
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        let mut entries = self.entries.lock().unwrap_or_else(|p| p.into_inner());
        entries.remove(key);
        Ok(())
    }
}

/// Queue persistence: one JSON array under [`QUEUE_STORAGE_KEY`]
///
/// The store knows nothing about capacity or dedup; the manager enforces both.
#[derive(Clone)]
pub struct QueueStore {
    backend: Arc<dyn KeyValueStore>,
    key: String,
}

impl QueueStore {
    pub fn new(backend: Arc<dyn KeyValueStore>) -> Self {
        Self {
            backend,
            key: QUEUE_STORAGE_KEY.to_string(),
        }
    }

    /// Read the persisted queue.
    ///
    /// Unparseable content is treated as an empty queue.
    pub async fn load(&self) -> Result<Vec<QueueItem>> {
        match self.load_strict().await {
            Err(OfflineError::StoreCorruption(reason)) => {
                warn!("Offline queue is unreadable, treating as empty: {}", reason);
                Ok(Vec::new())
            }
            other => other,
        }
    }

    /// Read the persisted queue, reporting corruption instead of hiding it
    pub async fn load_strict(&self) -> Result<Vec<QueueItem>> {
        match self.backend.get(&self.key).await? {
            None => Ok(Vec::new()),
            Some(raw) if raw.trim().is_empty() => Ok(Vec::new()),
            Some(raw) => serde_json::from_str::<Vec<QueueItem>>(&raw)
                .map_err(|e| OfflineError::StoreCorruption(e.to_string())),
        }
    }

    pub async fn save(&self, items: &[QueueItem]) -> Result<()> {
        let raw = serde_json::to_string(items)?;
        self.backend.set(&self.key, &raw).await
    }

    pub async fn clear(&self) -> Result<()> {
        self.backend.remove(&self.key).await
    }
}
