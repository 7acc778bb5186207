//! On-disk response storage, one directory per cache partition

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use super::fetch::{HttpResponse, ResponseSource};
use crate::error::Result;

/// One file per entry: a JSON metadata line, then the raw body
const ENTRY_EXTENSION: &str = "entry";

/// Metadata line at the head of each entry file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredEntry {
    /// Request identity the entry answers
    pub cache_key: String,
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub stored_at: DateTime<Utc>,
    pub body_len: usize,
}

/// Per-partition statistics
#[derive(Debug, Clone, Default, Serialize)]
pub struct PartitionStats {
    pub name: String,
    pub entries: usize,
    pub bytes: u64,
}

/// Manages partition directories and the entries inside them
#[derive(Debug, Clone)]
pub struct CacheStorage {
    /// Root directory holding one sub-directory per partition
    root: PathBuf,
}

impl CacheStorage {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    /// Initialize cache directory
    pub async fn initialize(&self) -> Result<()> {
        tokio::fs::create_dir_all(&self.root).await?;
        info!("📁 Cache directory initialized: {}", self.root.display());
        Ok(())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// File stem for a request identity
    pub fn entry_stem(cache_key: &str) -> String {
        format!("{:x}", md5::compute(cache_key.as_bytes()))
    }

    fn partition_dir(&self, partition: &str) -> PathBuf {
        self.root.join(partition)
    }

    fn entry_path(&self, partition: &str, cache_key: &str) -> PathBuf {
        self.partition_dir(partition)
            .join(format!("{}.{}", Self::entry_stem(cache_key), ENTRY_EXTENSION))
    }

    /// Names of every partition currently on disk, sorted
    pub async fn partition_names(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(names),
            Err(e) => return Err(e.into()),
        };

        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_dir() {
                names.push(entry.file_name().to_string_lossy().into_owned());
            }
        }

        names.sort();
        Ok(names)
    }

    /// Create the partition if it does not exist yet
    pub async fn open(&self, partition: &str) -> Result<()> {
        tokio::fs::create_dir_all(self.partition_dir(partition)).await?;
        Ok(())
    }

    pub async fn has_partition(&self, partition: &str) -> bool {
        tokio::fs::metadata(self.partition_dir(partition))
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false)
    }

    /// Delete a whole partition. Returns false when it did not exist.
    pub async fn delete_partition(&self, partition: &str) -> Result<bool> {
        match tokio::fs::remove_dir_all(self.partition_dir(partition)).await {
            Ok(()) => {
                info!("🗑️ Deleted cache partition: {}", partition);
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Look up a stored response in one partition
    pub async fn get(&self, partition: &str, cache_key: &str) -> Option<HttpResponse> {
        let path = self.entry_path(partition, cache_key);

        let raw = match tokio::fs::read(&path).await {
            Ok(raw) => raw,
            Err(_) => {
                debug!("Cache miss in {}: {}", partition, cache_key);
                return None;
            }
        };

        let (entry, body) = match Self::decode(&raw) {
            Some(decoded) => decoded,
            None => {
                warn!("Failed to parse cache entry {}", path.display());
                return None;
            }
        };

        if entry.cache_key != cache_key {
            warn!("Cache key collision in {} for {}", partition, cache_key);
            return None;
        }

        debug!("Cache hit in {}: {}", partition, cache_key);
        Some(HttpResponse {
            status: entry.status,
            headers: entry.headers,
            body: body.to_vec(),
            source: ResponseSource::Cache,
        })
    }

    /// Split an entry file into its metadata line and body
    fn decode(raw: &[u8]) -> Option<(StoredEntry, &[u8])> {
        let split = raw.iter().position(|b| *b == b'\n')?;
        let entry: StoredEntry = serde_json::from_slice(&raw[..split]).ok()?;
        let body = &raw[split + 1..];
        (body.len() == entry.body_len).then_some((entry, body))
    }

    /// Look up a stored response in any partition, partitions in name order
    pub async fn match_any(&self, cache_key: &str) -> Option<HttpResponse> {
        let names = self.partition_names().await.ok()?;
        for name in names {
            if let Some(response) = self.get(&name, cache_key).await {
                return Some(response);
            }
        }
        None
    }

    /// Store (or overwrite) a response.
    ///
    /// Metadata and body share one file, written under a writer-unique
    /// temporary name and renamed into place, so concurrent writers to the
    /// same key never mix: the last rename wins whole.
    pub async fn put(&self, partition: &str, cache_key: &str, response: &HttpResponse) -> Result<()> {
        let dir = self.partition_dir(partition);
        tokio::fs::create_dir_all(&dir).await?;

        let entry = StoredEntry {
            cache_key: cache_key.to_string(),
            status: response.status,
            headers: response.headers.clone(),
            stored_at: Utc::now(),
            body_len: response.body.len(),
        };

        let mut raw = serde_json::to_vec(&entry)?;
        raw.push(b'\n');
        raw.extend_from_slice(&response.body);

        let stem = Self::entry_stem(cache_key);
        let tmp = dir.join(format!("{}.{}.tmp", stem, uuid::Uuid::new_v4().simple()));
        if let Err(e) = tokio::fs::write(&tmp, &raw).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        if let Err(e) = tokio::fs::rename(&tmp, dir.join(format!("{}.{}", stem, ENTRY_EXTENSION))).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }

        debug!("💾 Cached {} in {} ({} bytes)", cache_key, partition, entry.body_len);
        Ok(())
    }

    /// Entry count and byte size of a partition
    pub fn stats(&self, partition: &str) -> PartitionStats {
        let mut stats = PartitionStats {
            name: partition.to_string(),
            ..Default::default()
        };

        for entry in WalkDir::new(self.partition_dir(partition))
            .min_depth(1)
            .into_iter()
            .filter_map(|e| e.ok())
        {
            if !entry.file_type().is_file() {
                continue;
            }
            if let Ok(meta) = entry.metadata() {
                stats.bytes += meta.len();
            }
            if entry.path().extension().map_or(false, |ext| ext == ENTRY_EXTENSION) {
                stats.entries += 1;
            }
        }

        stats
    }
}
