//! API data models

use serde::{Deserialize, Serialize};

use crate::cache::{GenerationState, PartitionStats};
use crate::jobs::JobStoreStats;
use crate::network::Connectivity;

/// API response wrapper
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message),
        }
    }
}

/// Cache section of the status report
#[derive(Debug, Serialize)]
pub struct CacheStatus {
    pub version: String,
    pub state: GenerationState,
    pub partitions: Vec<PartitionStats>,
}

/// Overall offline layer status
#[derive(Debug, Serialize)]
pub struct OfflineStatus {
    pub connectivity: Connectivity,
    pub queue_size: usize,
    pub queue_capacity: usize,
    pub draining: bool,
    pub jobs: JobStoreStats,
    pub cache: Option<CacheStatus>,
    pub timestamp: String,
}

/// Answer to a cache clear request
#[derive(Debug, Serialize)]
pub struct CacheCleared {
    pub partitions_cleared: usize,
}

/// Answer to a cache activation request
#[derive(Debug, Serialize)]
pub struct CacheActivated {
    pub deleted: Vec<String>,
}
