//! Data shared with the download backend

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind of media the backend should produce
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DownloadType {
    Video,
    Audio,
    Instrumental,
}

impl Default for DownloadType {
    fn default() -> Self {
        DownloadType::Video
    }
}

impl std::str::FromStr for DownloadType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "video" => Ok(DownloadType::Video),
            "audio" => Ok(DownloadType::Audio),
            "instrumental" => Ok(DownloadType::Instrumental),
            other => Err(format!("unknown download type: {}", other)),
        }
    }
}

/// Job-creation request, `POST /api/downloads` body
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DownloadRequest {
    pub url: String,

    #[serde(rename = "type")]
    pub download_type: DownloadType,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quality: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_filename: Option<String>,

    #[serde(default)]
    pub download_playlist: bool,
}

impl DownloadRequest {
    pub fn new(url: impl Into<String>, download_type: DownloadType) -> Self {
        Self {
            url: url.into(),
            download_type,
            format: None,
            quality: None,
            custom_filename: None,
            download_playlist: false,
        }
    }

    pub fn with_format(mut self, format: impl Into<String>) -> Self {
        self.format = Some(format.into());
        self
    }

    pub fn with_playlist(mut self, download_playlist: bool) -> Self {
        self.download_playlist = download_playlist;
        self
    }
}

/// Server-side job status
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Downloading,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    /// Jobs in these states are still changing on the server and get polled.
    pub fn is_in_flight(&self) -> bool {
        matches!(self, JobStatus::Pending | JobStatus::Downloading | JobStatus::Processing)
    }
}

/// Descriptive metadata the backend attaches to a job
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct JobMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,

    /// File size in bytes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_size: Option<u64>,

    /// Duration in seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
}

/// A server-tracked download job
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Job {
    pub id: String,
    pub status: JobStatus,

    /// Progress percentage (0-100)
    #[serde(default)]
    pub progress: f32,

    #[serde(default)]
    pub message: String,

    #[serde(default)]
    pub url: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub download_type: Option<DownloadType>,

    pub created_at: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,

    #[serde(default)]
    pub is_playlist: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_items: Option<i32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_items: Option<i32>,

    #[serde(flatten)]
    pub metadata: JobMetadata,
}

impl Job {
    /// Fresh pending job, mostly useful for tests and mock backends.
    pub fn pending(id: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            status: JobStatus::Pending,
            progress: 0.0,
            message: "Download queued".to_string(),
            url: url.into(),
            download_type: None,
            created_at: Utc::now(),
            completed_at: None,
            is_playlist: false,
            total_items: None,
            completed_items: None,
            metadata: JobMetadata::default(),
        }
    }
}

/// `GET /api/downloads` answers either with a bare array or a paginated page
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub(crate) enum JobListResponse {
    Plain(Vec<Job>),
    Paginated { items: Vec<Job> },
}

impl JobListResponse {
    pub(crate) fn into_jobs(self) -> Vec<Job> {
        match self {
            JobListResponse::Plain(jobs) => jobs,
            JobListResponse::Paginated { items } => items,
        }
    }
}
