use thiserror::Error;

/// Errors surfaced by the offline layer.
///
/// User-facing variants carry the message shown to the user verbatim.
/// Background paths (drain retries, reconciliation, revalidation) log these
/// and never propagate them to the host.
#[derive(Debug, Error)]
pub enum OfflineError {
    #[error("Download already in queue: {url}")]
    Duplicate { url: String },

    #[error("Queue is full ({capacity} items). Please wait for downloads to process or clear the queue.")]
    Capacity { capacity: usize },

    #[error("failed to submit queued download {id}: {reason}")]
    Submission { id: String, reason: String },

    #[error("network unavailable: {0}")]
    NetworkUnavailable(String),

    #[error("offline store is corrupted: {0}")]
    StoreCorruption(String),

    #[error("backend returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("invalid url: {0}")]
    InvalidUrl(String),

    #[error("{0} channel closed")]
    ChannelClosed(&'static str),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl OfflineError {
    /// True when the failure means the backend could not be reached at all,
    /// as opposed to the backend answering with an error.
    pub fn is_network(&self) -> bool {
        match self {
            OfflineError::NetworkUnavailable(_) => true,
            OfflineError::Http(e) => e.is_connect() || e.is_timeout() || e.is_request(),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, OfflineError>;
