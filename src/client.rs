//! Typed client for the download backend
//!
//! All traffic goes through a [`Fetcher`], normally the cache coordinator, so
//! offline answers surface here as [`OfflineError::NetworkUnavailable`].

use async_trait::async_trait;
use reqwest::Method;
use std::sync::Arc;
use tracing::debug;

use crate::cache::{Fetcher, HttpRequest, HttpResponse};
use crate::error::{OfflineError, Result};
use crate::models::{DownloadRequest, Job, JobListResponse};

pub const DOWNLOADS_PATH: &str = "/api/downloads";
pub const IDEMPOTENCY_HEADER: &str = "Idempotency-Key";

/// Backend operations the offline layer depends on
#[async_trait]
pub trait DownloadApi: Send + Sync {
    /// `POST /api/downloads`
    async fn create_download(&self, request: &DownloadRequest, idempotency_key: Option<&str>) -> Result<Job>;

    /// `GET /api/downloads`
    async fn list_downloads(&self) -> Result<Vec<Job>>;

    /// `GET /api/downloads/{id}`
    async fn get_download(&self, id: &str) -> Result<Job>;

    /// `DELETE /api/downloads/{id}`
    async fn delete_download(&self, id: &str) -> Result<()>;
}

/// [`DownloadApi`] over HTTP
pub struct HttpDownloadApi {
    fetcher: Arc<dyn Fetcher>,
}

impl HttpDownloadApi {
    pub fn new(fetcher: Arc<dyn Fetcher>) -> Self {
        Self { fetcher }
    }

    fn job_path(id: &str) -> String {
        format!("{}/{}", DOWNLOADS_PATH, urlencoding::encode(id))
    }

    /// Send and turn offline markers and error statuses into errors
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse> {
        let response = self.fetcher.fetch(request).await?;

        if response.is_offline_marker() {
            return Err(OfflineError::NetworkUnavailable("You are offline. Please check your connection.".to_string()));
        }

        if !response.is_success() {
            return Err(OfflineError::Api {
                status: response.status,
                message: Self::error_message(&response),
            });
        }

        Ok(response)
    }

    /// Backend errors are `{"error": ..., "message": ...}`; fall back to the raw body
    fn error_message(response: &HttpResponse) -> String {
        serde_json::from_slice::<serde_json::Value>(&response.body)
            .ok()
            .and_then(|v| {
                v.get("message")
                    .or_else(|| v.get("error"))
                    .and_then(|m| m.as_str())
                    .map(str::to_string)
            })
            .unwrap_or_else(|| response.text())
    }
}

#[async_trait]
impl DownloadApi for HttpDownloadApi {
    async fn create_download(&self, request: &DownloadRequest, idempotency_key: Option<&str>) -> Result<Job> {
        let mut http = HttpRequest::new(Method::POST, DOWNLOADS_PATH).with_json(request)?;
        if let Some(key) = idempotency_key {
            http = http.with_header(IDEMPOTENCY_HEADER, key);
        }

        let job: Job = self.send(http).await?.json()?;
        debug!("Created job {} for {}", job.id, request.url);
        Ok(job)
    }

    async fn list_downloads(&self) -> Result<Vec<Job>> {
        let page: JobListResponse = self.send(HttpRequest::get(DOWNLOADS_PATH)).await?.json()?;
        Ok(page.into_jobs())
    }

    async fn get_download(&self, id: &str) -> Result<Job> {
        self.send(HttpRequest::get(Self::job_path(id))).await?.json()
    }

    async fn delete_download(&self, id: &str) -> Result<()> {
        self.send(HttpRequest::new(Method::DELETE, Self::job_path(id))).await?;
        Ok(())
    }
}
