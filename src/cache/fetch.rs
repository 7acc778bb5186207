//! Transport abstraction the cache coordinator intercepts

use async_trait::async_trait;
use reqwest::Method;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use crate::error::{OfflineError, Result};

/// Outgoing request, addressed by path relative to the backend origin
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    /// Path plus optional query, always starting with `/`
    pub path: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<Vec<u8>>,
}

impl HttpRequest {
    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn new(method: Method, path: impl Into<String>) -> Self {
        let path = path.into();
        let path = if path.starts_with('/') { path } else { format!("/{}", path) };
        Self {
            method,
            path,
            headers: Vec::new(),
            body: None,
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_json<T: Serialize>(mut self, body: &T) -> Result<Self> {
        self.body = Some(serde_json::to_vec(body)?);
        self.headers.push(("content-type".to_string(), "application/json".to_string()));
        Ok(self)
    }

    /// Path without query string or fragment
    pub fn pathname(&self) -> &str {
        let end = self.path.find(&['?', '#'][..]).unwrap_or(self.path.len());
        &self.path[..end]
    }

    /// Identity used to match stored responses
    pub fn cache_key(&self) -> String {
        format!("{} {}", self.method, self.path)
    }
}

/// Where a response came from
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ResponseSource {
    Network,
    Cache,
    /// Synthesized because the network was unreachable
    Offline,
}

#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
    pub source: ResponseSource,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn json<T: serde::de::DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_slice(&self.body)?)
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// True for the degraded response the coordinator answers with offline
    pub fn is_offline_marker(&self) -> bool {
        if self.source == ResponseSource::Offline {
            return true;
        }
        self.status == 503
            && serde_json::from_slice::<serde_json::Value>(&self.body)
                .map(|v| v.get("error").and_then(|e| e.as_str()) == Some("offline"))
                .unwrap_or(false)
    }
}

/// Anything that can answer an [`HttpRequest`]
///
/// Transport failures come back as [`OfflineError::NetworkUnavailable`];
/// HTTP error statuses are ordinary responses.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, request: HttpRequest) -> Result<HttpResponse>;
}

/// Network transport backed by reqwest
#[derive(Debug, Clone)]
pub struct ReqwestFetcher {
    base_url: url::Url,
    client: reqwest::Client,
}

impl ReqwestFetcher {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let mut base_url =
            url::Url::parse(base_url).map_err(|e| OfflineError::InvalidUrl(format!("{}: {}", base_url, e)))?;
        // request paths are joined below the base path, which must end in `/`
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { base_url, client })
    }

    pub fn base_url(&self) -> &url::Url {
        &self.base_url
    }

    /// Absolute URL of a request path, keeping any path prefix of the base
    pub fn endpoint(&self, path: &str) -> Result<url::Url> {
        self.base_url
            .join(path.trim_start_matches('/'))
            .map_err(|e| OfflineError::InvalidUrl(format!("{}: {}", path, e)))
    }
}

#[async_trait]
impl Fetcher for ReqwestFetcher {
    async fn fetch(&self, request: HttpRequest) -> Result<HttpResponse> {
        let url = self.endpoint(&request.path)?;

        debug!("{} {}", request.method, url);

        let mut builder = self.client.request(request.method.clone(), url);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| OfflineError::NetworkUnavailable(e.to_string()))?;

        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| value.to_str().ok().map(|v| (name.to_string(), v.to_string())))
            .collect();
        let body = response
            .bytes()
            .await
            .map_err(|e| OfflineError::NetworkUnavailable(e.to_string()))?
            .to_vec();

        Ok(HttpResponse {
            status,
            headers,
            body,
            source: ResponseSource::Network,
        })
    }
}
