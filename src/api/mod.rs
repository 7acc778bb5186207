//! Local control server for the offline layer
//!
//! Exposes the queue, job view and cache administration over HTTP, and
//! streams queue notifications over a WebSocket.

use anyhow::Result;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::info;

use crate::offline::OfflineStack;

pub mod handlers;
pub mod models;
pub mod server;

/// API Server for handling REST requests and WebSocket connections
pub struct ApiServer {
    stack: Arc<OfflineStack>,
    port: u16,
}

impl ApiServer {
    pub fn new(stack: Arc<OfflineStack>, port: u16) -> Self {
        Self { stack, port }
    }

    /// Start the API server in the background
    pub fn start_background(self) -> JoinHandle<Result<()>> {
        tokio::spawn(async move { self.start().await })
    }

    /// Start the API server
    pub async fn start(self) -> Result<()> {
        info!("🚀 Starting control server on port {}", self.port);
        server::start_http_server(self.stack, self.port).await
    }
}
