//! HTTP server implementation for the control API

use anyhow::Result;
use axum::{
    extract::{
        ws::{Message, WebSocket},
        Path, State, WebSocketUpgrade,
    },
    http::{header, Method, StatusCode},
    response::{IntoResponse, Json},
    routing::{delete, get, post},
    Router,
};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{info, warn};

use super::{handlers, models::ApiResponse};
use crate::cache::CacheControl;
use crate::offline::OfflineStack;
use crate::queue::DrainOutcome;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub stack: Arc<OfflineStack>,
    /// Control channel of the cache coordinator, when the cache is enabled
    pub cache_control: Option<CacheControl>,
}

/// Build the router; split out so it can be exercised without binding a port
pub fn router(stack: Arc<OfflineStack>) -> Router {
    let cache_control = stack.cache.as_ref().map(|cache| cache.spawn_control().0);
    let app_state = AppState { stack, cache_control };

    // Configure CORS to allow browser access
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::DELETE])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]);

    Router::new()
        .route("/health", get(health_handler))
        .route("/api/offline/queue", get(list_queue_handler).delete(clear_queue_handler))
        .route("/api/offline/queue/:id", delete(remove_queue_item_handler))
        .route("/api/offline/queue/drain", post(drain_queue_handler))
        .route("/api/offline/jobs", get(list_jobs_handler))
        .route("/api/offline/cache/clear", post(clear_cache_handler))
        .route("/api/offline/cache/activate", post(activate_cache_handler))
        .route("/api/offline/status", get(status_handler))
        .route("/ws", get(websocket_handler))
        .with_state(app_state)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors),
        )
}

/// Configure and start the HTTP server
pub async fn start_http_server(stack: Arc<OfflineStack>, port: u16) -> Result<()> {
    let app = router(stack);

    let listener = tokio::net::TcpListener::bind(format!("127.0.0.1:{}", port)).await?;
    info!("🌐 Control server listening on http://127.0.0.1:{}", port);
    info!("🔗 Queue events available at ws://127.0.0.1:{}/ws", port);

    axum::serve(listener, app).await?;

    Ok(())
}

fn error_response(status: StatusCode, e: impl std::fmt::Display) -> axum::response::Response {
    (status, Json(ApiResponse::<()>::error(e.to_string()))).into_response()
}

/// Health check handler
async fn health_handler() -> impl IntoResponse {
    match handlers::health_check().await {
        Ok(data) => (StatusCode::OK, Json(data)).into_response(),
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, e),
    }
}

async fn list_queue_handler(State(state): State<AppState>) -> impl IntoResponse {
    match handlers::list_queue(&state.stack).await {
        Ok(items) => (StatusCode::OK, Json(items)).into_response(),
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, e),
    }
}

async fn clear_queue_handler(State(state): State<AppState>) -> impl IntoResponse {
    match handlers::clear_queue(&state.stack).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, e),
    }
}

async fn remove_queue_item_handler(State(state): State<AppState>, Path(id): Path<String>) -> impl IntoResponse {
    match handlers::remove_queue_item(&state.stack, &id).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, e),
    }
}

/// Drain handler; 409 while another drain runs, 503 while offline
async fn drain_queue_handler(State(state): State<AppState>) -> impl IntoResponse {
    let outcome = handlers::drain_queue(&state.stack).await;
    let status = match outcome {
        DrainOutcome::Completed(_) => StatusCode::OK,
        DrainOutcome::Busy => StatusCode::CONFLICT,
        DrainOutcome::Offline => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status, Json(outcome)).into_response()
}

async fn list_jobs_handler(State(state): State<AppState>) -> impl IntoResponse {
    (StatusCode::OK, Json(handlers::list_jobs(&state.stack).await)).into_response()
}

async fn clear_cache_handler(State(state): State<AppState>) -> impl IntoResponse {
    match handlers::clear_cache(state.cache_control.as_ref()).await {
        Ok(data) => (StatusCode::OK, Json(ApiResponse::success(data))).into_response(),
        Err(e) => error_response(StatusCode::BAD_REQUEST, e),
    }
}

async fn activate_cache_handler(State(state): State<AppState>) -> impl IntoResponse {
    match handlers::activate_cache(&state.stack).await {
        Ok(data) => (StatusCode::OK, Json(ApiResponse::success(data))).into_response(),
        Err(e) => error_response(StatusCode::BAD_REQUEST, e),
    }
}

async fn status_handler(State(state): State<AppState>) -> impl IntoResponse {
    match handlers::get_status(&state.stack).await {
        Ok(data) => (StatusCode::OK, Json(data)).into_response(),
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, e),
    }
}

/// WebSocket handler for queue notifications
async fn websocket_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| websocket_connection(socket, state))
}

/// Push every queue mutation to the client until it disconnects
async fn websocket_connection(mut socket: WebSocket, state: AppState) {
    info!("🔌 New WebSocket connection established");
    let mut events = state.stack.client.queue().subscribe();

    // Send the current queue first so the client starts in sync
    if let Ok(items) = handlers::list_queue(&state.stack).await {
        let initial = serde_json::json!({ "queue": items, "action": "snapshot" });
        if socket.send(Message::Text(initial.to_string())).await.is_err() {
            warn!("Failed to send initial queue snapshot");
            return;
        }
    }

    loop {
        tokio::select! {
            msg = socket.recv() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        if text == "ping" && socket.send(Message::Text("pong".to_string())).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) => {
                        info!("🔌 WebSocket connection closed by client");
                        break;
                    }
                    Some(Err(e)) => {
                        warn!("WebSocket error: {}", e);
                        break;
                    }
                    None => break,
                    _ => {}
                }
            }

            event = events.recv() => {
                match event {
                    Ok(event) => {
                        let Ok(text) = serde_json::to_string(&event) else {
                            continue;
                        };
                        if socket.send(Message::Text(text)).await.is_err() {
                            info!("🔌 WebSocket connection closed during queue update");
                            break;
                        }
                    }
                    Err(RecvError::Lagged(missed)) => warn!("WebSocket client missed {} queue events", missed),
                    Err(RecvError::Closed) => break,
                }
            }
        }
    }

    info!("🔌 WebSocket connection ended");
}
