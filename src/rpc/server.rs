//! Thin server bootstrap.
//!
//! Registers nothing itself: it exposes whatever the [`ServiceRegistry`]
//! carries under `POST /rpc/{method}` (JSON reply for unary methods,
//! ndjson body for streaming ones) plus a `/health` probe. In-flight
//! calls are bounded by a semaphore; excess callers wait.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures_util::StreamExt;
use serde::Serialize;
use tokio::sync::Semaphore;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use super::registry::{Route, ServiceRegistry};
use super::reply::Reply;
use crate::error::{ErrorKind, ServiceError};

/// Shared state for the RPC routes.
#[derive(Debug, Clone)]
struct RpcState {
    registry: Arc<ServiceRegistry>,
    limiter: Arc<Semaphore>,
}

/// Health check response.
#[derive(Debug, Serialize)]
struct HealthResponse {
    status: String,
    timestamp: String,
    version: String,
}

/// `GET /health` — service health status.
async fn health_handler() -> impl IntoResponse {
    Json(HealthResponse {
        status: "healthy".to_string(),
        timestamp: chrono::Utc::now().to_rfc3339(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// `POST /rpc/{method}` — dispatch one call through the registry.
async fn rpc_handler(
    State(state): State<RpcState>,
    Path(method): Path<String>,
    Json(payload): Json<serde_json::Value>,
) -> Response {
    let Ok(permit) = Arc::clone(&state.limiter).acquire_owned().await else {
        return Json(Reply::<serde_json::Value>::error(
            ServiceError::server().envelope(),
        ))
        .into_response();
    };

    match state.registry.route(&method) {
        None => Json(Reply::<serde_json::Value>::error(
            ServiceError::with_description(
                ErrorKind::NotFound,
                format!("unknown method `{method}`"),
            )
            .envelope(),
        ))
        .into_response(),
        Some(Route::Unary(call)) => {
            let reply = call(payload).await;
            drop(permit);
            Json(reply).into_response()
        }
        Some(Route::Streaming(call)) => {
            let stream = call(payload);
            let body = Body::from_stream(stream.map(move |reply| {
                // The in-flight permit lives as long as the stream.
                let _in_flight = &permit;
                let mut line = serde_json::to_vec(&reply).unwrap_or_default();
                line.push(b'\n');
                Ok::<_, std::convert::Infallible>(line)
            }));
            ([(header::CONTENT_TYPE, "application/x-ndjson")], body).into_response()
        }
    }
}

/// Builds the complete router over a registry.
#[must_use]
pub fn build_router(registry: Arc<ServiceRegistry>, max_in_flight: usize) -> Router {
    let state = RpcState {
        registry,
        limiter: Arc::new(Semaphore::new(max_in_flight)),
    };
    Router::new()
        .route("/health", get(health_handler))
        .route("/rpc/{method}", post(rpc_handler))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Binds `addr` and serves the registry until the process stops.
///
/// # Errors
///
/// Returns an error when binding or serving the listener fails.
pub async fn serve(
    registry: Arc<ServiceRegistry>,
    addr: SocketAddr,
    max_in_flight: usize,
) -> anyhow::Result<()> {
    let methods = registry.methods();
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, ?methods, "rpc server listening");
    axum::serve(listener, build_router(registry, max_in_flight)).await?;
    Ok(())
}
