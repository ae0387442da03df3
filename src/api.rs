//! HTTP server for health, metrics and status endpoints

use std::net::SocketAddr;
use std::time::Instant;

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use chrono::{DateTime, Utc};
use eyre::{eyre, Result};
use prometheus::{Encoder, TextEncoder};
use serde::Serialize;
use tokio::sync::watch;
use tracing::info;

use crate::coordinator::{ListenerStatus, RelayStatus};
use crate::types::ListenerState;

/// Shared state for the HTTP handlers
#[derive(Clone)]
pub struct AppState {
    pub status: watch::Receiver<RelayStatus>,
    pub started_at: Instant,
    pub started_at_utc: DateTime<Utc>,
}

impl AppState {
    pub fn new(status: watch::Receiver<RelayStatus>) -> Self {
        Self {
            status,
            started_at: Instant::now(),
            started_at_utc: Utc::now(),
        }
    }

    fn all_active(&self) -> bool {
        let status = self.status.borrow();
        !status.listeners.is_empty()
            && status
                .listeners
                .iter()
                .all(|l| l.state == ListenerState::Active)
    }
}

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub listeners: Vec<ListenerStatus>,
}

/// Status response
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub started_at: DateTime<Utc>,
    pub uptime_seconds: u64,
    #[serde(flatten)]
    pub relay: RelayStatus,
}

/// Health check endpoint handler
async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let healthy = state.all_active();
    let listeners = state.status.borrow().listeners.clone();
    Json(HealthResponse {
        status: if healthy { "healthy" } else { "degraded" },
        listeners,
    })
}

/// Liveness check (always returns OK if server is running)
async fn liveness() -> &'static str {
    "OK"
}

/// Readiness check (both listeners subscribed)
async fn readiness(State(state): State<AppState>) -> Response {
    if state.all_active() {
        (StatusCode::OK, "OK").into_response()
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "NOT_READY").into_response()
    }
}

/// Relay status endpoint
async fn status(State(state): State<AppState>) -> Json<StatusResponse> {
    Json(StatusResponse {
        started_at: state.started_at_utc,
        uptime_seconds: state.started_at.elapsed().as_secs(),
        relay: state.status.borrow().clone(),
    })
}

/// Prometheus metrics endpoint
async fn prometheus_metrics() -> Response {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    if encoder.encode(&metric_families, &mut buffer).is_err() {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            "Failed to encode metrics",
        )
            .into_response();
    }

    match Response::builder()
        .header(header::CONTENT_TYPE, encoder.format_type())
        .body(axum::body::Body::from(buffer))
    {
        Ok(resp) => resp,
        Err(_) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            "Failed to build metrics response",
        )
            .into_response(),
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/healthz", get(liveness))
        .route("/readyz", get(readiness))
        .route("/status", get(status))
        .route("/metrics", get(prometheus_metrics))
        .with_state(state)
}

/// Start the HTTP server; runs until the task is dropped
pub async fn start_server(port: u16, state: AppState) -> Result<()> {
    let addr: SocketAddr = format!("0.0.0.0:{}", port)
        .parse()
        .map_err(|e| eyre!("Invalid bind port {}: {}", port, e))?;

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "API server listening");
    info!("  /health  - Listener health (JSON)");
    info!("  /healthz - Liveness check");
    info!("  /readyz  - Readiness check");
    info!("  /status  - Relay status (JSON)");
    info!("  /metrics - Prometheus metrics");

    axum::serve(listener, router(state)).await?;
    Ok(())
}
