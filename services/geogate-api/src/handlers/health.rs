//! Health check endpoints
//!
//! - `/health/live` - liveness probe, always 200 while the process serves
//! - `/health` - JSON status with uptime and metering backlog

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::state::AppState;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_seconds: u64,
    /// Buckets waiting for the next metering flush.
    pub pending_metering_buckets: usize,
}

pub async fn liveness_handler() -> impl IntoResponse {
    debug!("Liveness check requested");
    StatusCode::OK
}

pub async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.started_at.elapsed().as_secs(),
        pending_metering_buckets: state.aggregator.pending(),
    })
}
