//! Health check and metrics handlers.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::Serialize;

use super::HttpState;
use crate::application::services::ServiceStateSnapshot;
use crate::infrastructure::broadcast::HubStats;
use crate::infrastructure::config::DeliveryMode;
use crate::infrastructure::metrics::get_metrics_handle;

/// Health check response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Overall status: "healthy", "degraded", or "unhealthy".
    pub status: HealthStatus,
    /// Service version.
    pub version: String,
    /// Server uptime in seconds.
    pub uptime_secs: u64,
    /// Current time.
    pub current_time: DateTime<Utc>,
    /// Client delivery mode.
    pub delivery_mode: &'static str,
    /// Pipeline state.
    pub pipeline: ServiceStateSnapshot,
    /// Hub statistics.
    pub hub: HubStats,
    /// Poll ticks completed since start.
    pub poll_ticks: u64,
}

/// Overall health status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Idle, or every link a streaming client needs is up.
    Healthy,
    /// Clients attached but one broker link is down.
    Degraded,
    /// Clients attached and both broker links are down.
    Unhealthy,
}

pub(super) async fn health_handler(State(state): State<Arc<HttpState>>) -> impl IntoResponse {
    let response = build_health_response(&state);
    let status_code = match response.status {
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status_code, Json(response))
}

pub(super) async fn liveness_handler() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

pub(super) async fn readiness_handler(State(state): State<Arc<HttpState>>) -> impl IntoResponse {
    let status = determine_health_status(state.delivery_mode(), &state.service().state());

    if status == HealthStatus::Healthy {
        (StatusCode::OK, "READY")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "NOT READY")
    }
}

pub(super) async fn metrics_handler() -> impl IntoResponse {
    get_metrics_handle().map_or_else(
        || {
            (
                StatusCode::SERVICE_UNAVAILABLE,
                [("content-type", "text/plain")],
                "Metrics not initialized".to_string(),
            )
        },
        |handle| {
            (
                StatusCode::OK,
                [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
                handle.render(),
            )
        },
    )
}

fn build_health_response(state: &HttpState) -> HealthResponse {
    let service = state.service();
    let pipeline = service.state();

    HealthResponse {
        status: determine_health_status(state.delivery_mode(), &pipeline),
        version: state.version.clone(),
        uptime_secs: state.started_at.elapsed().as_secs(),
        current_time: Utc::now(),
        delivery_mode: state.delivery_mode().as_str(),
        pipeline,
        hub: service.hub().stats(),
        poll_ticks: service.poll_ticks(),
    }
}

fn determine_health_status(mode: DeliveryMode, pipeline: &ServiceStateSnapshot) -> HealthStatus {
    if mode == DeliveryMode::Polling || pipeline.active_sinks == 0 {
        return HealthStatus::Healthy;
    }

    match (pipeline.publisher_connected, pipeline.subscriber_connected) {
        (true, true) => HealthStatus::Healthy,
        (false, false) => HealthStatus::Unhealthy,
        _ => HealthStatus::Degraded,
    }
}

// =============================================================================
// Tests
// =============================================================================
