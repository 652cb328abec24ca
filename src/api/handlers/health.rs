//! Health, readiness and Prometheus handlers

use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::domain::SyncState;
use crate::server::AppState;

/// Overall health status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    /// Serving, but sync is paused
    Degraded,
    Unhealthy,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: HealthStatus,
    pub service: &'static str,
    pub version: &'static str,
    pub timestamp: String,
}

#[derive(Debug, Serialize)]
pub struct ReadinessResponse {
    pub status: HealthStatus,
    pub sink: ComponentStatus,
    pub sync_state: SyncState,
    pub uptime_secs: u64,
}

#[derive(Debug, Serialize)]
pub struct ComponentStatus {
    pub status: HealthStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub response_time_ms: u64,
}

/// Liveness probe; performs no checks.
pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: HealthStatus::Healthy,
        service: "eventlog-sync",
        version: env!("CARGO_PKG_VERSION"),
        timestamp: chrono::Utc::now().to_rfc3339(),
    })
}

/// Readiness probe.
///
/// Ready when the sink answers and the engine is not stopped.
pub async fn readiness_check(
    State(state): State<AppState>,
) -> (StatusCode, Json<ReadinessResponse>) {
    let start = std::time::Instant::now();
    let sink_result = state.sink.health_check().await;
    let response_time_ms = start.elapsed().as_millis() as u64;

    let sink = match sink_result {
        Ok(()) => ComponentStatus {
            status: HealthStatus::Healthy,
            message: None,
            response_time_ms,
        },
        Err(e) => ComponentStatus {
            status: HealthStatus::Unhealthy,
            message: Some(format!("Sink unavailable: {e}")),
            response_time_ms,
        },
    };

    let sync_state = state.engine.state();
    let status = match (sink.status, sync_state) {
        (HealthStatus::Unhealthy, _) | (_, SyncState::Stopped) => HealthStatus::Unhealthy,
        (_, SyncState::Paused) => HealthStatus::Degraded,
        _ => HealthStatus::Healthy,
    };
    let code = if status == HealthStatus::Unhealthy {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    };

    (
        code,
        Json(ReadinessResponse {
            status,
            sink,
            sync_state,
            uptime_secs: state.engine.metrics_aggregator().uptime_seconds(),
        }),
    )
}

/// Prometheus text exposition
pub async fn prometheus_metrics(State(state): State<AppState>) -> impl IntoResponse {
    let body = state.engine.metrics_aggregator().to_prometheus().await;
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        body,
    )
}
