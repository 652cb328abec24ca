//! Sync engine control and metrics handlers

use std::convert::Infallible;
use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::Json;
use chrono::{DateTime, Utc};
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tokio_stream::wrappers::IntervalStream;
use uuid::Uuid;

use crate::api::ApiError;
use crate::domain::{BatchStatus, SyncMetricsSnapshot, SyncStatus};
use crate::server::AppState;
use crate::sync::FlushReport;

const DEFAULT_HISTORY_LIMIT: usize = 100;
const DEFAULT_STREAM_INTERVAL_SECS: u64 = 5;

#[derive(Debug, Default, Deserialize)]
pub struct TriggerRequest {
    /// Also re-read the log after the cursor; allowed while paused
    #[serde(default)]
    pub force: bool,
}

#[derive(Debug, Serialize)]
pub struct TriggerResponse {
    pub report: FlushReport,
    pub status: SyncStatus,
}

#[derive(Debug, Deserialize)]
pub struct PauseRequest {
    #[serde(default = "default_wait_for_batch")]
    pub wait_for_batch: bool,
}

impl Default for PauseRequest {
    fn default() -> Self {
        Self {
            wait_for_batch: default_wait_for_batch(),
        }
    }
}

fn default_wait_for_batch() -> bool {
    true
}

#[derive(Debug, Default, Deserialize)]
pub struct RetryBatchRequest {
    /// Subset of the failed batch to retry; all of it when empty
    #[serde(default)]
    pub event_ids: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct MetricsHistoryQuery {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
    /// Comma-separated snapshot fields to keep
    pub metric_names: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct MetricsStreamQuery {
    pub interval_seconds: Option<u64>,
    pub metric_names: Option<String>,
}

/// Snapshot fields a client may select; `timestamp` is always kept
const METRIC_NAMES: &[&str] = &[
    "total_events",
    "synced_events",
    "failed_events",
    "retry_count",
    "avg_sync_time_ms",
    "batch_size",
    "last_synced_hash",
];

/// Parse a `metric_names` parameter; `None` selects every field
fn parse_metric_names(raw: Option<&str>) -> Result<Option<Vec<String>>, ApiError> {
    let Some(raw) = raw else {
        return Ok(None);
    };
    let names: Vec<String> = raw
        .split(',')
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .collect();
    if let Some(unknown) = names.iter().find(|n| !METRIC_NAMES.contains(&n.as_str())) {
        return Err(ApiError::invalid_argument(format!(
            "unknown metric name: {unknown}"
        )));
    }
    Ok(if names.is_empty() { None } else { Some(names) })
}

fn project(
    snapshot: &SyncMetricsSnapshot,
    names: Option<&[String]>,
) -> Result<serde_json::Value, serde_json::Error> {
    let mut value = serde_json::to_value(snapshot)?;
    if let (Some(names), Some(fields)) = (names, value.as_object_mut()) {
        fields.retain(|key, _| key == "timestamp" || names.iter().any(|n| n == key));
    }
    Ok(value)
}

fn parse_batch_id(raw: &str) -> Result<Uuid, ApiError> {
    Uuid::parse_str(raw).map_err(|_| ApiError::invalid_argument(format!("invalid batch id: {raw}")))
}

/// GET /api/v1/sync/status
pub async fn get_status(State(state): State<AppState>) -> Json<SyncStatus> {
    Json(state.engine.status().await)
}

/// POST /api/v1/sync/trigger
pub async fn trigger_sync(
    State(state): State<AppState>,
    body: Option<Json<TriggerRequest>>,
) -> Result<Json<TriggerResponse>, ApiError> {
    let Json(request) = body.unwrap_or_default();
    let report = state.engine.trigger(request.force).await?;
    Ok(Json(TriggerResponse {
        report,
        status: state.engine.status().await,
    }))
}

/// POST /api/v1/sync/pause
pub async fn pause_sync(
    State(state): State<AppState>,
    body: Option<Json<PauseRequest>>,
) -> Result<Json<SyncStatus>, ApiError> {
    let Json(request) = body.unwrap_or_default();
    Ok(Json(state.engine.pause(request.wait_for_batch).await?))
}

/// POST /api/v1/sync/resume
pub async fn resume_sync(State(state): State<AppState>) -> Result<Json<SyncStatus>, ApiError> {
    Ok(Json(state.engine.resume().await?))
}

/// GET /api/v1/sync/batches/:id
pub async fn get_batch_status(
    State(state): State<AppState>,
    Path(batch_id): Path<String>,
) -> Result<Json<BatchStatus>, ApiError> {
    let batch_id = parse_batch_id(&batch_id)?;
    Ok(Json(state.engine.batch_status(batch_id).await?))
}

/// POST /api/v1/sync/batches/:id/retry
pub async fn retry_batch(
    State(state): State<AppState>,
    Path(batch_id): Path<String>,
    body: Option<Json<RetryBatchRequest>>,
) -> Result<Json<BatchStatus>, ApiError> {
    let batch_id = parse_batch_id(&batch_id)?;
    let Json(request) = body.unwrap_or_default();
    Ok(Json(
        state.engine.retry_batch(batch_id, &request.event_ids).await?,
    ))
}

/// GET /api/v1/sync/metrics
pub async fn get_metrics(State(state): State<AppState>) -> Json<SyncMetricsSnapshot> {
    Json(state.engine.metrics().await)
}

/// GET /api/v1/sync/metrics/history
pub async fn get_metrics_history(
    State(state): State<AppState>,
    Query(query): Query<MetricsHistoryQuery>,
) -> Result<Json<Vec<serde_json::Value>>, ApiError> {
    if let (Some(from), Some(to)) = (query.from, query.to) {
        if from > to {
            return Err(ApiError::invalid_argument("from must not be after to"));
        }
    }
    let names = parse_metric_names(query.metric_names.as_deref())?;
    let limit = query.limit.unwrap_or(DEFAULT_HISTORY_LIMIT);
    let history = state
        .engine
        .metrics_history(query.from, query.to, limit)
        .await?;

    history
        .iter()
        .map(|snapshot| project(snapshot, names.as_deref()))
        .collect::<Result<Vec<_>, _>>()
        .map(Json)
        .map_err(|e| ApiError::internal(e.to_string()))
}

/// GET /api/v1/sync/metrics/stream
///
/// Server-sent events carrying the current window every `interval_seconds`,
/// until the client disconnects or the server shuts down.
pub async fn stream_metrics(
    State(state): State<AppState>,
    Query(query): Query<MetricsStreamQuery>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let secs = query
        .interval_seconds
        .unwrap_or(DEFAULT_STREAM_INTERVAL_SECS);
    if secs == 0 {
        return Err(ApiError::invalid_argument("interval_seconds must be > 0"));
    }
    let names = parse_metric_names(query.metric_names.as_deref())?;

    let engine = state.engine.clone();
    let ticks = IntervalStream::new(tokio::time::interval(Duration::from_secs(secs)));
    let stream = ticks
        .then(move |_| {
            let engine = engine.clone();
            async move { engine.metrics().await }
        })
        .map(move |snapshot| {
            let event = Event::default().event("metrics");
            let data = project(&snapshot, names.as_deref())
                .map_err(|e| e.to_string())
                .and_then(|value| event.json_data(value).map_err(|e| e.to_string()));
            Ok(data.unwrap_or_else(|e| Event::default().event("error").data(e)))
        })
        .take_until(state.shutdown.clone().wait());

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}
