//! Event log handlers

use std::collections::HashMap;

use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::api::{ApiError, ErrorKind};
use crate::domain::{EventPayload, Metadata, SyncedEvent};
use crate::log::IterOptions;
use crate::server::AppState;

/// Default page size for event queries
pub const DEFAULT_QUERY_LIMIT: usize = 100;

const METADATA_PREFIX: &str = "meta.";

#[derive(Debug, Clone, Deserialize)]
pub struct AddEventRequest {
    /// Caller-side id, echoed back in `failed_ids` of a batch
    #[serde(default)]
    pub id: Option<String>,
    pub data: serde_json::Value,
    /// Milliseconds since the epoch; defaults to now
    #[serde(default)]
    pub timestamp: Option<i64>,
    #[serde(default)]
    pub metadata: Metadata,
}

impl AddEventRequest {
    fn into_payload(self) -> EventPayload {
        let mut payload = EventPayload::new(self.data);
        if let Some(ts) = self.timestamp.filter(|ts| *ts > 0) {
            payload = payload.with_timestamp(ts);
        }
        payload.metadata = self.metadata;
        payload
    }
}

#[derive(Debug, Serialize)]
pub struct AddEventResponse {
    pub id: String,
    pub timestamp: i64,
}

#[derive(Debug, Deserialize)]
pub struct AddEventBatchRequest {
    #[serde(default)]
    pub batch_id: Option<String>,
    pub events: Vec<AddEventRequest>,
}

#[derive(Debug, Serialize)]
pub struct AddEventBatchResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub batch_id: Option<String>,
    pub success: bool,
    pub processed_count: usize,
    /// Hashes of admitted events, in request order
    pub event_ids: Vec<String>,
    /// Caller ids (or request positions) of refused events
    pub failed_ids: Vec<String>,
    /// Why each event in `failed_ids` was refused, in the same order
    pub failures: Vec<FailedEvent>,
}

#[derive(Debug, Serialize)]
pub struct FailedEvent {
    pub id: String,
    pub kind: ErrorKind,
    pub message: String,
    /// False when resending cannot succeed without a policy change
    pub retryable: bool,
}

/// POST /api/v1/events
pub async fn add_event(
    State(state): State<AppState>,
    Json(request): Json<AddEventRequest>,
) -> Result<(StatusCode, Json<AddEventResponse>), ApiError> {
    let payload = request.into_payload();
    let timestamp = payload.timestamp;
    let id = state.log.add(payload).await?;
    Ok((StatusCode::CREATED, Json(AddEventResponse { id, timestamp })))
}

/// POST /api/v1/events/batch
///
/// Events are appended one by one; a refused event does not stop the rest.
pub async fn add_event_batch(
    State(state): State<AppState>,
    Json(request): Json<AddEventBatchRequest>,
) -> Result<Json<AddEventBatchResponse>, ApiError> {
    if request.events.is_empty() {
        return Err(ApiError::invalid_argument("batch contains no events"));
    }

    let mut event_ids = Vec::with_capacity(request.events.len());
    let mut failures = Vec::new();
    for (index, event) in request.events.into_iter().enumerate() {
        let caller_id = event.id.clone().unwrap_or_else(|| index.to_string());
        match state.log.add(event.into_payload()).await {
            Ok(hash) => event_ids.push(hash),
            Err(e) => {
                warn!(id = %caller_id, error = %e, "Batch event refused");
                let error = ApiError::from(e);
                failures.push(FailedEvent {
                    id: caller_id,
                    kind: error.kind,
                    message: error.message,
                    retryable: error.retryable,
                });
            }
        }
    }
    let failed_ids = failures.iter().map(|f| f.id.clone()).collect::<Vec<_>>();

    Ok(Json(AddEventBatchResponse {
        batch_id: request.batch_id,
        success: failed_ids.is_empty(),
        processed_count: event_ids.len(),
        event_ids,
        failed_ids,
        failures,
    }))
}

/// GET /api/v1/events/:id
pub async fn get_event(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<SyncedEvent>, ApiError> {
    state
        .log
        .get(&id)
        .await?
        .map(|entry| Json(entry.to_synced_event()))
        .ok_or_else(|| ApiError::not_found(format!("event {id} not found")))
}

/// Parse `from`, `to`, `limit`, `start_after` and `meta.<key>=<value>` pairs
pub fn parse_query(params: &HashMap<String, String>) -> Result<IterOptions, ApiError> {
    fn number<T: std::str::FromStr>(
        params: &HashMap<String, String>,
        key: &str,
    ) -> Result<Option<T>, ApiError> {
        params
            .get(key)
            .map(|v| {
                v.parse()
                    .map_err(|_| ApiError::invalid_argument(format!("{key} must be a number")))
            })
            .transpose()
    }

    let from_timestamp = number(params, "from")?;
    let to_timestamp = number(params, "to")?;
    if let (Some(from), Some(to)) = (from_timestamp, to_timestamp) {
        if from > to {
            return Err(ApiError::invalid_argument("from must not be after to"));
        }
    }

    let metadata = params
        .iter()
        .filter_map(|(k, v)| {
            k.strip_prefix(METADATA_PREFIX)
                .map(|key| (key.to_string(), v.clone()))
        })
        .collect();

    Ok(IterOptions {
        limit: Some(number(params, "limit")?.unwrap_or(DEFAULT_QUERY_LIMIT)),
        start_after: params.get("start_after").cloned(),
        from_timestamp,
        to_timestamp,
        metadata,
    })
}

/// GET /api/v1/events
///
/// Streams matching events as newline-delimited JSON.
pub async fn query_events(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Response, ApiError> {
    let options = parse_query(&params)?;
    let entries = state.log.iter(options).await?;
    debug!(count = entries.len(), "Streaming events");

    let lines = entries.into_iter().map(|entry| {
        let mut line = serde_json::to_vec(&entry.to_synced_event())?;
        line.push(b'\n');
        Ok::<_, serde_json::Error>(line)
    });
    let body = Body::from_stream(futures::stream::iter(lines));

    Ok(([(header::CONTENT_TYPE, "application/x-ndjson")], body).into_response())
}
