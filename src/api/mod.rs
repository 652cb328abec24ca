//! HTTP API
//!
//! JSON over HTTP under `/api/v1`, plus `/health`, `/ready` and `/metrics`
//! at the root. Errors use the structured [`ApiError`] body.

mod error;
pub mod handlers;

pub use error::*;

use axum::routing::{delete, get, post};
use axum::Router;

use crate::server::AppState;

/// Build the `/api/v1` router.
pub fn router() -> Router<AppState> {
    Router::new()
        // Event log
        .route(
            "/events",
            post(handlers::add_event).get(handlers::query_events),
        )
        .route("/events/batch", post(handlers::add_event_batch))
        .route("/events/:id", get(handlers::get_event))
        // Sync control
        .route("/sync/status", get(handlers::get_status))
        .route("/sync/trigger", post(handlers::trigger_sync))
        .route("/sync/pause", post(handlers::pause_sync))
        .route("/sync/resume", post(handlers::resume_sync))
        .route("/sync/batches/:id", get(handlers::get_batch_status))
        .route("/sync/batches/:id/retry", post(handlers::retry_batch))
        // Sync metrics
        .route("/sync/metrics", get(handlers::get_metrics))
        .route("/sync/metrics/history", get(handlers::get_metrics_history))
        .route("/sync/metrics/stream", get(handlers::stream_metrics))
        // Writer policy
        .route(
            "/access/writers",
            get(handlers::list_writers).post(handlers::grant_writer),
        )
        .route("/access/writers/:id", delete(handlers::revoke_writer))
}
