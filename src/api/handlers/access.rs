//! Writer policy handlers

use axum::extract::{Path, State};
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::api::ApiError;
use crate::domain::AccessPolicy;
use crate::server::AppState;

#[derive(Debug, Deserialize)]
pub struct GrantRequest {
    pub writer_id: String,
}

#[derive(Debug, Serialize)]
pub struct PolicyChangeResponse {
    /// False when the policy already had the requested shape
    pub changed: bool,
    pub policy: AccessPolicy,
}

/// GET /api/v1/access/writers
pub async fn list_writers(State(state): State<AppState>) -> Json<AccessPolicy> {
    Json(state.log.access().policy().await)
}

/// POST /api/v1/access/writers
pub async fn grant_writer(
    State(state): State<AppState>,
    Json(request): Json<GrantRequest>,
) -> Result<Json<PolicyChangeResponse>, ApiError> {
    let writer_id = request.writer_id.trim();
    if writer_id.is_empty() {
        return Err(ApiError::invalid_argument("writer_id must not be empty"));
    }
    let changed = state.log.access().grant(writer_id).await?;
    Ok(Json(PolicyChangeResponse {
        changed,
        policy: state.log.access().policy().await,
    }))
}

/// DELETE /api/v1/access/writers/:id
pub async fn revoke_writer(
    State(state): State<AppState>,
    Path(writer_id): Path<String>,
) -> Result<Json<PolicyChangeResponse>, ApiError> {
    let changed = state.log.access().revoke(&writer_id).await?;
    Ok(Json(PolicyChangeResponse {
        changed,
        policy: state.log.access().policy().await,
    }))
}
