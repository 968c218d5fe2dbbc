use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;

use crate::app_state::AppState;
use crate::models::api::ArtifactListing;
use crate::routes::proxy::ProxyError;
use crate::services::artifacts::ArtifactStore;
use std::sync::Arc;

fn store(state: &AppState) -> Result<Arc<ArtifactStore>, ProxyError> {
    state
        .artifacts
        .clone()
        .ok_or_else(|| ProxyError::NotFound("artifact persistence is disabled".to_string()))
}

/// GET /api/artifacts: persisted artifacts, newest first.
pub async fn list_artifacts(
    State(state): State<AppState>,
) -> Result<Json<Vec<ArtifactListing>>, ProxyError> {
    Ok(Json(store(&state)?.list().await?))
}

/// DELETE /api/artifacts/{name}
pub async fn delete_artifact(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<StatusCode, ProxyError> {
    store(&state)?.delete(&name).await?;
    Ok(StatusCode::NO_CONTENT)
}
