use axum::extract::State;
use axum::Json;

use crate::app_state::AppState;
use crate::models::api::{HealthResponse, KeyStatus};
use crate::models::credential::Provenance;

/// GET /health: liveness check.
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        artifact_persistence: state.artifacts.is_some(),
    })
}

/// GET /api/config/key-status: whether a server-side key exists. Never the key itself.
pub async fn key_status(State(state): State<AppState>) -> Json<KeyStatus> {
    let configured = state.env_api_key().is_some();
    Json(KeyStatus {
        configured,
        source: configured.then_some(Provenance::Environment),
    })
}
