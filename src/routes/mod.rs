pub mod artifacts;
pub mod health;
pub mod metrics;
pub mod proxy;

use std::sync::Arc;

use axum::routing::{delete, get, post};
use axum::Router;
use metrics_exporter_prometheus::PrometheusHandle;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

use crate::app_state::AppState;
use crate::services::artifacts::ARTIFACT_URL_PREFIX;

/// Largest accepted upload.
pub const MAX_BODY_BYTES: usize = 25 * 1024 * 1024;

/// Build the proxy router. `/metrics` is mounted only when a recorder handle is given.
pub fn router(state: AppState, prometheus: Option<Arc<PrometheusHandle>>) -> Router {
    let mut app = Router::new()
        .route("/health", get(health::health_check))
        .route("/api/config/key-status", get(health::key_status))
        .route("/api/tinypng/shrink/file", post(proxy::shrink_file))
        .route("/api/tinypng/shrink/url", post(proxy::shrink_url))
        .route("/api/tinypng/output", get(proxy::output))
        .route("/api/tinypng/persist", post(proxy::persist))
        .route("/api/artifacts", get(artifacts::list_artifacts))
        .route("/api/artifacts/{name}", delete(artifacts::delete_artifact));

    if let Some(store) = &state.artifacts {
        app = app.nest_service(ARTIFACT_URL_PREFIX, ServeDir::new(store.dir()));
    }

    let mut app = app.with_state(state);

    if let Some(handle) = prometheus {
        app = app.route(
            "/metrics",
            get(metrics::prometheus_metrics).with_state(handle),
        );
    }

    app.layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive())
        .layer(axum::extract::DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
}
