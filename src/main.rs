use std::sync::Arc;
use std::time::Duration;

use metrics_exporter_prometheus::PrometheusBuilder;
use tracing_subscriber::EnvFilter;

use tiny_squeeze::app_state::AppState;
use tiny_squeeze::config::AppConfig;
use tiny_squeeze::routes;
use tiny_squeeze::services::{artifacts::ArtifactStore, tinify::TinifyClient};

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    // Load configuration from environment
    let config = AppConfig::from_env().expect("Failed to load configuration from environment");

    tracing::info!("Initializing tiny-squeeze proxy");

    let prometheus_handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus metrics recorder");
    let prometheus_handle = Arc::new(prometheus_handle);
    routes::metrics::describe();

    tracing::info!(base_url = %config.tinify_base_url, "Initializing compression service client");
    let tinify = TinifyClient::new(
        &config.tinify_base_url,
        Duration::from_secs(config.request_timeout_secs),
    )
    .expect("Failed to initialize compression service client");

    let artifacts = match &config.artifact_dir {
        Some(dir) => {
            tracing::info!(dir = %dir.display(), "Artifact persistence enabled");
            Some(
                ArtifactStore::open(dir)
                    .await
                    .expect("Failed to open artifact directory"),
            )
        }
        None => None,
    };

    if config.env_api_key().is_some() {
        tracing::info!("Server-side API key configured");
    }

    let state = AppState::new(tinify, artifacts, config.tinify_api_key.clone());
    let app = routes::router(state, Some(prometheus_handle));

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .expect("Failed to bind to address");

    tracing::info!("Proxy listening on {}", config.bind_addr);

    axum::serve(listener, app).await.expect("Server error");
}
