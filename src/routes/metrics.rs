use std::sync::Arc;

use axum::extract::State;
use axum::response::IntoResponse;
use metrics_exporter_prometheus::PrometheusHandle;

/// GET /metrics: Prometheus text exposition of the proxy's counters.
pub async fn prometheus_metrics(State(handle): State<Arc<PrometheusHandle>>) -> impl IntoResponse {
    handle.render()
}

/// Register descriptions for every metric the proxy records.
pub fn describe() {
    metrics::describe_counter!("shrink_requests_total", "Shrink requests received, by kind");
    metrics::describe_counter!(
        "shrink_failures_total",
        "Shrink requests the compression service rejected or that failed in transport"
    );
    metrics::describe_counter!(
        "artifact_downloads_total",
        "Compressed artifacts streamed back to clients"
    );
    metrics::describe_counter!(
        "artifacts_persisted_total",
        "Compressed artifacts written to the artifact directory"
    );
    metrics::describe_histogram!(
        "upstream_request_seconds",
        "Latency of calls to the compression service"
    );
}
