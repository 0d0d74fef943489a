//! Liveness and metrics handlers.

use axum::{extract::State, response::IntoResponse};
use metrics_exporter_prometheus::PrometheusHandle;

/// Liveness probe handler.
///
/// Returns "OK" while the process is serving. Checks no dependencies; the
/// upstream identity provider being down must not take the gateway out of
/// rotation.
pub async fn health_check() -> &'static str {
    "OK"
}

/// Handler for GET /metrics
///
/// Returns Prometheus-formatted metrics for scraping. Unauthenticated;
/// labels carry no identifiers.
#[tracing::instrument(skip_all, name = "gateway.metrics.scrape")]
pub async fn metrics_handler(State(handle): State<PrometheusHandle>) -> impl IntoResponse {
    handle.render()
}
