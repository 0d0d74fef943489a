//! Metrics definitions for the API gateway.
//!
//! All metrics follow Prometheus naming conventions:
//! - `gateway_` prefix
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Cardinality
//!
//! Labels are bounded to prevent cardinality explosion:
//! - `method`: HTTP verbs
//! - `endpoint`: gateway-owned paths, everything proxied collapses to `/proxy`
//! - `status`: success, error, timeout
//! - `reason`: bounded by `VerificationError` variants
//! - `decision` / `effect`: allow or deny / enforced, audited, none
//!
//! Identifiers (user ids, paths of proxied requests, kids) never appear as labels.

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::time::Duration;

/// Initialize Prometheus metrics recorder and return the handle
/// for serving metrics via HTTP.
///
/// Must be called before any metrics are recorded.
///
/// # Errors
///
/// Returns error if Prometheus recorder fails to install (e.g., already installed).
pub fn init_metrics_recorder() -> Result<PrometheusHandle, String> {
    PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Prefix("gateway_http_request".to_string()),
            &[
                0.005, 0.010, 0.025, 0.050, 0.100, 0.150, 0.200, 0.300, 0.500, 1.000, 2.000,
            ],
        )
        .map_err(|e| format!("Failed to set HTTP request buckets: {e}"))?
        // Remote fetches are bounded by the JWKS fetch timeout (max 30s)
        .set_buckets_for_metric(
            Matcher::Prefix("gateway_jwks_fetch".to_string()),
            &[
                0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.000, 2.500, 5.000, 10.000,
            ],
        )
        .map_err(|e| format!("Failed to set JWKS fetch buckets: {e}"))?
        .set_buckets_for_metric(
            Matcher::Prefix("gateway_upstream_request".to_string()),
            &[
                0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.000, 2.500, 5.000, 10.000, 30.000,
            ],
        )
        .map_err(|e| format!("Failed to set upstream request buckets: {e}"))?
        .install_recorder()
        .map_err(|e| format!("Failed to install Prometheus recorder: {e}"))
}

// ============================================================================
// HTTP Request Metrics
// ============================================================================

/// Record HTTP request completion
///
/// Metric: `gateway_http_requests_total`, `gateway_http_request_duration_seconds`
/// Labels: `method`, `endpoint`, `status`
pub fn record_http_request(method: &str, endpoint: &str, status_code: u16, duration: Duration) {
    let normalized_endpoint = normalize_endpoint(endpoint);
    let status = categorize_status_code(status_code);

    histogram!("gateway_http_request_duration_seconds",
        "method" => method.to_string(),
        "endpoint" => normalized_endpoint,
        "status" => status.to_string()
    )
    .record(duration.as_secs_f64());

    counter!("gateway_http_requests_total",
        "method" => method.to_string(),
        "endpoint" => normalized_endpoint,
        "status_code" => status_code.to_string()
    )
    .increment(1);
}

/// Categorize HTTP status code into success/error/timeout
fn categorize_status_code(status_code: u16) -> &'static str {
    match status_code {
        200..=399 => "success",
        408 | 504 => "timeout",
        _ => "error",
    }
}

/// Normalize endpoint path to prevent label cardinality explosion.
///
/// Gateway-owned routes keep their path; every other path is proxied
/// traffic and is reported as `/proxy`.
fn normalize_endpoint(path: &str) -> &'static str {
    match path {
        "/health" => "/health",
        "/metrics" => "/metrics",
        "/gateway/token" => "/gateway/token",
        "/gateway/verify" => "/gateway/verify",
        "/gateway/.well-known/jwks.json" => "/gateway/.well-known/jwks.json",
        "/admin/config/backend" => "/admin/config/backend",
        "/admin/config/jwt" => "/admin/config/jwt",
        "/admin/enforcement" => "/admin/enforcement",
        "/admin/policies" => "/admin/policies",
        "/admin/keys" => "/admin/keys",
        "/admin/keys/rotate" => "/admin/keys/rotate",
        "/admin/keys/inactive" => "/admin/keys/inactive",
        _ if path.starts_with("/admin/") => "/admin/other",
        _ => "/proxy",
    }
}

// ============================================================================
// Verification & Authorization Metrics
// ============================================================================

/// Record an inbound token verification outcome
///
/// Metric: `gateway_token_verifications_total`
/// Labels: `status`, `reason`
pub fn record_token_verification(status: &str, reason: Option<&str>) {
    let reason = reason.unwrap_or("none");
    counter!("gateway_token_verifications_total",
        "status" => status.to_string(),
        "reason" => reason.to_string()
    )
    .increment(1);
}

/// Record an authorization decision and what the pipeline did with it
///
/// Metric: `gateway_authz_decisions_total`
/// Labels: `decision` (allow, deny), `effect` (enforced, audited, none)
pub fn record_authz_decision(decision: &str, effect: &str) {
    counter!("gateway_authz_decisions_total",
        "decision" => decision.to_string(),
        "effect" => effect.to_string()
    )
    .increment(1);
}

/// Record a pipeline outcome
///
/// Metric: `gateway_pipeline_outcomes_total`
/// Labels: `outcome` (forwarded, unauthorized, forbidden, exchange_failed, upstream_failed)
pub fn record_pipeline_outcome(outcome: &str) {
    counter!("gateway_pipeline_outcomes_total", "outcome" => outcome.to_string()).increment(1);
}

// ============================================================================
// Token Issuance Metrics
// ============================================================================

/// Record token issuance duration and outcome
///
/// Metric: `gateway_token_issuance_total`, `gateway_token_issuance_duration_seconds`
/// Labels: `kind` (exchange, sts), `status`
pub fn record_token_issuance(kind: &str, status: &str, duration: Duration) {
    histogram!("gateway_token_issuance_duration_seconds",
        "kind" => kind.to_string(),
        "status" => status.to_string()
    )
    .record(duration.as_secs_f64());

    counter!("gateway_token_issuance_total",
        "kind" => kind.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

// ============================================================================
// Key Metrics
// ============================================================================

/// Record remote key set fetch
///
/// Metric: `gateway_jwks_fetch_total`, `gateway_jwks_fetch_duration_seconds`
/// Labels: `status` (success, error, timeout)
pub fn record_jwks_fetch(status: &str, duration: Duration) {
    histogram!("gateway_jwks_fetch_duration_seconds", "status" => status.to_string())
        .record(duration.as_secs_f64());

    counter!("gateway_jwks_fetch_total", "status" => status.to_string()).increment(1);
}

/// Record remote key cache lookup
///
/// Metric: `gateway_jwks_cache_total`
/// Labels: `result` (hit, miss, throttled)
pub fn record_jwks_cache(result: &str) {
    counter!("gateway_jwks_cache_total", "result" => result.to_string()).increment(1);
}

/// Record key rotation event
///
/// Metric: `gateway_key_rotation_total`
/// Labels: `status`
pub fn record_key_rotation(status: &str) {
    counter!("gateway_key_rotation_total", "status" => status.to_string()).increment(1);
}

/// Update active signing keys count
///
/// Metric: `gateway_active_signing_keys`
pub fn set_active_signing_keys(count: usize) {
    gauge!("gateway_active_signing_keys").set(count as f64);
}

// ============================================================================
// Upstream Metrics
// ============================================================================

/// Record upstream forward
///
/// Metric: `gateway_upstream_requests_total`, `gateway_upstream_request_duration_seconds`
/// Labels: `status` (success, error, timeout)
pub fn record_upstream_request(status: &str, duration: Duration) {
    histogram!("gateway_upstream_request_duration_seconds", "status" => status.to_string())
        .record(duration.as_secs_f64());

    counter!("gateway_upstream_requests_total", "status" => status.to_string()).increment(1);
}
