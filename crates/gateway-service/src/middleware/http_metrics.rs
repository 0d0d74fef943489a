//! HTTP metrics middleware for capturing all request/response metrics
//!
//! Records every response, including ones produced outside the handlers:
//! - 400 / 415 JSON extraction rejections on admin endpoints
//! - 408 from the request timeout layer
//! - 401 / 403 / 502 answered by the pipeline for proxied traffic

use axum::{extract::Request, middleware::Next, response::Response};
use std::time::Instant;

use crate::observability::metrics::record_http_request;

/// Middleware that records HTTP request metrics for all responses
///
/// Applied as the outermost layer. The path is normalized by
/// `record_http_request`, so proxied paths never become labels.
pub async fn http_metrics_middleware(request: Request, next: Next) -> Response {
    let start = Instant::now();
    let method = request.method().to_string();
    let path = request.uri().path().to_string();

    let response = next.run(request).await;

    record_http_request(&method, &path, response.status().as_u16(), start.elapsed());

    response
}
