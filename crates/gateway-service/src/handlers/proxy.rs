//! Proxy fallback handler.
//!
//! Every request that does not hit a gateway-owned route goes through the
//! [`GatewayPipeline`](crate::pipeline::GatewayPipeline) and, on success, is
//! answered with the backend's response.

use crate::observability::hash_for_correlation;
use crate::pipeline::InboundRequest;
use crate::routes::AppState;
use crate::services::proxy_client::ForwardResponse;
use axum::{
    body::{Body, Bytes},
    extract::State,
    http::{HeaderMap, Method, Uri},
    response::{IntoResponse, Response},
};
use std::sync::Arc;
use std::time::Instant;
use tracing::instrument;

/// Handle a proxied request.
///
/// Writes one access log line per request with method, path, the verified
/// identity (hashed user, role, issuer) or `anonymous`, status, and latency.
#[instrument(name = "gateway.proxy.request", skip_all)]
pub async fn proxy_request(
    State(state): State<Arc<AppState>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let start = Instant::now();
    let path = uri.path().to_string();

    let request = InboundRequest {
        method: method.clone(),
        path: path.clone(),
        query: uri.query().map(str::to_string),
        headers,
        body,
    };

    let outcome = state.pipeline.handle(request).await;

    let response = match outcome.result {
        Ok(forwarded) => into_response(forwarded),
        Err(e) => e.into_response(),
    };

    let status = response.status().as_u16();
    let latency_ms = start.elapsed().as_millis() as u64;

    match outcome.identity {
        Some(identity) => tracing::info!(
            target: "gateway.proxy",
            method = %method,
            path = %path,
            user = %hash_for_correlation(&identity.user_id),
            role = identity.role.as_deref().unwrap_or("none"),
            issuer = %identity.issuer,
            status,
            latency_ms,
            "Request proxied"
        ),
        None => tracing::info!(
            target: "gateway.proxy",
            method = %method,
            path = %path,
            user = "anonymous",
            status,
            latency_ms,
            "Request proxied"
        ),
    }

    response
}

fn into_response(forwarded: ForwardResponse) -> Response {
    let mut response = Response::new(Body::from(forwarded.body));
    *response.status_mut() = forwarded.status;
    *response.headers_mut() = forwarded.headers;
    response
}
