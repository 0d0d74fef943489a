//! Forwarding of authorized requests to the backend.
//!
//! The pipeline hands a fully decided [`ForwardRequest`] to a [`Forwarder`].
//! [`HttpForwarder`] is the production implementation over `reqwest`; the
//! [`mock`] module provides an in-memory one for tests.
//!
//! # Security
//!
//! - The only credential sent to the backend is the exchanged token
//! - Hop-by-hop headers are not forwarded in either direction
//! - Transport errors are logged; clients only see "Bad Gateway"

use crate::errors::GatewayError;
use crate::observability::metrics::record_upstream_request;
use axum::http::{header, HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use bytes::Bytes;
use std::time::{Duration, Instant};
use tracing::instrument;

/// Maximum redirects followed for one forwarded request.
pub const MAX_REDIRECTS: usize = 5;

/// Headers that describe a single connection and are never forwarded.
const HOP_BY_HOP_HEADERS: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// A request ready to be forwarded.
#[derive(Debug, Clone)]
pub struct ForwardRequest {
    pub method: Method,

    /// Path as received by the gateway.
    pub path: String,

    /// Raw query string without the leading `?`.
    pub query: Option<String>,

    /// Inbound headers, already stripped of the inbound credential.
    pub headers: HeaderMap,

    pub body: Bytes,

    /// Exchanged token to present as the bearer credential.
    pub exchanged_token: Option<String>,
}

/// A backend response.
#[derive(Debug, Clone)]
pub struct ForwardResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// Forwarding collaborator used by the pipeline (enables mocking).
#[async_trait::async_trait]
pub trait Forwarder: Send + Sync {
    /// Send `request` to `backend_url`.
    ///
    /// Any backend status is a successful forward. Only transport failures
    /// are errors, reported as [`GatewayError::UpstreamUnavailable`].
    async fn forward(
        &self,
        backend_url: &str,
        request: ForwardRequest,
    ) -> Result<ForwardResponse, GatewayError>;
}

/// `reqwest`-backed forwarder.
pub struct HttpForwarder {
    client: reqwest::Client,
}

impl HttpForwarder {
    pub fn new(timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!(target: "gateway.proxy", error = %e, "Failed to build HTTP client with custom config, using defaults");
                reqwest::Client::new()
            });

        Self { client }
    }
}

#[async_trait::async_trait]
impl Forwarder for HttpForwarder {
    #[instrument(skip_all)]
    async fn forward(
        &self,
        backend_url: &str,
        request: ForwardRequest,
    ) -> Result<ForwardResponse, GatewayError> {
        let url = target_url(backend_url, &request.path, request.query.as_deref());
        let mut headers = outbound_headers(request.headers);

        if let Some(token) = &request.exchanged_token {
            let value = HeaderValue::from_str(&format!("Bearer {}", token)).map_err(|_| {
                GatewayError::UpstreamUnavailable("Exchanged token is not a valid header value".to_string())
            })?;
            headers.insert(header::AUTHORIZATION, value);
        }

        let start = Instant::now();
        let result = self
            .client
            .request(request.method, &url)
            .headers(headers)
            .body(request.body)
            .send()
            .await;

        let response = match result {
            Ok(response) => response,
            Err(e) => {
                let status = if e.is_timeout() { "timeout" } else { "error" };
                record_upstream_request(status, start.elapsed());
                return Err(GatewayError::UpstreamUnavailable(e.to_string()));
            }
        };

        let status = response.status();
        let headers = inbound_headers(response.headers());
        let body = response.bytes().await.map_err(|e| {
            record_upstream_request("error", start.elapsed());
            GatewayError::UpstreamUnavailable(format!("Failed to read backend response: {}", e))
        })?;

        record_upstream_request("success", start.elapsed());
        tracing::debug!(
            target: "gateway.proxy",
            status = status.as_u16(),
            bytes = body.len(),
            "Backend responded"
        );

        Ok(ForwardResponse {
            status,
            headers,
            body,
        })
    }
}

/// Backend base URL joined with the inbound path and query.
pub fn target_url(backend_url: &str, path: &str, query: Option<&str>) -> String {
    let mut url = format!("{}{}", backend_url.trim_end_matches('/'), path);
    if let Some(query) = query.filter(|q| !q.is_empty()) {
        url.push('?');
        url.push_str(query);
    }
    url
}

fn is_hop_by_hop(name: &HeaderName) -> bool {
    HOP_BY_HOP_HEADERS.contains(&name.as_str())
}

/// Headers sent to the backend: no host, length, or hop-by-hop headers.
fn outbound_headers(mut headers: HeaderMap) -> HeaderMap {
    headers.remove(header::HOST);
    headers.remove(header::CONTENT_LENGTH);
    strip_hop_by_hop(&mut headers);
    headers
}

/// Headers returned to the client. The body is re-framed, so length goes too.
fn inbound_headers(headers: &HeaderMap) -> HeaderMap {
    let mut headers = headers.clone();
    headers.remove(header::CONTENT_LENGTH);
    strip_hop_by_hop(&mut headers);
    headers
}

fn strip_hop_by_hop(headers: &mut HeaderMap) {
    // Headers named in Connection are connection-scoped as well
    let named: Vec<HeaderName> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect();

    for name in named {
        headers.remove(name);
    }

    let hop: Vec<HeaderName> = headers.keys().filter(|n| is_hop_by_hop(n)).cloned().collect();
    for name in hop {
        headers.remove(name);
    }
}

/// Mock forwarder module for testing.
pub mod mock {
    use super::*;
    use std::sync::Mutex;

    /// Records forwarded requests and answers with a fixed response.
    pub struct MockForwarder {
        status: StatusCode,
        body: Bytes,
        fail: bool,
        requests: Mutex<Vec<(String, ForwardRequest)>>,
    }

    impl MockForwarder {
        /// Answer every request with `status` and `body`.
        pub fn responding(status: StatusCode, body: impl Into<Bytes>) -> Self {
            Self {
                status,
                body: body.into(),
                fail: false,
                requests: Mutex::new(Vec::new()),
            }
        }

        /// Fail every request as unreachable.
        pub fn failing() -> Self {
            Self {
                status: StatusCode::BAD_GATEWAY,
                body: Bytes::new(),
                fail: true,
                requests: Mutex::new(Vec::new()),
            }
        }

        pub fn call_count(&self) -> usize {
            self.requests.lock().unwrap_or_else(|e| e.into_inner()).len()
        }

        /// Most recent request with the backend URL it was sent to.
        pub fn last_request(&self) -> Option<(String, ForwardRequest)> {
            self.requests
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .last()
                .cloned()
        }
    }

    #[async_trait::async_trait]
    impl Forwarder for MockForwarder {
        async fn forward(
            &self,
            backend_url: &str,
            request: ForwardRequest,
        ) -> Result<ForwardResponse, GatewayError> {
            self.requests
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .push((backend_url.to_string(), request));

            if self.fail {
                return Err(GatewayError::UpstreamUnavailable(
                    "Mock forwarder error".to_string(),
                ));
            }

            Ok(ForwardResponse {
                status: self.status,
                headers: HeaderMap::new(),
                body: self.body.clone(),
            })
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use wiremock::matchers::{header as header_eq, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn request(path: &str, query: Option<&str>) -> ForwardRequest {
        ForwardRequest {
            method: Method::GET,
            path: path.to_string(),
            query: query.map(ToString::to_string),
            headers: HeaderMap::new(),
            body: Bytes::new(),
            exchanged_token: None,
        }
    }

    #[test]
    fn test_target_url() {
        assert_eq!(
            target_url("http://backend:5001/", "/orders", Some("page=2")),
            "http://backend:5001/orders?page=2"
        );
        assert_eq!(
            target_url("http://backend:5001", "/orders", Some("")),
            "http://backend:5001/orders"
        );
        assert_eq!(
            target_url("http://backend:5001/api", "/orders", None),
            "http://backend:5001/api/orders"
        );
    }

    #[test]
    fn test_outbound_headers_strip_connection_scoped() {
        let mut headers = HeaderMap::new();
        headers.insert(header::HOST, HeaderValue::from_static("gateway"));
        headers.insert(header::CONTENT_LENGTH, HeaderValue::from_static("10"));
        headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive, x-custom-hop"));
        headers.insert("x-custom-hop", HeaderValue::from_static("1"));
        headers.insert("x-request-id", HeaderValue::from_static("abc"));

        let out = outbound_headers(headers);

        assert!(out.get(header::HOST).is_none());
        assert!(out.get(header::CONTENT_LENGTH).is_none());
        assert!(out.get(header::CONNECTION).is_none());
        assert!(out.get("x-custom-hop").is_none());
        assert_eq!(out.get("x-request-id").unwrap(), "abc");
    }

    #[tokio::test]
    async fn test_forward_sends_exchanged_token_and_query() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/orders"))
            .and(query_param("page", "2"))
            .and(header_eq("authorization", "Bearer exchanged"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("x-backend", "yes")
                    .set_body_string("[]"),
            )
            .expect(1)
            .mount(&server)
            .await;

        let forwarder = HttpForwarder::new(Duration::from_secs(5));
        let mut req = request("/orders", Some("page=2"));
        req.exchanged_token = Some("exchanged".to_string());

        let response = forwarder.forward(&server.uri(), req).await.unwrap();

        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(response.body, Bytes::from_static(b"[]"));
        assert_eq!(response.headers.get("x-backend").unwrap(), "yes");
    }

    #[tokio::test]
    async fn test_backend_error_status_is_not_a_failure() {
        let server = MockServer::start().await;
        Mock::given(path("/missing"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let forwarder = HttpForwarder::new(Duration::from_secs(5));
        let response = forwarder
            .forward(&server.uri(), request("/missing", None))
            .await
            .unwrap();

        assert_eq!(response.status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_unreachable_backend_is_upstream_unavailable() {
        let forwarder = HttpForwarder::new(Duration::from_secs(1));

        // Port 9 (discard) on localhost is not expected to accept connections
        let result = forwarder
            .forward("http://127.0.0.1:9", request("/orders", None))
            .await;

        assert!(matches!(result, Err(GatewayError::UpstreamUnavailable(_))));
    }

    #[tokio::test]
    async fn test_slow_backend_times_out() {
        let server = MockServer::start().await;
        Mock::given(path("/slow"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(3)))
            .mount(&server)
            .await;

        let forwarder = HttpForwarder::new(Duration::from_millis(200));
        let result = forwarder.forward(&server.uri(), request("/slow", None)).await;

        assert!(matches!(result, Err(GatewayError::UpstreamUnavailable(_))));
    }

    #[tokio::test]
    async fn test_mock_forwarder_records_requests() {
        let mock = mock::MockForwarder::responding(StatusCode::OK, "ok");

        mock.forward("http://backend", request("/a", None)).await.unwrap();

        assert_eq!(mock.call_count(), 1);
        let (url, req) = mock.last_request().unwrap();
        assert_eq!(url, "http://backend");
        assert_eq!(req.path, "/a");

        let failing = mock::MockForwarder::failing();
        assert!(failing.forward("http://backend", request("/a", None)).await.is_err());
        assert_eq!(failing.call_count(), 1);
    }
}
