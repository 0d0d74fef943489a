use crate::routes::AppState;
use axum::{
    extract::State,
    http::header::{HeaderMap, HeaderValue, CACHE_CONTROL},
    Json,
};
use common::jwks::JwkSet;
use std::sync::Arc;
use tracing::instrument;

/// Handle JWKS request
///
/// GET /gateway/.well-known/jwks.json
///
/// Returns every active gateway public key with Cache-Control set to
/// max-age=600 (10 minutes). Deactivated keys are left out even while they
/// can still be looked up by kid.
#[instrument(name = "gateway.jwks.get", skip_all, fields(key_count))]
pub async fn handle_get_jwks(State(state): State<Arc<AppState>>) -> (HeaderMap, Json<JwkSet>) {
    let jwks = state.key_store.publishable_key_set();
    tracing::Span::current().record("key_count", jwks.keys.len());

    let mut headers = HeaderMap::new();
    headers.insert(CACHE_CONTROL, HeaderValue::from_static("max-age=600"));

    (headers, Json(jwks))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use crate::routes::test_support::TestApp;
    use axum::body::Body;
    use axum::http::{header::CACHE_CONTROL, Request, StatusCode};
    use http_body_util::BodyExt;
    use serde_json::Value;
    use tower::ServiceExt;

    #[tokio::test]
    async fn test_jwks_serves_active_keys_with_cache_header() {
        let app = TestApp::new().await;
        let current = app.state.key_store.current_key().await.unwrap();

        let response = app
            .router
            .oneshot(
                Request::get("/gateway/.well-known/jwks.json")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers().get(CACHE_CONTROL).unwrap(), "max-age=600");

        let body = response.into_body().collect().await.unwrap().to_bytes();
        let jwks: Value = serde_json::from_slice(&body).unwrap();
        let keys = jwks["keys"].as_array().unwrap();
        assert_eq!(keys.len(), 1);
        let key = keys.first().unwrap();
        assert_eq!(key["kid"], current.kid.as_str());
        assert_eq!(key["kty"], "RSA");
        assert_eq!(key["use"], "sig");
        assert_eq!(key["alg"], "RS256");
        assert!(key["n"].is_string());
        assert!(key["e"].is_string());
    }

    #[tokio::test]
    async fn test_jwks_includes_previous_key_after_rotation() {
        let app = TestApp::new().await;
        let first = app.state.key_store.current_key().await.unwrap();
        let second = app.state.key_store.rotate().await.unwrap();

        let (status, jwks) = app
            .send("GET", "/gateway/.well-known/jwks.json", None)
            .await;

        assert_eq!(status, StatusCode::OK);
        let kids: Vec<&str> = jwks["keys"]
            .as_array()
            .unwrap()
            .iter()
            .map(|k| k["kid"].as_str().unwrap())
            .collect();
        assert!(kids.contains(&first.kid.as_str()));
        assert!(kids.contains(&second.kid.as_str()));
    }
}
