//! HTTP routes for the API gateway.
//!
//! Defines the Axum router and application state.

use crate::auth::{RemoteKeyResolver, TokenVerifier};
use crate::config::Config;
use crate::errors::GatewayError;
use crate::handlers;
use crate::middleware::http_metrics_middleware;
use crate::pipeline::GatewayPipeline;
use crate::services::{
    AuthorizationEngine, BackendTarget, EnforcementStore, Forwarder, KeyStore, PolicyStore,
    TokenExchanger, TokenSigner,
};
use axum::{
    middleware,
    routing::{delete, get, post},
    Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;
use std::time::Duration;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

/// Extra time the request timeout allows beyond the upstream timeout.
const REQUEST_TIMEOUT_MARGIN_SECONDS: u64 = 5;

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    /// Service configuration as loaded at startup.
    pub config: Config,

    /// Gateway signing keys.
    pub key_store: Arc<KeyStore>,

    /// Signer for STS-issued and exchanged tokens.
    pub signer: Arc<TokenSigner>,

    /// Remote key cache, shared with the verifier.
    pub resolver: Arc<RemoteKeyResolver>,

    /// Enforcement mode and verifier settings.
    pub enforcement: Arc<EnforcementStore>,

    /// Authorization policy set.
    pub policies: Arc<PolicyStore>,

    /// Where proxied requests go.
    pub backend: Arc<BackendTarget>,

    /// Per-request verify, authorize, exchange, forward.
    pub pipeline: Arc<GatewayPipeline>,
}

impl AppState {
    /// Wire every component from `config`.
    ///
    /// Opens the key store and makes sure a current signing key exists, so
    /// the discovery document is never empty once the server is listening.
    pub async fn build(
        config: Config,
        forwarder: Arc<dyn Forwarder>,
    ) -> Result<Self, GatewayError> {
        let key_store = Arc::new(KeyStore::open(config.keys_dir.clone(), config.max_keys).await?);
        let current = key_store.current_key().await?;
        tracing::info!(target: "gateway.keys", kid = %current.kid, "Current signing key ready");

        let signer = Arc::new(TokenSigner::new(
            Arc::clone(&key_store),
            config.gateway_issuer.clone(),
            config.sts_token_ttl_seconds,
        ));
        let exchanger = Arc::new(TokenExchanger::new(
            Arc::clone(&signer),
            config.downstream_audience.clone(),
            config.default_tenant.clone(),
            config.exchange_token_ttl_seconds,
        ));

        let resolver = Arc::new(RemoteKeyResolver::new(
            Duration::from_secs(config.jwks_cache_ttl_seconds),
            Duration::from_secs(config.jwks_fetch_timeout_seconds),
        )
        .with_refresh_limit(config.jwks_refresh_per_minute));
        let verifier = Arc::new(TokenVerifier::new(
            Arc::clone(&resolver),
            Duration::from_secs(config.jwt_clock_skew_seconds.unsigned_abs()),
        ));

        let enforcement = Arc::new(EnforcementStore::from_config(&config));
        let policies = Arc::new(PolicyStore::new());
        let backend = Arc::new(BackendTarget::new(config.backend_url.clone()));

        let pipeline = Arc::new(GatewayPipeline::new(
            verifier,
            AuthorizationEngine::new(Arc::clone(&policies)),
            exchanger,
            Arc::clone(&enforcement),
            Arc::clone(&backend),
            forwarder,
        ));

        Ok(Self {
            config,
            key_store,
            signer,
            resolver,
            enforcement,
            policies,
            backend,
            pipeline,
        })
    }
}

/// Build the application routes.
///
/// Creates an Axum router with:
/// - `/health` - Liveness probe (simple "OK")
/// - `/metrics` - Prometheus metrics endpoint
/// - `/gateway/token`, `/gateway/verify` - Token service endpoints
/// - `/gateway/.well-known/jwks.json` - Gateway key discovery document
/// - `/admin/...` - Runtime configuration, policies, and keys
/// - everything else - Proxied through the gateway pipeline
/// - TraceLayer for request logging
/// - HTTP metrics middleware
/// - Request timeout slightly above the upstream timeout
pub fn build_routes(state: Arc<AppState>, metrics_handle: PrometheusHandle) -> Router {
    let request_timeout = Duration::from_secs(
        state
            .config
            .upstream_timeout_seconds
            .saturating_add(REQUEST_TIMEOUT_MARGIN_SECONDS),
    );

    let gateway_routes = Router::new()
        .route("/health", get(handlers::health_check))
        .route("/gateway/token", post(handlers::issue_token))
        .route("/gateway/verify", post(handlers::verify_token))
        .route(
            "/gateway/.well-known/jwks.json",
            get(handlers::handle_get_jwks),
        )
        .route(
            "/admin/config/backend",
            get(handlers::get_backend).post(handlers::set_backend),
        )
        .route(
            "/admin/config/jwt",
            get(handlers::get_jwt_config).post(handlers::set_jwt_config),
        )
        .route(
            "/admin/enforcement",
            get(handlers::get_enforcement).post(handlers::set_enforcement),
        )
        .route(
            "/admin/policies",
            get(handlers::get_policies)
                .post(handlers::replace_policies)
                .delete(handlers::clear_policies),
        )
        .route("/admin/keys", get(handlers::list_keys))
        .route("/admin/keys/rotate", post(handlers::rotate_keys))
        .route("/admin/keys/inactive", delete(handlers::purge_inactive_keys))
        .fallback(handlers::proxy_request)
        .with_state(state);

    // Metrics route with its own state
    let metrics_routes = Router::new()
        .route("/metrics", get(handlers::metrics_handler))
        .with_state(metrics_handle);

    // Layer order (bottom-to-top execution):
    // 1. TimeoutLayer - Timeout the request (innermost)
    // 2. TraceLayer - Log request details
    // 3. http_metrics_middleware - Record ALL responses (outermost)
    metrics_routes
        .merge(gateway_routes)
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(request_timeout))
        .layer(middleware::from_fn(http_metrics_middleware))
}


#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::test_support::TestApp;
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    #[test]
    fn test_app_state_is_clone() {
        fn assert_clone<T: Clone>() {}
        assert_clone::<AppState>();
    }

    #[tokio::test]
    async fn test_build_bootstraps_signing_key() {
        let app = TestApp::new().await;

        assert_eq!(app.state.key_store.publishable_key_set().keys.len(), 1);
        assert!(app.keys_dir.path().join("keys.json").exists());
    }

    #[tokio::test]
    async fn test_health_route() {
        let app = TestApp::new().await;

        let response = app
            .router
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], b"OK");
    }

    #[tokio::test]
    async fn test_metrics_route() {
        let app = TestApp::new().await;

        let response = app
            .router
            .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_unknown_path_falls_through_to_proxy() {
        let app = TestApp::new().await;

        // Default mode is audit, so anonymous traffic is forwarded
        let response = app
            .router
            .oneshot(Request::get("/orders/42").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], b"proxied");
        assert_eq!(app.forwarder.call_count(), 1);
    }
}
