//! Test server harness for E2E testing
//!
//! Provides TestGatewayServer for spawning real gateway instances in tests.

use crate::mock_backend::MockBackend;
use crate::mock_idp::MockIdentityProvider;
use common::jwks::JwkSet;
use gateway_service::config::Config;
use gateway_service::models::EnforcementMode;
use gateway_service::observability::metrics::init_metrics_recorder;
use gateway_service::routes::{self, AppState};
use gateway_service::services::{Forwarder, HttpForwarder};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::task::JoinHandle;

/// Test harness for spawning the gateway in E2E tests
///
/// # Example
/// ```rust,ignore
/// #[tokio::test]
/// async fn test_gateway_flow_e2e() -> Result<()> {
///     let idp = MockIdentityProvider::start().await;
///     let backend = MockBackend::start().await;
///     let server = TestGatewayServer::spawn(&idp, &backend, EnforcementMode::Enforce).await?;
///
///     let response = reqwest::Client::new()
///         .get(format!("{}/orders", server.url()))
///         .bearer_auth(idp.token().with_role("user").sign())
///         .send()
///         .await?;
///
///     assert_eq!(response.status(), 200);
///     Ok(())
/// }
/// ```
pub struct TestGatewayServer {
    addr: SocketAddr,
    state: Arc<AppState>,
    _keys_dir: TempDir,
    _handle: JoinHandle<()>,
}

impl TestGatewayServer {
    /// Spawn a gateway that trusts `idp` and forwards to `backend`.
    ///
    /// Scheduled key rotation is disabled; tests rotate through the admin
    /// endpoint or the key store directly.
    pub async fn spawn(
        idp: &MockIdentityProvider,
        backend: &MockBackend,
        mode: EnforcementMode,
    ) -> Result<Self, anyhow::Error> {
        let jwks_uri = idp.jwks_uri();
        let backend_url = backend.url();

        Self::spawn_with_vars(&[
            ("BACKEND_URL", backend_url.as_str()),
            ("UPSTREAM_ISSUER", idp.issuer()),
            ("UPSTREAM_JWKS_URL", jwks_uri.as_str()),
            ("ENFORCEMENT_MODE", mode.as_str()),
        ])
        .await
    }

    /// Spawn a gateway configured from `vars`.
    ///
    /// The server will:
    /// - Bind to a random available port (127.0.0.1:0)
    /// - Keep signing keys in a fresh temporary directory
    /// - Forward with the real HTTP forwarder
    /// - Start the HTTP server in the background
    pub async fn spawn_with_vars(vars: &[(&str, &str)]) -> Result<Self, anyhow::Error> {
        let keys_dir = tempfile::tempdir()
            .map_err(|e| anyhow::anyhow!("Failed to create keys dir: {}", e))?;

        let mut env = HashMap::from([
            ("BIND_ADDRESS".to_string(), "127.0.0.1:0".to_string()),
            (
                "GATEWAY_KEYS_DIR".to_string(),
                keys_dir.path().display().to_string(),
            ),
            ("KEY_ROTATION_INTERVAL_SECONDS".to_string(), "0".to_string()),
        ]);
        for (name, value) in vars {
            env.insert(name.to_string(), value.to_string());
        }

        let config = Config::from_vars(&env)
            .map_err(|e| anyhow::anyhow!("Invalid test configuration: {}", e))?;

        let forwarder: Arc<dyn Forwarder> = Arc::new(HttpForwarder::new(Duration::from_secs(
            config.upstream_timeout_seconds,
        )));
        let state = Arc::new(
            AppState::build(config, forwarder)
                .await
                .map_err(|e| anyhow::anyhow!("Failed to build application state: {}", e))?,
        );

        // Initialize metrics recorder for test server
        // Note: This may fail if already installed in the test process.
        // In that case, we create a new recorder without installing it globally.
        let metrics_handle = match init_metrics_recorder() {
            Ok(handle) => handle,
            Err(_) => {
                use metrics_exporter_prometheus::PrometheusBuilder;
                let recorder = PrometheusBuilder::new().build_recorder();
                recorder.handle()
            }
        };

        let app = routes::build_routes(Arc::clone(&state), metrics_handle);

        // Bind to random port
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .map_err(|e| anyhow::anyhow!("Failed to bind test server: {}", e))?;

        let addr = listener
            .local_addr()
            .map_err(|e| anyhow::anyhow!("Failed to get local address: {}", e))?;

        // Spawn server in background
        let handle = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                eprintln!("Test server error: {}", e);
            }
        });

        Ok(Self {
            addr,
            state,
            _keys_dir: keys_dir,
            _handle: handle,
        })
    }

    /// Get the base URL of the test server
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Get the socket address
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Shared application state, for direct access to stores in assertions.
    pub fn state(&self) -> &Arc<AppState> {
        &self.state
    }

    /// Get reference to the server configuration
    pub fn config(&self) -> &Config {
        &self.state.config
    }

    /// Fetch the gateway's published key set over HTTP.
    pub async fn fetch_jwks(&self) -> Result<JwkSet, anyhow::Error> {
        let response = reqwest::get(format!("{}/gateway/.well-known/jwks.json", self.url())).await?;
        anyhow::ensure!(
            response.status().is_success(),
            "JWKS endpoint returned {}",
            response.status()
        );
        Ok(response.json().await?)
    }
}

impl Drop for TestGatewayServer {
    fn drop(&mut self) {
        // Explicitly abort the HTTP server task to ensure immediate cleanup
        self._handle.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_server_spawns_successfully() -> Result<(), anyhow::Error> {
        let server = TestGatewayServer::spawn_with_vars(&[]).await?;

        let response = reqwest::get(format!("{}/health", server.url())).await?;

        assert_eq!(response.status(), 200);
        assert_eq!(response.text().await?, "OK");
        Ok(())
    }

    #[tokio::test]
    async fn test_server_publishes_bootstrapped_key() -> Result<(), anyhow::Error> {
        let server = TestGatewayServer::spawn_with_vars(&[]).await?;

        let jwks = server.fetch_jwks().await?;

        assert_eq!(jwks.keys.len(), 1);
        assert!(server.state().key_store.key(&jwks.keys[0].kid).is_some());
        Ok(())
    }
}
