//! API Gateway
//!
//! Entry point for the gateway service. Loads configuration, opens the key
//! store, and serves the gateway, admin, and proxy routes until a shutdown
//! signal arrives.

use gateway_service::config::Config;
use gateway_service::observability::{self, metrics::init_metrics_recorder};
use gateway_service::routes::{self, AppState};
use gateway_service::services::HttpForwarder;
use gateway_service::tasks::start_key_rotation;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    observability::init_tracing();

    info!("Starting API Gateway");

    // Load configuration
    let config = Config::from_env().map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;

    info!(
        bind_address = %config.bind_address,
        backend_url = %config.backend_url,
        enforcement_mode = %config.enforcement_mode,
        upstream_issuer = %config.upstream_issuer,
        jwt_clock_skew_seconds = config.jwt_clock_skew_seconds,
        "Configuration loaded successfully"
    );

    let metrics_handle = init_metrics_recorder().map_err(|e| {
        error!("Failed to initialize metrics recorder: {}", e);
        e
    })?;

    // Parse bind address before moving config
    let bind_address = config.bind_address.clone();
    let rotation_interval = Duration::from_secs(config.key_rotation_interval_seconds);

    let forwarder = Arc::new(HttpForwarder::new(Duration::from_secs(
        config.upstream_timeout_seconds,
    )));

    info!("Initializing signing keys...");
    let state = Arc::new(AppState::build(config, forwarder).await.map_err(|e| {
        error!("Failed to initialize gateway state: {}", e);
        e
    })?);
    info!("Signing keys initialized");

    // Background key rotation
    let cancel_token = CancellationToken::new();
    let rotation_handle = tokio::spawn(start_key_rotation(
        Arc::clone(&state.key_store),
        rotation_interval,
        cancel_token.clone(),
    ));

    // Build application routes
    let app = routes::build_routes(state, metrics_handle);

    let addr: SocketAddr = bind_address.parse().map_err(|e| {
        error!("Invalid bind address: {}", e);
        e
    })?;

    info!("API Gateway listening on {}", addr);

    // Start server with graceful shutdown support
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    cancel_token.cancel();
    if let Err(e) = rotation_handle.await {
        error!("Key rotation task failed: {}", e);
    }

    info!("API Gateway shutdown complete");

    Ok(())
}

/// Listens for shutdown signals (SIGTERM, SIGINT).
async fn shutdown_signal() {
    let ctrl_c = async {
        match signal::ctrl_c().await {
            Ok(()) => info!("Received SIGINT, starting graceful shutdown..."),
            Err(e) => error!("Failed to listen for SIGINT: {}", e),
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
                info!("Received SIGTERM, starting graceful shutdown...");
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
