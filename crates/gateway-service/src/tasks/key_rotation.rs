//! Scheduled signing key rotation.
//!
//! # Graceful Shutdown
//!
//! The task exits when its cancellation token is cancelled. A rotation that
//! is already running completes first; the key store never sees a half
//! generated key either way.

use crate::services::key_management_service::KeyStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Rotate the current signing key every `interval` until `cancel_token` fires.
///
/// The first rotation happens one full interval after start; the key
/// present at startup is the current key until then. A zero interval
/// disables rotation and returns immediately, as does an interval too large
/// to schedule.
pub async fn start_key_rotation(
    key_store: Arc<KeyStore>,
    interval: Duration,
    cancel_token: CancellationToken,
) {
    if interval.is_zero() {
        info!(target: "gateway.keys", "Scheduled key rotation disabled");
        return;
    }

    let Some(first_tick) = tokio::time::Instant::now().checked_add(interval) else {
        error!(
            target: "gateway.keys",
            interval_seconds = interval.as_secs(),
            "Key rotation interval out of range, scheduled rotation disabled"
        );
        return;
    };

    info!(
        target: "gateway.keys",
        interval_seconds = interval.as_secs(),
        "Key rotation task started"
    );

    let mut ticker = tokio::time::interval_at(first_tick, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match key_store.rotate().await {
                    Ok(key) => {
                        info!(target: "gateway.keys", kid = %key.kid, "Scheduled key rotation completed");
                    }
                    Err(e) => {
                        error!(target: "gateway.keys", error = %e, "Scheduled key rotation failed");
                    }
                }
            }
            _ = cancel_token.cancelled() => {
                info!(target: "gateway.keys", "Key rotation task received shutdown signal, exiting");
                break;
            }
        }
    }
}
