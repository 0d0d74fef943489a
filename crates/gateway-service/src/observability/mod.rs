//! Observability module for the API gateway.
//!
//! # Privacy by Default
//!
//! All instrumentation uses `#[instrument(skip_all)]` and explicit safe field allow-listing.
//! Fields are categorized as:
//! - **SAFE**: Can be logged in plaintext (enums, methods, policy ids, kids)
//! - **HASHED**: Must be SHA-256 hashed for correlation (user_id, username)
//! - **NEVER**: Must never appear in logs (bearer tokens, private keys)

pub mod metrics;

use sha2::{Digest, Sha256};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Hash a field value for correlation in logs (SHA-256, first 8 hex chars)
///
/// Used for fields like `user_id` that need correlation across log entries
/// but should not be stored in plaintext.
pub fn hash_for_correlation(value: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(value.as_bytes());
    let result = hasher.finalize();
    hex::encode(result.get(..4).unwrap_or_default())
}

/// Initialize the global tracing subscriber.
///
/// Filter comes from `RUST_LOG` (default `gateway_service=debug,tower_http=debug`).
/// `LOG_FORMAT=json` selects the JSON formatter.
pub fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "gateway_service=debug,gateway=debug,tower_http=debug".into());

    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}
