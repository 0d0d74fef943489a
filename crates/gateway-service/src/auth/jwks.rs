//! Remote key discovery client.
//!
//! [`RemoteKeyResolver`] fetches third-party key discovery documents and
//! caches them per discovery URI with a TTL.
//!
//! # Fetch coalescing
//!
//! Each URI has one fetch lock. A request that misses records how many
//! fetches the URI has started, then waits for the lock. If another fetch
//! started after that point it uses that result instead of fetching again,
//! so N concurrent misses cost one request to the identity provider. A
//! fetch already in flight when the request missed does not count: it may
//! predate the key being published, so the waiter fetches again once it
//! holds the lock. Failed fetches count too, which keeps an unreachable
//! provider from being hit once per queued request.
//!
//! # Refresh limit
//!
//! A miss against a fresh cache means the token names a kid the provider
//! has not published (or has only just published). Those refreshes are
//! capped per URI per minute; past the cap the kid is treated as unknown
//! without contacting the provider. Populating an empty cache and
//! refreshing an expired one are never capped.
//!
//! # Security
//!
//! - Fetches are bounded by a timeout and never retried
//! - A kid missing after a refresh is treated as unknown, not refetched
//! - Tokens with made-up kids cannot drive unbounded fetches

use crate::errors::{GatewayError, INVALID_TOKEN_MESSAGE};
use crate::observability::metrics::{record_jwks_cache, record_jwks_fetch};
use common::jwks::{Jwk, JwkSet};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, RwLock};
use tracing::instrument;

/// Default cap on unknown-kid refreshes per URI per minute.
pub const DEFAULT_REFRESH_LIMIT_PER_MINUTE: u32 = 10;

const REFRESH_WINDOW: Duration = Duration::from_secs(60);

/// Cached key set for one discovery URI.
struct CachedKeySet {
    /// Map of key ID to JWK.
    keys: HashMap<String, Jwk>,

    fetched_at: Instant,
}

/// Cache state for one discovery URI.
#[derive(Default)]
struct UriSlot {
    cache: RwLock<Option<Arc<CachedKeySet>>>,

    /// Held for the duration of a fetch.
    fetch_lock: Mutex<RefreshWindow>,

    /// Fetches started, successful or not.
    fetches_started: AtomicU64,
}

/// Start times of recent unknown-kid refreshes.
#[derive(Default)]
struct RefreshWindow {
    recent: VecDeque<Instant>,
}

impl RefreshWindow {
    /// Claim one refresh if fewer than `limit` happened in the last window.
    fn try_claim(&mut self, limit: u32, now: Instant) -> bool {
        while let Some(oldest) = self.recent.front() {
            if now.duration_since(*oldest) < REFRESH_WINDOW {
                break;
            }
            self.recent.pop_front();
        }

        if self.recent.len() >= limit as usize {
            return false;
        }
        self.recent.push_back(now);
        true
    }
}

impl UriSlot {
    async fn cached(&self) -> Option<Arc<CachedKeySet>> {
        self.cache.read().await.clone()
    }
}

/// Fetches and caches remote key sets.
pub struct RemoteKeyResolver {
    http_client: reqwest::Client,

    slots: RwLock<HashMap<String, Arc<UriSlot>>>,

    cache_ttl: Duration,

    fetch_timeout: Duration,

    refresh_limit: u32,
}

impl RemoteKeyResolver {
    pub fn new(cache_ttl: Duration, fetch_timeout: Duration) -> Self {
        let http_client = reqwest::Client::builder()
            .timeout(fetch_timeout)
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!(target: "gateway.auth.jwks", error = %e, "Failed to build HTTP client with custom config, using defaults");
                reqwest::Client::new()
            });

        Self {
            http_client,
            slots: RwLock::new(HashMap::new()),
            cache_ttl,
            fetch_timeout,
            refresh_limit: DEFAULT_REFRESH_LIMIT_PER_MINUTE,
        }
    }

    /// Cap unknown-kid refreshes at `per_minute` per discovery URI.
    #[must_use]
    pub fn with_refresh_limit(mut self, per_minute: u32) -> Self {
        self.refresh_limit = per_minute;
        self
    }

    /// Get the key `kid` published at `discovery_uri`.
    ///
    /// Serves from cache when the entry is fresh and holds `kid`; otherwise
    /// refreshes once, subject to the refresh limit, and looks again.
    ///
    /// # Errors
    ///
    /// Returns `GatewayError::RemoteFetchFailure` if the document cannot be fetched.
    /// Returns `GatewayError::Unauthorized` if `kid` is not published, or if
    /// the refresh limit is exhausted.
    #[instrument(skip_all, fields(kid = %kid))]
    pub async fn resolve(&self, discovery_uri: &str, kid: &str) -> Result<Jwk, GatewayError> {
        let slot = self.slot(discovery_uri).await;

        // Any fetch started after this point began after our miss
        let observed_starts = slot.fetches_started.load(Ordering::Acquire);

        if let Some(cached) = slot.cached().await {
            if cached.fetched_at.elapsed() < self.cache_ttl {
                if let Some(key) = cached.keys.get(kid) {
                    record_jwks_cache("hit");
                    tracing::debug!(target: "gateway.auth.jwks", "Key cache hit");
                    return Ok(key.clone());
                }
            }
        }
        record_jwks_cache("miss");

        let mut window = slot.fetch_lock.lock().await;

        if slot.fetches_started.load(Ordering::Acquire) == observed_starts {
            // A fetch in flight at our miss may have landed the key already
            let fresh = slot
                .cached()
                .await
                .filter(|c| c.fetched_at.elapsed() < self.cache_ttl);
            if let Some(key) = fresh.as_ref().and_then(|c| c.keys.get(kid)) {
                return Ok(key.clone());
            }

            if fresh.is_some() && !window.try_claim(self.refresh_limit, Instant::now()) {
                record_jwks_cache("throttled");
                tracing::warn!(
                    target: "gateway.auth.jwks",
                    uri = %discovery_uri,
                    limit_per_minute = self.refresh_limit,
                    "Unknown kid refresh limit reached, not refetching"
                );
                return Err(GatewayError::Unauthorized(INVALID_TOKEN_MESSAGE.to_string()));
            }

            slot.fetches_started.fetch_add(1, Ordering::AcqRel);
            let outcome = match self.fetch_with_timeout(discovery_uri).await {
                Ok(keys) => {
                    *slot.cache.write().await = Some(Arc::new(CachedKeySet {
                        keys,
                        fetched_at: Instant::now(),
                    }));
                    Ok(())
                }
                Err(e) => Err(e),
            };
            outcome?;
        } else {
            tracing::debug!(target: "gateway.auth.jwks", "Using key set fetched by a concurrent request");
        }

        let cached = slot.cached().await;
        if let Some(key) = cached.as_ref().and_then(|c| c.keys.get(kid)) {
            return Ok(key.clone());
        }

        if cached.is_none() {
            // The coalesced attempt failed and nothing is cached
            return Err(GatewayError::RemoteFetchFailure(
                "Key discovery document unavailable".to_string(),
            ));
        }

        tracing::warn!(target: "gateway.auth.jwks", "Key not found in key set after refresh");
        Err(GatewayError::Unauthorized(INVALID_TOKEN_MESSAGE.to_string()))
    }

    /// Drop the cache for `discovery_uri`.
    pub async fn invalidate(&self, discovery_uri: &str) {
        if self.slots.write().await.remove(discovery_uri).is_some() {
            tracing::info!(target: "gateway.auth.jwks", uri = %discovery_uri, "Key cache invalidated");
        }
    }

    async fn slot(&self, discovery_uri: &str) -> Arc<UriSlot> {
        if let Some(slot) = self.slots.read().await.get(discovery_uri) {
            return Arc::clone(slot);
        }

        let mut slots = self.slots.write().await;
        Arc::clone(slots.entry(discovery_uri.to_string()).or_default())
    }

    /// One bounded fetch attempt. Never retried.
    async fn fetch_with_timeout(
        &self,
        discovery_uri: &str,
    ) -> Result<HashMap<String, Jwk>, GatewayError> {
        let start = Instant::now();

        match tokio::time::timeout(self.fetch_timeout, self.fetch(discovery_uri)).await {
            Ok(Ok(keys)) => {
                record_jwks_fetch("success", start.elapsed());
                tracing::info!(
                    target: "gateway.auth.jwks",
                    uri = %discovery_uri,
                    key_count = keys.len(),
                    "Key cache refreshed"
                );
                Ok(keys)
            }
            Ok(Err(e)) => {
                record_jwks_fetch("error", start.elapsed());
                Err(e)
            }
            Err(_) => {
                record_jwks_fetch("timeout", start.elapsed());
                tracing::error!(target: "gateway.auth.jwks", uri = %discovery_uri, "Key discovery fetch timed out");
                Err(GatewayError::RemoteFetchFailure(
                    "Key discovery fetch timed out".to_string(),
                ))
            }
        }
    }

    async fn fetch(&self, discovery_uri: &str) -> Result<HashMap<String, Jwk>, GatewayError> {
        tracing::debug!(target: "gateway.auth.jwks", uri = %discovery_uri, "Fetching key discovery document");

        let response = self
            .http_client
            .get(discovery_uri)
            .send()
            .await
            .map_err(|e| {
                tracing::error!(target: "gateway.auth.jwks", error = %e, "Failed to fetch key discovery document");
                GatewayError::RemoteFetchFailure(format!("request failed: {}", e))
            })?;

        if !response.status().is_success() {
            tracing::error!(
                target: "gateway.auth.jwks",
                status = %response.status(),
                "Key discovery endpoint returned error"
            );
            return Err(GatewayError::RemoteFetchFailure(format!(
                "status {}",
                response.status()
            )));
        }

        let set: JwkSet = response.json().await.map_err(|e| {
            tracing::error!(target: "gateway.auth.jwks", error = %e, "Failed to parse key discovery document");
            GatewayError::RemoteFetchFailure(format!("invalid document: {}", e))
        })?;

        Ok(set
            .keys
            .into_iter()
            .filter(|key| !key.kid.is_empty())
            .map(|key| (key.kid.clone(), key))
            .collect())
    }
}
