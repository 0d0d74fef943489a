//! API gateway configuration.
//!
//! Configuration is loaded from environment variables once at startup.
//! Values that may change at runtime (enforcement mode, verifier settings,
//! backend target, policies) are only *seeded* from here; afterwards they
//! live in their runtime stores.

use crate::models::EnforcementMode;
use common::jwt::{DEFAULT_CLOCK_SKEW, MAX_CLOCK_SKEW};
use jsonwebtoken::Algorithm;
use std::collections::HashMap;
use std::env;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use thiserror::Error;

/// Default server bind address.
pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0:8081";

/// Default downstream service URL.
pub const DEFAULT_BACKEND_URL: &str = "http://localhost:5001";

/// Issuer placed in every token the gateway mints.
pub const DEFAULT_GATEWAY_ISSUER: &str = "https://gateway.internal";

/// Default directory for signing key material.
pub const DEFAULT_KEYS_DIR: &str = "./keys";

/// Default number of active signing keys kept in the discovery document.
pub const DEFAULT_MAX_KEYS: usize = 3;

/// Default scheduled rotation interval (24 hours).
pub const DEFAULT_KEY_ROTATION_INTERVAL_SECONDS: u64 = 86_400;

/// Default upstream identity provider issuer.
pub const DEFAULT_UPSTREAM_ISSUER: &str = "http://localhost:5001";

/// Default upstream identity provider JWKS endpoint.
pub const DEFAULT_UPSTREAM_JWKS_URL: &str = "http://localhost:5001/.well-known/jwks.json";

/// Default audience expected on inbound tokens.
pub const DEFAULT_UPSTREAM_AUDIENCE: &str = "api-gateway";

/// Default audience placed in exchanged tokens.
pub const DEFAULT_DOWNSTREAM_AUDIENCE: &str = "backend-service";

/// Tenant used when the inbound identity carries none.
pub const DEFAULT_TENANT: &str = "default";

/// Default lifetime of exchanged tokens in seconds.
pub const DEFAULT_EXCHANGE_TOKEN_TTL_SECONDS: i64 = 60;

/// Maximum lifetime of exchanged tokens in seconds.
pub const MAX_EXCHANGE_TOKEN_TTL_SECONDS: i64 = 60;

/// Default lifetime of tokens issued by `POST /gateway/token`.
pub const DEFAULT_STS_TOKEN_TTL_SECONDS: i64 = 3600;

/// Maximum lifetime of tokens issued by `POST /gateway/token` (24 hours).
pub const MAX_STS_TOKEN_TTL_SECONDS: i64 = 86_400;

/// Default remote key set cache TTL (10 minutes).
pub const DEFAULT_JWKS_CACHE_TTL_SECONDS: u64 = 600;

/// Default remote key set fetch timeout.
pub const DEFAULT_JWKS_FETCH_TIMEOUT_SECONDS: u64 = 5;

/// Maximum remote key set fetch timeout.
pub const MAX_JWKS_FETCH_TIMEOUT_SECONDS: u64 = 30;

/// Default number of unknown-kid refreshes allowed per discovery URI per minute.
pub const DEFAULT_JWKS_REFRESH_PER_MINUTE: u32 = 10;

/// Maximum unknown-kid refreshes per discovery URI per minute.
pub const MAX_JWKS_REFRESH_PER_MINUTE: u32 = 600;

/// Maximum scheduled rotation interval (30 days).
pub const MAX_KEY_ROTATION_INTERVAL_SECONDS: u64 = 2_592_000;

/// Default upstream forwarding timeout.
pub const DEFAULT_UPSTREAM_TIMEOUT_SECONDS: u64 = 30;

/// Maximum upstream forwarding timeout.
pub const MAX_UPSTREAM_TIMEOUT_SECONDS: u64 = 300;

/// API gateway configuration.
#[derive(Clone)]
pub struct Config {
    /// Server bind address (default: "0.0.0.0:8081").
    pub bind_address: String,

    /// Initial downstream service URL.
    pub backend_url: String,

    /// Issuer of gateway-minted tokens.
    pub gateway_issuer: String,

    /// Directory holding `keys.json` and the PEM files.
    pub keys_dir: PathBuf,

    /// Active keys kept after a rotation; older ones are deactivated.
    pub max_keys: usize,

    /// Scheduled rotation interval in seconds; 0 disables the task.
    pub key_rotation_interval_seconds: u64,

    /// Issuer expected on inbound tokens.
    pub upstream_issuer: String,

    /// Discovery URI for inbound token keys.
    pub upstream_jwks_url: String,

    /// Audience expected on inbound tokens.
    pub upstream_audience: String,

    /// Signature algorithms accepted on inbound tokens.
    pub upstream_algorithms: Vec<Algorithm>,

    /// Initial enforcement mode.
    pub enforcement_mode: EnforcementMode,

    /// Audience of exchanged tokens.
    pub downstream_audience: String,

    /// Tenant used when the inbound identity has none.
    pub default_tenant: String,

    /// Lifetime of exchanged tokens.
    pub exchange_token_ttl_seconds: i64,

    /// Lifetime of STS-issued tokens.
    pub sts_token_ttl_seconds: i64,

    /// Max age of a cached remote key set.
    pub jwks_cache_ttl_seconds: u64,

    /// Bound on a single remote key set fetch.
    pub jwks_fetch_timeout_seconds: u64,

    /// Unknown-kid refreshes allowed per discovery URI per minute.
    pub jwks_refresh_per_minute: u32,

    /// JWT clock skew tolerance in seconds.
    pub jwt_clock_skew_seconds: i64,

    /// Bound on a single upstream forward.
    pub upstream_timeout_seconds: u64,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("bind_address", &self.bind_address)
            .field("backend_url", &self.backend_url)
            .field("gateway_issuer", &self.gateway_issuer)
            .field("keys_dir", &self.keys_dir)
            .field("max_keys", &self.max_keys)
            .field(
                "key_rotation_interval_seconds",
                &self.key_rotation_interval_seconds,
            )
            .field("upstream_issuer", &self.upstream_issuer)
            .field("upstream_jwks_url", &self.upstream_jwks_url)
            .field("upstream_audience", &self.upstream_audience)
            .field("upstream_algorithms", &self.upstream_algorithms)
            .field("enforcement_mode", &self.enforcement_mode)
            .field("downstream_audience", &self.downstream_audience)
            .field("default_tenant", &self.default_tenant)
            .field("exchange_token_ttl_seconds", &self.exchange_token_ttl_seconds)
            .field("sts_token_ttl_seconds", &self.sts_token_ttl_seconds)
            .field("jwks_cache_ttl_seconds", &self.jwks_cache_ttl_seconds)
            .field("jwks_fetch_timeout_seconds", &self.jwks_fetch_timeout_seconds)
            .field("jwks_refresh_per_minute", &self.jwks_refresh_per_minute)
            .field("jwt_clock_skew_seconds", &self.jwt_clock_skew_seconds)
            .field("upstream_timeout_seconds", &self.upstream_timeout_seconds)
            .finish()
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value for {name}: {reason}")]
    InvalidValue { name: String, reason: String },

    #[error("Invalid URL for {name}: {reason}")]
    InvalidUrl { name: String, reason: String },

    #[error("Invalid JWT clock skew configuration: {0}")]
    InvalidJwtClockSkew(String),

    #[error("Invalid algorithm list: {0}")]
    InvalidAlgorithms(String),
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a HashMap (for testing).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let bind_address = string_var(vars, "BIND_ADDRESS", DEFAULT_BIND_ADDRESS);

        let backend_url = string_var(vars, "BACKEND_URL", DEFAULT_BACKEND_URL);
        validate_http_url("BACKEND_URL", &backend_url)?;

        let gateway_issuer = non_empty_var(vars, "GATEWAY_ISSUER", DEFAULT_GATEWAY_ISSUER)?;

        let keys_dir = PathBuf::from(string_var(vars, "GATEWAY_KEYS_DIR", DEFAULT_KEYS_DIR));

        let max_keys: usize = parse_var(vars, "GATEWAY_MAX_KEYS", DEFAULT_MAX_KEYS)?;
        if max_keys == 0 {
            return Err(invalid("GATEWAY_MAX_KEYS", "must be at least 1"));
        }

        let key_rotation_interval_seconds = parse_var(
            vars,
            "KEY_ROTATION_INTERVAL_SECONDS",
            DEFAULT_KEY_ROTATION_INTERVAL_SECONDS,
        )?;
        if key_rotation_interval_seconds > MAX_KEY_ROTATION_INTERVAL_SECONDS {
            return Err(invalid(
                "KEY_ROTATION_INTERVAL_SECONDS",
                &format!(
                    "must not exceed {}, got {}",
                    MAX_KEY_ROTATION_INTERVAL_SECONDS, key_rotation_interval_seconds
                ),
            ));
        }

        let upstream_issuer = non_empty_var(vars, "UPSTREAM_ISSUER", DEFAULT_UPSTREAM_ISSUER)?;

        let upstream_jwks_url = string_var(vars, "UPSTREAM_JWKS_URL", DEFAULT_UPSTREAM_JWKS_URL);
        validate_http_url("UPSTREAM_JWKS_URL", &upstream_jwks_url)?;

        let upstream_audience =
            non_empty_var(vars, "UPSTREAM_AUDIENCE", DEFAULT_UPSTREAM_AUDIENCE)?;

        let upstream_algorithms = match vars.get("UPSTREAM_ALGORITHMS") {
            Some(list) => parse_algorithms(list.split(','))?,
            None => vec![Algorithm::RS256],
        };

        let enforcement_mode = match vars.get("ENFORCEMENT_MODE") {
            Some(value) => EnforcementMode::from_str(value)
                .map_err(|reason| invalid("ENFORCEMENT_MODE", &reason))?,
            None => EnforcementMode::default(),
        };

        let downstream_audience =
            non_empty_var(vars, "DOWNSTREAM_AUDIENCE", DEFAULT_DOWNSTREAM_AUDIENCE)?;

        let default_tenant = non_empty_var(vars, "DEFAULT_TENANT", DEFAULT_TENANT)?;

        let exchange_token_ttl_seconds: i64 = parse_var(
            vars,
            "EXCHANGE_TOKEN_TTL_SECONDS",
            DEFAULT_EXCHANGE_TOKEN_TTL_SECONDS,
        )?;
        if !(1..=MAX_EXCHANGE_TOKEN_TTL_SECONDS).contains(&exchange_token_ttl_seconds) {
            return Err(invalid(
                "EXCHANGE_TOKEN_TTL_SECONDS",
                &format!(
                    "must be between 1 and {}, got {}",
                    MAX_EXCHANGE_TOKEN_TTL_SECONDS, exchange_token_ttl_seconds
                ),
            ));
        }

        let sts_token_ttl_seconds: i64 =
            parse_var(vars, "STS_TOKEN_TTL_SECONDS", DEFAULT_STS_TOKEN_TTL_SECONDS)?;
        if !(1..=MAX_STS_TOKEN_TTL_SECONDS).contains(&sts_token_ttl_seconds) {
            return Err(invalid(
                "STS_TOKEN_TTL_SECONDS",
                &format!(
                    "must be between 1 and {}, got {}",
                    MAX_STS_TOKEN_TTL_SECONDS, sts_token_ttl_seconds
                ),
            ));
        }

        let jwks_cache_ttl_seconds: u64 = parse_var(
            vars,
            "JWKS_CACHE_TTL_SECONDS",
            DEFAULT_JWKS_CACHE_TTL_SECONDS,
        )?;
        if jwks_cache_ttl_seconds == 0 {
            return Err(invalid("JWKS_CACHE_TTL_SECONDS", "must be greater than 0"));
        }

        let jwks_fetch_timeout_seconds: u64 = parse_var(
            vars,
            "JWKS_FETCH_TIMEOUT_SECONDS",
            DEFAULT_JWKS_FETCH_TIMEOUT_SECONDS,
        )?;
        if !(1..=MAX_JWKS_FETCH_TIMEOUT_SECONDS).contains(&jwks_fetch_timeout_seconds) {
            return Err(invalid(
                "JWKS_FETCH_TIMEOUT_SECONDS",
                &format!(
                    "must be between 1 and {}, got {}",
                    MAX_JWKS_FETCH_TIMEOUT_SECONDS, jwks_fetch_timeout_seconds
                ),
            ));
        }

        let jwks_refresh_per_minute: u32 = parse_var(
            vars,
            "JWKS_REFRESH_PER_MINUTE",
            DEFAULT_JWKS_REFRESH_PER_MINUTE,
        )?;
        if !(1..=MAX_JWKS_REFRESH_PER_MINUTE).contains(&jwks_refresh_per_minute) {
            return Err(invalid(
                "JWKS_REFRESH_PER_MINUTE",
                &format!(
                    "must be between 1 and {}, got {}",
                    MAX_JWKS_REFRESH_PER_MINUTE, jwks_refresh_per_minute
                ),
            ));
        }

        // Parse JWT clock skew tolerance with validation
        let jwt_clock_skew_seconds = if let Some(value_str) = vars.get("JWT_CLOCK_SKEW_SECONDS") {
            let value: i64 = value_str.parse().map_err(|e| {
                ConfigError::InvalidJwtClockSkew(format!(
                    "JWT_CLOCK_SKEW_SECONDS must be a valid integer, got '{}': {}",
                    value_str, e
                ))
            })?;

            if value <= 0 {
                return Err(ConfigError::InvalidJwtClockSkew(format!(
                    "JWT_CLOCK_SKEW_SECONDS must be positive, got {}",
                    value
                )));
            }

            if value > MAX_CLOCK_SKEW.as_secs() as i64 {
                return Err(ConfigError::InvalidJwtClockSkew(format!(
                    "JWT_CLOCK_SKEW_SECONDS must not exceed {} seconds, got {}",
                    MAX_CLOCK_SKEW.as_secs(),
                    value
                )));
            }

            value
        } else {
            DEFAULT_CLOCK_SKEW.as_secs() as i64
        };

        let upstream_timeout_seconds: u64 = parse_var(
            vars,
            "UPSTREAM_TIMEOUT_SECONDS",
            DEFAULT_UPSTREAM_TIMEOUT_SECONDS,
        )?;
        if !(1..=MAX_UPSTREAM_TIMEOUT_SECONDS).contains(&upstream_timeout_seconds) {
            return Err(invalid(
                "UPSTREAM_TIMEOUT_SECONDS",
                &format!(
                    "must be between 1 and {}, got {}",
                    MAX_UPSTREAM_TIMEOUT_SECONDS, upstream_timeout_seconds
                ),
            ));
        }

        Ok(Config {
            bind_address,
            backend_url,
            gateway_issuer,
            keys_dir,
            max_keys,
            key_rotation_interval_seconds,
            upstream_issuer,
            upstream_jwks_url,
            upstream_audience,
            upstream_algorithms,
            enforcement_mode,
            downstream_audience,
            default_tenant,
            exchange_token_ttl_seconds,
            sts_token_ttl_seconds,
            jwks_cache_ttl_seconds,
            jwks_fetch_timeout_seconds,
            jwks_refresh_per_minute,
            jwt_clock_skew_seconds,
            upstream_timeout_seconds,
        })
    }
}

/// Parse a list of inbound signature algorithms.
///
/// Only the RSA family is accepted since remote keys are resolved from RSA
/// JWK parameters. Blank entries are ignored; an empty result is an error.
pub fn parse_algorithms<'a, I>(names: I) -> Result<Vec<Algorithm>, ConfigError>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut algorithms = Vec::new();

    for name in names.into_iter().map(str::trim).filter(|n| !n.is_empty()) {
        let algorithm = Algorithm::from_str(name)
            .map_err(|_| ConfigError::InvalidAlgorithms(format!("unknown algorithm '{}'", name)))?;

        if !is_rsa_family(algorithm) {
            return Err(ConfigError::InvalidAlgorithms(format!(
                "'{}' is not an RSA algorithm",
                name
            )));
        }

        if !algorithms.contains(&algorithm) {
            algorithms.push(algorithm);
        }
    }

    if algorithms.is_empty() {
        return Err(ConfigError::InvalidAlgorithms(
            "at least one algorithm is required".to_string(),
        ));
    }

    Ok(algorithms)
}

fn is_rsa_family(algorithm: Algorithm) -> bool {
    matches!(
        algorithm,
        Algorithm::RS256
            | Algorithm::RS384
            | Algorithm::RS512
            | Algorithm::PS256
            | Algorithm::PS384
            | Algorithm::PS512
    )
}

/// Check that `value` is an absolute http(s) URL.
pub fn validate_http_url(name: &str, value: &str) -> Result<(), ConfigError> {
    let url = reqwest::Url::parse(value).map_err(|e| ConfigError::InvalidUrl {
        name: name.to_string(),
        reason: e.to_string(),
    })?;

    if !matches!(url.scheme(), "http" | "https") {
        return Err(ConfigError::InvalidUrl {
            name: name.to_string(),
            reason: format!("unsupported scheme '{}'", url.scheme()),
        });
    }

    Ok(())
}

fn invalid(name: &str, reason: &str) -> ConfigError {
    ConfigError::InvalidValue {
        name: name.to_string(),
        reason: reason.to_string(),
    }
}

fn string_var(vars: &HashMap<String, String>, name: &str, default: &str) -> String {
    vars.get(name)
        .cloned()
        .unwrap_or_else(|| default.to_string())
}

fn non_empty_var(
    vars: &HashMap<String, String>,
    name: &str,
    default: &str,
) -> Result<String, ConfigError> {
    let value = string_var(vars, name, default);
    if value.trim().is_empty() {
        return Err(invalid(name, "must not be empty"));
    }
    Ok(value)
}

fn parse_var<T>(vars: &HashMap<String, String>, name: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    match vars.get(name) {
        Some(value_str) => value_str.trim().parse().map_err(|e: T::Err| {
            invalid(
                name,
                &format!("must be a valid integer, got '{}': {}", value_str, e),
            )
        }),
        None => Ok(default),
    }
}
