//! Runtime-mutable gateway settings.
//!
//! Seeded from [`Config`] at startup and changed afterwards only through
//! the admin endpoints. Every update is validated in full before the new
//! snapshot is swapped in, so a rejected update changes nothing.

use crate::config::{parse_algorithms, validate_http_url, Config};
use crate::errors::GatewayError;
use crate::models::{EnforcementConfig, EnforcementMode};
use common::snapshot::Snapshot;
use serde::Deserialize;
use std::sync::Arc;

/// Partial update of the inbound token settings. Absent fields are kept.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifierConfigUpdate {
    pub issuer: Option<String>,
    pub jwks_uri: Option<String>,
    pub audience: Option<String>,
    pub algorithms: Option<Vec<String>>,
}

/// Result of an applied verifier update.
#[derive(Debug, Clone)]
pub struct AppliedUpdate {
    pub config: Arc<EnforcementConfig>,

    /// Discovery URI that was replaced, if it changed.
    pub replaced_jwks_uri: Option<String>,
}

/// Holder of the current [`EnforcementConfig`].
#[derive(Debug)]
pub struct EnforcementStore {
    current: Snapshot<EnforcementConfig>,
}

impl EnforcementStore {
    pub fn new(config: EnforcementConfig) -> Self {
        Self {
            current: Snapshot::new(config),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(EnforcementConfig {
            enforcement_mode: config.enforcement_mode,
            issuer: config.upstream_issuer.clone(),
            jwks_uri: config.upstream_jwks_url.clone(),
            audience: config.upstream_audience.clone(),
            algorithms: config.upstream_algorithms.clone(),
        })
    }

    pub fn load(&self) -> Arc<EnforcementConfig> {
        self.current.load()
    }

    pub fn set_mode(&self, mode: EnforcementMode) -> Arc<EnforcementConfig> {
        let previous = self.current.load().enforcement_mode;
        let next = self.current.update(|current| EnforcementConfig {
            enforcement_mode: mode,
            ..current.clone()
        });

        tracing::info!(
            target: "gateway.admin",
            previous = %previous,
            enforcement_mode = %mode,
            "Enforcement mode updated"
        );
        next
    }

    /// Merge `update` into the current settings.
    pub fn apply(&self, update: VerifierConfigUpdate) -> Result<AppliedUpdate, GatewayError> {
        let issuer = update.issuer.map(|v| non_empty("issuer", v)).transpose()?;
        let audience = update
            .audience
            .map(|v| non_empty("audience", v))
            .transpose()?;
        let jwks_uri = update
            .jwks_uri
            .map(|v| validate_http_url("jwksUri", &v).map(|()| v))
            .transpose()
            .map_err(|e| GatewayError::ConfigValidation(e.to_string()))?;
        let algorithms = update
            .algorithms
            .map(|names| parse_algorithms(names.iter().map(String::as_str)))
            .transpose()
            .map_err(|e| GatewayError::ConfigValidation(e.to_string()))?;

        let mut replaced_jwks_uri = None;
        let config = self.current.update(|current| {
            let mut next = current.clone();
            if let Some(issuer) = issuer {
                next.issuer = issuer;
            }
            if let Some(audience) = audience {
                next.audience = audience;
            }
            if let Some(algorithms) = algorithms {
                next.algorithms = algorithms;
            }
            if let Some(jwks_uri) = jwks_uri {
                if jwks_uri != current.jwks_uri {
                    replaced_jwks_uri = Some(current.jwks_uri.clone());
                }
                next.jwks_uri = jwks_uri;
            }
            next
        });

        tracing::info!(
            target: "gateway.admin",
            issuer = %config.issuer,
            jwks_uri = %config.jwks_uri,
            audience = %config.audience,
            algorithms = ?config.algorithms,
            "Verifier configuration updated"
        );

        Ok(AppliedUpdate {
            config,
            replaced_jwks_uri,
        })
    }
}

fn non_empty(field: &str, value: String) -> Result<String, GatewayError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(GatewayError::ConfigValidation(format!(
            "{} must not be empty",
            field
        )));
    }
    Ok(trimmed.to_string())
}

/// Base URL requests are forwarded to.
#[derive(Debug)]
pub struct BackendTarget {
    url: Snapshot<String>,
}

impl BackendTarget {
    /// Caller guarantees `url` is valid; startup config is validated.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: Snapshot::new(url.into()),
        }
    }

    pub fn load(&self) -> Arc<String> {
        self.url.load()
    }

    /// Replace the target after checking it is an absolute http(s) URL.
    pub fn set(&self, url: &str) -> Result<Arc<String>, GatewayError> {
        validate_http_url("backendUrl", url)
            .map_err(|_| GatewayError::ConfigValidation("Invalid URL format".to_string()))?;

        self.url.store(url.to_string());
        tracing::info!(target: "gateway.admin", backend_url = %url, "Backend target updated");
        Ok(self.url.load())
    }
}
