//! Token exchange.
//!
//! Translates a verified inbound identity into a short-lived token for the
//! downstream service. The claims are built from scratch: nothing from the
//! inbound token is copied except the values named below.

use crate::config::MAX_EXCHANGE_TOKEN_TTL_SECONDS;
use crate::errors::GatewayError;
use crate::models::{ExchangeDecision, VerifiedIdentity};
use crate::observability::hash_for_correlation;
use crate::observability::metrics::record_token_issuance;
use crate::services::token_service::{SignOptions, TokenSigner};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tracing::instrument;

/// Version of the exchanged token claims contract.
pub const CONTRACT_SCHEMA_VERSION: &str = "1.0.0";

/// Authorization context embedded under `ctx`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorizationContext {
    pub schema_ver: String,
    pub decision_id: String,
    pub policy_version: String,
    /// Unix seconds.
    pub enforced_at: i64,
}

/// Claims of an exchanged token as the downstream service sees them.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExchangedClaims {
    pub iss: String,
    pub iat: i64,
    pub exp: i64,
    pub jti: String,
    pub sub: String,
    pub aud: String,
    pub ten: String,
    pub ctx: AuthorizationContext,
}

impl fmt::Debug for ExchangedClaims {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExchangedClaims")
            .field("iss", &self.iss)
            .field("iat", &self.iat)
            .field("exp", &self.exp)
            .field("jti", &self.jti)
            .field("sub", &"[REDACTED]")
            .field("aud", &self.aud)
            .field("ten", &self.ten)
            .field("ctx", &self.ctx)
            .finish()
    }
}

/// Claims the exchanger supplies; the signer adds `iss`, `iat` and `exp`.
#[derive(Serialize)]
struct ExchangePayload<'a> {
    jti: String,
    sub: &'a str,
    aud: &'a str,
    ten: &'a str,
    ctx: AuthorizationContext,
}

/// Mints downstream-scoped tokens.
pub struct TokenExchanger {
    signer: Arc<TokenSigner>,
    audience: String,
    default_tenant: String,
    ttl_seconds: i64,
}

impl TokenExchanger {
    /// `ttl_seconds` is clamped to `1..=60`.
    pub fn new(
        signer: Arc<TokenSigner>,
        audience: impl Into<String>,
        default_tenant: impl Into<String>,
        ttl_seconds: i64,
    ) -> Self {
        Self {
            signer,
            audience: audience.into(),
            default_tenant: default_tenant.into(),
            ttl_seconds: ttl_seconds.clamp(1, MAX_EXCHANGE_TOKEN_TTL_SECONDS),
        }
    }

    pub fn ttl_seconds(&self) -> i64 {
        self.ttl_seconds
    }

    /// Mint a token for `identity` carrying `decision` as its authorization context.
    #[instrument(skip_all)]
    pub async fn exchange(
        &self,
        identity: &VerifiedIdentity,
        decision: &ExchangeDecision,
    ) -> Result<String, GatewayError> {
        let start = Instant::now();

        let payload = ExchangePayload {
            jti: uuid::Uuid::new_v4().to_string(),
            sub: identity.subject(),
            aud: &self.audience,
            ten: identity.tenant.as_deref().unwrap_or(&self.default_tenant),
            ctx: AuthorizationContext {
                schema_ver: CONTRACT_SCHEMA_VERSION.to_string(),
                decision_id: decision.decision_id.clone(),
                policy_version: decision.policy_version.clone(),
                enforced_at: decision.enforced_at.timestamp(),
            },
        };

        let options = SignOptions {
            issuer: None,
            expires_in: Some(self.ttl_seconds),
        };

        match self.signer.sign(&payload, &options).await {
            Ok(issued) => {
                record_token_issuance("exchange", "success", start.elapsed());
                tracing::info!(
                    target: "gateway.exchange",
                    user = %hash_for_correlation(payload.sub),
                    tenant = %payload.ten,
                    decision_id = %payload.ctx.decision_id,
                    schema_ver = CONTRACT_SCHEMA_VERSION,
                    ttl_seconds = self.ttl_seconds,
                    kid = %issued.kid,
                    "Token exchanged"
                );
                Ok(issued.token)
            }
            Err(e) => {
                record_token_issuance("exchange", "error", start.elapsed());
                tracing::error!(target: "gateway.exchange", error = %e, "Token exchange failed");
                Err(e)
            }
        }
    }
}
