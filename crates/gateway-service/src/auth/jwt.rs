//! Inbound JWT verification.
//!
//! # Security
//!
//! - Tokens are size-checked BEFORE parsing (via `common::jwt::peek_token`)
//! - The unverified header and payload only select the key and the expected
//!   issuer; the identity is built from the verified payload alone
//! - Only the configured RSA-family algorithms are accepted
//! - An unverified issuer that does not match is rejected before any fetch
//! - Expiration and issued-at claims are validated with clock skew tolerance

use crate::auth::claims::InboundClaims;
use crate::auth::jwks::RemoteKeyResolver;
use crate::crypto;
use crate::errors::{GatewayError, VerificationError};
use crate::models::{EnforcementConfig, VerifiedIdentity};
use crate::observability::metrics::record_token_verification;
use common::jwt::{peek_token, validate_iat, JwtValidationError};
use jsonwebtoken::errors::{Error as JwtError, ErrorKind};
use jsonwebtoken::{decode, Algorithm, Validation};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::instrument;

/// Validates bearer tokens issued by the configured upstream identity provider.
pub struct TokenVerifier {
    resolver: Arc<RemoteKeyResolver>,

    /// Clock skew tolerance for iat validation.
    clock_skew: Duration,
}

impl TokenVerifier {
    pub fn new(resolver: Arc<RemoteKeyResolver>, clock_skew: Duration) -> Self {
        Self {
            resolver,
            clock_skew,
        }
    }

    pub fn resolver(&self) -> &Arc<RemoteKeyResolver> {
        &self.resolver
    }

    /// Verify `token` against `config`.
    ///
    /// # Security Checks
    ///
    /// 1. Structure: size, three segments, header with `alg` and `kid`
    /// 2. Header `alg` is one of the configured algorithms
    /// 3. Unverified `iss` names the configured issuer
    /// 4. Key `kid` is published at the configured discovery URI
    /// 5. Signature, `exp`, `iss` and `aud` on the verified payload
    /// 6. `iat`, if present, is not too far in the future
    #[instrument(skip_all)]
    pub async fn verify(
        &self,
        token: &str,
        config: &EnforcementConfig,
    ) -> Result<VerifiedIdentity, VerificationError> {
        let result = self.verify_token(token, config).await;

        match &result {
            Ok(_) => {
                record_token_verification("success", None);
                tracing::debug!(target: "gateway.auth.jwt", "Token validated successfully");
            }
            Err(e) => {
                record_token_verification("error", Some(e.code()));
                tracing::debug!(target: "gateway.auth.jwt", reason = e.code(), "Token rejected");
            }
        }

        result
    }

    async fn verify_token(
        &self,
        token: &str,
        config: &EnforcementConfig,
    ) -> Result<VerifiedIdentity, VerificationError> {
        let peek = peek_token(token).map_err(|e| match e {
            JwtValidationError::MissingKid => VerificationError::UnknownKey,
            _ => VerificationError::MalformedToken,
        })?;

        let algorithm =
            Algorithm::from_str(&peek.alg).map_err(|_| VerificationError::MalformedToken)?;
        if !config.algorithms.contains(&algorithm) {
            tracing::debug!(target: "gateway.auth.jwt", alg = %peek.alg, "Token algorithm not accepted");
            return Err(VerificationError::SignatureInvalid);
        }

        if peek.issuer.as_deref() != Some(config.issuer.as_str()) {
            return Err(VerificationError::IssuerMismatch);
        }

        let jwk = self
            .resolver
            .resolve(&config.jwks_uri, &peek.kid)
            .await
            .map_err(|e| {
                if matches!(e, GatewayError::RemoteFetchFailure(_)) {
                    tracing::warn!(target: "gateway.auth.jwt", kid = %peek.kid, error = %e, "Key discovery failed");
                }
                VerificationError::UnknownKey
            })?;

        if let Some(alg) = jwk.alg.as_deref() {
            if alg != peek.alg {
                tracing::warn!(target: "gateway.auth.jwt", kid = %peek.kid, jwk_alg = %alg, "Token algorithm differs from published key");
                return Err(VerificationError::SignatureInvalid);
            }
        }

        let (n, e) = jwk.rsa_components().ok_or_else(|| {
            tracing::warn!(target: "gateway.auth.jwt", kid = %peek.kid, kty = %jwk.kty, "Published key is not a usable RSA key");
            VerificationError::UnknownKey
        })?;
        let decoding_key = crypto::decoding_key_from_components(n, e).map_err(|err| {
            tracing::warn!(target: "gateway.auth.jwt", kid = %peek.kid, error = %err, "Invalid published key");
            VerificationError::UnknownKey
        })?;

        let mut validation = Validation::new(algorithm);
        validation.algorithms = config.algorithms.clone();
        validation.set_issuer(&[config.issuer.as_str()]);
        validation.set_audience(&[config.audience.as_str()]);
        validation.set_required_spec_claims(&["exp", "iss", "aud"]);

        let claims = decode::<InboundClaims>(token, &decoding_key, &validation)
            .map_err(|err| classify_decode_error(&err))?
            .claims;

        if let Some(iat) = claims.iat {
            validate_iat(iat, self.clock_skew).map_err(|_| VerificationError::Expired)?;
        }

        Ok(VerifiedIdentity::from(claims))
    }
}

/// Map a `jsonwebtoken` failure onto the verification taxonomy.
pub(crate) fn classify_decode_error(err: &JwtError) -> VerificationError {
    match err.kind() {
        ErrorKind::ExpiredSignature | ErrorKind::ImmatureSignature => VerificationError::Expired,
        ErrorKind::InvalidIssuer => VerificationError::IssuerMismatch,
        ErrorKind::InvalidAudience => VerificationError::AudienceMismatch,
        ErrorKind::MissingRequiredClaim(claim) => match claim.as_str() {
            "iss" => VerificationError::IssuerMismatch,
            "aud" => VerificationError::AudienceMismatch,
            _ => VerificationError::MalformedToken,
        },
        ErrorKind::InvalidSignature
        | ErrorKind::InvalidAlgorithm
        | ErrorKind::InvalidRsaKey(_)
        | ErrorKind::InvalidKeyFormat
        | ErrorKind::Crypto(_) => VerificationError::SignatureInvalid,
        _ => VerificationError::MalformedToken,
    }
}
