//! Gateway token signing.
//!
//! [`TokenSigner`] is the only component that mints gateway tokens. It always
//! signs with the key store's current key and puts that key's `kid` in the
//! protected header. The registered claims `iss`, `iat` and `exp` are set
//! here and replace any same-named values in the caller's claims.

use crate::auth::jwt::classify_decode_error;
use crate::crypto::{self, SIGNING_ALGORITHM};
use crate::errors::{GatewayError, VerificationError};
use crate::services::key_management_service::KeyStore;
use chrono::Utc;
use common::jwt::extract_kid;
use jsonwebtoken::{decode, Validation};
use serde::Serialize;
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::instrument;

/// Per-call overrides for the registered claims.
#[derive(Debug, Clone, Default)]
pub struct SignOptions {
    /// Issuer; the signer's own issuer when `None`.
    pub issuer: Option<String>,

    /// Lifetime in seconds; the signer's default when `None`.
    pub expires_in: Option<i64>,
}

/// A freshly signed token.
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub token: String,
    pub kid: String,
    pub issued_at: i64,
    pub expires_at: i64,
}

impl IssuedToken {
    pub fn expires_in(&self) -> i64 {
        self.expires_at - self.issued_at
    }
}

/// Signs outbound tokens with the gateway's current key.
pub struct TokenSigner {
    key_store: Arc<KeyStore>,
    issuer: String,
    default_ttl_seconds: i64,
}

impl TokenSigner {
    pub fn new(key_store: Arc<KeyStore>, issuer: impl Into<String>, default_ttl_seconds: i64) -> Self {
        Self {
            key_store,
            issuer: issuer.into(),
            default_ttl_seconds,
        }
    }

    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    pub fn key_store(&self) -> &Arc<KeyStore> {
        &self.key_store
    }

    /// Sign `claims`, which must serialize to a JSON object.
    ///
    /// Only suspends when no current key exists yet and one has to be
    /// generated.
    #[instrument(skip_all)]
    pub async fn sign<C: Serialize>(
        &self,
        claims: &C,
        options: &SignOptions,
    ) -> Result<IssuedToken, GatewayError> {
        let mut payload = match serde_json::to_value(claims) {
            Ok(Value::Object(map)) => map,
            Ok(_) => {
                return Err(GatewayError::Crypto(
                    "Token claims must be a JSON object".to_string(),
                ))
            }
            Err(e) => {
                return Err(GatewayError::Crypto(format!(
                    "Failed to encode token claims: {}",
                    e
                )))
            }
        };

        let key = self.key_store.current_key().await?;

        let issued_at = Utc::now().timestamp();
        let expires_at = issued_at + options.expires_in.unwrap_or(self.default_ttl_seconds);
        let issuer = options.issuer.as_deref().unwrap_or(&self.issuer);

        insert_registered_claims(&mut payload, issuer, issued_at, expires_at);

        let token = crypto::sign_jwt(&payload, &key.private_key_pem, &key.kid)?;

        tracing::debug!(
            target: "gateway.sts",
            kid = %key.kid,
            ttl_seconds = expires_at - issued_at,
            "Token signed"
        );

        Ok(IssuedToken {
            token,
            kid: key.kid.clone(),
            issued_at,
            expires_at,
        })
    }

    /// Verify a token this gateway minted, using the local key store.
    ///
    /// Any registered key verifies, active or not, until it is purged. The
    /// issuer must be this gateway's; the audience is not checked.
    #[instrument(skip_all)]
    pub fn verify_own(&self, token: &str) -> Result<Map<String, Value>, VerificationError> {
        let kid = extract_kid(token).map_err(|e| {
            tracing::debug!(target: "gateway.sts", error = ?e, "Gateway token kid extraction failed");
            VerificationError::MalformedToken
        })?;

        let public_key_pem = self.key_store.public_key(&kid).ok_or_else(|| {
            tracing::debug!(target: "gateway.sts", kid = %kid, "Gateway token signed by unknown key");
            VerificationError::UnknownKey
        })?;

        let decoding_key = crypto::decoding_key_from_pem(&public_key_pem).map_err(|e| {
            tracing::error!(target: "gateway.sts", kid = %kid, error = %e, "Stored public key unusable");
            VerificationError::UnknownKey
        })?;

        let mut validation = Validation::new(SIGNING_ALGORITHM);
        validation.set_issuer(&[self.issuer.as_str()]);
        validation.validate_aud = false;

        decode::<Map<String, Value>>(token, &decoding_key, &validation)
            .map(|data| data.claims)
            .map_err(|e| {
                let reason = classify_decode_error(&e);
                tracing::debug!(target: "gateway.sts", reason = reason.code(), "Gateway token rejected");
                reason
            })
    }
}

fn insert_registered_claims(
    payload: &mut Map<String, Value>,
    issuer: &str,
    issued_at: i64,
    expires_at: i64,
) {
    payload.insert("iss".to_string(), Value::from(issuer));
    payload.insert("iat".to_string(), Value::from(issued_at));
    payload.insert("exp".to_string(), Value::from(expires_at));
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use jsonwebtoken::decode_header;
    use serde_json::json;

    async fn signer(dir: &std::path::Path) -> TokenSigner {
        let store = Arc::new(KeyStore::open(dir, 3).await.unwrap());
        TokenSigner::new(store, "https://gateway.internal", 3600)
    }

    #[tokio::test]
    async fn test_sign_then_verify_own_recovers_claims() {
        let dir = tempfile::tempdir().unwrap();
        let signer = signer(dir.path()).await;

        let issued = signer
            .sign(&json!({"sub": "svc-a", "scope": "read", "team": "core"}), &SignOptions::default())
            .await
            .unwrap();
        let claims = signer.verify_own(&issued.token).unwrap();

        assert_eq!(claims["sub"], "svc-a");
        assert_eq!(claims["scope"], "read");
        assert_eq!(claims["team"], "core");
        assert_eq!(claims["iss"], "https://gateway.internal");
        assert_eq!(issued.expires_in(), 3600);
    }

    #[tokio::test]
    async fn test_sign_uses_current_kid() {
        let dir = tempfile::tempdir().unwrap();
        let signer = signer(dir.path()).await;

        let issued = signer.sign(&json!({"sub": "a"}), &SignOptions::default()).await.unwrap();
        let current = signer.key_store().current_key().await.unwrap();

        let header = decode_header(&issued.token).unwrap();
        assert_eq!(header.kid.as_deref(), Some(current.kid.as_str()));
        assert_eq!(issued.kid, current.kid);
    }

    #[tokio::test]
    async fn test_options_override_issuer_and_ttl() {
        let dir = tempfile::tempdir().unwrap();
        let signer = signer(dir.path()).await;

        let options = SignOptions {
            issuer: Some("https://other.internal".to_string()),
            expires_in: Some(60),
        };
        let issued = signer.sign(&json!({"sub": "a"}), &options).await.unwrap();

        assert_eq!(issued.expires_in(), 60);
        // Issuer differs from the signer's own, so local verification refuses it
        assert_eq!(
            signer.verify_own(&issued.token).unwrap_err(),
            VerificationError::IssuerMismatch
        );
    }

    #[tokio::test]
    async fn test_caller_cannot_override_registered_claims() {
        let dir = tempfile::tempdir().unwrap();
        let signer = signer(dir.path()).await;

        let issued = signer
            .sign(
                &json!({"sub": "a", "iss": "evil", "exp": 9_999_999_999_i64}),
                &SignOptions::default(),
            )
            .await
            .unwrap();
        let claims = signer.verify_own(&issued.token).unwrap();

        assert_eq!(claims["iss"], "https://gateway.internal");
        assert_eq!(claims["exp"], issued.expires_at);
    }

    #[tokio::test]
    async fn test_sign_rejects_non_object_claims() {
        let dir = tempfile::tempdir().unwrap();
        let signer = signer(dir.path()).await;

        let result = signer.sign(&json!(["not", "an", "object"]), &SignOptions::default()).await;
        assert!(matches!(result, Err(GatewayError::Crypto(_))));
    }

    #[tokio::test]
    async fn test_verify_own_after_rotation() {
        let dir = tempfile::tempdir().unwrap();
        let signer = signer(dir.path()).await;

        let issued = signer.sign(&json!({"sub": "a"}), &SignOptions::default()).await.unwrap();
        signer.key_store().rotate().await.unwrap();

        assert!(signer.verify_own(&issued.token).is_ok());
    }

    #[tokio::test]
    async fn test_verify_own_rejects_expired() {
        let dir = tempfile::tempdir().unwrap();
        let signer = signer(dir.path()).await;

        let options = SignOptions {
            issuer: None,
            expires_in: Some(-3600),
        };
        let issued = signer.sign(&json!({"sub": "a"}), &options).await.unwrap();

        assert_eq!(
            signer.verify_own(&issued.token).unwrap_err(),
            VerificationError::Expired
        );
    }

    #[tokio::test]
    async fn test_verify_own_unknown_kid() {
        let dir = tempfile::tempdir().unwrap();
        let signer = signer(dir.path()).await;
        let issued = signer.sign(&json!({"sub": "a"}), &SignOptions::default()).await.unwrap();

        // Same token checked against a store that never held the key
        let other_dir = tempfile::tempdir().unwrap();
        let other = self::signer(other_dir.path()).await;

        assert_eq!(
            other.verify_own(&issued.token).unwrap_err(),
            VerificationError::UnknownKey
        );
    }

    #[tokio::test]
    async fn test_verify_own_malformed() {
        let dir = tempfile::tempdir().unwrap();
        let signer = signer(dir.path()).await;

        assert_eq!(
            signer.verify_own("garbage").unwrap_err(),
            VerificationError::MalformedToken
        );
    }
}
