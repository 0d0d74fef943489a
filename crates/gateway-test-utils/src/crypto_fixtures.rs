//! Identity provider key fixtures.
//!
//! RSA key generation is slow, so each fixture key is generated once per
//! test binary and shared. Tests that need an independent signer (for
//! example a forged token) use [`rogue_idp_key`], which is never published.

use common::jwks::{Jwk, JwkSet};
use gateway_service::crypto::{self, GeneratedKeyPair};
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde::Serialize;
use std::sync::OnceLock;
use thiserror::Error;

/// Key ID the mock IdP publishes first.
pub const PRIMARY_IDP_KID: &str = "idp-key-1";

/// Key ID the mock IdP publishes after a simulated rotation.
pub const SECONDARY_IDP_KID: &str = "idp-key-2";

#[derive(Debug, Error)]
pub enum FixtureError {
    #[error("Key generation failed: {0}")]
    KeyGeneration(String),

    #[error("Public key encoding failed: {0}")]
    PublicKey(String),

    #[error("Signing failed: {0}")]
    Signing(String),
}

/// An upstream signing key with its published key ID.
pub struct TestSigningKey {
    pub kid: &'static str,
    pub pair: GeneratedKeyPair,
}

impl TestSigningKey {
    fn generate(kid: &'static str) -> Self {
        let pair = crypto::generate_signing_key().expect("IdP key generation should succeed");
        Self { kid, pair }
    }

    /// JWK for this key as the IdP publishes it.
    pub fn jwk(&self) -> Result<Jwk, FixtureError> {
        let params = crypto::public_params(&self.pair.public_key_pem)
            .map_err(|e| FixtureError::PublicKey(e.to_string()))?;
        Ok(Jwk::rsa_signing(self.kid, params.n, params.e))
    }

    /// Sign `claims` as RS256 with this key's `kid`.
    pub fn sign<C: Serialize>(&self, claims: &C) -> Result<String, FixtureError> {
        crypto::sign_jwt(claims, &self.pair.private_key_pem, self.kid)
            .map_err(|e| FixtureError::Signing(e.to_string()))
    }

    /// Sign `claims` with an explicit algorithm and optional `kid` header.
    pub fn sign_with<C: Serialize>(
        &self,
        claims: &C,
        algorithm: Algorithm,
        kid: Option<&str>,
    ) -> Result<String, FixtureError> {
        use common::secret::ExposeSecret;

        let encoding_key =
            EncodingKey::from_rsa_pem(self.pair.private_key_pem.expose_secret().as_bytes())
                .map_err(|e| FixtureError::Signing(e.to_string()))?;

        let mut header = Header::new(algorithm);
        header.kid = kid.map(str::to_string);

        encode(&header, claims, &encoding_key).map_err(|e| FixtureError::Signing(e.to_string()))
    }
}

/// Key published by [`MockIdentityProvider`](crate::MockIdentityProvider) by default.
pub fn primary_idp_key() -> &'static TestSigningKey {
    static KEY: OnceLock<TestSigningKey> = OnceLock::new();
    KEY.get_or_init(|| TestSigningKey::generate(PRIMARY_IDP_KID))
}

/// Second IdP key, for simulating upstream rotation.
pub fn secondary_idp_key() -> &'static TestSigningKey {
    static KEY: OnceLock<TestSigningKey> = OnceLock::new();
    KEY.get_or_init(|| TestSigningKey::generate(SECONDARY_IDP_KID))
}

/// Key that claims the primary `kid` but is never published.
pub fn rogue_idp_key() -> &'static TestSigningKey {
    static KEY: OnceLock<TestSigningKey> = OnceLock::new();
    KEY.get_or_init(|| TestSigningKey::generate(PRIMARY_IDP_KID))
}

/// Key set containing `keys`, in order.
pub fn jwk_set(keys: &[&TestSigningKey]) -> Result<JwkSet, FixtureError> {
    let keys = keys
        .iter()
        .map(|key| key.jwk())
        .collect::<Result<Vec<_>, _>>()?;
    Ok(JwkSet { keys })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixture_keys_are_cached_and_distinct() {
        assert!(std::ptr::eq(primary_idp_key(), primary_idp_key()));
        assert_ne!(
            primary_idp_key().pair.public_key_pem,
            rogue_idp_key().pair.public_key_pem
        );
        assert_eq!(rogue_idp_key().kid, primary_idp_key().kid);
    }

    #[test]
    fn test_jwk_set_preserves_order() {
        let set = jwk_set(&[secondary_idp_key(), primary_idp_key()]).unwrap();

        assert_eq!(set.keys.len(), 2);
        assert_eq!(set.keys[0].kid, SECONDARY_IDP_KID);
        assert_eq!(set.keys[1].kid, PRIMARY_IDP_KID);
    }
}
