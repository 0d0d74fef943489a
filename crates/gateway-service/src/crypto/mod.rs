//! RSA key material and JWS primitives for gateway-minted tokens.

use crate::errors::GatewayError;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use common::secret::{ExposeSecret, SecretString};
use jsonwebtoken::{encode, Algorithm, DecodingKey, EncodingKey, Header};
use rsa::pkcs8::{DecodePublicKey, EncodePrivateKey, EncodePublicKey, LineEnding};
use rsa::traits::PublicKeyParts;
use rsa::{RsaPrivateKey, RsaPublicKey};
use serde::Serialize;
use std::fmt;
use tracing::instrument;

/// Modulus size for generated signing keys.
pub const RSA_KEY_BITS: usize = 2048;

/// The only scheme the gateway signs with.
pub const SIGNING_ALGORITHM: Algorithm = Algorithm::RS256;

/// Name of [`SIGNING_ALGORITHM`] as written in registries and JWKs.
pub const SIGNING_ALGORITHM_NAME: &str = "RS256";

/// Freshly generated RSA keypair in PEM form.
pub struct GeneratedKeyPair {
    /// PKCS#8 private key PEM.
    pub private_key_pem: SecretString,

    /// SPKI public key PEM.
    pub public_key_pem: String,
}

impl fmt::Debug for GeneratedKeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GeneratedKeyPair")
            .field("private_key_pem", &"[REDACTED]")
            .field("public_key_pem", &self.public_key_pem)
            .finish()
    }
}

/// Public RSA parameters as published in a JWK.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RsaPublicParams {
    /// Modulus, base64url without padding.
    pub n: String,

    /// Exponent, base64url without padding.
    pub e: String,
}

/// Generate an RSA signing keypair using the OS CSPRNG.
///
/// CPU-heavy; async callers run it on the blocking pool.
#[instrument(skip_all)]
pub fn generate_signing_key() -> Result<GeneratedKeyPair, GatewayError> {
    let mut rng = rand::rngs::OsRng;

    let private_key = RsaPrivateKey::new(&mut rng, RSA_KEY_BITS)
        .map_err(|e| GatewayError::Crypto(format!("Keypair generation failed: {}", e)))?;
    let public_key = RsaPublicKey::from(&private_key);

    let private_key_pem = private_key
        .to_pkcs8_pem(LineEnding::LF)
        .map_err(|e| GatewayError::Crypto(format!("Private key encoding failed: {}", e)))?;

    let public_key_pem = public_key
        .to_public_key_pem(LineEnding::LF)
        .map_err(|e| GatewayError::Crypto(format!("Public key encoding failed: {}", e)))?;

    Ok(GeneratedKeyPair {
        private_key_pem: SecretString::from(private_key_pem.as_str().to_owned()),
        public_key_pem,
    })
}

/// Extract the JWK `n`/`e` parameters from an SPKI public key PEM.
pub fn public_params(public_key_pem: &str) -> Result<RsaPublicParams, GatewayError> {
    let public_key = RsaPublicKey::from_public_key_pem(public_key_pem)
        .map_err(|e| GatewayError::Crypto(format!("Invalid public key PEM: {}", e)))?;

    Ok(RsaPublicParams {
        n: URL_SAFE_NO_PAD.encode(public_key.n().to_bytes_be()),
        e: URL_SAFE_NO_PAD.encode(public_key.e().to_bytes_be()),
    })
}

/// Sign claims as an RS256 JWS with `kid` in the protected header.
#[instrument(skip_all)]
pub fn sign_jwt<C: Serialize>(
    claims: &C,
    private_key_pem: &SecretString,
    key_id: &str,
) -> Result<String, GatewayError> {
    let encoding_key = EncodingKey::from_rsa_pem(private_key_pem.expose_secret().as_bytes())
        .map_err(|e| GatewayError::Crypto(format!("Invalid private key format: {}", e)))?;

    let mut header = Header::new(SIGNING_ALGORITHM);
    header.typ = Some("JWT".to_string());
    header.kid = Some(key_id.to_string());

    encode(&header, claims, &encoding_key)
        .map_err(|e| GatewayError::Crypto(format!("JWT signing operation failed: {}", e)))
}

/// Verification key from an SPKI public key PEM.
pub fn decoding_key_from_pem(public_key_pem: &str) -> Result<DecodingKey, GatewayError> {
    DecodingKey::from_rsa_pem(public_key_pem.as_bytes())
        .map_err(|e| GatewayError::Crypto(format!("Invalid public key PEM: {}", e)))
}

/// Verification key from base64url JWK components.
pub fn decoding_key_from_components(n: &str, e: &str) -> Result<DecodingKey, GatewayError> {
    DecodingKey::from_rsa_components(n, e)
        .map_err(|err| GatewayError::Crypto(format!("Invalid RSA key components: {}", err)))
}
