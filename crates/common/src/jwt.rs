//! JWT utilities shared by the gateway components.
//!
//! Everything here runs before a signature is checked: the size cap, the
//! structural "peek" that picks a verification key, and the `iat` bound
//! applied after verification.
//!
//! # Security
//!
//! - The size cap is applied before any decoding
//! - Nothing returned by [`peek_token`] is trusted. The values only select
//!   the key and the expected issuer; the caller must verify the signature
//!   and base every decision on the verified payload.
//! - All error variants share one client-facing message
//!
//! # Usage
//!
//! ```rust,ignore
//! use common::jwt::{peek_token, validate_iat, DEFAULT_CLOCK_SKEW};
//!
//! let peek = peek_token(token)?;
//! let jwk = resolver.resolve(&jwks_uri, &peek.kid).await?;
//! // ... verify signature with jwk, then:
//! validate_iat(claims.iat, DEFAULT_CLOCK_SKEW)?;
//! ```

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use std::time::Duration;
use thiserror::Error;

// =============================================================================
// Constants
// =============================================================================

/// Upper bound on a compact JWS, checked before decoding.
///
/// An RS256 token with a typical claim set is well under 1KB.
pub const MAX_JWT_SIZE_BYTES: usize = 8192;

/// How far in the future an `iat` may be before the token is rejected.
pub const DEFAULT_CLOCK_SKEW: Duration = Duration::from_secs(300);

/// Largest configurable clock skew.
pub const MAX_CLOCK_SKEW: Duration = Duration::from_secs(600);

// =============================================================================
// Error Types
// =============================================================================

/// Pre-verification failures.
///
/// The Display text is the same for every variant; specifics go to debug logs.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum JwtValidationError {
    /// Larger than [`MAX_JWT_SIZE_BYTES`].
    #[error("The access token is invalid or expired")]
    TokenTooLarge,

    /// Not three base64url JSON segments.
    #[error("The access token is invalid or expired")]
    MalformedToken,

    /// No usable `kid` in the protected header.
    #[error("The access token is invalid or expired")]
    MissingKid,

    /// `iat` beyond `now + clock_skew`.
    #[error("The access token is invalid or expired")]
    IatTooFarInFuture,
}

// =============================================================================
// Peek Types
// =============================================================================

/// Unverified view of a compact JWS.
///
/// Produced by [`peek_token`]. Every field comes from attacker-controlled
/// input and may only be used to pick a verification key and the expected
/// issuer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenPeek {
    /// Key ID from the protected header.
    pub kid: String,

    /// Algorithm name from the protected header (e.g. "RS256").
    pub alg: String,

    /// `iss` claim from the unverified payload, if present and a string.
    pub issuer: Option<String>,
}

// =============================================================================
// Functions
// =============================================================================

/// Split a compact JWS into its three segments, checking size first.
fn split_token(token: &str) -> Result<(&str, &str, &str), JwtValidationError> {
    if token.len() > MAX_JWT_SIZE_BYTES {
        tracing::debug!(
            target: "common.jwt",
            token_size = token.len(),
            max_size = MAX_JWT_SIZE_BYTES,
            "Token rejected: size exceeds maximum allowed"
        );
        return Err(JwtValidationError::TokenTooLarge);
    }

    let mut parts = token.split('.');
    let (Some(header), Some(payload), Some(signature), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        tracing::debug!(target: "common.jwt", "Token rejected: invalid JWT format");
        return Err(JwtValidationError::MalformedToken);
    };

    Ok((header, payload, signature))
}

/// Decode one base64url segment into a JSON value.
fn decode_segment(segment: &str, name: &'static str) -> Result<serde_json::Value, JwtValidationError> {
    let bytes = URL_SAFE_NO_PAD.decode(segment).map_err(|e| {
        tracing::debug!(target: "common.jwt", segment = name, error = %e, "Failed to decode JWT segment base64");
        JwtValidationError::MalformedToken
    })?;

    serde_json::from_slice(&bytes).map_err(|e| {
        tracing::debug!(target: "common.jwt", segment = name, error = %e, "Failed to parse JWT segment JSON");
        JwtValidationError::MalformedToken
    })
}

/// Extract the `kid` value from a decoded header, rejecting empty values.
fn header_kid(header: &serde_json::Value) -> Result<String, JwtValidationError> {
    header
        .get("kid")
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .map(ToString::to_string)
        .ok_or(JwtValidationError::MissingKid)
}

/// Header `kid` of a token the gateway minted itself, unverified.
///
/// The key is then looked up in the local key store rather than a remote
/// discovery document.
///
/// # Errors
///
/// `TokenTooLarge`, `MalformedToken` for a bad structure or encoding, and
/// `MissingKid` when `kid` is absent, empty, or not a string.
pub fn extract_kid(token: &str) -> Result<String, JwtValidationError> {
    let (header, _, _) = split_token(token)?;
    let header = decode_segment(header, "header")?;
    header_kid(&header)
}

/// Parse a compact JWS far enough to select its verification key.
///
/// Checks, in order: size, three non-empty segments, header JSON with a
/// string `alg` and non-empty `kid`, and a payload that is a JSON object.
///
/// # Security
///
/// The signature is NOT checked. See [`TokenPeek`].
///
/// # Errors
///
/// Same variants as [`extract_kid`]. An empty signature segment or a payload
/// that is not a JSON object is `MalformedToken`.
pub fn peek_token(token: &str) -> Result<TokenPeek, JwtValidationError> {
    let (header_b64, payload_b64, signature_b64) = split_token(token)?;

    if header_b64.is_empty() || payload_b64.is_empty() || signature_b64.is_empty() {
        tracing::debug!(target: "common.jwt", "Token rejected: empty JWT segment");
        return Err(JwtValidationError::MalformedToken);
    }

    let header = decode_segment(header_b64, "header")?;
    let alg = header
        .get("alg")
        .and_then(|v| v.as_str())
        .map(ToString::to_string)
        .ok_or(JwtValidationError::MalformedToken)?;
    let kid = header_kid(&header)?;

    let payload = decode_segment(payload_b64, "payload")?;
    let payload = payload.as_object().ok_or_else(|| {
        tracing::debug!(target: "common.jwt", "Token rejected: payload is not a JSON object");
        JwtValidationError::MalformedToken
    })?;

    let issuer = payload
        .get("iss")
        .and_then(|v| v.as_str())
        .map(ToString::to_string);

    Ok(TokenPeek { kid, alg, issuer })
}

/// Reject an `iat` more than `clock_skew` ahead of the local clock.
///
/// # Errors
///
/// `IatTooFarInFuture`.
pub fn validate_iat(iat: i64, clock_skew: Duration) -> Result<(), JwtValidationError> {
    let now = chrono::Utc::now().timestamp();
    validate_iat_at(iat, clock_skew, now)
}

/// Deterministic `iat` validation against an explicit `now` timestamp.
pub(crate) fn validate_iat_at(
    iat: i64,
    clock_skew: Duration,
    now: i64,
) -> Result<(), JwtValidationError> {
    // Bounded by MAX_CLOCK_SKEW
    #[allow(clippy::cast_possible_wrap)]
    let clock_skew_secs = clock_skew.as_secs() as i64;
    let max_iat = now + clock_skew_secs;

    if iat > max_iat {
        tracing::debug!(
            target: "common.jwt",
            iat = iat,
            now = now,
            max_allowed = max_iat,
            clock_skew_secs = clock_skew_secs,
            "Token rejected: iat too far in the future"
        );
        return Err(JwtValidationError::IatTooFarInFuture);
    }

    Ok(())
}

// =============================================================================
// Tests
// =============================================================================
