//! API gateway error types.
//!
//! All errors map to appropriate HTTP status codes via the `IntoResponse` impl.
//! Error messages returned to clients are intentionally generic to avoid
//! leaking internal details. Actual errors are logged server-side.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Generic message for every inbound token failure.
pub const INVALID_TOKEN_MESSAGE: &str = "The access token is invalid or expired";

/// Message returned for enforced policy denials.
pub const FORBIDDEN_MESSAGE: &str = "Access denied for this role";

/// Why an inbound bearer token was rejected.
///
/// These are per-request outcomes. Whether they reject the request is
/// decided by the enforcement mode, not here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum VerificationError {
    #[error("The access token is invalid or expired")]
    MalformedToken,

    #[error("The access token is invalid or expired")]
    UnknownKey,

    #[error("The access token is invalid or expired")]
    SignatureInvalid,

    #[error("The access token is invalid or expired")]
    IssuerMismatch,

    #[error("The access token is invalid or expired")]
    AudienceMismatch,

    #[error("The access token is invalid or expired")]
    Expired,
}

impl VerificationError {
    /// Stable reason code for logs, metrics, and the admin verify endpoint.
    pub fn code(&self) -> &'static str {
        match self {
            VerificationError::MalformedToken => "malformed_token",
            VerificationError::UnknownKey => "unknown_key",
            VerificationError::SignatureInvalid => "signature_invalid",
            VerificationError::IssuerMismatch => "issuer_mismatch",
            VerificationError::AudienceMismatch => "audience_mismatch",
            VerificationError::Expired => "expired",
        }
    }
}

/// API gateway error type.
///
/// Maps to appropriate HTTP status codes:
/// - Unauthorized: 401 Unauthorized (with `WWW-Authenticate`)
/// - PolicyDeny: 403 Forbidden
/// - ConfigValidation: 400 Bad Request
/// - UpstreamUnavailable: 502 Bad Gateway
/// - RemoteFetchFailure: 503 Service Unavailable
/// - KeyStorage, Crypto, Internal: 500 Internal Server Error
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Denied by policy {policy_id}")]
    PolicyDeny { policy_id: String },

    #[error("Remote key fetch failed: {0}")]
    RemoteFetchFailure(String),

    #[error("Invalid configuration: {0}")]
    ConfigValidation(String),

    #[error("Upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    #[error("Key storage error: {0}")]
    KeyStorage(String),

    #[error("Cryptographic error: {0}")]
    Crypto(String),

    #[error("Internal server error")]
    Internal,
}

impl GatewayError {
    /// Returns the HTTP status code for this error (for metrics recording).
    pub fn status_code(&self) -> u16 {
        match self {
            GatewayError::Unauthorized(_) => 401,
            GatewayError::PolicyDeny { .. } => 403,
            GatewayError::ConfigValidation(_) => 400,
            GatewayError::UpstreamUnavailable(_) => 502,
            GatewayError::RemoteFetchFailure(_) => 503,
            GatewayError::KeyStorage(_) | GatewayError::Crypto(_) | GatewayError::Internal => 500,
        }
    }
}

impl From<VerificationError> for GatewayError {
    fn from(_: VerificationError) -> Self {
        GatewayError::Unauthorized(INVALID_TOKEN_MESSAGE.to_string())
    }
}

impl From<std::io::Error> for GatewayError {
    fn from(err: std::io::Error) -> Self {
        GatewayError::KeyStorage(err.to_string())
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            GatewayError::Unauthorized(reason) => {
                (StatusCode::UNAUTHORIZED, "UNAUTHORIZED", reason.clone())
            }
            GatewayError::PolicyDeny { .. } => (
                StatusCode::FORBIDDEN,
                "FORBIDDEN",
                FORBIDDEN_MESSAGE.to_string(),
            ),
            GatewayError::ConfigValidation(reason) => {
                (StatusCode::BAD_REQUEST, "BAD_REQUEST", reason.clone())
            }
            GatewayError::UpstreamUnavailable(err) => {
                tracing::error!(target: "gateway.proxy", error = %err, "Upstream request failed");
                (
                    StatusCode::BAD_GATEWAY,
                    "BAD_GATEWAY",
                    "Bad Gateway".to_string(),
                )
            }
            GatewayError::RemoteFetchFailure(err) => {
                tracing::warn!(target: "gateway.auth.jwks", error = %err, "Remote key fetch failed");
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "SERVICE_UNAVAILABLE",
                    "Service temporarily unavailable".to_string(),
                )
            }
            GatewayError::KeyStorage(err) => {
                tracing::error!(target: "gateway.keys", error = %err, "Key storage operation failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "KEY_STORAGE_ERROR",
                    "An internal key storage error occurred".to_string(),
                )
            }
            GatewayError::Crypto(err) => {
                tracing::error!(target: "gateway.keys", error = %err, "Cryptographic operation failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "CRYPTO_ERROR",
                    "An internal cryptographic error occurred".to_string(),
                )
            }
            GatewayError::Internal => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                "An internal error occurred".to_string(),
            ),
        };

        let error_response = ErrorResponse {
            error: ErrorDetail {
                code: code.to_string(),
                message,
            },
        };

        let mut response = (status, Json(error_response)).into_response();

        // Add WWW-Authenticate header for 401 responses
        if status == StatusCode::UNAUTHORIZED {
            if let Ok(header_value) =
                "Bearer realm=\"api-gateway\", error=\"invalid_token\"".parse()
            {
                response
                    .headers_mut()
                    .insert("WWW-Authenticate", header_value);
            }
        }

        response
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use axum::body::Body;
    use http_body_util::BodyExt;

    async fn read_body_json(body: Body) -> serde_json::Value {
        let bytes = body.collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[test]
    fn test_verification_error_display_is_generic() {
        for err in [
            VerificationError::MalformedToken,
            VerificationError::UnknownKey,
            VerificationError::SignatureInvalid,
            VerificationError::IssuerMismatch,
            VerificationError::AudienceMismatch,
            VerificationError::Expired,
        ] {
            assert_eq!(err.to_string(), INVALID_TOKEN_MESSAGE);
        }
    }

    #[test]
    fn test_verification_error_codes() {
        assert_eq!(VerificationError::UnknownKey.code(), "unknown_key");
        assert_eq!(VerificationError::Expired.code(), "expired");
    }

    #[tokio::test]
    async fn test_unauthorized_has_www_authenticate() {
        let response = GatewayError::from(VerificationError::SignatureInvalid).into_response();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let header = response.headers().get("WWW-Authenticate").unwrap();
        assert!(header.to_str().unwrap().contains("invalid_token"));

        let body = read_body_json(response.into_body()).await;
        assert_eq!(body["error"]["code"], "UNAUTHORIZED");
        assert_eq!(body["error"]["message"], INVALID_TOKEN_MESSAGE);
    }

    #[tokio::test]
    async fn test_policy_deny_is_forbidden() {
        let response = GatewayError::PolicyDeny {
            policy_id: "orders-write".to_string(),
        }
        .into_response();

        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert!(response.headers().get("WWW-Authenticate").is_none());

        let body = read_body_json(response.into_body()).await;
        assert_eq!(body["error"]["message"], "Access denied for this role");
        // The policy id is not disclosed to the caller
        assert!(!body.to_string().contains("orders-write"));
    }

    #[tokio::test]
    async fn test_upstream_unavailable_hides_detail() {
        let response =
            GatewayError::UpstreamUnavailable("connection refused to 10.0.0.5".to_string())
                .into_response();

        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        let body = read_body_json(response.into_body()).await;
        assert_eq!(body["error"]["message"], "Bad Gateway");
        assert!(!body.to_string().contains("10.0.0.5"));
    }

    #[tokio::test]
    async fn test_key_storage_hides_detail() {
        let response =
            GatewayError::KeyStorage("permission denied: /keys/keys.json".to_string())
                .into_response();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = read_body_json(response.into_body()).await;
        assert_eq!(body["error"]["code"], "KEY_STORAGE_ERROR");
        assert!(!body.to_string().contains("/keys/keys.json"));
    }

    #[tokio::test]
    async fn test_config_validation_returns_reason() {
        let response =
            GatewayError::ConfigValidation("Invalid URL format".to_string()).into_response();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = read_body_json(response.into_body()).await;
        assert_eq!(body["error"]["message"], "Invalid URL format");
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(GatewayError::Unauthorized(String::new()).status_code(), 401);
        assert_eq!(
            GatewayError::PolicyDeny {
                policy_id: String::new()
            }
            .status_code(),
            403
        );
        assert_eq!(GatewayError::ConfigValidation(String::new()).status_code(), 400);
        assert_eq!(GatewayError::UpstreamUnavailable(String::new()).status_code(), 502);
        assert_eq!(GatewayError::RemoteFetchFailure(String::new()).status_code(), 503);
        assert_eq!(GatewayError::Internal.status_code(), 500);
    }
}
