//! Security token service handlers.
//!
//! - `POST /gateway/token` - Sign a gateway token for a caller-provided subject
//! - `POST /gateway/verify` - Check a gateway token against the local key store

use crate::errors::GatewayError;
use crate::observability::hash_for_correlation;
use crate::observability::metrics::record_token_issuance;
use crate::routes::AppState;
use crate::services::token_service::SignOptions;
use axum::{extract::State, http::StatusCode, response::IntoResponse, response::Response, Json};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Instant;
use tracing::instrument;

/// Audience of STS tokens when the request names none.
pub const DEFAULT_STS_AUDIENCE: &str = "api-clients";

/// Scope of STS tokens when the request names none.
pub const DEFAULT_STS_SCOPE: &str = "read";

/// Token type returned by the token endpoint.
pub const TOKEN_TYPE_BEARER: &str = "Bearer";

/// Response of `POST /gateway/token`.
#[derive(Debug, Serialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: &'static str,
    pub expires_in: i64,
}

/// Request of `POST /gateway/verify`.
#[derive(Debug, Deserialize)]
pub struct VerifyRequest {
    #[serde(default)]
    pub token: Option<String>,
}

/// Issue a gateway token.
///
/// POST /gateway/token
///
/// Body: `{sub, aud?, scope?, ...customClaims}`. Custom claims are signed as
/// given; `iss`, `iat` and `exp` are always set by the signer. The
/// downstream audience is reserved for exchanged tokens and is rejected.
#[instrument(name = "gateway.sts.token", skip_all, fields(status))]
pub async fn issue_token(
    State(state): State<Arc<AppState>>,
    Json(mut claims): Json<Map<String, Value>>,
) -> Result<Json<TokenResponse>, GatewayError> {
    let start = Instant::now();

    let subject = match claims.get("sub") {
        Some(Value::String(sub)) if !sub.trim().is_empty() => sub.clone(),
        _ => {
            tracing::Span::current().record("status", "rejected");
            return Err(GatewayError::ConfigValidation(
                "Subject (sub) is required".to_string(),
            ));
        }
    };

    if names_audience(claims.get("aud"), &state.config.downstream_audience) {
        tracing::Span::current().record("status", "rejected");
        tracing::warn!(
            target: "gateway.sts",
            subject = %hash_for_correlation(&subject),
            "Token request named the downstream audience"
        );
        return Err(GatewayError::ConfigValidation(
            "Audience is reserved for exchanged tokens".to_string(),
        ));
    }

    claims
        .entry("aud")
        .or_insert_with(|| Value::String(DEFAULT_STS_AUDIENCE.to_string()));
    claims
        .entry("scope")
        .or_insert_with(|| Value::String(DEFAULT_STS_SCOPE.to_string()));

    let result = state
        .signer
        .sign(&Value::Object(claims), &SignOptions::default())
        .await;

    let status = if result.is_ok() { "success" } else { "error" };
    tracing::Span::current().record("status", status);
    record_token_issuance("sts", status, start.elapsed());

    let issued = result?;
    let expires_in = issued.expires_in();

    tracing::info!(
        target: "gateway.sts",
        subject = %hash_for_correlation(&subject),
        kid = %issued.kid,
        expires_in,
        "Token issued"
    );

    Ok(Json(TokenResponse {
        access_token: issued.token,
        token_type: TOKEN_TYPE_BEARER,
        expires_in,
    }))
}

/// True when `aud` is `audience` or an array containing it.
fn names_audience(aud: Option<&Value>, audience: &str) -> bool {
    match aud {
        Some(Value::String(value)) => value == audience,
        Some(Value::Array(values)) => values.iter().any(|v| v.as_str() == Some(audience)),
        _ => false,
    }
}

/// Verify a gateway token.
///
/// POST /gateway/verify
///
/// Returns `{valid: true, payload}` or 401 with `{valid: false, error}`
/// where `error` is the stable reason code.
#[instrument(name = "gateway.sts.verify", skip_all, fields(status))]
pub async fn verify_token(
    State(state): State<Arc<AppState>>,
    Json(request): Json<VerifyRequest>,
) -> Result<Response, GatewayError> {
    let token = request
        .token
        .filter(|t| !t.is_empty())
        .ok_or_else(|| GatewayError::ConfigValidation("Token is required".to_string()))?;

    match state.signer.verify_own(&token) {
        Ok(payload) => {
            tracing::Span::current().record("status", "valid");
            Ok(Json(serde_json::json!({ "valid": true, "payload": payload })).into_response())
        }
        Err(e) => {
            tracing::Span::current().record("status", "invalid");
            tracing::debug!(target: "gateway.sts", reason = e.code(), "Token verification failed");
            Ok((
                StatusCode::UNAUTHORIZED,
                Json(serde_json::json!({ "valid": false, "error": e.code() })),
            )
                .into_response())
        }
    }
}
