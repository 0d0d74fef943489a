//! Admin endpoint handlers.
//!
//! Runtime settings, the policy set, and the gateway signing keys. Every
//! update is validated before it is applied; a rejected update returns 400
//! and leaves the current state untouched.

use crate::errors::GatewayError;
use crate::models::{EnforcementConfig, EnforcementMode, Policy, SigningKeyInfo};
use crate::routes::AppState;
use crate::services::runtime_config::VerifierConfigUpdate;
use axum::{extract::State, Json};
use jsonwebtoken::Algorithm;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::str::FromStr;
use std::sync::Arc;
use tracing::instrument;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendResponse {
    pub success: bool,
    pub backend_url: String,
}

/// Inbound token settings as reported by `GET /admin/config/jwt`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JwtConfigView {
    pub issuer: String,
    pub jwks_uri: String,
    pub audience: String,
    pub algorithms: Vec<Algorithm>,
}

impl From<&EnforcementConfig> for JwtConfigView {
    fn from(config: &EnforcementConfig) -> Self {
        Self {
            issuer: config.issuer.clone(),
            jwks_uri: config.jwks_uri.clone(),
            audience: config.audience.clone(),
            algorithms: config.algorithms.clone(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct JwtConfigUpdated {
    pub message: &'static str,
    pub config: JwtConfigView,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnforcementResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<&'static str>,
    pub enforcement_mode: EnforcementMode,
}

#[derive(Debug, Serialize)]
pub struct PoliciesResponse {
    pub policies: Vec<Policy>,
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub count: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct KeysResponse {
    pub keys: Vec<SigningKeyInfo>,
}

#[derive(Debug, Serialize)]
pub struct RotateResponse {
    pub message: &'static str,
    pub kid: String,
}

#[derive(Debug, Serialize)]
pub struct PurgeResponse {
    pub message: &'static str,
    pub purged: Vec<String>,
    pub count: usize,
}

/// GET /admin/config/backend
pub async fn get_backend(State(state): State<Arc<AppState>>) -> Json<BackendResponse> {
    Json(BackendResponse {
        success: true,
        backend_url: state.backend.load().to_string(),
    })
}

/// POST /admin/config/backend
///
/// Body: `{backendUrl}`.
#[instrument(name = "gateway.admin.backend", skip_all)]
pub async fn set_backend(
    State(state): State<Arc<AppState>>,
    Json(body): Json<Value>,
) -> Result<Json<BackendResponse>, GatewayError> {
    let url = body
        .get("backendUrl")
        .and_then(Value::as_str)
        .filter(|u| !u.is_empty())
        .ok_or_else(|| GatewayError::ConfigValidation("Invalid backendUrl".to_string()))?;

    let current = state.backend.set(url)?;

    Ok(Json(BackendResponse {
        success: true,
        backend_url: current.to_string(),
    }))
}

/// GET /admin/config/jwt
pub async fn get_jwt_config(State(state): State<Arc<AppState>>) -> Json<JwtConfigView> {
    Json(JwtConfigView::from(state.enforcement.load().as_ref()))
}

/// POST /admin/config/jwt
///
/// Body: any subset of `{issuer, jwksUri, audience, algorithms}`. When the
/// discovery URI changes, the cached key set of the old one is dropped.
#[instrument(name = "gateway.admin.jwt", skip_all)]
pub async fn set_jwt_config(
    State(state): State<Arc<AppState>>,
    Json(body): Json<Value>,
) -> Result<Json<JwtConfigUpdated>, GatewayError> {
    let update: VerifierConfigUpdate = serde_json::from_value(body).map_err(|e| {
        GatewayError::ConfigValidation(format!("Invalid JWT configuration: {}", e))
    })?;

    let applied = state.enforcement.apply(update)?;

    if let Some(old_uri) = applied.replaced_jwks_uri.as_deref() {
        state.resolver.invalidate(old_uri).await;
    }

    Ok(Json(JwtConfigUpdated {
        message: "JWT configuration updated",
        config: JwtConfigView::from(applied.config.as_ref()),
    }))
}

/// GET /admin/enforcement
pub async fn get_enforcement(State(state): State<Arc<AppState>>) -> Json<EnforcementResponse> {
    Json(EnforcementResponse {
        message: None,
        enforcement_mode: state.enforcement.load().enforcement_mode,
    })
}

/// POST /admin/enforcement
///
/// Body: `{enforcementMode: "audit" | "enforce"}`.
#[instrument(name = "gateway.admin.enforcement", skip_all)]
pub async fn set_enforcement(
    State(state): State<Arc<AppState>>,
    Json(body): Json<Value>,
) -> Result<Json<EnforcementResponse>, GatewayError> {
    let value = body
        .get("enforcementMode")
        .and_then(Value::as_str)
        .unwrap_or_default();
    let mode = EnforcementMode::from_str(value).map_err(|reason| {
        GatewayError::ConfigValidation(format!("Invalid enforcementMode: {}", reason))
    })?;

    let config = state.enforcement.set_mode(mode);

    Ok(Json(EnforcementResponse {
        message: Some("Enforcement mode updated"),
        enforcement_mode: config.enforcement_mode,
    }))
}

/// GET /admin/policies
pub async fn get_policies(State(state): State<Arc<AppState>>) -> Json<PoliciesResponse> {
    Json(PoliciesResponse {
        policies: state.policies.all().as_ref().clone(),
    })
}

/// POST /admin/policies
///
/// Body: `{policies: [...]}`. Replaces the whole set.
#[instrument(name = "gateway.admin.policies", skip_all, fields(count))]
pub async fn replace_policies(
    State(state): State<Arc<AppState>>,
    Json(body): Json<Value>,
) -> Result<Json<MessageResponse>, GatewayError> {
    let entries = body
        .get("policies")
        .and_then(Value::as_array)
        .ok_or_else(|| GatewayError::ConfigValidation("policies must be an array".to_string()))?;

    let policies = entries
        .iter()
        .enumerate()
        .map(|(i, entry)| {
            Policy::deserialize(entry)
                .map_err(|e| GatewayError::ConfigValidation(format!("policies[{}]: {}", i, e)))
        })
        .collect::<Result<Vec<_>, _>>()?;

    let count = state.policies.replace_all(policies)?;
    tracing::Span::current().record("count", count);

    Ok(Json(MessageResponse {
        message: "Policies updated",
        count: Some(count),
    }))
}

/// DELETE /admin/policies
#[instrument(name = "gateway.admin.policies.clear", skip_all)]
pub async fn clear_policies(State(state): State<Arc<AppState>>) -> Json<MessageResponse> {
    state.policies.clear();
    Json(MessageResponse {
        message: "All policies cleared",
        count: None,
    })
}

/// GET /admin/keys
pub async fn list_keys(State(state): State<Arc<AppState>>) -> Json<KeysResponse> {
    Json(KeysResponse {
        keys: state.key_store.key_infos(),
    })
}

/// POST /admin/keys/rotate
#[instrument(name = "gateway.admin.keys.rotate", skip_all)]
pub async fn rotate_keys(
    State(state): State<Arc<AppState>>,
) -> Result<Json<RotateResponse>, GatewayError> {
    let key = state.key_store.rotate().await?;

    tracing::info!(target: "gateway.admin", kid = %key.kid, "Signing key rotated on request");

    Ok(Json(RotateResponse {
        message: "Signing key rotated",
        kid: key.kid.clone(),
    }))
}

/// DELETE /admin/keys/inactive
#[instrument(name = "gateway.admin.keys.purge", skip_all)]
pub async fn purge_inactive_keys(
    State(state): State<Arc<AppState>>,
) -> Result<Json<PurgeResponse>, GatewayError> {
    let purged = state.key_store.purge_inactive().await?;

    tracing::info!(target: "gateway.admin", count = purged.len(), "Inactive signing keys purged");

    Ok(Json(PurgeResponse {
        message: "Inactive keys purged",
        count: purged.len(),
        purged,
    }))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use crate::routes::test_support::TestApp;
    use axum::http::StatusCode;
    use serde_json::json;

    #[tokio::test]
    async fn test_backend_update() {
        let app = TestApp::new().await;

        let (status, body) = app
            .send(
                "POST",
                "/admin/config/backend",
                Some(json!({ "backendUrl": "http://orders.internal:8080" })),
            )
            .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert_eq!(body["backendUrl"], "http://orders.internal:8080");
        assert_eq!(
            app.state.backend.load().as_str(),
            "http://orders.internal:8080"
        );
    }

    #[tokio::test]
    async fn test_backend_update_rejections_leave_target() {
        let app = TestApp::new().await;
        let before = app.state.backend.load();

        let (status, body) = app
            .send("POST", "/admin/config/backend", Some(json!({ "backendUrl": 5 })))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["message"], "Invalid backendUrl");

        let (status, body) = app
            .send(
                "POST",
                "/admin/config/backend",
                Some(json!({ "backendUrl": "not a url" })),
            )
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["message"], "Invalid URL format");

        assert_eq!(app.state.backend.load(), before);
    }

    #[tokio::test]
    async fn test_enforcement_get_and_set() {
        let app = TestApp::new().await;

        let (_, body) = app.send("GET", "/admin/enforcement", None).await;
        assert_eq!(body["enforcementMode"], "audit");

        let (status, body) = app
            .send(
                "POST",
                "/admin/enforcement",
                Some(json!({ "enforcementMode": "enforce" })),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["enforcementMode"], "enforce");
        assert!(app.state.enforcement.load().enforcement_mode.is_enforcing());
    }

    #[tokio::test]
    async fn test_enforcement_rejects_unknown_mode() {
        let app = TestApp::new().await;

        for body in [json!({ "enforcementMode": "block" }), json!({})] {
            let (status, _) = app.send("POST", "/admin/enforcement", Some(body)).await;
            assert_eq!(status, StatusCode::BAD_REQUEST);
        }
        assert!(!app.state.enforcement.load().enforcement_mode.is_enforcing());
    }

    #[tokio::test]
    async fn test_jwt_config_partial_update() {
        let app = TestApp::new().await;

        let (status, body) = app
            .send(
                "POST",
                "/admin/config/jwt",
                Some(json!({
                    "issuer": "https://login.example.com",
                    "algorithms": ["RS256", "RS512"]
                })),
            )
            .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"], "JWT configuration updated");
        assert_eq!(body["config"]["issuer"], "https://login.example.com");
        assert_eq!(body["config"]["algorithms"], json!(["RS256", "RS512"]));
        assert_eq!(body["config"]["audience"], "api-gateway");

        let (_, view) = app.send("GET", "/admin/config/jwt", None).await;
        assert_eq!(view["issuer"], "https://login.example.com");
    }

    #[tokio::test]
    async fn test_jwt_config_rejects_invalid_update_atomically() {
        let app = TestApp::new().await;
        let before = app.state.enforcement.load();

        let (status, _) = app
            .send(
                "POST",
                "/admin/config/jwt",
                Some(json!({ "issuer": "https://new.example.com", "algorithms": ["HS256"] })),
            )
            .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(app.state.enforcement.load(), before);
    }

    #[tokio::test]
    async fn test_policies_replace_get_clear() {
        let app = TestApp::new().await;

        let (status, body) = app
            .send(
                "POST",
                "/admin/policies",
                Some(json!({ "policies": [
                    { "id": "orders-read", "methods": ["get"], "path": "/orders", "roles": ["user"] },
                    { "id": "orders-write", "methods": ["POST"], "path": "/orders", "roles": ["admin"], "version": "3" }
                ]})),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["count"], 2);

        let (_, body) = app.send("GET", "/admin/policies", None).await;
        let policies = body["policies"].as_array().unwrap();
        assert_eq!(policies.len(), 2);
        assert_eq!(policies.first().unwrap()["methods"], json!(["GET"]));

        let (status, body) = app.send("DELETE", "/admin/policies", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"], "All policies cleared");
        assert!(app.state.policies.all().is_empty());
    }

    #[tokio::test]
    async fn test_policies_require_array() {
        let app = TestApp::new().await;

        let (status, body) = app
            .send("POST", "/admin/policies", Some(json!({ "policies": "all" })))
            .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["message"], "policies must be an array");
    }

    #[tokio::test]
    async fn test_invalid_policy_leaves_set_unchanged() {
        let app = TestApp::new().await;
        app.send(
            "POST",
            "/admin/policies",
            Some(json!({ "policies": [
                { "id": "a", "methods": ["GET"], "path": "/a", "roles": [] }
            ]})),
        )
        .await;

        let (status, _) = app
            .send(
                "POST",
                "/admin/policies",
                Some(json!({ "policies": [
                    { "id": "b", "methods": ["GET"], "path": "/b", "roles": [] },
                    { "id": "c", "methods": ["GET"], "path": "no-slash", "roles": [] }
                ]})),
            )
            .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        let policies = app.state.policies.all();
        assert_eq!(policies.len(), 1);
        assert_eq!(policies.first().unwrap().id, "a");
    }

    #[tokio::test]
    async fn test_key_rotation_and_purge() {
        let app = TestApp::with_vars(&[("GATEWAY_MAX_KEYS", "1")]).await;
        let first = app.state.key_store.current_key().await.unwrap();

        let (status, body) = app.send("POST", "/admin/keys/rotate", None).await;
        assert_eq!(status, StatusCode::OK);
        let new_kid = body["kid"].as_str().unwrap().to_string();
        assert_ne!(new_kid, first.kid);

        let (_, body) = app.send("GET", "/admin/keys", None).await;
        let keys = body["keys"].as_array().unwrap();
        assert_eq!(keys.len(), 2);
        assert_eq!(
            keys.iter().filter(|k| k["current"] == true).count(),
            1,
            "exactly one current key"
        );

        let (status, body) = app.send("DELETE", "/admin/keys/inactive", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["purged"], json!([first.kid]));
        assert!(app.state.key_store.public_key(&first.kid).is_none());
        assert!(app.state.key_store.public_key(&new_kid).is_some());
    }
}
