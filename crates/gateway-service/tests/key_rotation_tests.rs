//! Key rotation under real HTTP traffic.
//!
//! Covers gateway signing key rotation (tokens signed before a rotation keep
//! verifying, concurrent rotations leave one current key) and upstream
//! identity provider rotation (a new `kid` triggers a key set refresh).

#![allow(clippy::unwrap_used, clippy::expect_used)]

use gateway_test_utils::{
    primary_idp_key, secondary_idp_key, verify_exchanged_token, EnforcementMode, MockBackend,
    MockIdentityProvider, TestGatewayServer,
};
use reqwest::StatusCode;
use serde_json::{json, Value};
use std::collections::HashSet;

async fn issue_sts_token(
    client: &reqwest::Client,
    server: &TestGatewayServer,
    sub: &str,
) -> Result<String, anyhow::Error> {
    let body: Value = client
        .post(format!("{}/gateway/token", server.url()))
        .json(&json!({ "sub": sub }))
        .send()
        .await?
        .json()
        .await?;
    Ok(body["access_token"]
        .as_str()
        .ok_or_else(|| anyhow::anyhow!("no access_token in {}", body))?
        .to_string())
}

async fn rotate(client: &reqwest::Client, server: &TestGatewayServer) -> Result<String, anyhow::Error> {
    let response = client
        .post(format!("{}/admin/keys/rotate", server.url()))
        .send()
        .await?;
    anyhow::ensure!(response.status() == StatusCode::OK, "rotate returned {}", response.status());
    let body: Value = response.json().await?;
    Ok(body["kid"]
        .as_str()
        .ok_or_else(|| anyhow::anyhow!("no kid in {}", body))?
        .to_string())
}

#[tokio::test]
async fn test_token_signed_before_rotation_still_verifies() -> Result<(), anyhow::Error> {
    let server = TestGatewayServer::spawn_with_vars(&[]).await?;
    let client = reqwest::Client::new();

    let before = issue_sts_token(&client, &server, "svc-before").await?;
    let old_kid = jsonwebtoken::decode_header(&before)?.kid;

    let new_kid = rotate(&client, &server).await?;
    assert_ne!(old_kid.as_deref(), Some(new_kid.as_str()));

    let response = client
        .post(format!("{}/gateway/verify", server.url()))
        .json(&json!({ "token": before }))
        .send()
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await?;
    assert_eq!(body["valid"], true);
    assert_eq!(body["payload"]["sub"], "svc-before");

    let after = issue_sts_token(&client, &server, "svc-after").await?;
    assert_eq!(
        jsonwebtoken::decode_header(&after)?.kid.as_deref(),
        Some(new_kid.as_str())
    );

    // Both keys are published during the overlap
    let jwks = server.fetch_jwks().await?;
    let kids: HashSet<_> = jwks.keys.iter().map(|k| k.kid.as_str()).collect();
    assert!(kids.contains(new_kid.as_str()));
    assert!(old_kid.as_deref().is_some_and(|kid| kids.contains(kid)));
    Ok(())
}

#[tokio::test]
async fn test_concurrent_rotations_leave_single_current_key() -> Result<(), anyhow::Error> {
    let server = TestGatewayServer::spawn_with_vars(&[("GATEWAY_MAX_KEYS", "10")]).await?;
    let client = reqwest::Client::new();

    let (a, b, c, d) = tokio::join!(
        rotate(&client, &server),
        rotate(&client, &server),
        rotate(&client, &server),
        rotate(&client, &server),
    );
    let rotated: HashSet<String> = [a?, b?, c?, d?].into_iter().collect();
    assert_eq!(rotated.len(), 4, "every rotation should mint a distinct kid");

    let body: Value = client
        .get(format!("{}/admin/keys", server.url()))
        .send()
        .await?
        .json()
        .await?;
    let keys = body["keys"].as_array().expect("keys array");
    let current: Vec<&Value> = keys.iter().filter(|k| k["current"] == true).collect();

    assert_eq!(keys.len(), 5);
    assert_eq!(current.len(), 1);
    let current_kid = current[0]["kid"].as_str().expect("kid");
    assert!(rotated.contains(current_kid));
    assert_eq!(current[0]["active"], true);
    Ok(())
}

#[tokio::test]
async fn test_purge_removes_only_deactivated_keys() -> Result<(), anyhow::Error> {
    let server = TestGatewayServer::spawn_with_vars(&[("GATEWAY_MAX_KEYS", "2")]).await?;
    let client = reqwest::Client::new();
    let initial = server.state().key_store.current_key().await?.kid.clone();

    rotate(&client, &server).await?;
    let newest = rotate(&client, &server).await?;

    // Three keys, at most two active: the initial key is deactivated
    assert_eq!(server.fetch_jwks().await?.keys.len(), 2);
    assert!(server.state().key_store.key(&initial).is_some());

    let response = client
        .delete(format!("{}/admin/keys/inactive", server.url()))
        .send()
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await?;
    assert_eq!(body["purged"], json!([initial]));
    assert_eq!(body["count"], 1);

    assert!(server.state().key_store.key(&initial).is_none());
    assert_eq!(server.state().key_store.current_key().await?.kid, newest);
    Ok(())
}

#[tokio::test]
async fn test_exchanged_tokens_follow_gateway_rotation() -> Result<(), anyhow::Error> {
    let idp = MockIdentityProvider::start().await;
    let backend = MockBackend::start().await;
    let server = TestGatewayServer::spawn(&idp, &backend, EnforcementMode::Enforce).await?;
    let client = reqwest::Client::new();
    let upstream = idp.token().with_username("alice").sign();
    let config = server.config();

    let new_kid = rotate(&client, &server).await?;

    let echo: Value = client
        .get(format!("{}/orders", server.url()))
        .bearer_auth(&upstream)
        .send()
        .await?
        .json()
        .await?;
    let exchanged = echo["authorization"]
        .as_str()
        .and_then(|v| v.strip_prefix("Bearer "))
        .expect("exchanged token");

    assert_eq!(
        jsonwebtoken::decode_header(exchanged)?.kid.as_deref(),
        Some(new_kid.as_str())
    );
    let claims = verify_exchanged_token(
        &server.fetch_jwks().await?,
        exchanged,
        &config.gateway_issuer,
        &config.downstream_audience,
    )?;
    assert_eq!(claims.sub, "alice");
    Ok(())
}

#[tokio::test]
async fn test_upstream_rotation_is_picked_up_on_unknown_kid() -> Result<(), anyhow::Error> {
    let idp = MockIdentityProvider::start().await;
    let backend = MockBackend::start().await;
    let server = TestGatewayServer::spawn(&idp, &backend, EnforcementMode::Enforce).await?;
    let client = reqwest::Client::new();

    let old = idp.token().sign();
    let response = client
        .get(format!("{}/orders", server.url()))
        .bearer_auth(&old)
        .send()
        .await?;
    assert_eq!(response.status(), StatusCode::OK);

    // The IdP starts signing with a new key while keeping the old one published
    idp.publish(&[primary_idp_key(), secondary_idp_key()]).await;
    let rotated = idp.token().signed_by(secondary_idp_key()).sign();

    for token in [&rotated, &old] {
        let response = client
            .get(format!("{}/orders", server.url()))
            .bearer_auth(token)
            .send()
            .await?;
        assert_eq!(response.status(), StatusCode::OK);
    }

    // Only the unknown kid caused a refresh
    assert_eq!(idp.jwks_fetch_count().await, 1);
    Ok(())
}
