//! Mock backend service.
//!
//! Echoes every request it receives as JSON, so tests can see exactly what
//! the gateway forwarded (method, path, query, the `Authorization` and
//! `x-request-id` headers, and the body).

use anyhow::{anyhow, Context};
use common::jwks::JwkSet;
use gateway_service::crypto::decoding_key_from_components;
use gateway_service::services::exchange_service::ExchangedClaims;
use jsonwebtoken::{decode, Algorithm, Validation};
use serde_json::json;
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

/// Responds with a JSON description of the request.
struct EchoResponder;

impl Respond for EchoResponder {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let authorization = request
            .headers
            .get("authorization")
            .and_then(|v| v.to_str().ok());
        let request_id = request
            .headers
            .get("x-request-id")
            .and_then(|v| v.to_str().ok());

        ResponseTemplate::new(200)
            .insert_header("x-backend", "mock")
            .set_body_json(json!({
                "method": request.method.to_string(),
                "path": request.url.path(),
                "query": request.url.query(),
                "authorization": authorization,
                "request_id": request_id,
                "body": String::from_utf8_lossy(&request.body),
            }))
    }
}

pub struct MockBackend {
    server: MockServer,
}

impl MockBackend {
    pub async fn start() -> Self {
        let server = MockServer::start().await;
        Mock::given(wiremock::matchers::any())
            .respond_with(EchoResponder)
            .mount(&server)
            .await;
        Self { server }
    }

    pub fn url(&self) -> String {
        self.server.uri()
    }

    pub async fn request_count(&self) -> usize {
        self.server
            .received_requests()
            .await
            .map(|requests| requests.len())
            .unwrap_or(0)
    }
}

/// Verify an exchanged token the way a downstream service would.
///
/// Looks up the signing key in the gateway's published key set and checks
/// signature, issuer, audience, and expiry.
pub fn verify_exchanged_token(
    jwks: &JwkSet,
    token: &str,
    issuer: &str,
    audience: &str,
) -> anyhow::Result<ExchangedClaims> {
    let header = jsonwebtoken::decode_header(token).context("token header")?;
    let kid = header.kid.ok_or_else(|| anyhow!("token has no kid"))?;
    let jwk = jwks
        .find(&kid)
        .ok_or_else(|| anyhow!("kid {} not published", kid))?;
    let (n, e) = jwk
        .rsa_components()
        .ok_or_else(|| anyhow!("kid {} has no RSA components", kid))?;
    let key = decoding_key_from_components(n, e)?;

    let mut validation = Validation::new(Algorithm::RS256);
    validation.set_issuer(&[issuer]);
    validation.set_audience(&[audience]);

    let data = decode::<ExchangedClaims>(token, &key, &validation).context("exchanged token")?;
    Ok(data.claims)
}
