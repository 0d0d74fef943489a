//! Mock upstream identity provider.
//!
//! Serves a key set at `/.well-known/jwks.json` from a wiremock server.
//! Tests mint tokens through [`MockIdentityProvider::token`], which signs with
//! the primary fixture key.

use crate::crypto_fixtures::{jwk_set, primary_idp_key, TestSigningKey};
use crate::token_builders::{TestTokenBuilder, TEST_IDP_ISSUER};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const JWKS_PATH: &str = "/.well-known/jwks.json";

pub struct MockIdentityProvider {
    server: MockServer,
}

impl MockIdentityProvider {
    /// Start a provider publishing the primary fixture key.
    pub async fn start() -> Self {
        let idp = Self {
            server: MockServer::start().await,
        };
        idp.publish(&[primary_idp_key()]).await;
        idp
    }

    /// Replace the published key set with `keys`.
    pub async fn publish(&self, keys: &[&TestSigningKey]) {
        let set = jwk_set(keys).expect("fixture key set should encode");

        self.server.reset().await;
        Mock::given(method("GET"))
            .and(path(JWKS_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(set))
            .mount(&self.server)
            .await;
    }

    /// Make the key set endpoint fail with `status`.
    pub async fn fail_with(&self, status: u16) {
        self.server.reset().await;
        Mock::given(path(JWKS_PATH))
            .respond_with(ResponseTemplate::new(status))
            .mount(&self.server)
            .await;
    }

    pub fn jwks_uri(&self) -> String {
        format!("{}{}", self.server.uri(), JWKS_PATH)
    }

    pub fn issuer(&self) -> &'static str {
        TEST_IDP_ISSUER
    }

    /// Builder for a token this provider would issue.
    pub fn token(&self) -> TestTokenBuilder {
        TestTokenBuilder::new().issuer(self.issuer())
    }

    /// Number of key set fetches served so far.
    pub async fn jwks_fetch_count(&self) -> usize {
        self.server
            .received_requests()
            .await
            .map(|requests| {
                requests
                    .iter()
                    .filter(|r| r.url.path() == JWKS_PATH)
                    .count()
            })
            .unwrap_or(0)
    }
}
