//! Builders for upstream identity tokens.

use crate::crypto_fixtures::{primary_idp_key, TestSigningKey};
use chrono::Utc;
use serde_json::{json, Map, Value};

/// Issuer the builder uses unless told otherwise.
pub const TEST_IDP_ISSUER: &str = "https://idp.test.local";

/// Audience the gateway expects from upstream tokens by default.
pub const TEST_IDP_AUDIENCE: &str = "api-gateway";

/// Fluent builder for upstream IdP tokens.
///
/// # Example
///
/// ```rust,ignore
/// let token = TestTokenBuilder::new()
///     .for_user("user-42")
///     .with_username("alice")
///     .with_role("admin")
///     .expires_in(300)
///     .sign();
/// ```
pub struct TestTokenBuilder {
    sub: String,
    iss: String,
    aud: String,
    username: Option<String>,
    role: Option<String>,
    tenant: Option<String>,
    iat: i64,
    exp_offset: i64,
    extra: Map<String, Value>,
    key: &'static TestSigningKey,
}

impl TestTokenBuilder {
    pub fn new() -> Self {
        Self {
            sub: "user-123".to_string(),
            iss: TEST_IDP_ISSUER.to_string(),
            aud: TEST_IDP_AUDIENCE.to_string(),
            username: None,
            role: None,
            tenant: None,
            iat: Utc::now().timestamp(),
            exp_offset: 300,
            extra: Map::new(),
            key: primary_idp_key(),
        }
    }

    pub fn for_user(mut self, sub: &str) -> Self {
        self.sub = sub.to_string();
        self
    }

    pub fn with_username(mut self, username: &str) -> Self {
        self.username = Some(username.to_string());
        self
    }

    pub fn with_role(mut self, role: &str) -> Self {
        self.role = Some(role.to_string());
        self
    }

    pub fn with_tenant(mut self, tenant: &str) -> Self {
        self.tenant = Some(tenant.to_string());
        self
    }

    pub fn issuer(mut self, iss: &str) -> Self {
        self.iss = iss.to_string();
        self
    }

    pub fn audience(mut self, aud: &str) -> Self {
        self.aud = aud.to_string();
        self
    }

    /// Expiry relative to `iat`; negative values build expired tokens.
    pub fn expires_in(mut self, seconds: i64) -> Self {
        self.exp_offset = seconds;
        self
    }

    pub fn issued_at(mut self, timestamp: i64) -> Self {
        self.iat = timestamp;
        self
    }

    /// Add or override an arbitrary claim.
    pub fn claim(mut self, name: &str, value: Value) -> Self {
        self.extra.insert(name.to_string(), value);
        self
    }

    pub fn signed_by(mut self, key: &'static TestSigningKey) -> Self {
        self.key = key;
        self
    }

    /// Claims as JSON, without signing.
    pub fn build(&self) -> Value {
        let mut claims = json!({
            "sub": self.sub,
            "iss": self.iss,
            "aud": self.aud,
            "iat": self.iat,
            "exp": self.iat + self.exp_offset,
        });

        if let Value::Object(map) = &mut claims {
            if let Some(username) = &self.username {
                map.insert("username".to_string(), json!(username));
            }
            if let Some(role) = &self.role {
                map.insert("role".to_string(), json!(role));
            }
            if let Some(tenant) = &self.tenant {
                map.insert("tenant".to_string(), json!(tenant));
            }
            for (name, value) in &self.extra {
                map.insert(name.clone(), value.clone());
            }
        }

        claims
    }

    /// Sign the claims as RS256 with the selected key.
    pub fn sign(&self) -> String {
        self.key
            .sign(&self.build())
            .expect("fixture token signing should succeed")
    }
}

impl Default for TestTokenBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_defaults() {
        let claims = TestTokenBuilder::new().build();

        assert_eq!(claims["sub"], "user-123");
        assert_eq!(claims["iss"], TEST_IDP_ISSUER);
        assert_eq!(claims["aud"], TEST_IDP_AUDIENCE);
        assert_eq!(
            claims["exp"].as_i64().unwrap() - claims["iat"].as_i64().unwrap(),
            300
        );
        assert!(claims.get("role").is_none());
    }

    #[test]
    fn test_builder_overrides() {
        let claims = TestTokenBuilder::new()
            .for_user("user-9")
            .with_username("bob")
            .with_role("admin")
            .with_tenant("acme")
            .issued_at(1_700_000_000)
            .expires_in(-10)
            .claim("scope", json!("orders"))
            .build();

        assert_eq!(claims["sub"], "user-9");
        assert_eq!(claims["username"], "bob");
        assert_eq!(claims["role"], "admin");
        assert_eq!(claims["tenant"], "acme");
        assert_eq!(claims["exp"], 1_699_999_990);
        assert_eq!(claims["scope"], "orders");
    }
}
