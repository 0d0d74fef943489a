//! Inbound JWT claims.
//!
//! Claims of an externally issued token after its signature was verified.
//! The `sub` and `username` fields are redacted in Debug output.

use crate::models::VerifiedIdentity;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Claims the gateway reads from inbound tokens. Other claims are ignored.
#[derive(Clone, Serialize, Deserialize)]
pub struct InboundClaims {
    /// Subject (user id) - redacted in Debug output.
    pub sub: String,

    pub iss: String,

    /// Expiration timestamp (Unix epoch seconds).
    pub exp: i64,

    /// Issued-at timestamp (Unix epoch seconds), if the issuer sets one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iat: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant: Option<String>,
}

impl fmt::Debug for InboundClaims {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InboundClaims")
            .field("sub", &"[REDACTED]")
            .field("iss", &self.iss)
            .field("exp", &self.exp)
            .field("iat", &self.iat)
            .field("username", &self.username.as_ref().map(|_| "[REDACTED]"))
            .field("role", &self.role)
            .field("tenant", &self.tenant)
            .finish()
    }
}

impl From<InboundClaims> for VerifiedIdentity {
    fn from(claims: InboundClaims) -> Self {
        VerifiedIdentity {
            user_id: claims.sub,
            username: claims.username,
            role: claims.role,
            issuer: claims.iss,
            tenant: claims.tenant,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_claims_debug_redacts_identifiers() {
        let claims = InboundClaims {
            sub: "secret-user-id".to_string(),
            iss: "https://idp.example.com".to_string(),
            exp: 1234567890,
            iat: Some(1234567800),
            username: Some("alice".to_string()),
            role: Some("user".to_string()),
            tenant: None,
        };

        let debug_str = format!("{:?}", claims);

        assert!(
            !debug_str.contains("secret-user-id"),
            "Debug output should not contain actual sub value"
        );
        assert!(!debug_str.contains("alice"));
        assert!(debug_str.contains("[REDACTED]"));
    }

    #[test]
    fn test_minimal_claims_deserialize() {
        let claims: InboundClaims = serde_json::from_str(
            r#"{"sub":"u1","iss":"https://idp","exp":1234567890,"aud":"api-gateway","extra":true}"#,
        )
        .unwrap();

        assert_eq!(claims.sub, "u1");
        assert!(claims.iat.is_none());
        assert!(claims.username.is_none());
        assert!(claims.role.is_none());
    }

    #[test]
    fn test_into_identity() {
        let claims: InboundClaims = serde_json::from_str(
            r#"{"sub":"u1","iss":"https://idp","exp":1,"username":"alice","role":"admin","tenant":"acme"}"#,
        )
        .unwrap();

        let identity = VerifiedIdentity::from(claims);

        assert_eq!(identity.user_id, "u1");
        assert_eq!(identity.username.as_deref(), Some("alice"));
        assert_eq!(identity.role.as_deref(), Some("admin"));
        assert_eq!(identity.issuer, "https://idp");
        assert_eq!(identity.tenant.as_deref(), Some("acme"));
    }
}
