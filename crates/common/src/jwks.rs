//! JSON Web Key Set wire types (RFC 7517).
//!
//! Shared by the gateway's own discovery endpoint and the resolver that
//! reads upstream identity provider key sets. Only RSA public parameters
//! are modeled; unknown members are ignored on input.

use serde::{Deserialize, Serialize};

/// Key type for RSA keys.
pub const KTY_RSA: &str = "RSA";

/// Intended use for signature keys.
pub const USE_SIG: &str = "sig";

/// A single public key entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Jwk {
    /// Key type ("RSA" for every key the gateway can use).
    pub kty: String,

    /// Key ID. Entries without one cannot be selected and are skipped by consumers.
    #[serde(default)]
    pub kid: String,

    /// Intended use (should be "sig").
    #[serde(default, rename = "use", skip_serializing_if = "Option::is_none")]
    pub key_use: Option<String>,

    /// Algorithm (e.g. "RS256").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alg: Option<String>,

    /// RSA modulus, base64url without padding.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub n: Option<String>,

    /// RSA public exponent, base64url without padding.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub e: Option<String>,
}

impl Jwk {
    /// Build an RS256 signature key entry from encoded RSA components.
    #[must_use]
    pub fn rsa_signing(kid: impl Into<String>, n: impl Into<String>, e: impl Into<String>) -> Self {
        Self {
            kty: KTY_RSA.to_string(),
            kid: kid.into(),
            key_use: Some(USE_SIG.to_string()),
            alg: Some("RS256".to_string()),
            n: Some(n.into()),
            e: Some(e.into()),
        }
    }

    /// RSA components if this is a complete RSA entry.
    #[must_use]
    pub fn rsa_components(&self) -> Option<(&str, &str)> {
        if self.kty != KTY_RSA {
            return None;
        }
        match (self.n.as_deref(), self.e.as_deref()) {
            (Some(n), Some(e)) if !n.is_empty() && !e.is_empty() => Some((n, e)),
            _ => None,
        }
    }
}

/// A key set as served at `/.well-known/jwks.json`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JwkSet {
    /// Key entries in publication order.
    pub keys: Vec<Jwk>,
}

impl JwkSet {
    /// Find an entry by key ID.
    #[must_use]
    pub fn find(&self, kid: &str) -> Option<&Jwk> {
        if kid.is_empty() {
            return None;
        }
        self.keys.iter().find(|k| k.kid == kid)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_jwk_serializes_use_member() {
        let jwk = Jwk::rsa_signing("gateway-key-1", "AQAB", "AQAB");
        let value = serde_json::to_value(&jwk).unwrap();

        assert_eq!(value["kty"], "RSA");
        assert_eq!(value["use"], "sig");
        assert_eq!(value["alg"], "RS256");
        assert!(value.get("key_use").is_none());
    }

    #[test]
    fn test_jwk_deserialization_minimal() {
        let jwk: Jwk = serde_json::from_str(r#"{"kty":"RSA","kid":"k1"}"#).unwrap();

        assert_eq!(jwk.kid, "k1");
        assert!(jwk.n.is_none());
        assert!(jwk.rsa_components().is_none());
    }

    #[test]
    fn test_jwk_ignores_unknown_members() {
        let json = r#"{"kty":"RSA","kid":"k1","n":"bg","e":"AQAB","x5t":"thumb"}"#;
        let jwk: Jwk = serde_json::from_str(json).unwrap();

        assert_eq!(jwk.rsa_components(), Some(("bg", "AQAB")));
    }

    #[test]
    fn test_rsa_components_rejects_other_key_types() {
        let json = r#"{"kty":"OKP","kid":"k1","n":"bg","e":"AQAB"}"#;
        let jwk: Jwk = serde_json::from_str(json).unwrap();

        assert!(jwk.rsa_components().is_none());
    }

    #[test]
    fn test_jwk_set_find() {
        let set: JwkSet = serde_json::from_str(
            r#"{"keys":[{"kty":"RSA","kid":"a"},{"kty":"RSA"},{"kty":"RSA","kid":"b"}]}"#,
        )
        .unwrap();

        assert_eq!(set.keys.len(), 3);
        assert_eq!(set.find("b").map(|k| k.kid.as_str()), Some("b"));
        assert!(set.find("c").is_none());
        assert!(set.find("").is_none());
    }
}
