//! API gateway models.
//!
//! Contains data types shared by the verification, authorization, and
//! exchange stages of the request pipeline.

use chrono::{DateTime, Utc};
use jsonwebtoken::Algorithm;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Decision id recorded when no policy matched the request.
pub const NO_POLICY_ID: &str = "no-policy";

/// Policy version recorded when the matched policy carries none.
pub const NO_POLICY_VERSION: &str = "none";

/// Whether a negative verification or authorization outcome has effect.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnforcementMode {
    /// Negative outcomes are logged and the request proceeds.
    #[default]
    Audit,

    /// Negative outcomes terminate the request.
    Enforce,
}

impl EnforcementMode {
    /// Returns the string representation of the mode.
    pub fn as_str(&self) -> &'static str {
        match self {
            EnforcementMode::Audit => "audit",
            EnforcementMode::Enforce => "enforce",
        }
    }

    pub fn is_enforcing(&self) -> bool {
        matches!(self, EnforcementMode::Enforce)
    }
}

impl FromStr for EnforcementMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "audit" => Ok(EnforcementMode::Audit),
            "enforce" => Ok(EnforcementMode::Enforce),
            other => Err(format!(
                "must be 'audit' or 'enforce', got '{}'",
                other
            )),
        }
    }
}

impl fmt::Display for EnforcementMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Process-wide verification and enforcement settings.
///
/// Replaced as a whole through its store; readers take one snapshot per
/// request so the verifier and the authorization stage agree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnforcementConfig {
    /// Audit or enforce.
    pub enforcement_mode: EnforcementMode,

    /// Issuer expected on inbound tokens.
    pub issuer: String,

    /// Discovery URI for inbound token keys.
    pub jwks_uri: String,

    /// Audience expected on inbound tokens.
    pub audience: String,

    /// Accepted inbound signature algorithms.
    pub algorithms: Vec<Algorithm>,
}

/// Authorization policy: exact method and path to allowed roles.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Policy {
    pub id: String,
    pub methods: Vec<String>,
    pub path: String,
    pub roles: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

impl Policy {
    /// Exact match on method and path. Methods are stored upper-cased.
    pub fn matches(&self, method: &str, path: &str) -> bool {
        self.path == path && self.methods.iter().any(|m| m.eq_ignore_ascii_case(method))
    }

    pub fn allows_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }
}

/// Identity established by a successful inbound token verification.
///
/// Fields come only from the signature-verified payload. Identifiers are
/// redacted in Debug output.
#[derive(Clone, PartialEq, Eq)]
pub struct VerifiedIdentity {
    /// `sub` claim.
    pub user_id: String,

    /// `username` claim if present.
    pub username: Option<String>,

    /// `role` claim if present.
    pub role: Option<String>,

    /// `iss` claim.
    pub issuer: String,

    /// `tenant` claim if present.
    pub tenant: Option<String>,
}

impl fmt::Debug for VerifiedIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VerifiedIdentity")
            .field("user_id", &"[REDACTED]")
            .field("username", &self.username.as_ref().map(|_| "[REDACTED]"))
            .field("role", &self.role)
            .field("issuer", &self.issuer)
            .field("tenant", &self.tenant)
            .finish()
    }
}

impl VerifiedIdentity {
    /// Subject for translated tokens: the username, else the user id.
    pub fn subject(&self) -> &str {
        self.username.as_deref().unwrap_or(&self.user_id)
    }
}

/// Outcome of matching a request against the policy set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizationDecision {
    pub allowed: bool,

    /// Id of the matched policy; `None` for unmatched (default-allow) routes.
    pub policy_id: Option<String>,

    pub policy_version: Option<String>,
}

impl AuthorizationDecision {
    /// Default-allow decision for routes no policy covers.
    pub fn unmatched() -> Self {
        Self {
            allowed: true,
            policy_id: None,
            policy_version: None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        if self.allowed {
            "allow"
        } else {
            "deny"
        }
    }
}

/// Audit metadata embedded in an exchanged token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExchangeDecision {
    /// Matched policy id or [`NO_POLICY_ID`].
    pub decision_id: String,

    /// Matched policy version or [`NO_POLICY_VERSION`].
    pub policy_version: String,

    /// When the decision was made.
    pub enforced_at: DateTime<Utc>,
}

impl ExchangeDecision {
    pub fn from_decision(decision: &AuthorizationDecision, enforced_at: DateTime<Utc>) -> Self {
        Self {
            decision_id: decision
                .policy_id
                .clone()
                .unwrap_or_else(|| NO_POLICY_ID.to_string()),
            policy_version: decision
                .policy_version
                .clone()
                .unwrap_or_else(|| NO_POLICY_VERSION.to_string()),
            enforced_at,
        }
    }
}

/// Signing key metadata as reported by the key admin endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SigningKeyInfo {
    pub kid: String,
    pub algorithm: String,
    pub created_at: DateTime<Utc>,
    pub active: bool,
    pub current: bool,
}
