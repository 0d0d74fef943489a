//! Authorization policies.
//!
//! [`PolicyStore`] holds the policy list as an immutable snapshot that is
//! only ever replaced as a whole. [`AuthorizationEngine`] matches requests
//! against whatever snapshot is current when the request is decided.
//!
//! Matching is exact on method and path. When several policies match, the
//! first registered one decides. Routes no policy covers are allowed.

use crate::errors::GatewayError;
use crate::models::{AuthorizationDecision, Policy};
use common::snapshot::Snapshot;
use std::sync::Arc;
use tracing::instrument;

/// Current authorization policy set.
#[derive(Debug, Default)]
pub struct PolicyStore {
    policies: Snapshot<Vec<Policy>>,
}

impl PolicyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate and install `policies`, replacing the previous set.
    ///
    /// Nothing changes if any policy is invalid. Methods are upper-cased.
    /// Returns the number of installed policies.
    pub fn replace_all(&self, policies: Vec<Policy>) -> Result<usize, GatewayError> {
        let normalized = policies
            .into_iter()
            .enumerate()
            .map(|(index, policy)| normalize(policy, index))
            .collect::<Result<Vec<_>, _>>()?;

        let count = normalized.len();
        self.policies.store(normalized);

        tracing::info!(target: "gateway.authz", action = "set", count = count, "Policies replaced");
        Ok(count)
    }

    /// Remove every policy. All routes become unmatched.
    pub fn clear(&self) {
        self.policies.store(Vec::new());
        tracing::info!(target: "gateway.authz", action = "clear", "Policies cleared");
    }

    pub fn all(&self) -> Arc<Vec<Policy>> {
        self.policies.load()
    }
}

fn normalize(mut policy: Policy, index: usize) -> Result<Policy, GatewayError> {
    let invalid = |reason: &str| {
        GatewayError::ConfigValidation(format!("policies[{}]: {}", index, reason))
    };

    policy.id = policy.id.trim().to_string();
    if policy.id.is_empty() {
        return Err(invalid("id is required"));
    }

    policy.methods = policy
        .methods
        .iter()
        .map(|m| m.trim().to_ascii_uppercase())
        .filter(|m| !m.is_empty())
        .collect();
    if policy.methods.is_empty() {
        return Err(invalid("at least one method is required"));
    }

    if !policy.path.starts_with('/') {
        return Err(invalid("path must start with '/'"));
    }

    Ok(policy)
}

/// Renders allow/deny decisions against a [`PolicyStore`].
#[derive(Debug, Clone)]
pub struct AuthorizationEngine {
    store: Arc<PolicyStore>,
}

impl AuthorizationEngine {
    pub fn new(store: Arc<PolicyStore>) -> Self {
        Self { store }
    }

    /// Decide whether `role` may call `method path`.
    ///
    /// The decision alone never rejects anything; the caller applies the
    /// enforcement mode.
    #[instrument(skip_all)]
    pub fn decide(&self, method: &str, path: &str, role: Option<&str>) -> AuthorizationDecision {
        let policies = self.store.all();

        let Some(policy) = policies.iter().find(|p| p.matches(method, path)) else {
            tracing::debug!(
                target: "gateway.authz",
                decision = "allow",
                policy_id = "none",
                role = role.unwrap_or("none"),
                method = %method,
                path = %path,
                "No policy matched, allowing"
            );
            return AuthorizationDecision::unmatched();
        };

        let allowed = role.is_some_and(|r| policy.allows_role(r));
        let decision = AuthorizationDecision {
            allowed,
            policy_id: Some(policy.id.clone()),
            policy_version: policy.version.clone(),
        };

        tracing::info!(
            target: "gateway.authz",
            decision = decision.as_str(),
            policy_id = %policy.id,
            role = role.unwrap_or("none"),
            method = %method,
            path = %path,
            "Authorization decision"
        );

        decision
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn policy(id: &str, methods: &[&str], path: &str, roles: &[&str]) -> Policy {
        Policy {
            id: id.to_string(),
            methods: methods.iter().map(ToString::to_string).collect(),
            path: path.to_string(),
            roles: roles.iter().map(ToString::to_string).collect(),
            version: None,
        }
    }

    fn engine_with(policies: Vec<Policy>) -> AuthorizationEngine {
        let store = Arc::new(PolicyStore::new());
        store.replace_all(policies).unwrap();
        AuthorizationEngine::new(store)
    }

    #[test]
    fn test_matching_role_allows_and_other_role_denies() {
        let engine = engine_with(vec![policy("orders-read", &["GET"], "/orders", &["admin", "user"])]);

        let allowed = engine.decide("GET", "/orders", Some("user"));
        assert!(allowed.allowed);
        assert_eq!(allowed.policy_id.as_deref(), Some("orders-read"));

        let denied = engine.decide("GET", "/orders", Some("guest"));
        assert!(!denied.allowed);
        assert_eq!(denied.policy_id.as_deref(), Some("orders-read"));
    }

    #[test]
    fn test_missing_role_on_matched_policy_denies() {
        let engine = engine_with(vec![policy("orders-read", &["GET"], "/orders", &["user"])]);
        assert!(!engine.decide("GET", "/orders", None).allowed);
    }

    #[test]
    fn test_unmatched_route_allows_without_attribution() {
        let engine = engine_with(vec![policy("orders-read", &["GET"], "/orders", &["user"])]);

        for (method, path) in [("POST", "/orders"), ("GET", "/orders/1"), ("GET", "/users")] {
            let decision = engine.decide(method, path, None);
            assert_eq!(decision, AuthorizationDecision::unmatched(), "{} {}", method, path);
        }
    }

    #[test]
    fn test_first_registered_policy_wins() {
        let engine = engine_with(vec![
            policy("first", &["GET"], "/orders", &["admin"]),
            policy("second", &["GET"], "/orders", &["user"]),
        ]);

        let decision = engine.decide("GET", "/orders", Some("user"));
        assert!(!decision.allowed);
        assert_eq!(decision.policy_id.as_deref(), Some("first"));
    }

    #[test]
    fn test_methods_are_normalized() {
        let engine = engine_with(vec![policy("p", &["get", " Post "], "/orders", &["user"])]);

        assert!(engine.decide("GET", "/orders", Some("user")).allowed);
        assert!(engine.decide("POST", "/orders", Some("user")).allowed);
        assert_eq!(
            engine.store.all().first().unwrap().methods,
            vec!["GET".to_string(), "POST".to_string()]
        );
    }

    #[test]
    fn test_policy_version_is_reported() {
        let mut p = policy("p", &["GET"], "/orders", &["user"]);
        p.version = Some("3".to_string());
        let engine = engine_with(vec![p]);

        assert_eq!(
            engine.decide("GET", "/orders", Some("user")).policy_version.as_deref(),
            Some("3")
        );
    }

    #[test]
    fn test_invalid_policy_leaves_store_unchanged() {
        let store = PolicyStore::new();
        store
            .replace_all(vec![policy("keep", &["GET"], "/orders", &["user"])])
            .unwrap();

        for bad in [
            policy("", &["GET"], "/x", &["user"]),
            policy("p", &[], "/x", &["user"]),
            policy("p", &["GET"], "x", &["user"]),
        ] {
            let result = store.replace_all(vec![policy("ok", &["GET"], "/y", &[]), bad]);
            assert!(matches!(result, Err(GatewayError::ConfigValidation(_))));
        }

        let current = store.all();
        assert_eq!(current.len(), 1);
        assert_eq!(current.first().unwrap().id, "keep");
    }

    #[test]
    fn test_clear_makes_every_route_unmatched() {
        let store = Arc::new(PolicyStore::new());
        store
            .replace_all(vec![policy("p", &["GET"], "/orders", &["admin"])])
            .unwrap();
        let engine = AuthorizationEngine::new(Arc::clone(&store));
        assert!(!engine.decide("GET", "/orders", Some("user")).allowed);

        store.clear();

        assert!(store.all().is_empty());
        assert!(engine.decide("GET", "/orders", Some("user")).allowed);
    }
}
