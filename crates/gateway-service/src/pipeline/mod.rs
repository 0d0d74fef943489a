//! Per-request gateway pipeline.
//!
//! Stages run in a fixed order and each returns a [`StageResult`]:
//!
//! 1. Authenticate - extract the bearer token
//! 2. Verify - validate it against the enforcement config snapshot
//! 3. Authorize - decide against the policy set
//! 4. Exchange - mint the downstream token when an identity exists
//! 5. Forward - hand the request to the [`Forwarder`]
//!
//! Under `enforce` a failed stage ends the request; under `audit` it is
//! logged and the request continues. Nothing is forwarded after a
//! terminal stage.

use crate::auth::jwt::TokenVerifier;
use crate::errors::{GatewayError, INVALID_TOKEN_MESSAGE};
use crate::models::{AuthorizationDecision, EnforcementConfig, ExchangeDecision, VerifiedIdentity};
use crate::observability::hash_for_correlation;
use crate::observability::metrics::{record_authz_decision, record_pipeline_outcome};
use crate::services::exchange_service::TokenExchanger;
use crate::services::policy_service::AuthorizationEngine;
use crate::services::proxy_client::{ForwardRequest, ForwardResponse, Forwarder};
use crate::services::runtime_config::{BackendTarget, EnforcementStore};
use axum::http::{header, HeaderMap, Method};
use bytes::Bytes;
use chrono::Utc;
use std::sync::Arc;
use tracing::instrument;

/// Request as the gateway received it.
#[derive(Debug, Clone)]
pub struct InboundRequest {
    pub method: Method,
    pub path: String,
    pub query: Option<String>,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl InboundRequest {
    /// Bearer token from the `Authorization` header.
    ///
    /// `None` when the header is absent, not valid ASCII, or not a bearer credential.
    pub fn bearer_token(&self) -> Option<&str> {
        self.headers
            .get(header::AUTHORIZATION)
            .and_then(|h| h.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(str::trim)
            .filter(|t| !t.is_empty())
    }
}

/// Result of a single stage.
#[derive(Debug)]
pub enum StageResult<T> {
    /// Advance with the stage's output.
    Continue(T),

    /// Stop and answer the client with this error.
    Terminal(GatewayError),
}

/// What the pipeline did with a request.
#[derive(Debug)]
pub struct PipelineOutcome {
    /// Identity established by the verify stage, if any.
    pub identity: Option<VerifiedIdentity>,

    /// Backend response, or the error to answer with.
    pub result: Result<ForwardResponse, GatewayError>,
}

/// Composes verification, authorization, exchange and forwarding.
pub struct GatewayPipeline {
    verifier: Arc<TokenVerifier>,
    engine: AuthorizationEngine,
    exchanger: Arc<TokenExchanger>,
    enforcement: Arc<EnforcementStore>,
    backend: Arc<BackendTarget>,
    forwarder: Arc<dyn Forwarder>,
}

impl GatewayPipeline {
    pub fn new(
        verifier: Arc<TokenVerifier>,
        engine: AuthorizationEngine,
        exchanger: Arc<TokenExchanger>,
        enforcement: Arc<EnforcementStore>,
        backend: Arc<BackendTarget>,
        forwarder: Arc<dyn Forwarder>,
    ) -> Self {
        Self {
            verifier,
            engine,
            exchanger,
            enforcement,
            backend,
            forwarder,
        }
    }

    /// Run `request` through every stage.
    #[instrument(skip_all, fields(method = %request.method, path = %request.path))]
    pub async fn handle(&self, request: InboundRequest) -> PipelineOutcome {
        // One snapshot for the whole request so verification and
        // authorization see the same mode and verifier settings
        let config = self.enforcement.load();

        let identity = match self.verify(&request, &config).await {
            StageResult::Continue(identity) => identity,
            StageResult::Terminal(err) => return terminal(None, err, "unauthorized"),
        };

        let decision = match self.authorize(&request, identity.as_ref(), &config) {
            StageResult::Continue(decision) => decision,
            StageResult::Terminal(err) => return terminal(identity, err, "forbidden"),
        };

        let exchanged_token = match self.exchange(identity.as_ref(), &decision).await {
            StageResult::Continue(token) => token,
            StageResult::Terminal(err) => return terminal(identity, err, "exchange_failed"),
        };

        let result = self.forward(request, exchanged_token).await;
        record_pipeline_outcome(if result.is_ok() {
            "forwarded"
        } else {
            "upstream_failed"
        });

        PipelineOutcome { identity, result }
    }

    async fn verify(
        &self,
        request: &InboundRequest,
        config: &EnforcementConfig,
    ) -> StageResult<Option<VerifiedIdentity>> {
        let enforcing = config.enforcement_mode.is_enforcing();

        let Some(token) = request.bearer_token() else {
            if enforcing {
                tracing::info!(target: "gateway.pipeline", path = %request.path, "Missing bearer token, rejecting");
                return StageResult::Terminal(GatewayError::Unauthorized(
                    INVALID_TOKEN_MESSAGE.to_string(),
                ));
            }
            tracing::debug!(target: "gateway.pipeline", path = %request.path, "Missing bearer token, continuing anonymously (audit)");
            return StageResult::Continue(None);
        };

        match self.verifier.verify(token, config).await {
            Ok(identity) => StageResult::Continue(Some(identity)),
            Err(e) if enforcing => {
                tracing::info!(target: "gateway.pipeline", reason = e.code(), path = %request.path, "Token rejected");
                StageResult::Terminal(e.into())
            }
            Err(e) => {
                tracing::warn!(target: "gateway.pipeline", reason = e.code(), path = %request.path, "Token invalid, continuing anonymously (audit)");
                StageResult::Continue(None)
            }
        }
    }

    fn authorize(
        &self,
        request: &InboundRequest,
        identity: Option<&VerifiedIdentity>,
        config: &EnforcementConfig,
    ) -> StageResult<AuthorizationDecision> {
        let role = identity.and_then(|i| i.role.as_deref());
        let decision = self
            .engine
            .decide(request.method.as_str(), &request.path, role);

        if decision.allowed {
            record_authz_decision("allow", "none");
            return StageResult::Continue(decision);
        }

        let policy_id = decision.policy_id.clone().unwrap_or_default();

        if config.enforcement_mode.is_enforcing() {
            record_authz_decision("deny", "enforced");
            tracing::info!(
                target: "gateway.pipeline",
                decision = "deny",
                effect = "enforced",
                policy_id = %policy_id,
                role = role.unwrap_or("none"),
                method = %request.method,
                path = %request.path,
                "Request denied by policy"
            );
            return StageResult::Terminal(GatewayError::PolicyDeny { policy_id });
        }

        record_authz_decision("deny", "audited");
        tracing::warn!(
            target: "gateway.pipeline",
            decision = "deny",
            effect = "audited",
            policy_id = %policy_id,
            role = role.unwrap_or("none"),
            method = %request.method,
            path = %request.path,
            "Policy would deny request, continuing (audit)"
        );
        StageResult::Continue(decision)
    }

    async fn exchange(
        &self,
        identity: Option<&VerifiedIdentity>,
        decision: &AuthorizationDecision,
    ) -> StageResult<Option<String>> {
        let Some(identity) = identity else {
            return StageResult::Continue(None);
        };

        let exchange_decision = ExchangeDecision::from_decision(decision, Utc::now());
        match self.exchanger.exchange(identity, &exchange_decision).await {
            Ok(token) => StageResult::Continue(Some(token)),
            Err(e) => {
                tracing::error!(
                    target: "gateway.pipeline",
                    user = %hash_for_correlation(&identity.user_id),
                    error = %e,
                    "Token exchange failed"
                );
                StageResult::Terminal(e)
            }
        }
    }

    async fn forward(
        &self,
        request: InboundRequest,
        exchanged_token: Option<String>,
    ) -> Result<ForwardResponse, GatewayError> {
        let mut headers = request.headers;
        // The backend only ever sees the exchanged credential
        headers.remove(header::AUTHORIZATION);

        let backend_url = self.backend.load();
        self.forwarder
            .forward(
                &backend_url,
                ForwardRequest {
                    method: request.method,
                    path: request.path,
                    query: request.query,
                    headers,
                    body: request.body,
                    exchanged_token,
                },
            )
            .await
    }
}

fn terminal(
    identity: Option<VerifiedIdentity>,
    err: GatewayError,
    outcome: &str,
) -> PipelineOutcome {
    record_pipeline_outcome(outcome);
    PipelineOutcome {
        identity,
        result: Err(err),
    }
}
