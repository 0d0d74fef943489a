//! Service layer for the API gateway.
//!
//! # Components
//!
//! - `key_management_service` - Gateway signing key lifecycle ([`KeyStore`])
//! - `token_service` - Token signing with the current key ([`TokenSigner`])
//! - `policy_service` - Policy set and authorization decisions
//! - `exchange_service` - Downstream token minting ([`TokenExchanger`])
//! - `runtime_config` - Admin-mutable enforcement settings and backend target
//! - `proxy_client` - Forwarding collaborator

pub mod exchange_service;
pub mod key_management_service;
pub mod policy_service;
pub mod proxy_client;
pub mod runtime_config;
pub mod token_service;

pub use exchange_service::TokenExchanger;
pub use key_management_service::KeyStore;
pub use policy_service::{AuthorizationEngine, PolicyStore};
pub use proxy_client::{Forwarder, HttpForwarder};
pub use runtime_config::{BackendTarget, EnforcementStore};
pub use token_service::TokenSigner;
