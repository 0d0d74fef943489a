//! Inbound token authentication.
//!
//! - `jwks` - Remote key discovery with per-URI caching ([`RemoteKeyResolver`])
//! - `jwt` - Token verification against the enforcement config ([`TokenVerifier`])
//! - `claims` - Claims read from verified inbound tokens

pub mod claims;
pub mod jwks;
pub mod jwt;

pub use jwks::RemoteKeyResolver;
pub use jwt::TokenVerifier;
