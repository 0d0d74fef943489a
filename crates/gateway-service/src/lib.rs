//! API Gateway Service Library
//!
//! Trust boundary between external clients and the backend service: verifies
//! inbound bearer tokens, authorizes requests against a policy set, and
//! replaces the inbound credential with a short-lived gateway-signed token
//! before forwarding.
//!
//! # Modules
//!
//! - `auth` - Remote key discovery and inbound token verification
//! - `config` - Service configuration
//! - `crypto` - RSA key generation and JWS signing
//! - `errors` - Error types
//! - `handlers` - HTTP request handlers
//! - `middleware` - HTTP middleware
//! - `models` - Data models
//! - `observability` - Tracing setup and metrics
//! - `pipeline` - Per-request verify, authorize, exchange, forward
//! - `repositories` - Signing key persistence
//! - `routes` - Router and application state
//! - `services` - Business logic layer
//! - `tasks` - Background tasks

pub mod auth;
pub mod config;
pub mod crypto;
pub mod errors;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod observability;
pub mod pipeline;
pub mod repositories;
pub mod routes;
pub mod services;
pub mod tasks;
