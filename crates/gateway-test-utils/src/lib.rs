//! # Gateway Test Utilities
//!
//! Shared test utilities for the API gateway.
//!
//! This crate provides:
//! - Identity provider key fixtures (RSA keypairs cached per process)
//! - Test data builders (TestTokenBuilder)
//! - Mock upstream identity provider and echoing backend (wiremock)
//! - Server test harness (TestGatewayServer for E2E tests)
//!
//! ## Usage
//!
//! ```rust,ignore
//! use gateway_test_utils::*;
//!
//! #[tokio::test]
//! async fn test_example() -> anyhow::Result<()> {
//!     let idp = MockIdentityProvider::start().await;
//!     let backend = MockBackend::start().await;
//!     let server = TestGatewayServer::spawn(&idp, &backend, EnforcementMode::Enforce).await?;
//!
//!     let token = idp.token().with_role("admin").sign();
//!     let response = reqwest::Client::new()
//!         .get(format!("{}/orders", server.url()))
//!         .bearer_auth(token)
//!         .send()
//!         .await?;
//!     assert_eq!(response.status(), 200);
//!     Ok(())
//! }
//! ```

pub mod crypto_fixtures;
pub mod mock_backend;
pub mod mock_idp;
pub mod server_harness;
pub mod token_builders;

// Re-export commonly used items
pub use crypto_fixtures::*;
pub use mock_backend::*;
pub use mock_idp::*;
pub use server_harness::*;
pub use token_builders::*;

pub use gateway_service::models::EnforcementMode;
