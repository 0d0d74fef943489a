//! Common utilities and types shared across the trust gateway crates.

#![warn(clippy::pedantic)]

/// Module for secret types that prevent accidental logging
pub mod secret;

/// Module for JWT utilities (size limits, key selection, iat validation)
pub mod jwt;

/// Module for JSON Web Key Set wire types
pub mod jwks;

/// Module for atomically replaceable shared state
pub mod snapshot;
