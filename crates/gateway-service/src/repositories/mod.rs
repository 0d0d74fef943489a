//! Persistence layer.

pub mod signing_keys;

pub use signing_keys::{KeyRecord, KeyRegistry, SigningKeyRepository};
