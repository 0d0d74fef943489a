//! Background tasks for the API gateway.
//!
//! # Tasks
//!
//! - `key_rotation` - Rotates the gateway signing key on a fixed interval

pub mod key_rotation;

pub use key_rotation::start_key_rotation;
