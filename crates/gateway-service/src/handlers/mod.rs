//! HTTP request handlers for the API gateway.

pub mod admin;
pub mod health;
pub mod jwks;
pub mod proxy;
pub mod sts;

pub use admin::{
    clear_policies, get_backend, get_enforcement, get_jwt_config, get_policies, list_keys,
    purge_inactive_keys, replace_policies, rotate_keys, set_backend, set_enforcement,
    set_jwt_config,
};
pub use health::{health_check, metrics_handler};
pub use jwks::handle_get_jwks;
pub use proxy::proxy_request;
pub use sts::{issue_token, verify_token};
