//! HTTP request handlers for the JWKS proxy.

pub mod validate;

pub use validate::validate_token;
