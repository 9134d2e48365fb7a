//! JWKS Proxy Library
//!
//! A token-validation gateway. Callers POST a JWT plus optional `aud`, `iss`
//! and `sub` allow-lists to `/v1/validate`; the proxy verifies the signature
//! with keys fetched from one or more remote JWK Sets and checks the claims.
//!
//! Key sets are fetched at startup, refreshed in the background, and
//! refreshed on demand (rate limited) when a token names an unknown `kid`.

pub mod auth;
pub mod config;
pub mod errors;
pub mod handlers;
pub mod models;
pub mod routes;
pub mod services;
