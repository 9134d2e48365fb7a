//! Key retrieval for token verification.
//!
//! - `jwks`: one remote JWK Set endpoint with a background-refreshed cache
//! - `resolver`: the `KeyResolver` seam and the single/multi-source resolver

pub mod jwks;
pub mod resolver;

pub use jwks::JwksSource;
pub use resolver::{KeyResolver, MultiJwksSource, Resolver};
