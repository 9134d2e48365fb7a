//! Common utilities and types shared across the JWKS proxy crates.

#![warn(clippy::pedantic)]

/// Module for JWT utilities (header hints, registered claims)
pub mod jwt;

/// Module for deterministic signing fixtures used by tests
#[cfg(any(test, feature = "test-utils"))]
pub mod testing;
