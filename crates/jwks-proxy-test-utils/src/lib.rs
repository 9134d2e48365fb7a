//! # JWKS Proxy Test Utilities
//!
//! Shared test utilities for the JWKS proxy.
//!
//! This crate provides:
//! - Mock JWKS endpoints (`start_jwks_server`)
//! - Server test harness (`TestProxyServer` for E2E tests)
//!
//! ## Usage
//!
//! ```rust,ignore
//! use common::testing::TestKeypair;
//! use jwks_proxy_test_utils::*;
//!
//! #[tokio::test]
//! async fn test_example() -> Result<()> {
//!     let keypair = TestKeypair::new(1, "key-1")?;
//!     let server = TestProxyServer::spawn(&[&keypair]).await?;
//!
//!     let response = reqwest::Client::new()
//!         .post(server.validate_url())
//!         .json(&serde_json::json!({"args": {"token": keypair.sign(&claims)?}}))
//!         .send()
//!         .await?;
//!
//!     assert_eq!(response.status(), 200);
//!     Ok(())
//! }
//! ```

pub mod server_harness;

// Re-export commonly used items
pub use server_harness::*;
