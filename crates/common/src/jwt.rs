//! JWT utilities shared across the JWKS proxy crates.
//!
//! This module provides:
//! - Key hint extraction (`kid` and `alg`) from an unverified JWT header
//! - The registered claims structure checked by the proxy
//! - An `Audience` type accepting both the string and array wire forms
//!
//! # Security
//!
//! - Header hints are only used to pick a key from a trusted JWKS; the token
//!   MUST still be verified with that key
//! - `alg: none` and unknown algorithms are rejected before any key lookup
//! - The `sub` field in `RegisteredClaims` is redacted in Debug output
//!
//! # Usage
//!
//! ```rust,ignore
//! use common::jwt::{extract_key_hints, RegisteredClaims};
//!
//! let hints = extract_key_hints(token)?;
//! let key = resolver.resolve(&hints, &cancel).await?;
//! let data = jsonwebtoken::decode::<RegisteredClaims>(token, &key, &validation)?;
//! ```

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use jsonwebtoken::Algorithm;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur while reading the unverified JWT header.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum JwtValidationError {
    /// Token format is invalid (not a valid JWT structure).
    #[error("token is malformed")]
    MalformedToken,

    /// Token is missing the `kid` header, or it is empty or not a string.
    #[error("token header has no key identifier")]
    MissingKid,

    /// Token `alg` header is missing or not a supported signing algorithm.
    #[error("token header has an unsupported algorithm")]
    UnsupportedAlgorithm,
}

// =============================================================================
// Key Hints
// =============================================================================

/// Key selection hints read from a JWT header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyHints {
    /// Key identifier used to select the key from a JWKS.
    pub kid: String,

    /// Signing algorithm declared by the token.
    pub alg: Algorithm,
}

/// Extract the `kid` and `alg` from a JWT header without verifying the signature.
///
/// # Errors
///
/// - `MalformedToken` - not three dot-separated parts, bad base64url, or the
///   header is not a JSON object
/// - `UnsupportedAlgorithm` - `alg` missing, `none`, or unknown
/// - `MissingKid` - `kid` missing, empty, or not a string
pub fn extract_key_hints(token: &str) -> Result<KeyHints, JwtValidationError> {
    // JWT format: header.payload.signature
    let parts: Vec<&str> = token.split('.').collect();
    if parts.len() != 3 {
        tracing::debug!(
            target: "common.jwt",
            parts = parts.len(),
            "Token rejected: invalid JWT format"
        );
        return Err(JwtValidationError::MalformedToken);
    }

    let header_part = parts.first().ok_or(JwtValidationError::MalformedToken)?;
    let header_bytes = URL_SAFE_NO_PAD.decode(header_part).map_err(|e| {
        tracing::debug!(target: "common.jwt", error = %e, "Failed to decode JWT header base64");
        JwtValidationError::MalformedToken
    })?;

    let header: serde_json::Value = serde_json::from_slice(&header_bytes).map_err(|e| {
        tracing::debug!(target: "common.jwt", error = %e, "Failed to parse JWT header JSON");
        JwtValidationError::MalformedToken
    })?;
    if !header.is_object() {
        return Err(JwtValidationError::MalformedToken);
    }

    let alg = header
        .get("alg")
        .and_then(|v| v.as_str())
        .and_then(|s| Algorithm::from_str(s).ok())
        .ok_or(JwtValidationError::UnsupportedAlgorithm)?;

    // Empty kid is rejected: it cannot select a key unambiguously
    let kid = header
        .get("kid")
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .map(ToString::to_string)
        .ok_or(JwtValidationError::MissingKid)?;

    Ok(KeyHints { kid, alg })
}

// =============================================================================
// Claims Types
// =============================================================================

/// The `aud` claim.
///
/// On the wire this is either a single string or an array of strings; both
/// forms deserialize to a list.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Audience(Vec<String>);

impl Audience {
    /// Whether `value` is one of the token's audiences.
    #[must_use]
    pub fn contains(&self, value: &str) -> bool {
        self.0.iter().any(|aud| aud == value)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[must_use]
    pub fn as_slice(&self) -> &[String] {
        &self.0
    }
}

impl From<Vec<String>> for Audience {
    fn from(values: Vec<String>) -> Self {
        Self(values)
    }
}

impl From<&str> for Audience {
    fn from(value: &str) -> Self {
        Self(vec![value.to_string()])
    }
}

impl<'de> Deserialize<'de> for Audience {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            One(String),
            Many(Vec<String>),
        }

        Ok(match Repr::deserialize(deserializer)? {
            Repr::One(value) => Self(vec![value]),
            Repr::Many(values) => Self(values),
        })
    }
}

/// Registered claims checked by the proxy.
///
/// Time claims are validated by `jsonwebtoken` during decoding; they are kept
/// here so test fixtures can mint tokens with them. They are NumericDate
/// values, which may carry a fractional part.
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct RegisteredClaims {
    /// Issuer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,

    /// Subject - redacted in Debug output.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,

    /// Audience.
    #[serde(default, skip_serializing_if = "Audience::is_empty")]
    pub aud: Audience,

    /// Expiration timestamp (Unix epoch seconds).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exp: Option<f64>,

    /// Not-before timestamp (Unix epoch seconds).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nbf: Option<f64>,

    /// Issued-at timestamp (Unix epoch seconds).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iat: Option<f64>,
}

impl fmt::Debug for RegisteredClaims {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegisteredClaims")
            .field("iss", &self.iss)
            .field("sub", &self.sub.as_ref().map(|_| "[REDACTED]"))
            .field("aud", &self.aud)
            .field("exp", &self.exp)
            .field("nbf", &self.nbf)
            .field("iat", &self.iat)
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
