//! Wire models for the validate endpoint.

use ring::rand::{SecureRandom, SystemRandom};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Token and claim constraints supplied by the caller.
///
/// Empty allow-lists impose no constraint.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ValidateArgs {
    /// Compact-serialized JWT.
    pub token: String,

    /// Accepted audiences.
    #[serde(default)]
    pub aud: Vec<String>,

    /// Accepted issuers.
    #[serde(default)]
    pub iss: Vec<String>,

    /// Accepted subjects.
    #[serde(default)]
    pub sub: Vec<String>,
}

/// Request envelope for `POST /v1/validate`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ValidateRequest {
    pub args: ValidateArgs,
}

/// Outcome of a successful validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct ValidateResults {
    pub success: bool,
}

/// Per-request correlation data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct RequestMeta {
    pub uuid: Uuid,
}

impl RequestMeta {
    /// Mint a random (version 4) request identifier from the system CSPRNG.
    ///
    /// # Errors
    ///
    /// Returns `ring::error::Unspecified` if the CSPRNG is unavailable.
    pub fn generate() -> Result<Self, ring::error::Unspecified> {
        let rng = SystemRandom::new();
        let mut bytes = [0u8; 16];
        rng.fill(&mut bytes)?;

        // Set version (4) and variant (RFC 4122) bits
        bytes[6] = (bytes[6] & 0x0f) | 0x40;
        bytes[8] = (bytes[8] & 0x3f) | 0x80;

        Ok(Self {
            uuid: Uuid::from_bytes(bytes),
        })
    }

    /// Placeholder used when no identifier could be minted.
    pub fn nil() -> Self {
        Self { uuid: Uuid::nil() }
    }
}

/// Success body.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ValidateResponse {
    pub results: ValidateResults,
    pub meta: RequestMeta,
}

/// Error body. `code` mirrors the HTTP status.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ErrorResponse {
    pub code: u16,
    pub meta: RequestMeta,
    pub msg: String,
}
