//! JWKS proxy error types.
//!
//! Startup errors (`NoConfiguration`, `KeySource`) abort process
//! initialization. Every other variant is per-request and is converted into
//! an `ErrorResponse` at the HTTP boundary using `status_code()` and
//! `client_message()`. Messages for 5xx responses are intentionally generic;
//! the underlying cause is logged server-side.

use axum::http::StatusCode;
use std::fmt;
use thiserror::Error;

/// Registered claim checked against a caller allow-list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Claim {
    Aud,
    Iss,
    Sub,
}

impl Claim {
    pub fn as_str(self) -> &'static str {
        match self {
            Claim::Aud => "aud",
            Claim::Iss => "iss",
            Claim::Sub => "sub",
        }
    }
}

impl fmt::Display for Claim {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ways an HTTP request can violate the validate endpoint's protocol.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolViolation {
    #[error("method is not POST")]
    Method,

    #[error("content type is not application/json")]
    ContentType,

    #[error("body exceeds the configured size limit")]
    BodyTooLarge,

    #[error("failed to read body: {0}")]
    BodyUnreadable(String),

    #[error("failed to decode body: {0}")]
    Decode(String),
}

/// JWKS proxy error type.
///
/// Maps to HTTP status codes:
/// - TokenInvalid, ClaimMismatch: 400 Bad Request
/// - Protocol: 400 / 405 / 413 depending on the violation
/// - KeyResolution, Internal, NoConfiguration, KeySource: 500
#[derive(Debug, Error)]
pub enum JcpError {
    #[error("no remote JWK Set resources configured")]
    NoConfiguration,

    #[error("failed to get JWK Set from {endpoint}: {reason}")]
    KeySource { endpoint: String, reason: String },

    #[error("failed to parse token: {0}")]
    TokenInvalid(String),

    #[error("registered claim \"{0}\" did not match any values in the required set")]
    ClaimMismatch(Claim),

    #[error("request protocol error: {0}")]
    Protocol(ProtocolViolation),

    #[error("key resolution failed: {0}")]
    KeyResolution(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl JcpError {
    /// Returns the HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            JcpError::TokenInvalid(_) | JcpError::ClaimMismatch(_) => StatusCode::BAD_REQUEST,
            JcpError::Protocol(violation) => match violation {
                ProtocolViolation::Method => StatusCode::METHOD_NOT_ALLOWED,
                ProtocolViolation::BodyTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
                ProtocolViolation::ContentType
                | ProtocolViolation::BodyUnreadable(_)
                | ProtocolViolation::Decode(_) => StatusCode::BAD_REQUEST,
            },
            JcpError::NoConfiguration
            | JcpError::KeySource { .. }
            | JcpError::KeyResolution(_)
            | JcpError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message placed in the `msg` field of the error response.
    pub fn client_message(&self) -> String {
        match self {
            JcpError::TokenInvalid(_) | JcpError::ClaimMismatch(_) => {
                format!("Failed to validate token: {self}.")
            }
            JcpError::Protocol(violation) => match violation {
                ProtocolViolation::Method => "Incorrect HTTP method. Expected POST.".to_string(),
                ProtocolViolation::ContentType => {
                    "Incorrect Content-Type. Expected application/json.".to_string()
                }
                ProtocolViolation::BodyTooLarge => "Request body too large.".to_string(),
                ProtocolViolation::BodyUnreadable(_) => {
                    "Failed to read request body.".to_string()
                }
                ProtocolViolation::Decode(_) => {
                    "Failed to decode request body as JSON.".to_string()
                }
            },
            JcpError::KeyResolution(_) => "Failed to perform verification.".to_string(),
            JcpError::NoConfiguration | JcpError::KeySource { .. } | JcpError::Internal(_) => {
                "An internal error occurred.".to_string()
            }
        }
    }
}
