//! Token validation handler.
//!
//! `POST /v1/validate` runs a fixed sequence: mint a request ID, check the
//! method, check the Content-Type, read the body under the size ceiling,
//! decode the envelope, validate. The first failing step decides the
//! response. Every response is JSON and carries the request ID.
//!
//! ## Example Request
//!
//! ```json
//! {"args": {"aud": ["api"], "iss": [], "sub": [], "token": "eyJ..."}}
//! ```
//!
//! ## Example Response
//!
//! ```json
//! {"results": {"success": true}, "meta": {"uuid": "6a1f..."}}
//! ```

use crate::errors::{JcpError, ProtocolViolation};
use crate::models::{ErrorResponse, RequestMeta, ValidateRequest, ValidateResponse, ValidateResults};
use crate::routes::AppState;
use axum::body::Bytes;
use axum::extract::{Request, State};
use axum::http::{header, HeaderMap, HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use http_body_util::LengthLimitError;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

const APPLICATION_JSON: &str = "application/json";

/// Validate a token against caller-supplied claim allow-lists.
#[instrument(skip_all, name = "jcp.http.validate")]
pub async fn validate_token(State(state): State<Arc<AppState>>, request: Request) -> Response {
    let Ok(meta) = RequestMeta::generate() else {
        return error_response(
            RequestMeta::nil(),
            &JcpError::Internal("failed to generate request UUID".to_string()),
        );
    };

    // Cancelled when this future is dropped (client gone or request timeout)
    let cancel = CancellationToken::new();
    let _cancel_on_drop = cancel.clone().drop_guard();

    match process(&state, request, &cancel).await {
        Ok(results) => success_response(meta, results),
        Err(err) => error_response(meta, &err),
    }
}

async fn process(
    state: &AppState,
    request: Request,
    cancel: &CancellationToken,
) -> Result<ValidateResults, JcpError> {
    if request.method() != Method::POST {
        return Err(JcpError::Protocol(ProtocolViolation::Method));
    }

    if !is_json_content_type(request.headers()) {
        return Err(JcpError::Protocol(ProtocolViolation::ContentType));
    }

    let body = read_body(request, state.request_max_bytes).await?;

    let envelope: ValidateRequest = serde_json::from_slice(&body)
        .map_err(|e| JcpError::Protocol(ProtocolViolation::Decode(e.to_string())))?;

    state.validator.validate(&envelope.args, cancel).await
}

/// Whether the media type (parameters ignored) is `application/json`.
fn is_json_content_type(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(';').next())
        .is_some_and(|media_type| media_type.trim().eq_ignore_ascii_case(APPLICATION_JSON))
}

/// Read at most `limit` bytes of body.
async fn read_body(request: Request, limit: usize) -> Result<Bytes, JcpError> {
    axum::body::to_bytes(request.into_body(), limit)
        .await
        .map_err(|err| {
            let cause = err.into_inner();
            if cause.downcast_ref::<LengthLimitError>().is_some() {
                JcpError::Protocol(ProtocolViolation::BodyTooLarge)
            } else {
                JcpError::Protocol(ProtocolViolation::BodyUnreadable(cause.to_string()))
            }
        })
}

fn success_response(meta: RequestMeta, results: ValidateResults) -> Response {
    let body = ValidateResponse { results, meta };
    match serde_json::to_vec(&body) {
        Ok(bytes) => {
            tracing::info!(
                target: "jcp.http",
                request_id = %meta.uuid,
                status = StatusCode::OK.as_u16(),
                "Token validated"
            );
            json_response(StatusCode::OK, bytes)
        }
        Err(e) => error_response(
            meta,
            &JcpError::Internal(format!("failed to encode response: {e}")),
        ),
    }
}

/// Log `err` once and render it as an `ErrorResponse`.
fn error_response(meta: RequestMeta, err: &JcpError) -> Response {
    let status = err.status_code();
    let msg = err.client_message();

    if status.is_server_error() {
        tracing::error!(
            target: "jcp.http",
            request_id = %meta.uuid,
            status = status.as_u16(),
            msg = %msg,
            error = %err,
            "Request failed"
        );
    } else {
        tracing::warn!(
            target: "jcp.http",
            request_id = %meta.uuid,
            status = status.as_u16(),
            msg = %msg,
            error = %err,
            "Request rejected"
        );
    }

    let body = ErrorResponse {
        code: status.as_u16(),
        meta,
        msg,
    };
    let bytes = serde_json::to_vec(&body).unwrap_or_else(|e| {
        tracing::error!(target: "jcp.http", request_id = %meta.uuid, error = %e, "Failed to encode error response");
        fallback_error_body(status, meta).into_bytes()
    });

    let mut response = json_response(status, bytes);
    if matches!(err, JcpError::Protocol(ProtocolViolation::Method)) {
        response
            .headers_mut()
            .insert(header::ALLOW, HeaderValue::from_static("POST"));
    }
    response
}

/// Error body written without serde.
fn fallback_error_body(status: StatusCode, meta: RequestMeta) -> String {
    format!(
        r#"{{"code":{},"meta":{{"uuid":"{}"}},"msg":"Failed to JSON encode error response."}}"#,
        status.as_u16(),
        meta.uuid
    )
}

fn json_response(status: StatusCode, body: Vec<u8>) -> Response {
    (
        status,
        [(header::CONTENT_TYPE, HeaderValue::from_static(APPLICATION_JSON))],
        body,
    )
        .into_response()
}
