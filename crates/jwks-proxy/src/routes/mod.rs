//! HTTP routes for the JWKS proxy.
//!
//! Defines the Axum router and application state.

use crate::config::REQUEST_TIMEOUT;
use crate::handlers;
use crate::services::ClaimsValidator;
use axum::{routing::any, Router};
use std::sync::Arc;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

/// Application state shared across all handlers.
pub struct AppState {
    /// Token validator, built once at startup.
    pub validator: ClaimsValidator,

    /// Maximum accepted request body size in bytes.
    pub request_max_bytes: usize,
}

/// Build the application routes.
///
/// Creates an Axum router with:
/// - `/v1/validate` - Token validation. Every method is routed to the handler
///   so that non-POST requests get a JSON 405 with a request ID.
/// - TraceLayer for request logging
/// - 30 second request timeout
pub fn build_routes(state: Arc<AppState>) -> Router {
    let routes = Router::new()
        .route("/v1/validate", any(handlers::validate_token))
        .with_state(state);

    routes
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(REQUEST_TIMEOUT))
}
