//! Test server harness for E2E testing
//!
//! Provides `TestProxyServer` for spawning a real proxy, backed by a mock
//! JWKS endpoint, in tests.

use common::testing::{jwks_json, TestKeypair};
use jwks_proxy::config::{KeySourceConfig, DEFAULT_REQUEST_MAX_BYTES};
use jwks_proxy::routes::{self, AppState};
use jwks_proxy::services::build_validator;
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Path the mock JWKS server publishes keys under.
pub const JWKS_PATH: &str = "/.well-known/jwks.json";

/// Start a mock JWKS server publishing `keys` at `JWKS_PATH`.
pub async fn start_jwks_server(keys: &[&TestKeypair]) -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(JWKS_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(jwks_json(keys)))
        .mount(&server)
        .await;
    server
}

/// Full JWKS URL for a mock server started by `start_jwks_server`.
pub fn jwks_url(server: &MockServer) -> String {
    format!("{}{}", server.uri(), JWKS_PATH)
}

/// Refresh policy used by test key sources: no background refresh during a
/// test, short fetch timeout.
pub fn test_source_config() -> KeySourceConfig {
    KeySourceConfig {
        refresh_interval: Duration::from_secs(3600),
        refresh_timeout: Duration::from_secs(5),
    }
}

/// Test harness for spawning the JWKS proxy in E2E tests.
///
/// # Example
/// ```rust,ignore
/// let server = TestProxyServer::spawn(&[&keypair]).await?;
/// let response = reqwest::Client::new()
///     .get(server.validate_url())
///     .send()
///     .await?;
/// assert_eq!(response.status(), 405);
/// ```
pub struct TestProxyServer {
    addr: SocketAddr,
    jwks_server: MockServer,
    request_max_bytes: usize,
    _handle: JoinHandle<()>,
}

impl TestProxyServer {
    /// Spawn a proxy whose only key source publishes `keys`.
    pub async fn spawn(keys: &[&TestKeypair]) -> Result<Self, anyhow::Error> {
        Self::spawn_with_limit(keys, DEFAULT_REQUEST_MAX_BYTES).await
    }

    /// Spawn a proxy with a custom request body ceiling.
    ///
    /// The server will:
    /// - Start a mock JWKS server publishing `keys`
    /// - Bind to a random available port (127.0.0.1:0)
    /// - Start the HTTP server in the background
    pub async fn spawn_with_limit(
        keys: &[&TestKeypair],
        request_max_bytes: usize,
    ) -> Result<Self, anyhow::Error> {
        let jwks_server = start_jwks_server(keys).await;

        let sources = BTreeMap::from([(jwks_url(&jwks_server), test_source_config())]);
        let validator = build_validator(&sources)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to build validator: {}", e))?;

        let state = Arc::new(AppState {
            validator,
            request_max_bytes,
        });

        // Build routes using the proxy's real route builder
        let app = routes::build_routes(state);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .map_err(|e| anyhow::anyhow!("Failed to bind test server: {}", e))?;

        let addr = listener
            .local_addr()
            .map_err(|e| anyhow::anyhow!("Failed to get local address: {}", e))?;

        let handle = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                eprintln!("Test server error: {}", e);
            }
        });

        Ok(Self {
            addr,
            jwks_server,
            request_max_bytes,
            _handle: handle,
        })
    }

    /// Get the base URL of the test server.
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Get the validate endpoint URL.
    pub fn validate_url(&self) -> String {
        format!("{}/v1/validate", self.url())
    }

    /// Get the socket address.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Get the mock JWKS server backing this proxy.
    pub fn jwks_server(&self) -> &MockServer {
        &self.jwks_server
    }

    /// Get the configured request body ceiling.
    pub fn request_max_bytes(&self) -> usize {
        self.request_max_bytes
    }
}

impl Drop for TestProxyServer {
    fn drop(&mut self) {
        self._handle.abort();
    }
}
