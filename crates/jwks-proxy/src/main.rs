//! JWKS Proxy
//!
//! Entry point for the token-validation gateway.

use jwks_proxy::config::{Config, LogFormat};
use jwks_proxy::routes::{self, AppState};
use jwks_proxy::services::build_validator;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Configuration selects the log format, so it is loaded before tracing is
    // initialized and its errors are reported once the subscriber exists
    let config = Config::from_env();
    let log_format = config
        .as_ref()
        .map(|c| c.log_format)
        .unwrap_or_default();
    init_tracing(log_format);

    info!("Starting JWKS proxy");

    let config = config.map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;

    info!(
        listen_address = %config.listen_address,
        source_count = config.jwks.len(),
        request_max_bytes = config.request_max_bytes,
        "Configuration loaded successfully"
    );

    let validator = build_validator(&config.jwks).await.map_err(|e| {
        error!("Failed to create JWKS proxy: {}", e);
        e
    })?;

    let state = Arc::new(AppState {
        validator,
        request_max_bytes: config.request_max_bytes,
    });

    let app = routes::build_routes(Arc::clone(&state));

    let listener = tokio::net::TcpListener::bind(config.listen_address)
        .await
        .map_err(|e| {
            error!("Failed to bind {}: {}", config.listen_address, e);
            e
        })?;

    info!("JWKS proxy listening on {}", config.listen_address);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    state.validator.resolver().shutdown();

    info!("JWKS proxy shutdown complete");

    Ok(())
}

fn init_tracing(log_format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "jwks_proxy=info,jcp=info,tower_http=info".into());

    let registry = tracing_subscriber::registry().with(filter);
    match log_format {
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
        LogFormat::Human => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}

/// Listens for shutdown signals (SIGTERM, SIGINT).
async fn shutdown_signal() {
    let ctrl_c = async {
        match signal::ctrl_c().await {
            Ok(()) => info!("Received SIGINT, starting graceful shutdown..."),
            Err(e) => error!("Failed to listen for SIGINT: {}", e),
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
                info!("Received SIGTERM, starting graceful shutdown...");
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
