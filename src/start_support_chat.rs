//! Startup helpers for the support chat server.

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;

use crate::chat::core::config::ChatConfig;
use crate::server::{self, AppState};

/// Run the server until Ctrl-C.
///
/// # Returns
/// `ExitCode::SUCCESS` on graceful shutdown, `1` on failure.
#[must_use]
pub fn run() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    tracing::info!("Starting support chat v{}", env!("CARGO_PKG_VERSION"));

    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            tracing::error!("Failed to create runtime: {e}");
            return ExitCode::from(1);
        }
    };

    if let Err(e) = rt.block_on(serve()) {
        tracing::error!("Server error: {e:#}");
        return ExitCode::from(1);
    }

    ExitCode::SUCCESS
}

async fn serve() -> anyhow::Result<()> {
    let state = initialize().await?;
    let port = state.config.server.port;
    server::run_server_with_shutdown(state, port, shutdown_signal())
        .await
        .map_err(|e| anyhow::anyhow!(e))
        .context("HTTP server failed")
}

/// Load configuration from the environment and build application state.
///
/// # Errors
/// Returns an error if configuration is invalid or storage cannot be opened.
pub async fn initialize() -> anyhow::Result<Arc<AppState>> {
    let config = ChatConfig::from_env().context("Invalid configuration")?;
    tracing::info!(
        db = %config.storage.sqlite_path.display(),
        port = config.server.port,
        tokens = config.auth.token_secret.is_some(),
        anonymous_fallback = config.auth.allow_anonymous_fallback,
        "Configuration loaded"
    );
    AppState::new(config)
        .await
        .context("Failed to initialize chat state")
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!("Failed to listen for shutdown signal: {e}");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown requested");
}
