//! Startup helpers for the chat relay server.

use std::future::Future;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;

use crate::config::RelayConfig;
use crate::server::{self, AppState};

/// Run the server (used by the `chat-relay-server` binary).
///
/// # Returns
/// `ExitCode::SUCCESS` on graceful shutdown, `1` on failure.
#[must_use]
pub fn run() -> ExitCode {
    init_tracing();

    tracing::info!("Starting chat relay v{}", env!("CARGO_PKG_VERSION"));

    let config = match RelayConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("Failed to load configuration: {e}");
            return ExitCode::from(1);
        }
    };
    tracing::info!(
        "Completion endpoint: {} (model {})",
        config.completion.endpoint,
        config.completion.model
    );

    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            tracing::error!("Failed to create runtime: {e}");
            return ExitCode::from(1);
        }
    };

    if let Err(e) = rt.block_on(serve(config)) {
        tracing::error!("Server error: {e:#}");
        return ExitCode::from(1);
    }

    tracing::info!("Chat relay stopped");
    ExitCode::SUCCESS
}

/// Install the global `tracing` subscriber; `RUST_LOG` overrides the `info` default.
pub fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(tracing::Level::INFO.as_str()));

    // A subscriber may already be installed when embedded in another binary.
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

/// Initialize application state without starting the server.
///
/// # Errors
/// Returns an error if the store cannot be opened or the completion client cannot be built.
pub async fn initialize(config: &RelayConfig) -> anyhow::Result<Arc<AppState>> {
    AppState::from_config(config)
        .await
        .context("failed to initialize application state")
}

/// Run server with graceful shutdown.
///
/// # Errors
/// Returns an error if the server fails.
pub async fn run_server_with_shutdown<F>(
    state: Arc<AppState>,
    port: u16,
    shutdown_signal: F,
) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    server::run_server_with_shutdown(state, port, shutdown_signal)
        .await
        .with_context(|| format!("failed to serve on port {port}"))
}

async fn serve(config: RelayConfig) -> anyhow::Result<()> {
    let state = initialize(&config).await?;
    run_server_with_shutdown(state, config.server.port, shutdown_signal()).await
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!("Failed to listen for Ctrl-C, running until killed: {e}");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
