//! Main Entrypoint for the Voice Agent Relay
//!
//! This binary is responsible for:
//! 1. Loading configuration from the environment.
//! 2. Initializing logging and the shared application state.
//! 3. Constructing the Axum router.
//! 4. Serving until a termination signal, then draining open connections.

use anyhow::Context;
use std::{sync::Arc, time::Duration};
use tracing::{info, warn};
use voice_relay_api::{
    config::{Config, ConfigError},
    router::create_router,
    state::AppState,
};

/// How long the listener gets to finish in-flight HTTP requests after the drain.
const SERVER_STOP_TIMEOUT: Duration = Duration::from_secs(10);

/// Waits for Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    info!("Received shutdown signal. Shutting down gracefully...");
}

fn print_missing_api_key() {
    eprintln!("\nERROR: Deepgram API key not found!\n");
    eprintln!("Please set your API key using one of these methods:\n");
    eprintln!("1. Create a .env file (recommended):");
    eprintln!("   DEEPGRAM_API_KEY=your_api_key_here\n");
    eprintln!("2. Environment variable:");
    eprintln!("   export DEEPGRAM_API_KEY=your_api_key_here\n");
    eprintln!("Get your API key at: https://console.deepgram.com\n");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // --- 1. Load Configuration ---
    let config = match Config::from_env() {
        Ok(config) => config,
        Err(ConfigError::MissingVar(var)) if var == "DEEPGRAM_API_KEY" => {
            print_missing_api_key();
            std::process::exit(1);
        }
        Err(e) => return Err(e).context("Failed to load configuration"),
    };

    // --- 2. Initialize Logging ---
    tracing_subscriber::fmt()
        .with_max_level(config.log_level)
        .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
        .init();

    let bind_address = config.bind_address;
    let app_state = Arc::new(AppState::new(config));

    // --- 3. Create Router ---
    let app = create_router(app_state.clone());

    // --- 4. Start Server ---
    let listener = tokio::net::TcpListener::bind(bind_address)
        .await
        .with_context(|| format!("Failed to bind {bind_address}"))?;
    info!(
        bind_address = %bind_address,
        upstream = %app_state.config.upstream_url,
        cors_origins = ?app_state.config.cors_origins,
        "Relay listening: GET /api/session, GET /api/metadata, WS /api/voice-agent"
    );

    let stop_accepting = app_state.shutdown.token();
    let mut server = tokio::spawn(
        axum::serve(listener, app)
            .with_graceful_shutdown(stop_accepting.cancelled_owned())
            .into_future(),
    );

    tokio::select! {
        _ = shutdown_signal() => {}
        result = &mut server => {
            result.context("Server task panicked")?.context("Server exited unexpectedly")?;
            return Ok(());
        }
    }

    // Cancelling the token stops the listener and rejects new upgrades
    // while the drain runs.
    let report = app_state.shutdown.shutdown().await;
    if !report.failed.is_empty() {
        warn!(failed = ?report.failed, "Some connections did not close cleanly");
    }

    match tokio::time::timeout(SERVER_STOP_TIMEOUT, server).await {
        Ok(result) => result
            .context("Server task panicked")?
            .context("Server exited with an error")?,
        Err(_) => warn!("Server did not stop in time, exiting anyway"),
    }

    info!("Server has shut down.");
    Ok(())
}
