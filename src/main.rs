#![forbid(unsafe_code)]

//! `handoff-desk` server binary.
//!
//! Bootstraps configuration and the database, seeds the agent roster,
//! starts the stale-offer sweeper and queue reconciler, and serves the
//! HTTP API and delivery WebSocket.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

use handoff_desk::config::GlobalConfig;
use handoff_desk::http::{self, AppState};
use handoff_desk::orchestrator::maintenance;
use handoff_desk::persistence::db;
use handoff_desk::{AppError, Result};

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "handoff-desk", about = "Live support handoff orchestrator", version, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long)]
    config: PathBuf,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Override the configured HTTP port.
    #[arg(long)]
    port: Option<u16>,
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.log_format)?;
    info!("handoff-desk server bootstrap");

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(run(args))
}

async fn run(args: Cli) -> Result<()> {
    // ── Load configuration ──────────────────────────────
    let mut config = GlobalConfig::load_from_path(&args.config)?;
    if let Some(port) = args.port {
        config.http_port = port;
    }
    let config = Arc::new(config);
    info!(agents = config.agents.len(), "configuration loaded");

    // ── Initialize database ─────────────────────────────
    let db = Arc::new(db::connect(&config.db_path).await?);
    info!(path = %config.db_path.display(), "database connected");

    // ── Build shared application state ──────────────────
    let state = Arc::new(AppState::new(Arc::clone(&config), db));
    state.bootstrap().await?;

    // ── Start background passes ─────────────────────────
    let ct = CancellationToken::new();
    let sweeper = maintenance::spawn_sweeper(Arc::clone(&state.orchestrator), ct.clone());
    let reconciler = maintenance::spawn_reconciler(Arc::clone(&state.orchestrator), ct.clone());
    info!("sweeper and reconciler started");

    // ── Start transport ─────────────────────────────────
    let http_ct = ct.clone();
    let http_state = Arc::clone(&state);
    let http_handle = tokio::spawn(async move {
        if let Err(err) = http::serve(http_state, http_ct).await {
            error!(%err, "http transport failed");
        }
    });

    // ── Wait for shutdown signal ────────────────────────
    shutdown_signal().await;
    info!("shutdown signal received");
    ct.cancel();

    for (name, handle) in [("http", http_handle), ("sweeper", sweeper), ("reconciler", reconciler)] {
        if let Err(err) = handle.await {
            error!(task = name, %err, "task ended abnormally");
        }
    }
    info!("handoff-desk stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(err) => {
                tracing::warn!(%err, "failed to register SIGTERM handler, using ctrl-c only");
                let _ = ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(err) = ctrl_c.await {
            tracing::error!(%err, "ctrl-c signal handler failed");
        }
    }
}

fn init_tracing(log_format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt().with_env_filter(env_filter);

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
    }

    Ok(())
}
