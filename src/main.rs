#![forbid(unsafe_code)]

//! `mcp-relay`: stateless MCP SSE relay binary.
//!
//! Bootstraps configuration, connects the broker, and serves the stream
//! and submit endpoints until SIGINT/SIGTERM.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

use mcp_relay::http::{self, AppState};
use mcp_relay::{broker, AppError, RelayConfig, Result};

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "mcp-relay", about = "Stateless MCP SSE relay", version, long_about = None)]
struct Cli {
    /// Path to an optional TOML configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Override the HTTP port (takes precedence over `PORT`).
    #[arg(long)]
    port: Option<u16>,
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.log_format)?;
    info!("mcp-relay bootstrap");

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(run(args))
}

async fn run(args: Cli) -> Result<()> {
    // ── Load configuration ──────────────────────────────
    let mut config = match args.config {
        Some(path) => RelayConfig::load_from_path(path)?,
        None => RelayConfig::default(),
    };
    config.apply_env_overrides()?;
    if let Some(port) = args.port {
        config.http_port = port;
    }
    config.load_broker_url()?;
    let config = Arc::new(config);
    info!(
        max_duration_seconds = config.max_duration_seconds,
        response_timeout_seconds = config.response_timeout_seconds,
        "configuration loaded"
    );

    // ── Connect broker (fatal on failure) ───────────────
    let broker = broker::connect(&config.broker_url).await.map_err(|err| {
        error!(%err, "broker connection failed");
        err
    })?;

    let state = Arc::new(AppState::new(Arc::clone(&config), broker));

    // ── Serve until shutdown ────────────────────────────
    let ct = CancellationToken::new();
    let server_ct = ct.clone();
    let mut server = tokio::spawn(http::serve(Arc::clone(&state), server_ct));

    let exited_early = tokio::select! {
        () = shutdown_signal() => None,
        joined = &mut server => Some(joined),
    };
    let joined = match exited_early {
        Some(joined) => joined,
        None => {
            info!("shutdown signal received");
            ct.cancel();
            server.await
        }
    };

    match joined {
        Ok(result) => result?,
        Err(err) => error!(%err, "http server task failed"),
    }

    info!("mcp-relay shut down");
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
