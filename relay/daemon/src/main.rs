//! Relay Daemon - WebSocket Front End for Ollama
//!
//! Streams Ollama generations to chat clients over WebSocket, with per-client
//! cancellation and preemption.
//!
//! # Usage
//!
//! ```bash
//! # Start with defaults (0.0.0.0:9201, Ollama on localhost:11434)
//! relay-daemon
//!
//! # Custom bind address and model
//! relay-daemon --bind 127.0.0.1:8080 --model llama3.2
//!
//! # With config file
//! relay-daemon --config /etc/ollama-relay/relay.toml
//!
//! # Verbose logging
//! RUST_LOG=debug relay-daemon
//! ```
//!
//! # Signals
//!
//! - `SIGTERM` / `SIGINT`: Graceful shutdown

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info};

use relay_core::config::{default_config_path, load_config_from_path, ConfigOverrides};
use relay_core::OllamaBackend;
use relay_daemon::RelayServer;

/// Relay Daemon - streams Ollama generations to WebSocket clients
#[derive(Parser, Debug)]
#[command(name = "relay-daemon")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Configuration file path
    #[arg(short = 'c', long, env = "RELAY_CONFIG", value_name = "FILE")]
    config: Option<PathBuf>,

    /// Listen address (overrides config file and RELAY_BIND)
    #[arg(short = 'b', long, value_name = "ADDR")]
    bind: Option<String>,

    /// Model identifier (overrides config file and RELAY_MODEL)
    #[arg(short = 'm', long, value_name = "MODEL")]
    model: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'l', long, env = "RELAY_LOG_LEVEL", default_value = "info")]
    log_level: String,
}

/// Initialize logging with the specified level
fn init_logging(level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new(format!("relay_daemon={level},relay_core={level}"))
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .init();
}

/// Resolves when the process is asked to stop
async fn shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm =
            signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;
        let mut sigint =
            signal(SignalKind::interrupt()).context("Failed to install SIGINT handler")?;

        tokio::select! {
            _ = sigterm.recv() => info!("Received SIGTERM, initiating shutdown"),
            _ = sigint.recv() => info!("Received SIGINT, initiating shutdown"),
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c()
            .await
            .context("Failed to listen for Ctrl-C")?;
        info!("Received Ctrl-C, initiating shutdown");
    }

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(&args.log_level);

    info!("Relay daemon starting");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    // Resolve configuration: CLI > env > file > defaults
    let config_path = args.config.clone().or_else(default_config_path);
    let mut config = load_config_from_path(config_path).context("Failed to load configuration")?;

    let mut overrides = ConfigOverrides::new();
    if let Some(bind) = args.bind {
        overrides = overrides.with_bind_addr(bind);
    }
    if let Some(model) = args.model {
        overrides = overrides.with_model(model);
    }
    overrides
        .apply(&mut config)
        .context("Invalid command-line override")?;

    info!(
        source = %config.source(),
        config_file = ?config.config_file_path,
        bind = %config.server.bind_addr,
        backend = %config.backend.base_url(),
        model = %config.backend.model,
        "Configuration loaded"
    );

    let backend =
        OllamaBackend::new(config.backend.clone()).context("Failed to create Ollama backend")?;
    let server = RelayServer::new(config.server.clone(), Arc::new(backend));
    let handle = server.start().await?;

    info!(addr = %handle.local_addr(), "Relay daemon ready");

    let signal_result = shutdown_signal().await;
    let result = handle.shutdown().await.and(signal_result);

    match result {
        Ok(()) => {
            info!("Relay daemon stopped cleanly");
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "Relay daemon stopped with error");
            Err(e)
        }
    }
}
