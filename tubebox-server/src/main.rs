//! tubebox - Main entry point
//!
//! Loads configuration, wires the services and serves the HTTP API until
//! Ctrl+C or SIGTERM.

use std::path::PathBuf;
use std::sync::Mutex;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use tubebox_common::config::{ensure_root_folder, LoggingConfig, TomlConfig};
use tubebox_server::config::{Overrides, ServiceConfig};
use tubebox_server::{api, SharedState};

/// Command-line arguments for tubebox
#[derive(Parser, Debug)]
#[command(name = "tubebox")]
#[command(about = "Shared music player backed by a video platform")]
#[command(version)]
struct Args {
    /// TOML configuration file (default: platform config location)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Port to listen on
    #[arg(short, long)]
    port: Option<u16>,

    /// Root folder for cache, history and queue files
    #[arg(short, long)]
    root_folder: Option<PathBuf>,

    /// Official data API key
    #[arg(long, env = "YOUTUBE_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Extraction tool executable
    #[arg(long, env = "TUBEBOX_EXTRACTOR")]
    extractor: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let toml = TomlConfig::load_or_default(args.config.as_deref());

    init_tracing(&toml.logging)?;

    info!(
        "Starting tubebox v{} (git {}, built {}, {})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_PROFILE")
    );

    let config = ServiceConfig::resolve(
        toml,
        Overrides {
            port: args.port,
            root_folder: args.root_folder,
            api_key: args.api_key,
            extractor: args.extractor,
        },
    );
    info!("Root folder: {}", config.root_folder.display());
    if config.api_key.is_none() {
        warn!("No API key configured, all resolution goes through the extraction tool");
    }

    ensure_root_folder(config.root()).context("Failed to prepare root folder")?;

    let state = SharedState::build(&config)
        .await
        .context("Failed to initialize services")?;
    info!("Services initialized");

    api::run(&config, state, shutdown_signal())
        .await
        .context("Server error")?;

    info!("Server shutdown complete");
    Ok(())
}

/// Stderr logging plus an optional plain-text log file
fn init_tracing(logging: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "tubebox_server={level},tubebox={level},tower_http={level}",
            level = logging.level
        ))
    });

    let file_layer = match &logging.file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            Some(
                tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_writer(Mutex::new(file)),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .with(file_layer)
        .init();
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
