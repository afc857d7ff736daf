//! Voxcast Server - standalone server for the avatar broadcast service.
//!
//! Bootstraps the core services, starts the HTTP API, and runs until a
//! shutdown signal is received.

mod config;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use voxcast_core::{bootstrap_services, start_server, AppState};
use tokio::signal;

use crate::config::ServerConfig;

/// Voxcast Server - headless avatar broadcast server.
#[derive(Parser, Debug)]
#[command(name = "voxcast-server")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file (YAML).
    #[arg(short, long, value_name = "FILE", env = "CONFIG_PATH")]
    config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace).
    #[arg(short, long, default_value = "info", env = "LOG_LEVEL")]
    log_level: log::LevelFilter,

    /// Bind port (overrides config file).
    #[arg(short = 'p', long, env = "PORT")]
    port: Option<u16>,

    /// Directory of read-only motion assets (overrides config file).
    #[arg(short = 'm', long, env = "MOTIONS_DIR")]
    motions_dir: Option<PathBuf>,

    /// Directory for cached/generated outputs (overrides config file).
    #[arg(short = 'o', long, env = "OUTPUT_DIR")]
    output_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    env_logger::Builder::new()
        .filter_level(args.log_level)
        .format_timestamp_millis()
        .init();

    log::info!("Voxcast Server v{}", env!("CARGO_PKG_VERSION"));

    let mut config = ServerConfig::load(args.config.as_deref()).context("Failed to load configuration")?;

    if let Some(port) = args.port {
        config.bind_port = port;
    }
    if let Some(motions_dir) = args.motions_dir {
        config.motions_dir = motions_dir;
    }
    if let Some(output_dir) = args.output_dir {
        config.output_dir = output_dir;
    }

    log::info!(
        "Configuration: bind_port={}, motions_dir={}, output_dir={}",
        config.bind_port,
        config.motions_dir.display(),
        config.output_dir.display()
    );

    let core_config = config.to_core_config();
    let services = bootstrap_services(core_config).context("Failed to bootstrap services")?;

    services.validate_motion_specs().await;
    services.reconcile_cache().context("Failed to reconcile output cache")?;

    log::info!("Services bootstrapped successfully");

    let app_state = AppState::builder().from_services(&services).build();

    let server_handle = tokio::spawn(async move {
        if let Err(e) = start_server(app_state).await {
            log::error!("Server error: {}", e);
        }
    });

    log::info!("HTTP server started on port {}", config.bind_port);

    shutdown_signal().await;

    log::info!("Shutdown signal received, cleaning up...");

    services.shutdown().await;
    server_handle.abort();

    log::info!("Shutdown complete");
    Ok(())
}

/// Waits for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
