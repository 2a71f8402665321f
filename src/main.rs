//! RustEcho - TCP echo server

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use rustecho::{config::ConfigManager, ConnectionManager, ShutdownCoordinator};

/// CLI arguments for RustEcho
#[derive(Parser, Debug)]
#[command(name = "rustecho")]
#[command(about = "RustEcho - TCP echo server")]
#[command(version)]
#[command(long_about = "
RustEcho - TCP echo server

Listens on 0.0.0.0:9000 by default and writes back every byte it receives.

Configuration priority (highest to lowest):
1. Command-line arguments
2. Configuration file
3. Environment variables (only read when no configuration file exists)
4. Built-in defaults

Environment variables:
  RUSTECHO_BIND_ADDR         - Bind address (e.g., 0.0.0.0:9000)
  RUSTECHO_BUFFER_SIZE       - Read chunk size in bytes
  RUSTECHO_SHUTDOWN_TIMEOUT  - Shutdown timeout (e.g., 30s)
  RUSTECHO_LOG_LEVEL         - Log level (trace, debug, info, warn, error)
")]
pub struct CliArgs {
    /// Configuration file path
    #[arg(short, long, default_value = "rustecho.toml")]
    pub config: PathBuf,

    /// Bind address (overrides config file)
    #[arg(short, long)]
    pub bind: Option<String>,

    /// Port to bind to (overrides config file)
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Read chunk size in bytes
    #[arg(long)]
    pub buffer_size: Option<usize>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    pub log_level: Option<String>,

    /// Enable verbose logging (sets log level to debug)
    #[arg(short, long)]
    pub verbose: bool,

    /// Validate configuration and exit
    #[arg(long)]
    pub validate_config: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = CliArgs::parse();

    let mut config = if args.config.exists() {
        ConfigManager::load_from_file(&args.config)?
    } else {
        ConfigManager::load_from_env()?
    };

    let log_level = if args.verbose {
        Some("debug")
    } else {
        args.log_level.as_deref()
    };

    config.merge_with_cli_args(args.bind.as_deref(), args.port, args.buffer_size, log_level)?;

    init_tracing(&config.logging.level);

    config
        .validate()
        .context("Final configuration validation failed")?;

    if args.validate_config {
        info!("Configuration is valid");
        info!("  Bind address: {}", config.server.bind_addr);
        info!("  Buffer size: {} bytes", config.server.buffer_size);
        info!("  Shutdown timeout: {:?}", config.server.shutdown_timeout);
        info!("  TCP_NODELAY: {}", config.server.nodelay);
        info!("  Log level: {}", config.logging.level);
        return Ok(());
    }

    info!(
        bind_addr = %config.server.bind_addr,
        buffer_size = config.server.buffer_size,
        "Starting RustEcho v{}",
        env!("CARGO_PKG_VERSION")
    );

    let shutdown_coordinator = ShutdownCoordinator::new(config.server.shutdown_timeout);
    let connection_manager = Arc::new(ConnectionManager::new(Arc::new(config)));

    if let Err(e) = connection_manager.bind().await {
        error!("Failed to start listener: {}", e);
        return Err(e.into());
    }

    let server = Arc::clone(&connection_manager);
    let server_handle = tokio::spawn(async move { server.accept_connections().await });

    info!("RustEcho started, send SIGTERM/SIGINT to stop");

    if let Err(e) = shutdown_coordinator.listen_for_signals().await {
        error!("Error setting up signal handlers: {}", e);
    }

    if !shutdown_coordinator
        .shutdown_connection_manager(&connection_manager)
        .await
    {
        warn!("Exiting with connections still open");
    }

    match server_handle.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!("Accept loop failed: {}", e),
        Err(e) => error!("Server task failed: {}", e),
    }

    info!("Server shutdown complete");
    Ok(())
}

/// Initialize tracing/logging. `RUST_LOG` wins over the configured level.
fn init_tracing(log_level: &str) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_thread_ids(true)
                .with_level(true),
        )
        .with(env_filter)
        .init();
}
