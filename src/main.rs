//! Tunnelrat - Reverse HTTP Tunneling Server
//!
//! This is the main entry point for the tunnelrat server.

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use tokio::sync::broadcast;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;
use tunnelrat::config::{load_config, ServerConfig};
use tunnelrat::server::run_server;

/// Tunnelrat - reverse HTTP tunneling server
#[derive(Parser, Debug)]
#[command(name = "tunnelrat")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Port for the public HTTP listener
    #[arg(long)]
    port: Option<u16>,

    /// Address to bind listeners on
    #[arg(long)]
    address: Option<String>,

    /// Registrable domain tunnels are exposed under
    #[arg(long)]
    domain: Option<String>,

    /// Return https tunnel URLs from the control plane
    #[arg(long)]
    secure: bool,

    /// Number of sockets each tunnel client may keep open
    #[arg(long = "max-sockets")]
    max_sockets: Option<usize>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Enable JSON logging format
    #[arg(long)]
    json_log: bool,
}

impl Args {
    /// Resolve the effective configuration: the config file, if any,
    /// overridden by explicit flags
    fn resolve_config(&self) -> Result<ServerConfig> {
        let mut config = match &self.config {
            Some(path) => load_config(path)?,
            None => ServerConfig::default(),
        };

        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(address) = &self.address {
            config.address = address.clone();
        }
        if let Some(domain) = &self.domain {
            config.domain = Some(domain.clone());
        }
        if self.secure {
            config.secure = true;
        }
        if let Some(max_sockets) = self.max_sockets {
            config.max_sockets = max_sockets;
        }

        config.validate().map_err(anyhow::Error::msg)?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Setup logging
    setup_logging(&args.log_level, args.json_log)?;

    // Resolve configuration
    let config = args.resolve_config()?;

    info!("tunnelrat v{}", tunnelrat::VERSION);
    info!("listening address: {}:{}", config.address, config.port);
    if let Some(domain) = &config.domain {
        info!("serving tunnels under: {}", domain);
    }
    info!("per-client socket budget: {}", config.max_sockets);

    // Setup shutdown signal
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

    // Handle Ctrl+C and termination signals (cross-platform)
    let shutdown_tx_clone = shutdown_tx.clone();
    tokio::spawn(async move {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            let mut sigterm =
                signal(SignalKind::terminate()).expect("Failed to setup SIGTERM handler");

            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    info!("Received Ctrl+C, shutting down...");
                }
                _ = sigterm.recv() => {
                    info!("Received SIGTERM, shutting down...");
                }
            }
        }

        #[cfg(not(unix))]
        {
            // On Windows, only handle Ctrl+C
            let _ = tokio::signal::ctrl_c().await;
            info!("Received Ctrl+C, shutting down...");
        }

        let _ = shutdown_tx_clone.send(true);
    });

    // Run the server
    run_server(config, shutdown_rx).await
}

/// Setup logging based on configuration
fn setup_logging(level: &str, json: bool) -> Result<()> {
    let level = match level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" | "warning" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    if json {
        let subscriber = FmtSubscriber::builder()
            .with_max_level(level)
            .json()
            .finish();
        tracing::subscriber::set_global_default(subscriber)?;
    } else {
        let subscriber = FmtSubscriber::builder()
            .with_max_level(level)
            .with_target(true)
            .with_thread_ids(false)
            .with_thread_names(false)
            .finish();
        tracing::subscriber::set_global_default(subscriber)?;
    }

    Ok(())
}
