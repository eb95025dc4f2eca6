//! API gateway
//!
//! A checkpoint-pipeline reverse proxy built with Tokio and Axum.
//!
//! # Architecture Overview
//!
//! ```text
//!     Client ──▶ proxy listener ──▶ pipeline
//!                                     route → auth → quota → transform
//!                                     → forward ──▶ upstream
//!                                        │
//!                                        ▼ events
//!                               observability bus
//!                                 ├─ log subscriber
//!                                 ├─ metrics subscriber ──▶ aggregator
//!                                 └─ event log (history)       │
//!                                                              ▼
//!     Scraper ──▶ management listener ── metrics / controllers
//! ```
//!
//! If startup fails the process keeps running a fallback server that
//! answers every request with the startup error.

use std::path::PathBuf;

use clap::Parser;
use tokio::net::TcpListener;

use api_gateway::config::{load_config, FallbackConfig, GatewayConfig};
use api_gateway::lifecycle::{self, Shutdown, StartupError};
use api_gateway::observability::logging::init_logging;

#[derive(Parser, Debug)]
#[command(name = "api-gateway", version, about = "Checkpoint-pipeline HTTP gateway")]
struct Cli {
    /// Path to the TOML configuration file. Defaults are used when absent.
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let loaded = match &cli.config {
        Some(path) => load_config(path).map_err(StartupError::from),
        None => Ok(GatewayConfig::default()),
    };
    let logging = loaded
        .as_ref()
        .map(|c| c.logging.clone())
        .unwrap_or_default();
    if let Err(e) = init_logging(&logging) {
        eprintln!("failed to initialise logging: {e}");
    }

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "api-gateway starting");

    let shutdown = Shutdown::new();
    shutdown.trigger_on_ctrl_c();

    let fallback_address = loaded
        .as_ref()
        .map(|c| c.fallback.bind_address.clone())
        .unwrap_or_else(|_| FallbackConfig::default().bind_address);

    let result = match loaded {
        Ok(config) => lifecycle::run(config, &shutdown).await,
        Err(e) => Err(e),
    };

    if let Err(error) = result {
        tracing::error!(error = %error, "Gateway failed to start");
        let listener = TcpListener::bind(&fallback_address).await?;
        lifecycle::serve_fallback(listener, &error, shutdown.subscribe()).await?;
    }

    tracing::info!("Shutdown complete");
    Ok(())
}
