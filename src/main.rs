//! edge-router
//!
//! A dynamic edge router built with Tokio and Axum.
//!
//! # Architecture Overview
//!
//! ```text
//!   providers (file, inline, handles)
//!        │ fragments
//!        ▼
//!   ┌────────────┐   ┌───────────┐   ┌─────────┐   ┌────────┐
//!   │ aggregator │──▶│ validator │──▶│ builder │──▶│ switch │
//!   └────────────┘   └───────────┘   └─────────┘   └───┬────┘
//!                                                      │ live graph
//!     Client Request                                   ▼
//!   ───────────────▶ entry point ──▶ route table ──▶ middleware chain
//!                                                      │
//!                                                      ▼
//!                               service (pool / weighted / mirroring)
//!                                                      │
//!   ◀─────────────── response ◀── upstream forwarder ◀─┘
//!
//!   health monitor ── probes ──▶ server health (in place, no rebuild)
//!   admin API ── reads ──▶ switch
//! ```

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use edge_router::config::loader::load_config;
use edge_router::config::validation::validate_config;
use edge_router::config::ProxyConfig;
use edge_router::lifecycle::signals::wait_for_signal;
use edge_router::observability::logging::init_logging;
use edge_router::Startup;

#[derive(Parser)]
#[command(name = "edge-router")]
#[command(about = "Dynamic edge router", long_about = None)]
struct Cli {
    /// Static configuration file.
    #[arg(short, long, default_value = "edge-router.toml")]
    config: PathBuf,

    /// Seconds to wait for in-flight work on shutdown.
    #[arg(long, default_value_t = 30)]
    grace_secs: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let (config, loaded) = if cli.config.exists() {
        (load_config(&cli.config)?, true)
    } else {
        let config = ProxyConfig::default();
        validate_config(&config).map_err(|errors| format!("invalid default configuration: {:?}", errors))?;
        (config, false)
    };

    init_logging(&config.observability);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "edge-router starting");
    if loaded {
        tracing::info!(path = ?cli.config, "Configuration loaded");
    } else {
        tracing::warn!(path = ?cli.config, "Configuration file not found, using defaults");
    }

    let running = Startup::new(config).start().await?;

    wait_for_signal().await;

    if running.stop(Duration::from_secs(cli.grace_secs)).await {
        tracing::info!("Shutdown complete");
    } else {
        tracing::warn!("Shutdown forced after grace period");
    }
    Ok(())
}
