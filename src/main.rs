//! Bus gateway
//!
//! Serves HTTP and websocket clients on behalf of services that live on a
//! message bus.
//!
//! # Architecture Overview
//!
//! ```text
//!                        ┌──────────────────────────────────────────────────────┐
//!                        │                     BUS GATEWAY                       │
//!                        │                                                       │
//!   HTTP request         │  ┌────────┐   ┌──────────┐   ┌─────────────────────┐  │
//!   ─────────────────────┼─▶│ server │──▶│ pipeline │──▶│ auth · rewrite ·    │  │
//!                        │  └───┬────┘   └──────────┘   │ interceptors        │  │
//!                        │      │                       └─────────┬───────────┘  │
//!   websocket upgrade    │      ▼                                 ▼              │
//!   ─────────────────────┼─▶ websocket ──────────────────▶ dispatch ─────────────┼──▶ bus service
//!                        │   registry ◀── ws.out.<id>.> ─┐  (negotiate)         │
//!                        │                               │        │             │
//!                        └───────────────────────────────┼────────┼─────────────┘
//!                                                        │        ▼
//!                                                       bus    HTTP backend
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::net::TcpListener;

use bus_gateway::config::load_config_or_default;
use bus_gateway::lifecycle::signals::spawn_signal_listener;
use bus_gateway::observability::{logging, metrics};
use bus_gateway::{HttpServer, LocalBus, Shutdown};

#[derive(Parser)]
#[command(name = "bus-gateway")]
#[command(about = "HTTP and websocket gateway for bus services", long_about = None)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long, default_value = "gateway.toml")]
    config: PathBuf,

    /// Validate the configuration and exit.
    #[arg(long)]
    check: bool,
}

/// Runs the gateway in embedded mode: services share this process through
/// an in-process `LocalBus`.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = load_config_or_default(&cli.config)?;
    logging::init_logging(&config.observability);

    if cli.check {
        tracing::info!(path = %cli.config.display(), "Configuration is valid");
        return Ok(());
    }

    tracing::info!(
        bind_address = %config.listener.bind_address,
        interceptors = config.interceptors.len(),
        rewrite_rules = config.rewrite_rules.len(),
        websocket = config.websocket.enabled,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => {
                if let Err(e) = metrics::init_metrics(addr) {
                    tracing::error!(error = %e, "Failed to start metrics exporter");
                }
            }
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    // No networked transport is wired; only in-process services respond.
    let bus = Arc::new(LocalBus::new());

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    tracing::info!(address = %listener.local_addr()?, "Listening for connections");

    let shutdown = Shutdown::new();
    spawn_signal_listener(shutdown.clone());

    let server = HttpServer::new(config, bus)?;
    server.run(listener, shutdown.subscribe()).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
