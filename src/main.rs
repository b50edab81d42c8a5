//! Dynamic API gateway.
//!
//! # Architecture Overview
//!
//! ```text
//!                        ┌──────────────────────────────────────────────────────┐
//!                        │                     API GATEWAY                      │
//!                        │                                                      │
//!   Client Request       │  ┌──────────┐   ┌──────────┐   ┌──────────────────┐  │
//!   ─────────────────────┼─▶│   http   │──▶│ routing  │──▶│    middleware    │  │
//!                        │  │  server  │   │ registry │   │ recovery → stats │  │
//!                        │  └──────────┘   └────▲─────┘   │   → access log   │  │
//!                        │                      │         └────────┬─────────┘  │
//!                        │               ┌──────┴──────┐           ▼            │
//!                        │               │ definitions │   ┌──────────────────┐  │
//!                        │               │   loader    │   │  proxy handler   │  │
//!                        │               │ + reloader  │   │ (oauth → pool)   │──┼──▶ Upstream
//!                        │               └──────▲──────┘   └──────────────────┘  │
//!                        │                      │                                │
//!                        │        file watcher / SIGHUP / repository             │
//!                        └──────────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;

use clap::Parser;

use api_gateway::config::{load_config, GatewayConfig};
use api_gateway::lifecycle::{shutdown_signal, Gateway, Shutdown};
use api_gateway::net::tls::install_crypto_provider;
use api_gateway::observability::{init_logging, init_metrics};

#[derive(Parser)]
#[command(name = "api-gateway")]
#[command(about = "Dynamic API gateway with hot-reloadable routes", long_about = None)]
struct Cli {
    /// Path to the TOML configuration file. Defaults apply without one.
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => load_config(path)?,
        None => GatewayConfig::default(),
    };

    init_logging(&config.observability);
    install_crypto_provider();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "api-gateway starting");
    tracing::info!(
        bind_address = %config.listener.bind_address,
        tls = config.listener.tls.is_some(),
        definitions = %config.definitions.dsn,
        storage = %config.storage.dsn,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => init_metrics(addr)?,
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let gateway = Gateway::builder(config).build()?;

    let shutdown = Shutdown::new();
    let trigger = shutdown.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        trigger.trigger();
    });

    gateway.run(&shutdown).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
