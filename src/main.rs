//! Webhook gate.
//!
//! Fronts a webhook-receiving service with per-IP rate limiting that skips
//! the webhook provider's own delivery ranges.
//!
//! # Architecture Overview
//!
//! ```text
//!   boot ──▶ config ──▶ upstream bootstrap ──▶ TrustedRanges ─┐
//!                    └─▶ counter store (Redis) ───────────────┤
//!                                                             ▼
//!   request ──▶ http server ──▶ admission gate ──▶ webhook pipeline
//!                                   │
//!                                   └──▶ 429 "Too many requests, ..."
//! ```

use std::path::PathBuf;

use clap::Parser;
use tokio::net::TcpListener;

use webhook_gate::config::load_config;
use webhook_gate::http::{app_routes, HttpServer};
use webhook_gate::lifecycle::{build_gate, Shutdown};
use webhook_gate::observability::{logging, metrics};

#[derive(Parser)]
#[command(name = "webhook-gate", version, about = "Rate-limiting front for a webhook receiver")]
struct Cli {
    /// Path to a TOML configuration file; environment variables override it.
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;

    logging::init_logging(&config.observability);
    tracing::info!("webhook-gate v{} starting", env!("CARGO_PKG_VERSION"));

    tracing::info!(
        bind_address = %config.listener.bind_address,
        rate_limiting = config.rate_limit.enabled,
        store_backend = ?config.store.backend,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let shutdown = Shutdown::new();
    shutdown.trigger_on_signal();

    // Gate must be complete before any traffic is accepted
    let gate = build_gate(&config, &shutdown).await?;

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    tracing::info!(address = %listener.local_addr()?, "Listening for connections");

    let server_shutdown = shutdown.subscribe();
    let server = HttpServer::new(config, gate, app_routes());
    server.run(listener, server_shutdown).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
