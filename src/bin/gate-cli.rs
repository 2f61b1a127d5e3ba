use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use serde_json::{json, Value};

use webhook_gate::config::{load_config, StoreBackend};
use webhook_gate::lifecycle::startup::{bootstrapper_from_config, redis_store_config};
use webhook_gate::security::is_trusted;
use webhook_gate::store::{CounterStore, RedisStore};

#[derive(Parser)]
#[command(name = "gate-cli")]
#[command(about = "Inspect the webhook gate's trusted ranges and counters", long_about = None)]
struct Cli {
    /// Same configuration file the service uses; environment overrides apply.
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the bootstrap and print the trusted ranges
    Ranges,
    /// Check whether an address would bypass rate limiting
    Check { ip: String },
    /// Show the current window count for an address
    Count { ip: String },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;

    let output = match cli.command {
        Commands::Ranges => {
            let ranges = bootstrapper_from_config(&config, std::path::Path::new("."))?
                .fetch_trusted_ranges()
                .await?;
            let ranges: Vec<String> = ranges.iter().map(ToString::to_string).collect();
            json!({ "trusted_ranges": ranges })
        }
        Commands::Check { ip } => {
            let ranges = bootstrapper_from_config(&config, std::path::Path::new("."))?
                .fetch_trusted_ranges()
                .await?;
            json!({ "ip": ip, "trusted": is_trusted(&ip, &ranges) })
        }
        Commands::Count { ip } => {
            ensure_counts_inspectable(config.store.backend)?;
            let store = tokio::time::timeout(
                Duration::from_secs(5),
                RedisStore::connect_with_config(&config.store.redis_url(), redis_store_config(&config)),
            )
            .await??;
            let count = store.current(&ip).await?;
            json!({
                "ip": ip,
                "count": count,
                "limit": config.rate_limit.max_requests,
                "window_secs": config.rate_limit.window_secs,
            })
        }
    };

    print_response(&output)
}

/// Only the shared store outlives a process; memory counts are not reachable.
fn ensure_counts_inspectable(backend: StoreBackend) -> Result<(), Box<dyn std::error::Error>> {
    match backend {
        StoreBackend::Redis => Ok(()),
        StoreBackend::Memory => Err("counts are only inspectable on the redis backend".into()),
    }
}

fn print_response(value: &Value) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
