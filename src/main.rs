//! CLI entry point for the ingestion service.
//!
//! Runs the full pipeline: serial receiver in, hour-bucketed raw logs and
//! batched collector submissions out. The companion watchdog has its own
//! binary; this process deliberately exits on unrecoverable device loss so
//! the surrounding supervisor can restart it.
//!
//! # Usage
//!
//! ```bash
//! gnss-node run --config config/config.toml
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use gnss_node::config::NodeConfig;
use gnss_node::service::IngestService;
use gnss_node::telemetry;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "gnss-node")]
#[command(about = "GNSS field-station ingestion service", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the ingestion pipeline until shutdown
    Run {
        /// Path to the configuration file
        #[arg(long, default_value = "config/config.toml")]
        config: PathBuf,
    },
    /// Load and validate the configuration, then exit
    CheckConfig {
        /// Path to the configuration file
        #[arg(long, default_value = "config/config.toml")]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run { config } => {
            let config = load_config(&config)?;
            telemetry::init_from_config(&config).map_err(anyhow::Error::msg)?;
            tracing::info!(
                station = %config.station.station_id,
                target = %config.uplink.url,
                "starting ingestion service"
            );
            IngestService::new(config)
                .run()
                .await
                .context("ingestion service terminated with an error")
        }
        Commands::CheckConfig { config } => {
            let config = load_config(&config)?;
            println!(
                "configuration ok: station {} -> {}",
                config.station.station_id, config.uplink.url
            );
            Ok(())
        }
    }
}

fn load_config(path: &PathBuf) -> Result<NodeConfig> {
    let config = NodeConfig::load_from(path)
        .with_context(|| format!("failed to load configuration from {}", path.display()))?;
    config
        .validate()
        .map_err(anyhow::Error::msg)
        .context("configuration invalid")?;
    Ok(config)
}
