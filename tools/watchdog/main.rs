/*
 * Ingestion Watchdog
 *
 * Out-of-band health monitor for the ingestion service, designed to be
 * triggered periodically (cron or a systemd timer), not to self-schedule.
 *
 * Two independent passes:
 *   check   - count desync signatures in the service's diagnostic log over
 *             a trailing window; restart the unit when the threshold is
 *             exceeded and verify the restart took.
 *   recover - if the unit sits in a failed state, restart it only once the
 *             collector endpoint is reachable again, so a network outage
 *             does not cause a restart storm.
 *
 * The watchdog shares the service's configuration file and touches the
 * service only through systemctl restart / is-active.
 */

use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use gnss_node::config::NodeConfig;
use gnss_node::telemetry::{self, TelemetryConfig};
use gnss_node::watchdog::{
    endpoint_reachable, CheckOutcome, RecoverOutcome, Systemctl, Watchdog,
};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "gnss-watchdog")]
#[command(about = "Health monitor for the GNSS ingestion service", long_about = None)]
struct Cli {
    /// Path to the shared configuration file
    #[arg(long, default_value = "config/config.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scan the diagnostic log for desync signatures and restart on threshold
    Check,
    /// Restart a failed service once collector connectivity is confirmed
    Recover {
        /// Reachability probe timeout
        #[arg(long, default_value = "3")]
        probe_timeout_secs: u64,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = NodeConfig::load_from(&cli.config)
        .with_context(|| format!("failed to load configuration from {}", cli.config.display()))?;
    config
        .validate()
        .map_err(anyhow::Error::msg)
        .context("configuration invalid")?;

    // Console diagnostics only; writing into the scanned log would let the
    // watchdog trigger itself
    telemetry::init(TelemetryConfig::new(tracing::Level::INFO)).map_err(anyhow::Error::msg)?;

    let watchdog = Watchdog::new(Systemctl, config.watchdog.clone());

    match cli.command {
        Commands::Check => {
            let log_path = match &config.application.diagnostic_log {
                Some(path) => path.clone(),
                None => bail!("application.diagnostic_log must be set for the check pass"),
            };
            match watchdog.check_desync(&log_path, Utc::now())? {
                CheckOutcome::Healthy { count } => {
                    println!("healthy: {} desync signatures in window", count);
                }
                CheckOutcome::Restarted { count, verified } => {
                    println!(
                        "restarted after {} desync signatures; verified={}",
                        count, verified
                    );
                    if !verified {
                        bail!("restart did not bring the unit up");
                    }
                }
            }
        }
        Commands::Recover { probe_timeout_secs } => {
            let reachable = endpoint_reachable(
                &config.uplink.url,
                Duration::from_secs(probe_timeout_secs),
            );
            match watchdog.recover(reachable)? {
                RecoverOutcome::Active => println!("service active"),
                RecoverOutcome::SkippedUnreachable => {
                    println!("service down, collector unreachable, restart withheld");
                }
                RecoverOutcome::Restarted { verified } => {
                    println!("restarted; verified={}", verified);
                    if !verified {
                        bail!("restart did not bring the unit up");
                    }
                }
            }
        }
    }

    Ok(())
}
