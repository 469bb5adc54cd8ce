//! Configuration system using Figment.
//!
//! This module provides strongly-typed configuration loading for the node.
//! Configuration is loaded from:
//! 1. a TOML file (base configuration)
//! 2. Environment variables (prefixed with GNSS_NODE_)
//!
//! # Example
//! ```no_run
//! use gnss_node::config::NodeConfig;
//!
//! # fn main() -> Result<(), figment::Error> {
//! let config = NodeConfig::load()?;
//! println!("Station: {}", config.station.station_id);
//! # Ok(())
//! # }
//! ```

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level node configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Application settings
    pub application: ApplicationConfig,
    /// Station identity and antenna position
    pub station: StationConfig,
    /// Serial receiver settings
    pub serial: SerialConfig,
    /// Raw log file settings
    pub logbook: LogbookConfig,
    /// Batch uplink settings
    pub uplink: UplinkConfig,
    /// Watchdog settings (read by the companion binary)
    #[serde(default)]
    pub watchdog: WatchdogConfig,
}

/// Application-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationConfig {
    /// Application name
    #[serde(default = "default_app_name")]
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Append-only diagnostic file scanned by the watchdog.
    /// When unset, diagnostics go to stderr only.
    #[serde(default)]
    pub diagnostic_log: Option<PathBuf>,
}

/// Station identity, matching the collector's registration record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StationConfig {
    /// Station ID (must match a node registered with the collector)
    pub station_id: String,
    /// Human-readable station name
    #[serde(default = "default_station_name")]
    pub station_name: String,
    /// Antenna latitude in decimal degrees
    pub latitude: f64,
    /// Antenna longitude in decimal degrees
    pub longitude: f64,
    /// Antenna height above mean sea level in meters
    pub antenna_height: f64,
    /// Whether this station occupies a surveyed reference position
    #[serde(default = "default_true")]
    pub is_reference_station: bool,
}

/// Serial receiver connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SerialConfig {
    /// Serial device path (e.g. /dev/ttyAMA0)
    pub device: String,
    /// Baud rate for the receiver connection
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    /// Bounded read timeout; keeps the reader responsive to stop requests
    #[serde(with = "humantime_serde", default = "default_read_timeout")]
    pub read_timeout: Duration,
    /// Reopen attempts before the process exits for supervised restart
    #[serde(default = "default_reopen_attempts")]
    pub max_reopen_attempts: u32,
    /// Bounded queue between the reader thread and the pipeline
    #[serde(default = "default_chunk_queue")]
    pub chunk_queue_capacity: usize,
}

/// Raw log file settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogbookConfig {
    /// Root directory for hour-bucketed raw files
    pub root_dir: PathBuf,
    /// Bytes written between fsyncs on the live bucket
    #[serde(default = "default_fsync_interval")]
    pub fsync_interval_bytes: u64,
}

/// Batch uplink settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UplinkConfig {
    /// Collector ingest endpoint URL
    pub url: String,
    /// Per-station API key sent as a bearer token
    pub api_key: String,
    /// Wall-clock interval between batch flushes
    #[serde(with = "humantime_serde", default = "default_send_interval")]
    pub send_interval: Duration,
    /// Per-request timeout
    #[serde(with = "humantime_serde", default = "default_request_timeout")]
    pub request_timeout: Duration,
    /// Submission attempts per batch before it is dropped
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

/// Watchdog settings, shared with the companion binary through the same file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchdogConfig {
    /// Systemd unit the watchdog is allowed to restart
    #[serde(default = "default_unit")]
    pub service_unit: String,
    /// Trailing window over the diagnostic log
    #[serde(with = "humantime_serde", default = "default_window")]
    pub window: Duration,
    /// Desync signatures within the window that trigger a restart
    #[serde(default = "default_threshold")]
    pub desync_threshold: usize,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            service_unit: default_unit(),
            window: default_window(),
            desync_threshold: default_threshold(),
        }
    }
}

// Default value functions
fn default_app_name() -> String {
    "gnss-node".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_station_name() -> String {
    "Ground Node".to_string()
}

fn default_true() -> bool {
    true
}

fn default_baud_rate() -> u32 {
    115_200
}

fn default_read_timeout() -> Duration {
    Duration::from_millis(200)
}

fn default_reopen_attempts() -> u32 {
    10
}

fn default_chunk_queue() -> usize {
    64
}

fn default_fsync_interval() -> u64 {
    1_000_000
}

fn default_send_interval() -> Duration {
    Duration::from_secs(1)
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_max_attempts() -> u32 {
    4
}

fn default_unit() -> String {
    "gnss-node.service".to_string()
}

fn default_window() -> Duration {
    Duration::from_secs(600)
}

fn default_threshold() -> usize {
    10
}

impl NodeConfig {
    /// Load configuration from `config/config.toml` and environment variables.
    ///
    /// Environment variables can override configuration with prefix GNSS_NODE_
    /// Example: GNSS_NODE_APPLICATION_LOG_LEVEL=debug
    pub fn load() -> Result<Self, figment::Error> {
        Self::load_from("config/config.toml")
    }

    /// Load configuration from a specific file path.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, figment::Error> {
        Figment::new()
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("GNSS_NODE_").split("_"))
            .extract()
    }

    /// Validate configuration after loading.
    pub fn validate(&self) -> Result<(), String> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.as_str()) {
            return Err(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            ));
        }

        if self.station.station_id.trim().is_empty() {
            return Err("station_id must not be empty".to_string());
        }

        if !(-90.0..=90.0).contains(&self.station.latitude) {
            return Err(format!(
                "Invalid latitude {}. Must be within -90..=90",
                self.station.latitude
            ));
        }
        if !(-180.0..=180.0).contains(&self.station.longitude) {
            return Err(format!(
                "Invalid longitude {}. Must be within -180..=180",
                self.station.longitude
            ));
        }

        if !self.uplink.url.starts_with("http://") && !self.uplink.url.starts_with("https://") {
            return Err(format!(
                "Invalid uplink url '{}'. Must start with http:// or https://",
                self.uplink.url
            ));
        }
        if self.uplink.api_key.trim().is_empty() {
            return Err("uplink api_key must not be empty".to_string());
        }
        if self.uplink.max_attempts == 0 {
            return Err("uplink max_attempts must be at least 1".to_string());
        }
        if self.uplink.send_interval.is_zero() {
            return Err("uplink send_interval must be non-zero".to_string());
        }

        if self.serial.read_timeout.is_zero() {
            return Err("serial read_timeout must be non-zero".to_string());
        }
        if self.serial.read_timeout > self.uplink.send_interval {
            return Err(
                "serial read_timeout must not exceed uplink send_interval; \
                 the reader must wake at least once per flush interval"
                    .to_string(),
            );
        }
        if self.serial.chunk_queue_capacity == 0 {
            return Err("serial chunk_queue_capacity must be at least 1".to_string());
        }

        if self.watchdog.desync_threshold == 0 {
            return Err("watchdog desync_threshold must be at least 1".to_string());
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_config() -> NodeConfig {
        NodeConfig {
            application: ApplicationConfig {
                name: "gnss-node".to_string(),
                log_level: "info".to_string(),
                diagnostic_log: None,
            },
            station: StationConfig {
                station_id: "station-001".to_string(),
                station_name: "Test Ground Node".to_string(),
                latitude: 25.2731,
                longitude: 51.6080,
                antenna_height: 10.5,
                is_reference_station: true,
            },
            serial: SerialConfig {
                device: "/dev/ttyAMA0".to_string(),
                baud_rate: 115_200,
                read_timeout: default_read_timeout(),
                max_reopen_attempts: 10,
                chunk_queue_capacity: 64,
            },
            logbook: LogbookConfig {
                root_dir: PathBuf::from("/data/gnss"),
                fsync_interval_bytes: 1_000_000,
            },
            uplink: UplinkConfig {
                url: "http://localhost:8000/api/v1/ingest".to_string(),
                api_key: "secret".to_string(),
                send_interval: Duration::from_secs(1),
                request_timeout: Duration::from_secs(10),
                max_attempts: 4,
            },
            watchdog: WatchdogConfig::default(),
        }
    }

    #[test]
    fn sample_config_validates() {
        assert!(sample_config().validate().is_ok());
    }

    #[test]
    fn rejects_invalid_log_level() {
        let mut config = sample_config();
        config.application.log_level = "loud".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_out_of_range_position() {
        let mut config = sample_config();
        config.station.latitude = 95.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_non_http_url() {
        let mut config = sample_config();
        config.uplink.url = "ftp://collector".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_read_timeout_longer_than_send_interval() {
        let mut config = sample_config();
        config.serial.read_timeout = Duration::from_secs(5);
        assert!(config.validate().is_err());
    }

    #[test]
    fn parses_toml_with_defaults() {
        let toml_str = r#"
            [application]
            log_level = "debug"

            [station]
            station_id = "station-042"
            latitude = 25.0
            longitude = 51.0
            antenna_height = 4.2

            [serial]
            device = "/dev/ttyACM0"

            [logbook]
            root_dir = "/data/gnss"

            [uplink]
            url = "https://collector.example/api/v1/ingest"
            api_key = "k"
            send_interval = "2s"
        "#;
        let config: NodeConfig = Figment::new()
            .merge(Toml::string(toml_str))
            .extract()
            .expect("parse failed");
        assert_eq!(config.serial.baud_rate, 115_200);
        assert_eq!(config.uplink.send_interval, Duration::from_secs(2));
        assert_eq!(config.watchdog.desync_threshold, 10);
        assert!(config.validate().is_ok());
    }
}
