//! Health monitoring for the ingestion service.
//!
//! The watchdog runs out-of-band (cron or a systemd timer triggers the
//! companion binary), owns no pipeline state, and touches the service only
//! through two operations: restart and is-active. It reads the append-only
//! diagnostic log the service writes and counts lines carrying the desync
//! signature within a trailing window; a parser that keeps rejecting
//! oversized length fields is not going to fix itself, and a process
//! restart is the simplest trustworthy recovery.
//!
//! A second pass handles the other failure mode: the service sitting in a
//! failed state after a network outage. It restarts only once the collector
//! endpoint is reachable again, so a dead uplink does not cause a restart
//! storm.

use crate::config::WatchdogConfig;
use crate::error::{NodeError, NodeResult};
use chrono::{DateTime, Utc};
use regex::Regex;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::net::{TcpStream, ToSocketAddrs};
use std::path::Path;
use std::process::Command;
use std::time::Duration;
use tracing::{info, warn};

/// Stable substring the demultiplexer emits on an oversized length field.
pub const DESYNC_SIGNATURE: &str = "frame too large";

/// The two process-control operations the watchdog is allowed.
pub trait ServiceControl {
    /// Restart the unit.
    fn restart(&self, unit: &str) -> NodeResult<()>;
    /// Whether the unit is currently active.
    fn is_active(&self, unit: &str) -> NodeResult<bool>;
}

/// `systemctl`-backed control, scoped to restart and is-active.
#[derive(Debug, Default)]
pub struct Systemctl;

impl ServiceControl for Systemctl {
    fn restart(&self, unit: &str) -> NodeResult<()> {
        let status = Command::new("systemctl").args(["restart", unit]).status()?;
        if status.success() {
            Ok(())
        } else {
            Err(NodeError::Io(std::io::Error::other(format!(
                "systemctl restart {} exited with {}",
                unit, status
            ))))
        }
    }

    fn is_active(&self, unit: &str) -> NodeResult<bool> {
        let status = Command::new("systemctl")
            .args(["is-active", "--quiet", unit])
            .status()?;
        Ok(status.success())
    }
}

/// Outcome of the desync-threshold pass.
#[derive(Debug, PartialEq, Eq)]
pub enum CheckOutcome {
    /// Signature count within bounds; nothing done.
    Healthy {
        /// Signature lines seen inside the window.
        count: usize,
    },
    /// Threshold exceeded; one restart was issued.
    Restarted {
        /// Signature lines seen inside the window.
        count: usize,
        /// Whether the unit reported active after the restart.
        verified: bool,
    },
}

/// Outcome of the network-aware recovery pass.
#[derive(Debug, PartialEq, Eq)]
pub enum RecoverOutcome {
    /// Unit already active; no-op.
    Active,
    /// Unit down but the collector is unreachable; restart withheld.
    SkippedUnreachable,
    /// Unit down with connectivity restored; restart issued.
    Restarted {
        /// Whether the unit reported active after the restart.
        verified: bool,
    },
}

/// Count desync-signature lines within `window` before `now`.
///
/// Each diagnostic line starts with an RFC 3339 timestamp; lines that fail
/// to parse are skipped rather than counted, so junk in the log can only
/// under-trigger.
pub fn count_desync_events(
    log_path: &Path,
    window: Duration,
    now: DateTime<Utc>,
) -> NodeResult<usize> {
    let earliest = now
        - chrono::TimeDelta::from_std(window)
            .map_err(|e| NodeError::Configuration(format!("window out of range: {}", e)))?;
    let timestamp_re = Regex::new(r"^(\S+)")
        .map_err(|e| NodeError::Configuration(format!("bad timestamp pattern: {}", e)))?;

    let file = File::open(log_path)?;
    let mut count = 0usize;
    for line in BufReader::new(file).lines() {
        let line = line?;
        if !line.contains(DESYNC_SIGNATURE) {
            continue;
        }
        let stamp = match timestamp_re
            .captures(&line)
            .and_then(|c| c.get(1))
            .and_then(|m| DateTime::parse_from_rfc3339(m.as_str()).ok())
        {
            Some(stamp) => stamp.with_timezone(&Utc),
            None => continue,
        };
        if stamp >= earliest && stamp <= now {
            count += 1;
        }
    }
    Ok(count)
}

/// The watchdog's two passes over an injected control seam.
pub struct Watchdog<C: ServiceControl> {
    control: C,
    config: WatchdogConfig,
}

impl<C: ServiceControl> Watchdog<C> {
    /// Build a watchdog over the given control implementation.
    pub fn new(control: C, config: WatchdogConfig) -> Self {
        Self { control, config }
    }

    /// Desync pass: count signatures in the trailing window and restart the
    /// unit when the count exceeds the threshold. Idempotent below the
    /// threshold.
    pub fn check_desync(&self, log_path: &Path, now: DateTime<Utc>) -> NodeResult<CheckOutcome> {
        let count = count_desync_events(log_path, self.config.window, now)?;
        if count <= self.config.desync_threshold {
            info!(
                count,
                threshold = self.config.desync_threshold,
                "desync signatures within bounds"
            );
            return Ok(CheckOutcome::Healthy { count });
        }

        warn!(
            count,
            threshold = self.config.desync_threshold,
            unit = %self.config.service_unit,
            "desync threshold exceeded, restarting ingestion service"
        );
        self.control.restart(&self.config.service_unit)?;
        let verified = self.verify_restart()?;
        Ok(CheckOutcome::Restarted { count, verified })
    }

    /// Recovery pass: restart a failed unit, but only once the collector is
    /// reachable, so a network outage does not trigger restart churn.
    pub fn recover(&self, collector_reachable: bool) -> NodeResult<RecoverOutcome> {
        if self.control.is_active(&self.config.service_unit)? {
            info!(unit = %self.config.service_unit, "service active, nothing to do");
            return Ok(RecoverOutcome::Active);
        }
        if !collector_reachable {
            warn!(
                unit = %self.config.service_unit,
                "service down but collector unreachable, withholding restart"
            );
            return Ok(RecoverOutcome::SkippedUnreachable);
        }

        warn!(unit = %self.config.service_unit, "service down with connectivity restored, restarting");
        self.control.restart(&self.config.service_unit)?;
        let verified = self.verify_restart()?;
        Ok(RecoverOutcome::Restarted { verified })
    }

    fn verify_restart(&self) -> NodeResult<bool> {
        let verified = self.control.is_active(&self.config.service_unit)?;
        if verified {
            info!(unit = %self.config.service_unit, "restart verified");
        } else {
            warn!(unit = %self.config.service_unit, "restart did not bring the unit up");
        }
        Ok(verified)
    }
}

/// TCP-level reachability probe against the collector endpoint.
///
/// Resolves the URL's host and default-or-explicit port and attempts one
/// bounded connect. Any address answering counts as reachable.
pub fn endpoint_reachable(url: &str, timeout: Duration) -> bool {
    let parsed = match reqwest::Url::parse(url) {
        Ok(parsed) => parsed,
        Err(_) => return false,
    };
    let host = match parsed.host_str() {
        Some(host) => host,
        None => return false,
    };
    let port = match parsed.port_or_known_default() {
        Some(port) => port,
        None => return false,
    };
    let addrs = match (host, port).to_socket_addrs() {
        Ok(addrs) => addrs,
        Err(_) => return false,
    };
    for addr in addrs {
        if TcpStream::connect_timeout(&addr, timeout).is_ok() {
            return true;
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::Mutex;

    #[derive(Default)]
    struct MockControl {
        restarts: Mutex<Vec<String>>,
        active: Mutex<Vec<bool>>,
    }

    impl MockControl {
        fn with_active(sequence: Vec<bool>) -> Self {
            Self {
                restarts: Mutex::new(Vec::new()),
                active: Mutex::new(sequence),
            }
        }

        fn restart_count(&self) -> usize {
            self.restarts.lock().map(|r| r.len()).unwrap_or(0)
        }
    }

    impl ServiceControl for &MockControl {
        fn restart(&self, unit: &str) -> NodeResult<()> {
            if let Ok(mut restarts) = self.restarts.lock() {
                restarts.push(unit.to_string());
            }
            Ok(())
        }

        fn is_active(&self, _unit: &str) -> NodeResult<bool> {
            Ok(self
                .active
                .lock()
                .ok()
                .and_then(|mut a| if a.is_empty() { None } else { Some(a.remove(0)) })
                .unwrap_or(true))
        }
    }

    fn write_log(lines: &[(DateTime<Utc>, &str)]) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().expect("tempfile");
        for (stamp, message) in lines {
            writeln!(
                file,
                "{}  WARN gnss_node::protocol::demux: {}",
                stamp.to_rfc3339(),
                message
            )
            .expect("write line");
        }
        file
    }

    fn config() -> WatchdogConfig {
        WatchdogConfig {
            service_unit: "gnss-node.service".into(),
            window: Duration::from_secs(600),
            desync_threshold: 10,
        }
    }

    #[test]
    fn counts_only_signatures_inside_window() {
        let now = Utc::now();
        let stale = now - chrono::TimeDelta::minutes(30);
        let recent = now - chrono::TimeDelta::minutes(2);
        let log = write_log(&[
            (stale, "frame too large, discarding sync bytes"),
            (recent, "frame too large, discarding sync bytes"),
            (recent, "batch accepted"),
        ]);

        let count =
            count_desync_events(log.path(), Duration::from_secs(600), now).expect("count");
        assert_eq!(count, 1);
    }

    #[test]
    fn eleven_events_trigger_exactly_one_restart() {
        let now = Utc::now();
        let recent = now - chrono::TimeDelta::minutes(1);
        let lines: Vec<(DateTime<Utc>, &str)> = (0..11)
            .map(|_| (recent, "frame too large, discarding sync bytes"))
            .collect();
        let log = write_log(&lines);

        let control = MockControl::with_active(vec![true]);
        let watchdog = Watchdog::new(&control, config());
        let outcome = watchdog.check_desync(log.path(), now).expect("check");

        assert_eq!(
            outcome,
            CheckOutcome::Restarted {
                count: 11,
                verified: true
            }
        );
        assert_eq!(control.restart_count(), 1);
    }

    #[test]
    fn nine_events_issue_no_restart() {
        let now = Utc::now();
        let recent = now - chrono::TimeDelta::minutes(1);
        let lines: Vec<(DateTime<Utc>, &str)> = (0..9)
            .map(|_| (recent, "frame too large, discarding sync bytes"))
            .collect();
        let log = write_log(&lines);

        let control = MockControl::default();
        let watchdog = Watchdog::new(&control, config());
        let outcome = watchdog.check_desync(log.path(), now).expect("check");

        assert_eq!(outcome, CheckOutcome::Healthy { count: 9 });
        assert_eq!(control.restart_count(), 0);
    }

    #[test]
    fn restart_failure_is_reported_not_hidden() {
        let now = Utc::now();
        let recent = now - chrono::TimeDelta::minutes(1);
        let lines: Vec<(DateTime<Utc>, &str)> = (0..12)
            .map(|_| (recent, "frame too large, discarding sync bytes"))
            .collect();
        let log = write_log(&lines);

        // Unit never comes back up after the restart
        let control = MockControl::with_active(vec![false]);
        let watchdog = Watchdog::new(&control, config());
        let outcome = watchdog.check_desync(log.path(), now).expect("check");

        assert_eq!(
            outcome,
            CheckOutcome::Restarted {
                count: 12,
                verified: false
            }
        );
    }

    #[test]
    fn recover_skips_restart_without_connectivity() {
        let control = MockControl::with_active(vec![false]);
        let watchdog = Watchdog::new(&control, config());
        let outcome = watchdog.recover(false).expect("recover");
        assert_eq!(outcome, RecoverOutcome::SkippedUnreachable);
        assert_eq!(control.restart_count(), 0);
    }

    #[test]
    fn recover_restarts_failed_unit_once_reachable() {
        let control = MockControl::with_active(vec![false, true]);
        let watchdog = Watchdog::new(&control, config());
        let outcome = watchdog.recover(true).expect("recover");
        assert_eq!(outcome, RecoverOutcome::Restarted { verified: true });
        assert_eq!(control.restart_count(), 1);
    }

    #[test]
    fn recover_is_a_no_op_when_active() {
        let control = MockControl::with_active(vec![true]);
        let watchdog = Watchdog::new(&control, config());
        assert_eq!(watchdog.recover(true).expect("recover"), RecoverOutcome::Active);
        assert_eq!(control.restart_count(), 0);
    }
}
