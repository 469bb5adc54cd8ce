//! Ingestion orchestrator: the serial read loop and the pipeline glue.
//!
//! One blocking reader thread owns the serial handle and performs bounded
//! reads, pushing raw chunks through a bounded channel. The orchestrator
//! task selects over that channel, the uplink flush tick, and the shutdown
//! signal. Every validated frame is routed to the logbook first and then to
//! the uplink accumulator, preserving arrival order in both sinks.
//!
//! Lifecycle: `Starting` opens the serial handle (failure is fatal, the
//! supervisor restarts the process). `Reading` feeds the pipeline.
//! `Recovering` is entered inside the reader thread when the handle errors:
//! bounded reopen attempts with backoff, then a deliberate exit if the
//! device never comes back. `Stopping` drains buffered chunks, flushes the
//! final batch, and finalizes the live log buckets.
//!
//! Backpressure: a failed log write is retried in place instead of dropping
//! the frame; while the orchestrator is stuck, the bounded channel fills and
//! the reader blocks, pushing the pressure back to the device buffer.

use crate::config::NodeConfig;
use crate::error::{NodeError, NodeResult};
use crate::logbook::{HourlyLogbook, SystemClock};
use crate::protocol::{DemuxEvent, Demultiplexer, Frame};
use crate::uplink::{FlushOutcome, Uplink};
use serialport::{DataBits, Parity, SerialPort, StopBits};
use std::io::Read;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

/// Ticks between periodic statistics lines.
const STATS_EVERY_TICKS: u64 = 60;
/// Delay between log-write retries while backpressure is applied.
const WRITE_RETRY_DELAY: Duration = Duration::from_millis(500);

/// Events the reader thread hands to the orchestrator.
enum SerialEvent {
    /// One raw read's worth of bytes.
    Chunk(Vec<u8>),
    /// The device could not be reopened; the process should exit.
    Fatal(NodeError),
}

/// The long-running ingestion service.
pub struct IngestService {
    config: NodeConfig,
}

impl IngestService {
    /// Build the service from validated configuration.
    pub fn new(config: NodeConfig) -> Self {
        Self { config }
    }

    /// Run until shutdown is signalled or the device is lost for good.
    pub async fn run(self) -> NodeResult<()> {
        let config = self.config;

        // Starting: an unopenable device is fatal to this process instance
        let port = open_port(&config)?;
        info!(
            device = %config.serial.device,
            baud = config.serial.baud_rate,
            "serial receiver connected"
        );

        let mut logbook = HourlyLogbook::new(
            config.logbook.root_dir.clone(),
            config.logbook.fsync_interval_bytes,
            Box::new(SystemClock),
        );
        logbook.startup_sweep();

        let mut uplink = Uplink::new(&config.uplink, config.station.clone())?;
        let mut demux = Demultiplexer::new();

        let (tx, mut rx) = mpsc::channel::<SerialEvent>(config.serial.chunk_queue_capacity);
        let stop = Arc::new(AtomicBool::new(false));
        let reader = spawn_reader(port, &config, tx, Arc::clone(&stop))?;

        let shutdown = shutdown_signal();
        tokio::pin!(shutdown);

        let mut flush = tokio::time::interval(config.uplink.send_interval);
        flush.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick fires immediately; swallow it so the first batch
        // spans a full interval.
        flush.tick().await;

        let mut ticks: u64 = 0;
        let mut device_lost: Option<NodeError> = None;

        info!("reading");
        loop {
            tokio::select! {
                event = rx.recv() => match event {
                    Some(SerialEvent::Chunk(chunk)) => {
                        ingest_chunk(&mut demux, &mut logbook, &mut uplink, &chunk).await;
                    }
                    Some(SerialEvent::Fatal(e)) => {
                        error!(error = %e, "serial device lost, shutting down for supervised restart");
                        device_lost = Some(e);
                        break;
                    }
                    None => break,
                },
                _ = flush.tick() => {
                    ticks += 1;
                    match uplink.flush().await {
                        Ok(FlushOutcome::Empty | FlushOutcome::Sent { .. }) => {}
                        Ok(FlushOutcome::Dropped { sequence, .. }) => {
                            warn!(sequence, "continuing after dropped batch");
                        }
                        Err(e) => warn!(error = %e, "flush failed"),
                    }
                    if ticks % STATS_EVERY_TICKS == 0 {
                        let stats = demux.stats();
                        info!(
                            uplink = %uplink.stats(),
                            nmea_frames = stats.nmea_frames,
                            ubx_frames = stats.ubx_frames,
                            oversize_rejects = stats.oversize_rejects,
                            "periodic stats"
                        );
                    }
                }
                _ = &mut shutdown => {
                    info!("shutdown signal received");
                    break;
                }
            }
        }

        // Stopping: stop the reader, drain what it already produced, then
        // flush both sinks.
        stop.store(true, Ordering::Relaxed);
        rx.close();
        while let Ok(event) = rx.try_recv() {
            if let SerialEvent::Chunk(chunk) = event {
                ingest_chunk(&mut demux, &mut logbook, &mut uplink, &chunk).await;
            }
        }
        if demux.pending() > 0 {
            info!(bytes = demux.pending(), "truncated tail at shutdown");
        }
        if let Err(e) = uplink.flush().await {
            warn!(error = %e, "final flush failed");
        }
        logbook.flush_and_close()?;
        if reader.join().is_err() {
            warn!("reader thread panicked");
        }
        info!(uplink = %uplink.stats(), "stopped");

        match device_lost {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

/// Feed one chunk through the demultiplexer and route resulting frames.
async fn ingest_chunk(
    demux: &mut Demultiplexer,
    logbook: &mut HourlyLogbook,
    uplink: &mut Uplink,
    chunk: &[u8],
) {
    demux.push(chunk);
    while let Some(event) = demux.next_event() {
        match event {
            DemuxEvent::Frame(frame) => {
                append_with_backpressure(logbook, &frame).await;
                uplink.record(&frame);
            }
            DemuxEvent::Reject { .. } => {
                // Already logged with its reason at the rejection site
            }
        }
    }
}

/// Durability first: retry the log write in place rather than drop a frame.
async fn append_with_backpressure(logbook: &mut HourlyLogbook, frame: &Frame) {
    let mut attempts: u32 = 0;
    loop {
        match logbook.append(frame.family(), frame.raw()) {
            Ok(()) => return,
            Err(e) => {
                attempts += 1;
                if attempts == 1 || attempts % 10 == 0 {
                    warn!(
                        attempts,
                        error = %e,
                        "log write failed, applying backpressure"
                    );
                }
                tokio::time::sleep(WRITE_RETRY_DELAY).await;
            }
        }
    }
}

/// Open the receiver in raw 8N1 mode with a bounded read timeout.
fn open_port(config: &NodeConfig) -> NodeResult<Box<dyn SerialPort>> {
    let port = serialport::new(&config.serial.device, config.serial.baud_rate)
        .data_bits(DataBits::Eight)
        .parity(Parity::None)
        .stop_bits(StopBits::One)
        .timeout(config.serial.read_timeout)
        .open()?;
    Ok(port)
}

/// Reader thread: bounded blocking reads, with reopen-and-backoff recovery
/// when the handle itself errors.
fn spawn_reader(
    mut port: Box<dyn SerialPort>,
    config: &NodeConfig,
    tx: mpsc::Sender<SerialEvent>,
    stop: Arc<AtomicBool>,
) -> NodeResult<std::thread::JoinHandle<()>> {
    let config = config.clone();
    let handle = std::thread::Builder::new()
        .name("serial-reader".into())
        .spawn(move || {
            let mut buf = [0u8; 4096];
            while !stop.load(Ordering::Relaxed) {
                match port.read(&mut buf) {
                    Ok(n) if n > 0 => {
                        if tx.blocking_send(SerialEvent::Chunk(buf[..n].to_vec())).is_err() {
                            return;
                        }
                    }
                    Ok(_) => {
                        // Zero-length read from a serial device means the
                        // handle is stale
                        match recover_port(&config, &stop) {
                            Some(reopened) => port = reopened,
                            None => {
                                let _ = tx.blocking_send(SerialEvent::Fatal(
                                    NodeError::SerialExhausted {
                                        attempts: config.serial.max_reopen_attempts,
                                    },
                                ));
                                return;
                            }
                        }
                    }
                    Err(e) if e.kind() == std::io::ErrorKind::TimedOut => {
                        // Quiet wire; loop so the stop flag stays live
                    }
                    Err(e) => {
                        warn!(error = %e, "serial read error");
                        match recover_port(&config, &stop) {
                            Some(reopened) => port = reopened,
                            None => {
                                let _ = tx.blocking_send(SerialEvent::Fatal(
                                    NodeError::SerialExhausted {
                                        attempts: config.serial.max_reopen_attempts,
                                    },
                                ));
                                return;
                            }
                        }
                    }
                }
            }
        })?;
    Ok(handle)
}

/// Recovering state: bounded reopen attempts with linear backoff.
///
/// Returns the reopened handle, or `None` when attempts are exhausted or a
/// stop was requested mid-recovery.
fn recover_port(config: &NodeConfig, stop: &AtomicBool) -> Option<Box<dyn SerialPort>> {
    for attempt in 1..=config.serial.max_reopen_attempts {
        if stop.load(Ordering::Relaxed) {
            return None;
        }
        warn!(
            attempt,
            max = config.serial.max_reopen_attempts,
            device = %config.serial.device,
            "serial recovering"
        );
        std::thread::sleep(backoff_delay(attempt));
        match open_port(config) {
            Ok(port) => {
                info!(attempt, "serial receiver reopened");
                return Some(port);
            }
            Err(e) => warn!(attempt, error = %e, "reopen failed"),
        }
    }
    error!(
        attempts = config.serial.max_reopen_attempts,
        "serial recovery exhausted"
    );
    None
}

fn backoff_delay(attempt: u32) -> Duration {
    Duration::from_millis((500 * attempt as u64).min(5_000))
}

/// Resolves when the process is asked to stop (ctrl-c, or SIGTERM on unix).
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut term = match signal(SignalKind::terminate()) {
            Ok(term) => term,
            Err(_) => {
                let _ = tokio::signal::ctrl_c().await;
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = term.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_is_linear_and_capped() {
        assert_eq!(backoff_delay(1), Duration::from_millis(500));
        assert_eq!(backoff_delay(4), Duration::from_millis(2_000));
        assert_eq!(backoff_delay(100), Duration::from_millis(5_000));
    }
}
