//! Batched network submission to the central collector.
//!
//! Frames accumulate between flush ticks in arrival order. On each tick the
//! accumulator is snapshotted into an immutable [`SendBatch`] with a
//! strictly increasing sequence number and submitted as JSON over HTTP with
//! a per-station bearer token. Transient failures are retried a bounded
//! number of times with doubling backoff; an exhausted batch is dropped and
//! reported, so an extended outage costs bounded memory instead of an
//! unbounded retry queue. A new batch is never started while the previous
//! one's retry cycle is still running, which keeps the collector's view in
//! sequence order.

use crate::config::{StationConfig, UplinkConfig};
use crate::error::{NodeError, NodeResult};
use crate::protocol::Frame;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

/// Arrival-ordered frames waiting for the next flush tick.
#[derive(Debug, Default)]
pub struct BatchAccumulator {
    nmea: Vec<String>,
    ubx: Vec<Vec<u8>>,
}

impl BatchAccumulator {
    /// Append one validated frame.
    pub fn push(&mut self, frame: &Frame) {
        match frame {
            Frame::Nmea(sentence) => self.nmea.push(sentence.sentence()),
            Frame::Ubx(message) => self.ubx.push(message.raw().to_vec()),
        }
    }

    /// Whether nothing has arrived since the last flush.
    pub fn is_empty(&self) -> bool {
        self.nmea.is_empty() && self.ubx.is_empty()
    }

    /// Counts of accumulated sentences and binary messages.
    pub fn len(&self) -> (usize, usize) {
        (self.nmea.len(), self.ubx.len())
    }

    fn drain(&mut self) -> (Vec<String>, Vec<Vec<u8>>) {
        (
            std::mem::take(&mut self.nmea),
            std::mem::take(&mut self.ubx),
        )
    }
}

/// One immutable submission, matching the collector's ingest schema.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendBatch {
    /// Station ID registered with the collector.
    pub station_id: String,
    /// Human-readable station name.
    pub station_name: String,
    /// Unique id for collector-side dedup.
    pub batch_id: Uuid,
    /// Strictly increasing per process lifetime.
    pub sequence_number: u64,
    /// Unix timestamp (seconds) when the batch was cut.
    pub recv_ts: f64,
    /// Raw sentences, arrival order.
    pub nmea_raw: Vec<String>,
    /// Base64 binary messages, arrival order.
    pub ubx_raw: Vec<String>,
    /// Whether the station occupies a surveyed position.
    pub is_reference_station: bool,
    /// Surveyed (lat, lon, height) for reference stations.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub known_position: Option<(f64, f64, f64)>,
}

/// What a flush tick did.
#[derive(Debug, PartialEq, Eq)]
pub enum FlushOutcome {
    /// Nothing accumulated; no submission made.
    Empty,
    /// Batch accepted by the collector.
    Sent {
        /// Sequence number of the accepted batch.
        sequence: u64,
    },
    /// Retries exhausted; the batch was dropped and reported.
    Dropped {
        /// Sequence number of the dropped batch.
        sequence: u64,
        /// Attempts made before giving up.
        attempts: u32,
    },
}

/// Transmission counters.
#[derive(Debug, Default, Clone, Copy)]
pub struct UplinkStats {
    /// Batches accepted by the collector.
    pub sent: u64,
    /// Batches dropped after retry exhaustion.
    pub failed: u64,
}

impl std::fmt::Display for UplinkStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let total = self.sent + self.failed;
        if total == 0 {
            return write!(f, "no batches sent yet");
        }
        let rate = self.sent as f64 / total as f64 * 100.0;
        write!(
            f,
            "{} sent, {} failed, success rate {:.1}%",
            self.sent, self.failed, rate
        )
    }
}

/// Batch sender owning the accumulator and the in-flight submission.
pub struct Uplink {
    client: reqwest::Client,
    url: String,
    api_key: String,
    request_timeout: Duration,
    max_attempts: u32,
    station: StationConfig,
    accumulator: BatchAccumulator,
    sequence_number: u64,
    stats: UplinkStats,
}

impl Uplink {
    /// Build a sender from configuration.
    pub fn new(config: &UplinkConfig, station: StationConfig) -> NodeResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;
        Ok(Self {
            client,
            url: config.url.clone(),
            api_key: config.api_key.clone(),
            request_timeout: config.request_timeout,
            max_attempts: config.max_attempts,
            station,
            accumulator: BatchAccumulator::default(),
            sequence_number: 0,
            stats: UplinkStats::default(),
        })
    }

    /// Queue one validated frame for the next flush.
    pub fn record(&mut self, frame: &Frame) {
        self.accumulator.push(frame);
    }

    /// Frames waiting for the next flush, (sentences, binary messages).
    pub fn pending(&self) -> (usize, usize) {
        self.accumulator.len()
    }

    /// Transmission counters so far.
    pub fn stats(&self) -> UplinkStats {
        self.stats
    }

    /// Cut the accumulated frames into a batch without submitting it.
    ///
    /// Returns `None` when nothing accumulated. The batch is immutable from
    /// here on; the accumulator starts empty for the next interval.
    pub fn cut_batch(&mut self) -> Option<SendBatch> {
        if self.accumulator.is_empty() {
            return None;
        }
        let (nmea_raw, ubx) = self.accumulator.drain();
        self.sequence_number += 1;
        Some(SendBatch {
            station_id: self.station.station_id.clone(),
            station_name: self.station.station_name.clone(),
            batch_id: Uuid::new_v4(),
            sequence_number: self.sequence_number,
            recv_ts: Utc::now().timestamp_micros() as f64 / 1e6,
            nmea_raw,
            ubx_raw: ubx.iter().map(|m| BASE64.encode(m)).collect(),
            is_reference_station: self.station.is_reference_station,
            known_position: self.station.is_reference_station.then(|| {
                (
                    self.station.latitude,
                    self.station.longitude,
                    self.station.antenna_height,
                )
            }),
        })
    }

    /// Flush tick: snapshot the accumulator and submit the batch, retrying
    /// transient failures with doubling backoff until accepted or exhausted.
    pub async fn flush(&mut self) -> NodeResult<FlushOutcome> {
        let batch = match self.cut_batch() {
            Some(batch) => batch,
            None => return Ok(FlushOutcome::Empty),
        };
        let sequence = batch.sequence_number;
        let (nmea_count, ubx_count) = (batch.nmea_raw.len(), batch.ubx_raw.len());

        match self.submit_with_retry(&batch).await {
            Ok(()) => {
                self.stats.sent += 1;
                info!(
                    sequence,
                    nmea = nmea_count,
                    ubx = ubx_count,
                    "batch accepted"
                );
                Ok(FlushOutcome::Sent { sequence })
            }
            Err(NodeError::UplinkExhausted { attempts, message }) => {
                self.stats.failed += 1;
                warn!(
                    sequence,
                    attempts,
                    error = %message,
                    "batch dropped after retry exhaustion"
                );
                Ok(FlushOutcome::Dropped { sequence, attempts })
            }
            Err(other) => Err(other),
        }
    }

    async fn submit_with_retry(&self, batch: &SendBatch) -> NodeResult<()> {
        let mut attempts = 0u32;
        loop {
            attempts += 1;

            let result = self
                .client
                .post(&self.url)
                .bearer_auth(&self.api_key)
                .json(batch)
                .timeout(self.request_timeout)
                .send()
                .await;

            let failure = match result {
                Ok(response) if response.status().is_success() => return Ok(()),
                Ok(response) => {
                    let status = response.status();
                    let body = response.text().await.unwrap_or_default();
                    format!("collector rejected batch: {} {}", status, body)
                }
                Err(e) => format!("transport error: {}", e),
            };

            if attempts >= self.max_attempts {
                return Err(NodeError::UplinkExhausted {
                    attempts,
                    message: failure,
                });
            }

            warn!(
                attempt = attempts,
                max = self.max_attempts,
                error = %failure,
                "submission failed, backing off"
            );
            let backoff_ms = 50u64 * 2u64.pow(attempts - 1);
            tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
        }
    }
}
