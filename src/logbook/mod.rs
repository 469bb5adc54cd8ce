//! Hour-bucketed durable logging of raw frame bytes.
//!
//! Every accepted frame's exact wire bytes are appended to one file per
//! protocol family per UTC hour, under
//! `{root}/{YYYY}/{MM}/{DD}/{HH}.{nmea|ubx}`. On the first append after an
//! hour boundary the completed pair is closed and handed to
//! [`archive::finalize_bucket`], which compresses it and writes a SHA-256
//! sibling. Rotation is checked on every append rather than by a timer, so
//! a rotation can never race a write that is mid-flight on the old bucket:
//! check-and-possibly-rotate plus the append are one unit per family.
//!
//! The logbook receives raw bytes rather than parsed fields so the on-disk
//! record stays independently replayable.

pub mod archive;
pub mod clock;

pub use clock::{Clock, FixedClock, SystemClock};

use crate::error::NodeResult;
use crate::protocol::Family;
use chrono::{DateTime, Datelike, DurationRound, TimeDelta, Timelike, Utc};
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// An open hour bucket for one protocol family.
#[derive(Debug)]
struct Bucket {
    file: File,
    path: PathBuf,
    written_since_sync: u64,
}

/// Rotating, compressing, checksumming raw logger.
pub struct HourlyLogbook {
    root: PathBuf,
    fsync_interval_bytes: u64,
    clock: Box<dyn Clock>,
    buckets: HashMap<Family, Bucket>,
    current_hour: Option<DateTime<Utc>>,
}

impl HourlyLogbook {
    /// Create a logbook rooted at `root` with the given fsync threshold.
    pub fn new(
        root: impl Into<PathBuf>,
        fsync_interval_bytes: u64,
        clock: Box<dyn Clock>,
    ) -> Self {
        Self {
            root: root.into(),
            fsync_interval_bytes,
            clock,
            buckets: HashMap::new(),
            current_hour: None,
        }
    }

    /// Bucket file path for a family at a given instant.
    pub fn bucket_path(root: &Path, family: Family, at: DateTime<Utc>) -> PathBuf {
        root.join(format!("{:04}", at.year()))
            .join(format!("{:02}", at.month()))
            .join(format!("{:02}", at.day()))
            .join(format!("{:02}.{}", at.hour(), family.extension()))
    }

    /// Append one frame's raw bytes for `family`, rotating first if the
    /// wall-clock hour has changed since the last append.
    ///
    /// A write failure propagates to the caller as backpressure; the frame
    /// is never silently dropped.
    pub fn append(&mut self, family: Family, bytes: &[u8]) -> NodeResult<()> {
        let hour = truncate_to_hour(self.clock.now());
        if self.current_hour != Some(hour) {
            self.rotate_to(hour);
        }

        if !self.buckets.contains_key(&family) {
            let bucket = self.open_bucket(family, hour)?;
            self.buckets.insert(family, bucket);
        }
        // Unwrap-free requery keeps the borrow local
        if let Some(bucket) = self.buckets.get_mut(&family) {
            bucket.file.write_all(bytes)?;
            bucket.written_since_sync += bytes.len() as u64;
            if bucket.written_since_sync >= self.fsync_interval_bytes {
                bucket.file.flush()?;
                bucket.file.sync_data()?;
                bucket.written_since_sync = 0;
            }
        }
        Ok(())
    }

    /// Finalize any uncompressed buckets from earlier hours left on disk by
    /// a crash or unclean stop. The live hour's files are left alone.
    pub fn startup_sweep(&self) {
        let live_hour = truncate_to_hour(self.clock.now());
        let live: Vec<PathBuf> = [Family::Nmea, Family::Ubx]
            .iter()
            .map(|&f| Self::bucket_path(&self.root, f, live_hour))
            .collect();

        for path in find_raw_buckets(&self.root) {
            if live.contains(&path) {
                continue;
            }
            info!(path = %path.display(), "finalizing leftover bucket");
            if let Err(e) = archive::finalize_bucket(&path) {
                warn!(error = %e, "startup sweep failed for bucket");
            }
        }
    }

    /// Close and finalize all open buckets. Called on shutdown; the live
    /// hour is compressed like a completed one.
    pub fn flush_and_close(&mut self) -> NodeResult<()> {
        for (_, bucket) in self.buckets.drain() {
            let Bucket { mut file, path, .. } = bucket;
            file.flush()?;
            file.sync_all()?;
            drop(file);
            if let Err(e) = archive::finalize_bucket(&path) {
                warn!(error = %e, "finalize on shutdown failed");
            }
        }
        self.current_hour = None;
        Ok(())
    }

    /// Close the previous hour's buckets and finalize them. Housekeeping
    /// failure on a past hour is reported but never blocks the live hour.
    fn rotate_to(&mut self, hour: DateTime<Utc>) {
        let closed: Vec<PathBuf> = self
            .buckets
            .drain()
            .map(|(_, bucket)| {
                let Bucket { mut file, path, .. } = bucket;
                if let Err(e) = file.flush().and_then(|_| file.sync_all()) {
                    warn!(path = %path.display(), error = %e, "flush on rotation failed");
                }
                path
            })
            .collect();

        if self.current_hour.is_some() {
            info!(hour = %hour.format("%Y-%m-%d %H:00"), "hour boundary, rotating buckets");
        }
        self.current_hour = Some(hour);

        for path in closed {
            if let Err(e) = archive::finalize_bucket(&path) {
                warn!(error = %e, "bucket housekeeping failed");
            }
        }
    }

    fn open_bucket(&self, family: Family, hour: DateTime<Utc>) -> NodeResult<Bucket> {
        let path = Self::bucket_path(&self.root, family, hour);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        // Append mode: existing data from a restart within the hour survives
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        info!(path = %path.display(), "opened bucket");
        Ok(Bucket {
            file,
            path,
            written_since_sync: 0,
        })
    }
}

fn truncate_to_hour(at: DateTime<Utc>) -> DateTime<Utc> {
    at.duration_trunc(TimeDelta::hours(1)).unwrap_or(at)
}

/// All uncompressed bucket files under the `{root}/{Y}/{M}/{D}` tree.
fn find_raw_buckets(root: &Path) -> Vec<PathBuf> {
    let mut found = Vec::new();
    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(_) => continue,
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                stack.push(path);
            } else if matches!(
                path.extension().and_then(|e| e.to_str()),
                Some("nmea") | Some("ubx")
            ) {
                found.push(path);
            }
        }
    }
    found.sort();
    found
}
