//! # GNSS Node Core Library
//!
//! This crate is the core library for the `gnss-node` field station service.
//! It encapsulates the streaming ingestion pipeline: demultiplexing the
//! receiver's mixed binary/ASCII wire into validated frames, durably logging
//! raw bytes into hour buckets with compression and checksums, and uplinking
//! parsed batches to the central collector on a fixed cadence. Organizing
//! the project as a library lets the ingestion binary and the watchdog
//! binary share the same configuration, telemetry, and monitoring logic.
//!
//! ## Crate Structure
//!
//! - **`config`**: Strongly-typed configuration loaded from TOML and
//!   environment variables. See [`config::NodeConfig`].
//! - **`error`**: The crate-wide [`error::NodeError`] enum and result alias.
//! - **`telemetry`**: Tracing setup, including the append-only diagnostic
//!   file the watchdog scans.
//! - **`protocol`**: The frame demultiplexer and the UBX/NMEA framing and
//!   checksum primitives.
//! - **`logbook`**: The hour-bucketed rotating logger with compression and
//!   SHA-256 integrity sidecars.
//! - **`uplink`**: Batch accumulation, serialization, and retrying HTTP
//!   submission to the collector.
//! - **`service`**: The ingestion orchestrator tying serial input to the
//!   logbook and uplink.
//! - **`watchdog`**: Out-of-band health monitoring over the diagnostic log
//!   and a least-privilege process-control seam.

pub mod config;
pub mod error;
pub mod logbook;
pub mod protocol;
pub mod service;
pub mod telemetry;
pub mod uplink;
pub mod watchdog;
