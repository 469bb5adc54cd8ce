//! Wire protocol handling for the receiver's mixed binary/ASCII stream.
//!
//! A single serial wire carries two interleaved message families:
//!
//! - **UBX**: length-delimited binary frames introduced by the two sync
//!   bytes `0xB5 0x62`, followed by class, id, a little-endian u16 payload
//!   length, the payload, and a two-byte Fletcher checksum.
//! - **NMEA**: ASCII sentences from `$` to CRLF with an appended `*hh`
//!   XOR checksum.
//!
//! [`Demultiplexer`] classifies and extracts complete messages from the raw
//! byte stream, discarding corrupted candidates one byte at a time so that a
//! single bad length field can never desynchronize the stream indefinitely.
//! A [`Frame`] is only ever constructed from a candidate whose checksum
//! validated against its own payload.

pub mod demux;
pub mod nmea;
pub mod ubx;

pub use demux::{DemuxEvent, DemuxStats, Demultiplexer, RejectReason};
pub use nmea::NmeaSentence;
pub use ubx::UbxMessage;

/// First UBX sync byte.
pub const UBX_SYNC_1: u8 = 0xB5;
/// Second UBX sync byte.
pub const UBX_SYNC_2: u8 = 0x62;
/// Sentence start marker for the text family.
pub const NMEA_START: u8 = b'$';

/// Upper bound on a declared UBX payload length. The length field is
/// untrusted input; anything above this is a hard reject.
pub const MAX_UBX_PAYLOAD: usize = 2048;
/// Upper bound on an NMEA sentence, start marker through terminator.
pub const MAX_NMEA_SENTENCE: usize = 512;
/// Minimum size of a UBX frame: sync(2) + class(1) + id(1) + len(2) + ck(2).
pub const UBX_MIN_FRAME: usize = 8;
/// Fixed UBX overhead around the payload.
pub const UBX_OVERHEAD: usize = 8;

/// The two protocol families sharing the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Family {
    /// ASCII sentence stream.
    Nmea,
    /// Binary message stream.
    Ubx,
}

impl Family {
    /// File extension used for this family's raw log buckets.
    pub fn extension(self) -> &'static str {
        match self {
            Family::Nmea => "nmea",
            Family::Ubx => "ubx",
        }
    }
}

/// A fully checksum-validated protocol message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// A validated text sentence.
    Nmea(NmeaSentence),
    /// A validated binary message.
    Ubx(UbxMessage),
}

impl Frame {
    /// Which family this frame belongs to.
    pub fn family(&self) -> Family {
        match self {
            Frame::Nmea(_) => Family::Nmea,
            Frame::Ubx(_) => Family::Ubx,
        }
    }

    /// The exact bytes this frame occupied on the wire.
    pub fn raw(&self) -> &[u8] {
        match self {
            Frame::Nmea(s) => s.raw(),
            Frame::Ubx(m) => m.raw(),
        }
    }
}
