//! Frame demultiplexer for the mixed UBX/NMEA byte stream.
//!
//! The demultiplexer is a push/pull state machine: the orchestrator pushes
//! each raw serial chunk in with [`Demultiplexer::push`] and then drains
//! events with [`Demultiplexer::next_event`] until it returns `None`,
//! meaning the remaining bytes are an incomplete tail kept for the next
//! chunk.
//!
//! Resynchronization policy:
//!
//! - A declared UBX payload length above [`super::MAX_UBX_PAYLOAD`] is a
//!   hard reject. Only the two sync bytes are discarded and scanning resumes
//!   at the next byte, so one corrupt length field can never stall the
//!   stream. This is the `frame too large` diagnostic the watchdog counts.
//! - A UBX checksum mismatch discards a single byte, not the whole declared
//!   candidate, since an off-by-one in the header is the most common
//!   corruption mode and the real frame may start inside the candidate.
//! - A sentence that grows past [`super::MAX_NMEA_SENTENCE`] without its
//!   terminator is abandoned and scanning resumes after its `$`.
//! - A UBX preamble appearing inside an unterminated sentence aborts the
//!   sentence and re-scans at the preamble.
//!
//! No timer is needed for truncated candidates: a bounded declared length
//! means the decision point is always at most one frame away, and the next
//! chunk either completes the candidate or disproves its checksum.

use bytes::{Buf, BytesMut};
use tracing::{debug, warn};

use super::{
    nmea, ubx, Frame, MAX_NMEA_SENTENCE, MAX_UBX_PAYLOAD, NMEA_START, UBX_SYNC_1, UBX_SYNC_2,
};

/// Why a candidate was rejected instead of promoted to a [`Frame`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// Declared UBX payload length exceeds the protocol maximum.
    FrameTooLarge {
        /// The untrusted length field's value.
        declared: usize,
    },
    /// UBX trailing checksum did not match the candidate.
    BadUbxChecksum,
    /// NMEA `*hh` checksum did not match the sentence body.
    BadNmeaChecksum,
    /// Sentence carried no parseable `*hh` checksum.
    SentenceUnchecksummed,
    /// Sentence exceeded the maximum length without a terminator.
    SentenceOverrun,
    /// Sentence contained non-printable bytes or an embedded preamble.
    SentenceCorrupt,
}

/// One demultiplexing decision.
#[derive(Debug, PartialEq, Eq)]
pub enum DemuxEvent {
    /// A validated frame, in wire order.
    Frame(Frame),
    /// A rejected candidate; `skipped` bytes were discarded to resync.
    Reject {
        /// Why the candidate was discarded.
        reason: RejectReason,
        /// How many bytes the resynchronization step consumed.
        skipped: usize,
    },
}

/// Running counters, surfaced periodically and by tests.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DemuxStats {
    /// Validated text sentences.
    pub nmea_frames: u64,
    /// Validated binary messages.
    pub ubx_frames: u64,
    /// Hard rejects from oversized length fields.
    pub oversize_rejects: u64,
    /// UBX checksum mismatches.
    pub ubx_checksum_rejects: u64,
    /// Text-sentence rejects of any kind.
    pub nmea_rejects: u64,
    /// Bytes discarded while searching for a sync marker.
    pub noise_bytes: u64,
}

/// Streaming demultiplexer over an unbounded byte stream.
#[derive(Debug, Default)]
pub struct Demultiplexer {
    buf: BytesMut,
    stats: DemuxStats,
}

impl Demultiplexer {
    /// Create an empty demultiplexer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one raw chunk read from the serial device.
    pub fn push(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
    }

    /// Counters accumulated since construction.
    pub fn stats(&self) -> DemuxStats {
        self.stats
    }

    /// Bytes currently buffered as an incomplete tail.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }

    /// Produce the next frame or reject decision, or `None` when the
    /// buffered bytes are an incomplete tail awaiting the next chunk.
    pub fn next_event(&mut self) -> Option<DemuxEvent> {
        loop {
            self.skip_noise();
            if self.buf.is_empty() {
                return None;
            }

            if self.buf[0] == UBX_SYNC_1 {
                if self.buf.len() < 2 {
                    return None;
                }
                if self.buf[1] != UBX_SYNC_2 {
                    // Lone sync byte, not a preamble
                    self.buf.advance(1);
                    self.stats.noise_bytes += 1;
                    continue;
                }
                match self.scan_ubx() {
                    ScanOutcome::Event(event) => return Some(event),
                    ScanOutcome::NeedMore => return None,
                }
            } else {
                match self.scan_nmea() {
                    ScanOutcome::Event(event) => return Some(event),
                    ScanOutcome::NeedMore => return None,
                }
            }
        }
    }

    /// Discard bytes preceding the first plausible sync marker.
    fn skip_noise(&mut self) {
        match self
            .buf
            .iter()
            .position(|&b| b == UBX_SYNC_1 || b == NMEA_START)
        {
            Some(0) => {}
            Some(start) => {
                self.stats.noise_bytes += start as u64;
                self.buf.advance(start);
            }
            None => {
                self.stats.noise_bytes += self.buf.len() as u64;
                self.buf.clear();
            }
        }
    }

    fn scan_ubx(&mut self) -> ScanOutcome {
        match ubx::try_extract(&self.buf) {
            ubx::Extract::Complete { message, consumed } => {
                self.buf.advance(consumed);
                self.stats.ubx_frames += 1;
                debug!(
                    class = message.class(),
                    id = message.id(),
                    len = message.payload_len(),
                    "ubx frame"
                );
                ScanOutcome::Event(DemuxEvent::Frame(Frame::Ubx(message)))
            }
            ubx::Extract::NeedMore => ScanOutcome::NeedMore,
            ubx::Extract::Oversize { declared } => {
                // Hard reject: drop the preamble only, keep scanning at the
                // next byte. This line is the watchdog's desync signature.
                warn!(
                    declared,
                    max = MAX_UBX_PAYLOAD,
                    "frame too large, discarding sync bytes"
                );
                self.buf.advance(2);
                self.stats.oversize_rejects += 1;
                ScanOutcome::Event(DemuxEvent::Reject {
                    reason: RejectReason::FrameTooLarge { declared },
                    skipped: 2,
                })
            }
            ubx::Extract::BadChecksum => {
                warn!("ubx checksum mismatch, resuming one byte forward");
                self.buf.advance(1);
                self.stats.ubx_checksum_rejects += 1;
                ScanOutcome::Event(DemuxEvent::Reject {
                    reason: RejectReason::BadUbxChecksum,
                    skipped: 1,
                })
            }
        }
    }

    fn scan_nmea(&mut self) -> ScanOutcome {
        debug_assert!(self.buf[0] == NMEA_START);

        let window = self.buf.len().min(MAX_NMEA_SENTENCE + 1);

        // A preamble inside the unterminated sentence means the sentence was
        // cut short on the wire; abort it and re-scan at the preamble.
        for i in 1..window.saturating_sub(1) {
            if self.buf[i] == b'\n' {
                break;
            }
            if self.buf[i] == UBX_SYNC_1 && self.buf[i + 1] == UBX_SYNC_2 {
                warn!("binary preamble inside sentence, abandoning it");
                self.buf.advance(i);
                self.stats.nmea_rejects += 1;
                return ScanOutcome::Event(DemuxEvent::Reject {
                    reason: RejectReason::SentenceCorrupt,
                    skipped: i,
                });
            }
        }

        match self.buf[..window].iter().position(|&b| b == b'\n') {
            Some(end) => {
                let line = self.buf.split_to(end + 1);
                match nmea::validate(&line) {
                    Ok(sentence) => {
                        self.stats.nmea_frames += 1;
                        debug!(tag = sentence.tag(), "nmea sentence");
                        ScanOutcome::Event(DemuxEvent::Frame(Frame::Nmea(sentence)))
                    }
                    Err(reason) => {
                        warn!(?reason, "sentence rejected");
                        self.stats.nmea_rejects += 1;
                        ScanOutcome::Event(DemuxEvent::Reject {
                            reason,
                            skipped: line.len(),
                        })
                    }
                }
            }
            None if self.buf.len() > MAX_NMEA_SENTENCE => {
                // Terminator never arrived within the length bound; resume
                // scanning right after the abandoned start marker.
                warn!(len = self.buf.len(), "sentence overrun, abandoning it");
                self.buf.advance(1);
                self.stats.nmea_rejects += 1;
                ScanOutcome::Event(DemuxEvent::Reject {
                    reason: RejectReason::SentenceOverrun,
                    skipped: 1,
                })
            }
            None => ScanOutcome::NeedMore,
        }
    }
}

enum ScanOutcome {
    Event(DemuxEvent),
    NeedMore,
}
