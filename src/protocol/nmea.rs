//! NMEA 0183 sentence validation and checksum handling.

use super::demux::RejectReason;
use super::NMEA_START;

/// A validated NMEA sentence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NmeaSentence {
    tag: String,
    fields: Vec<String>,
    raw: Vec<u8>,
}

impl NmeaSentence {
    /// Sentence tag, talker included (e.g. `GNGGA`).
    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// Data fields after the tag, in wire order.
    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    /// The sentence without line terminators, `$` through `*hh`.
    pub fn sentence(&self) -> String {
        String::from_utf8_lossy(self.raw.trim_ascii_end()).into_owned()
    }

    /// The exact bytes received, terminators included.
    pub fn raw(&self) -> &[u8] {
        &self.raw
    }
}

/// XOR checksum of the sentence body, between `$` and `*`.
pub fn checksum(body: &[u8]) -> u8 {
    body.iter().fold(0u8, |acc, &b| acc ^ b)
}

/// Validate a complete line, start marker through the newline.
///
/// A sentence must be printable ASCII and carry a `*hh` checksum that
/// matches its body; anything else is rejected so that no unchecksummed
/// text ever reaches the downstream sinks.
pub fn validate(line: &[u8]) -> Result<NmeaSentence, RejectReason> {
    debug_assert!(!line.is_empty() && line[0] == NMEA_START);

    let body_end = line
        .iter()
        .position(|&b| b == b'\r' || b == b'\n')
        .unwrap_or(line.len());
    let trimmed = &line[..body_end];

    if !trimmed.iter().all(|&b| (0x20..0x7F).contains(&b)) {
        return Err(RejectReason::SentenceCorrupt);
    }

    let star = match trimmed.iter().position(|&b| b == b'*') {
        Some(pos) => pos,
        None => return Err(RejectReason::SentenceUnchecksummed),
    };
    if trimmed.len() < star + 3 {
        return Err(RejectReason::SentenceUnchecksummed);
    }

    let declared = match hex_pair(trimmed[star + 1], trimmed[star + 2]) {
        Some(value) => value,
        None => return Err(RejectReason::SentenceUnchecksummed),
    };

    let body = &trimmed[1..star];
    if checksum(body) != declared {
        return Err(RejectReason::BadNmeaChecksum);
    }

    let body_str = String::from_utf8_lossy(body);
    let mut parts = body_str.split(',');
    let tag = parts.next().unwrap_or_default().to_string();
    if tag.len() < 3 {
        return Err(RejectReason::SentenceCorrupt);
    }
    let fields = parts.map(str::to_string).collect();

    Ok(NmeaSentence {
        tag,
        fields,
        raw: line.to_vec(),
    })
}

/// Build a terminated sentence with its checksum from a bare body.
///
/// Used by the replay tooling and tests to synthesize receiver output.
pub fn encode(body: &str) -> String {
    format!("${}*{:02X}\r\n", body, checksum(body.as_bytes()))
}

fn hex_pair(high: u8, low: u8) -> Option<u8> {
    let hi = (high as char).to_digit(16)?;
    let lo = (low as char).to_digit(16)?;
    Some((hi * 16 + lo) as u8)
}
