//! UBX binary framing and checksum validation.

use super::{MAX_UBX_PAYLOAD, UBX_MIN_FRAME, UBX_OVERHEAD, UBX_SYNC_1, UBX_SYNC_2};

/// A validated UBX message, header through checksum.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UbxMessage {
    class: u8,
    id: u8,
    raw: Vec<u8>,
}

impl UbxMessage {
    /// Message class byte.
    pub fn class(&self) -> u8 {
        self.class
    }

    /// Message id byte.
    pub fn id(&self) -> u8 {
        self.id
    }

    /// Declared payload length.
    pub fn payload_len(&self) -> u16 {
        (self.raw.len() - UBX_OVERHEAD) as u16
    }

    /// Payload bytes, between the header and the checksum.
    pub fn payload(&self) -> &[u8] {
        &self.raw[6..self.raw.len() - 2]
    }

    /// Full wire representation.
    pub fn raw(&self) -> &[u8] {
        &self.raw
    }
}

/// Outcome of attempting to extract a frame at the head of a buffer.
#[derive(Debug, PartialEq, Eq)]
pub enum Extract {
    /// A complete, checksum-valid frame occupying `consumed` leading bytes.
    Complete {
        /// The validated message.
        message: UbxMessage,
        /// Bytes the frame occupied, to advance the cursor by.
        consumed: usize,
    },
    /// Not enough bytes buffered to decide yet.
    NeedMore,
    /// The declared payload length exceeds the protocol maximum.
    Oversize {
        /// The untrusted length field's value.
        declared: usize,
    },
    /// The trailing checksum did not match the candidate's own bytes.
    BadChecksum,
}

/// 8-bit Fletcher checksum over class, id, length, and payload.
pub fn checksum(body: &[u8]) -> (u8, u8) {
    let mut ck_a: u8 = 0;
    let mut ck_b: u8 = 0;
    for &byte in body {
        ck_a = ck_a.wrapping_add(byte);
        ck_b = ck_b.wrapping_add(ck_a);
    }
    (ck_a, ck_b)
}

/// Try to extract a complete frame from `buf`, which must start at the two
/// sync bytes. The length field is treated as untrusted input and bounded
/// before any further bytes are awaited.
pub fn try_extract(buf: &[u8]) -> Extract {
    debug_assert!(buf.len() >= 2 && buf[0] == UBX_SYNC_1 && buf[1] == UBX_SYNC_2);

    if buf.len() < 6 {
        return Extract::NeedMore;
    }

    let declared = u16::from_le_bytes([buf[4], buf[5]]) as usize;
    if declared > MAX_UBX_PAYLOAD {
        return Extract::Oversize { declared };
    }

    let total = UBX_OVERHEAD + declared;
    debug_assert!(total >= UBX_MIN_FRAME);
    if buf.len() < total {
        return Extract::NeedMore;
    }

    let (ck_a, ck_b) = checksum(&buf[2..total - 2]);
    if buf[total - 2] != ck_a || buf[total - 1] != ck_b {
        return Extract::BadChecksum;
    }

    Extract::Complete {
        message: UbxMessage {
            class: buf[2],
            id: buf[3],
            raw: buf[..total].to_vec(),
        },
        consumed: total,
    }
}

/// Build a wire-format frame for the given class, id, and payload.
///
/// Used by the replay tooling and tests to synthesize receiver output.
pub fn encode(class: u8, id: u8, payload: &[u8]) -> Vec<u8> {
    let len = payload.len() as u16;
    let mut frame = Vec::with_capacity(UBX_OVERHEAD + payload.len());
    frame.push(UBX_SYNC_1);
    frame.push(UBX_SYNC_2);
    frame.push(class);
    frame.push(id);
    frame.extend_from_slice(&len.to_le_bytes());
    frame.extend_from_slice(payload);
    let (ck_a, ck_b) = checksum(&frame[2..]);
    frame.push(ck_a);
    frame.push(ck_b);
    frame
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checksum_matches_known_vector() {
        // UBX-NAV-PVT poll: B5 62 01 07 00 00 08 19
        let frame = encode(0x01, 0x07, &[]);
        assert_eq!(frame, vec![0xB5, 0x62, 0x01, 0x07, 0x00, 0x00, 0x08, 0x19]);
    }

    #[test]
    fn extracts_valid_frame() {
        let frame = encode(0x02, 0x15, &[1, 2, 3, 4]);
        match try_extract(&frame) {
            Extract::Complete { message, consumed } => {
                assert_eq!(consumed, frame.len());
                assert_eq!(message.class(), 0x02);
                assert_eq!(message.id(), 0x15);
                assert_eq!(message.payload(), &[1, 2, 3, 4]);
                assert_eq!(message.payload_len(), 4);
                assert_eq!(message.raw(), &frame[..]);
            }
            other => panic!("unexpected extract: {:?}", other),
        }
    }

    #[test]
    fn incomplete_frame_needs_more() {
        let frame = encode(0x01, 0x35, &[0u8; 32]);
        assert_eq!(try_extract(&frame[..5]), Extract::NeedMore);
        assert_eq!(try_extract(&frame[..frame.len() - 1]), Extract::NeedMore);
    }

    #[test]
    fn oversized_length_is_rejected_before_waiting() {
        let mut frame = encode(0x01, 0x07, &[]);
        // Corrupt the length field to an absurd value
        frame[4] = 0xFF;
        frame[5] = 0xFF;
        assert_eq!(
            try_extract(&frame),
            Extract::Oversize { declared: 0xFFFF }
        );
    }

    #[test]
    fn flipped_checksum_byte_is_rejected() {
        let mut frame = encode(0x0A, 0x09, &[9, 8, 7]);
        let last = frame.len() - 1;
        frame[last] ^= 0xFF;
        assert_eq!(try_extract(&frame), Extract::BadChecksum);
    }
}
