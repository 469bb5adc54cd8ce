//! Integration tests for framing correctness and resynchronization.

use gnss_node::protocol::{nmea, ubx, DemuxEvent, Demultiplexer, Frame};

/// A realistic second of receiver output: navigation sentences interleaved
/// with binary measurement messages.
fn sample_wire() -> (Vec<u8>, Vec<&'static str>, Vec<(u8, u8)>) {
    let sentences = vec![
        "GNGGA,123519,4807.038,N,01131.000,E,1,08,0.9,545.4,M,46.9,M,,",
        "GNRMC,123519,A,4807.038,N,01131.000,E,022.4,084.4,230394,003.1,W",
        "GNGSA,A,3,04,05,09,12,,,,,,,,,2.5,1.3,2.1",
        "GNZDA,123519.00,23,03,1994,00,00",
    ];
    let messages = vec![(0x01u8, 0x07u8), (0x02, 0x15), (0x02, 0x13), (0x0A, 0x09)];

    let mut wire = Vec::new();
    for (line, &(class, id)) in sentences.iter().zip(&messages) {
        wire.extend_from_slice(nmea::encode(line).as_bytes());
        wire.extend_from_slice(&ubx::encode(class, id, &[class; 24]));
    }
    (wire, sentences, messages)
}

fn collect_frames(demux: &mut Demultiplexer) -> Vec<Frame> {
    let mut frames = Vec::new();
    while let Some(event) = demux.next_event() {
        if let DemuxEvent::Frame(frame) = event {
            frames.push(frame);
        }
    }
    frames
}

#[test]
fn well_formed_stream_yields_every_frame_in_order() {
    let (wire, sentences, messages) = sample_wire();

    let mut demux = Demultiplexer::new();
    demux.push(&wire);
    let frames = collect_frames(&mut demux);

    assert_eq!(frames.len(), sentences.len() + messages.len());
    for (i, frame) in frames.iter().enumerate() {
        if i % 2 == 0 {
            let expected_tag = sentences[i / 2].split(',').next().unwrap_or_default();
            match frame {
                Frame::Nmea(s) => assert_eq!(s.tag(), expected_tag),
                other => panic!("expected sentence at {}: {:?}", i, other),
            }
        } else {
            let (class, id) = messages[i / 2];
            match frame {
                Frame::Ubx(m) => {
                    assert_eq!((m.class(), m.id()), (class, id));
                }
                other => panic!("expected binary message at {}: {:?}", i, other),
            }
        }
    }
    assert_eq!(demux.pending(), 0);
}

#[test]
fn chunk_boundaries_never_change_the_result() {
    let (wire, sentences, messages) = sample_wire();
    let expected = sentences.len() + messages.len();

    for chunk_size in [1usize, 2, 3, 7, 16, 64, 1024] {
        let mut demux = Demultiplexer::new();
        let mut frames = Vec::new();
        for chunk in wire.chunks(chunk_size) {
            demux.push(chunk);
            frames.extend(collect_frames(&mut demux));
        }
        assert_eq!(
            frames.len(),
            expected,
            "chunk size {} lost or invented frames",
            chunk_size
        );
    }
}

#[test]
fn corrupt_length_field_between_valid_frames_recovers_both() {
    let before = ubx::encode(0x01, 0x07, &[1; 16]);
    let mut corrupt = ubx::encode(0x01, 0x22, &[2; 16]);
    corrupt[5] = 0xFF; // declared length now far beyond the maximum
    let after = ubx::encode(0x01, 0x35, &[3; 16]);

    let mut wire = Vec::new();
    wire.extend_from_slice(&before);
    wire.extend_from_slice(&corrupt);
    wire.extend_from_slice(&after);

    let mut demux = Demultiplexer::new();
    demux.push(&wire);
    let frames = collect_frames(&mut demux);

    let ids: Vec<u8> = frames
        .iter()
        .filter_map(|f| match f {
            Frame::Ubx(m) => Some(m.id()),
            Frame::Nmea(_) => None,
        })
        .collect();
    assert_eq!(ids, vec![0x07, 0x35]);
    assert_eq!(demux.stats().oversize_rejects, 1);
}

#[test]
fn flipped_checksum_between_valid_sentences_recovers_both() {
    let good_a = nmea::encode("GNGGA,000001,0000.000,N,00000.000,E,1,04,1.0,0.0,M,0.0,M,,");
    let good_b = nmea::encode("GNRMC,000002,A,0000.000,N,00000.000,E,0.0,0.0,010100,0.0,W");
    let mut corrupt = nmea::encode("GNGSA,A,3,01,02,,,,,,,,,,,1.0,1.0,1.0").into_bytes();
    let star = corrupt.iter().position(|&b| b == b'*').expect("checksum");
    corrupt[star + 1] = if corrupt[star + 1] == b'A' { b'B' } else { b'A' };

    let mut wire = Vec::new();
    wire.extend_from_slice(good_a.as_bytes());
    wire.extend_from_slice(&corrupt);
    wire.extend_from_slice(good_b.as_bytes());

    let mut demux = Demultiplexer::new();
    demux.push(&wire);
    let frames = collect_frames(&mut demux);

    let tags: Vec<String> = frames
        .iter()
        .filter_map(|f| match f {
            Frame::Nmea(s) => Some(s.tag().to_string()),
            Frame::Ubx(_) => None,
        })
        .collect();
    assert_eq!(tags, vec!["GNGGA", "GNRMC"]);
}

#[test]
fn truncated_tail_is_completed_by_the_next_chunk() {
    let sentence = nmea::encode("GNGGA,123519,4807.038,N,01131.000,E,1,08,0.9,545.4,M,,,,");
    let frame = ubx::encode(0x02, 0x15, &[7; 200]);

    let mut wire = Vec::new();
    wire.extend_from_slice(sentence.as_bytes());
    wire.extend_from_slice(&frame);

    // Split in the middle of the binary frame's payload
    let cut = sentence.len() + 40;
    let mut demux = Demultiplexer::new();

    demux.push(&wire[..cut]);
    let first = collect_frames(&mut demux);
    assert_eq!(first.len(), 1);
    assert!(demux.pending() > 0);

    demux.push(&wire[cut..]);
    let second = collect_frames(&mut demux);
    assert_eq!(second.len(), 1);
    assert!(matches!(&second[0], Frame::Ubx(m) if m.payload_len() == 200));
}

#[test]
fn raw_bytes_survive_demultiplexing_exactly() {
    let (wire, _, _) = sample_wire();

    let mut demux = Demultiplexer::new();
    demux.push(&wire);
    let frames = collect_frames(&mut demux);

    let reassembled: Vec<u8> = frames.iter().flat_map(|f| f.raw().to_vec()).collect();
    assert_eq!(reassembled, wire);
}
