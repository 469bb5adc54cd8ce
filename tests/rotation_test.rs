//! Integration tests for hour-bucket rotation, compression, and integrity.

use chrono::{TimeZone, Utc};
use flate2::read::GzDecoder;
use gnss_node::logbook::{archive, FixedClock, HourlyLogbook};
use gnss_node::protocol::Family;
use std::fs;
use std::io::Read;
use std::path::Path;

fn read_gz(path: &Path) -> Vec<u8> {
    let file = fs::File::open(path).expect("open gz");
    let mut decoded = Vec::new();
    GzDecoder::new(file)
        .read_to_end(&mut decoded)
        .expect("decode");
    decoded
}

#[test]
fn hour_boundary_splits_bytes_exactly() {
    let dir = tempfile::tempdir().expect("tempdir");
    let clock = FixedClock::new(
        Utc.with_ymd_and_hms(2024, 3, 14, 9, 59, 58).single().expect("time"),
    );
    let mut book = HourlyLogbook::new(dir.path(), u64::MAX, Box::new(clock.clone()));

    book.append(Family::Nmea, b"$before-one\n").expect("append");
    book.append(Family::Nmea, b"$before-two\n").expect("append");

    // Cross the boundary mid-stream
    clock.set(Utc.with_ymd_and_hms(2024, 3, 14, 10, 0, 1).single().expect("time"));
    book.append(Family::Nmea, b"$after-one\n").expect("append");

    // The completed hour is already compressed with its checksum sibling
    let day = dir.path().join("2024/03/14");
    assert!(!day.join("09.nmea").exists());
    assert_eq!(read_gz(&day.join("09.nmea.gz")), b"$before-one\n$before-two\n");

    // The live hour holds exactly the bytes written after the boundary
    assert_eq!(
        fs::read(day.join("10.nmea")).expect("live bucket"),
        b"$after-one\n"
    );
}

#[test]
fn completed_bucket_checksum_round_trips() {
    let dir = tempfile::tempdir().expect("tempdir");
    let clock = FixedClock::new(
        Utc.with_ymd_and_hms(2024, 3, 14, 7, 30, 0).single().expect("time"),
    );
    let mut book = HourlyLogbook::new(dir.path(), u64::MAX, Box::new(clock.clone()));

    let payload: Vec<u8> = (0..=255u8).cycle().take(10_000).collect();
    book.append(Family::Ubx, &payload).expect("append");

    clock.set(Utc.with_ymd_and_hms(2024, 3, 14, 8, 0, 0).single().expect("time"));
    book.append(Family::Ubx, &[0xB5]).expect("append");

    let day = dir.path().join("2024/03/14");
    let gz = day.join("07.ubx.gz");
    let sha = day.join("07.ubx.gz.sha256");

    let recorded = fs::read_to_string(&sha).expect("sha sibling");
    let digest = recorded.split_whitespace().next().expect("digest");
    assert_eq!(digest, archive::sha256_hex(&gz).expect("recompute"));

    // Decompressing yields byte-identical pre-rotation content
    assert_eq!(read_gz(&gz), payload);
}

#[test]
fn both_families_rotate_together_but_separately() {
    let dir = tempfile::tempdir().expect("tempdir");
    let clock = FixedClock::new(
        Utc.with_ymd_and_hms(2024, 3, 14, 13, 10, 0).single().expect("time"),
    );
    let mut book = HourlyLogbook::new(dir.path(), u64::MAX, Box::new(clock.clone()));

    book.append(Family::Nmea, b"$text\n").expect("append");
    book.append(Family::Ubx, &[1, 2, 3]).expect("append");

    clock.set(Utc.with_ymd_and_hms(2024, 3, 14, 14, 0, 0).single().expect("time"));
    book.append(Family::Nmea, b"$next\n").expect("append");

    let day = dir.path().join("2024/03/14");
    assert!(day.join("13.nmea.gz").exists());
    assert!(day.join("13.ubx.gz").exists());
    assert!(day.join("14.nmea").exists());
    // No binary data written in the new hour yet, so no bucket either
    assert!(!day.join("14.ubx").exists());
}

#[test]
fn shutdown_finalizes_the_live_hour() {
    let dir = tempfile::tempdir().expect("tempdir");
    let clock = FixedClock::new(
        Utc.with_ymd_and_hms(2024, 3, 14, 22, 45, 0).single().expect("time"),
    );
    let mut book = HourlyLogbook::new(dir.path(), u64::MAX, Box::new(clock));

    book.append(Family::Ubx, &[9; 64]).expect("append");
    book.flush_and_close().expect("close");

    let day = dir.path().join("2024/03/14");
    assert!(!day.join("22.ubx").exists());
    assert_eq!(read_gz(&day.join("22.ubx.gz")), vec![9u8; 64]);
}

#[test]
fn restart_within_the_hour_appends_to_the_same_bucket() {
    let dir = tempfile::tempdir().expect("tempdir");
    let at = Utc.with_ymd_and_hms(2024, 3, 14, 5, 12, 0).single().expect("time");

    {
        let clock = FixedClock::new(at);
        let mut book = HourlyLogbook::new(dir.path(), u64::MAX, Box::new(clock));
        book.append(Family::Nmea, b"$first-run\n").expect("append");
        // Dropped without flush_and_close: simulates a crash
    }

    let clock = FixedClock::new(at);
    let mut book = HourlyLogbook::new(dir.path(), u64::MAX, Box::new(clock));
    book.startup_sweep();
    book.append(Family::Nmea, b"$second-run\n").expect("append");

    let live = dir.path().join("2024/03/14/05.nmea");
    assert_eq!(
        fs::read(live).expect("live bucket"),
        b"$first-run\n$second-run\n"
    );
}

#[test]
fn startup_sweep_finalizes_crash_leftovers() {
    let dir = tempfile::tempdir().expect("tempdir");
    let day = dir.path().join("2024/03/13");
    fs::create_dir_all(&day).expect("mkdir");
    fs::write(day.join("23.ubx"), [4u8; 128]).expect("leftover");

    let clock = FixedClock::new(
        Utc.with_ymd_and_hms(2024, 3, 14, 0, 5, 0).single().expect("time"),
    );
    let book = HourlyLogbook::new(dir.path(), u64::MAX, Box::new(clock));
    book.startup_sweep();

    assert!(!day.join("23.ubx").exists());
    assert_eq!(read_gz(&day.join("23.ubx.gz")), vec![4u8; 128]);
    let sha = fs::read_to_string(day.join("23.ubx.gz.sha256")).expect("sha");
    assert!(sha.contains("23.ubx.gz"));
}
