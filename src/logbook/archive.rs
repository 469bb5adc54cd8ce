//! Compression and integrity checksums for completed hour buckets.
//!
//! A completed bucket goes through: gzip to `<name>.gz.tmp`, fsync, atomic
//! rename to `<name>.gz`, sibling `<name>.gz.sha256` written the same
//! tmp-then-rename way, then the uncompressed original is removed. Readers
//! never observe a partial artifact under its final name, and the step is
//! idempotent so a crash between renames is repaired by the next sweep.

use crate::error::{NodeError, NodeResult};
use flate2::write::GzEncoder;
use flate2::Compression;
use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

/// Append an extension to a path, keeping the existing one.
fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut os = path.as_os_str().to_os_string();
    os.push(suffix);
    PathBuf::from(os)
}

fn archive_err(path: &Path, err: impl std::fmt::Display) -> NodeError {
    NodeError::Archive {
        path: path.display().to_string(),
        message: err.to_string(),
    }
}

/// Hex-encoded SHA-256 of a file's contents.
pub fn sha256_hex(path: &Path) -> NodeResult<String> {
    let mut file = File::open(path).map_err(|e| archive_err(path, e))?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf).map_err(|e| archive_err(path, e))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

/// Compress a completed bucket in place and write its checksum sibling.
///
/// Safe to run repeatedly: if both final artifacts already exist, only the
/// leftover source is cleaned up. The source file stays in place until both
/// artifacts are durable.
pub fn finalize_bucket(src: &Path) -> NodeResult<()> {
    if !src.exists() {
        return Ok(());
    }

    let gz_final = with_suffix(src, ".gz");
    let sha_final = with_suffix(src, ".gz.sha256");

    if !(gz_final.exists() && sha_final.exists()) {
        let gz_tmp = with_suffix(src, ".gz.tmp");

        {
            let mut reader = File::open(src).map_err(|e| archive_err(src, e))?;
            let out = File::create(&gz_tmp).map_err(|e| archive_err(&gz_tmp, e))?;
            let mut encoder = GzEncoder::new(out, Compression::default());
            std::io::copy(&mut reader, &mut encoder).map_err(|e| archive_err(src, e))?;
            let out = encoder.finish().map_err(|e| archive_err(&gz_tmp, e))?;
            out.sync_all().map_err(|e| archive_err(&gz_tmp, e))?;
        }

        // Checksum the compressed artifact, sha256sum-compatible line format
        let digest = sha256_hex(&gz_tmp)?;
        let gz_name = gz_final
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let sha_tmp = with_suffix(src, ".gz.sha256.tmp");
        {
            let mut f = File::create(&sha_tmp).map_err(|e| archive_err(&sha_tmp, e))?;
            writeln!(f, "{}  {}", digest, gz_name).map_err(|e| archive_err(&sha_tmp, e))?;
            f.sync_all().map_err(|e| archive_err(&sha_tmp, e))?;
        }

        fs::rename(&gz_tmp, &gz_final).map_err(|e| archive_err(&gz_final, e))?;
        fs::rename(&sha_tmp, &sha_final).map_err(|e| archive_err(&sha_final, e))?;
    }

    match fs::remove_file(src) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(archive_err(src, e)),
    }
}
