//! File fingerprints for change detection
//!
//! `MtimeSize` trusts the filesystem's modification time; `ContentHash`
//! reads every candidate file and compares an xxh3-128 digest instead.

use crate::storage::types::Fingerprint;
use serde::{Deserialize, Serialize};
use std::fs::{File, Metadata};
use std::io::{self, Read};
use std::path::Path;
use std::time::UNIX_EPOCH;
use xxhash_rust::xxh3::Xxh3;

/// How staleness of an indexed file is decided
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FingerprintMode {
    /// Modification time plus size
    #[default]
    MtimeSize,
    /// Size plus content digest; modification time is ignored
    ContentHash,
}

impl std::str::FromStr for FingerprintMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "mtime" | "mtime_size" => Ok(FingerprintMode::MtimeSize),
            "hash" | "content_hash" => Ok(FingerprintMode::ContentHash),
            other => Err(format!("unknown fingerprint mode '{}'", other)),
        }
    }
}

impl std::fmt::Display for FingerprintMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FingerprintMode::MtimeSize => write!(f, "mtime_size"),
            FingerprintMode::ContentHash => write!(f, "content_hash"),
        }
    }
}

/// Modification time in nanoseconds since the epoch (negative before 1970)
pub fn modified_ns(metadata: &Metadata) -> io::Result<i64> {
    let modified = metadata.modified()?;
    let ns = match modified.duration_since(UNIX_EPOCH) {
        Ok(after) => i64::try_from(after.as_nanos()).unwrap_or(i64::MAX),
        Err(before) => -i64::try_from(before.duration().as_nanos()).unwrap_or(i64::MAX),
    };
    Ok(ns)
}

/// Streaming xxh3-128 digest of a file, as lowercase hex
pub fn content_hash(path: &Path) -> io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Xxh3::new();
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(format!("{:032x}", hasher.digest128()))
}

/// Fingerprint `path` given its already-fetched metadata
pub fn fingerprint(path: &Path, metadata: &Metadata, mode: FingerprintMode) -> io::Result<Fingerprint> {
    let content_hash = match mode {
        FingerprintMode::MtimeSize => None,
        FingerprintMode::ContentHash => Some(content_hash(path)?),
    };
    Ok(Fingerprint {
        modified_ns: modified_ns(metadata)?,
        size: metadata.len(),
        content_hash,
    })
}

/// Whether a stored fingerprint still describes the current file
///
/// A stored row without a digest never matches in hash mode, so switching
/// modes re-reads every file once.
pub fn unchanged(stored: &Fingerprint, current: &Fingerprint, mode: FingerprintMode) -> bool {
    match mode {
        FingerprintMode::MtimeSize => {
            stored.modified_ns == current.modified_ns && stored.size == current.size
        }
        FingerprintMode::ContentHash => {
            stored.size == current.size
                && stored.content_hash.is_some()
                && stored.content_hash == current.content_hash
        }
    }
}
