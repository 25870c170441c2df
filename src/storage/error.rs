//! Bank error types
//!
//! Defines every failure a bank operation can surface, plus the non-fatal
//! warnings that are reported alongside successful results.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur in bank operations
#[derive(Error, Debug)]
pub enum BankError {
    /// I/O operation failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The index lock could not be acquired before the timeout
    #[error("Index locked: could not lock {path:?} within {waited_ms} ms")]
    IndexLocked { path: PathBuf, waited_ms: u64 },

    /// A thread holding a shared lock asked for an exclusive one
    #[error("Lock upgrade refused: release the shared index lock before taking an exclusive one")]
    LockUpgrade,

    /// The persisted index cannot be parsed; it must be rebuilt
    #[error("Index store corrupt: {0}")]
    StoreCorrupt(String),

    /// Reads kept colliding with concurrent file replacement
    #[error("Transient read conflict on {path:?} after {attempts} attempts")]
    TransientReadConflict { path: PathBuf, attempts: u32 },

    /// Decoded data contradicts the index; re-run indexing
    #[error("Corrupt segment in {path:?}: {reason} (re-run update_index)")]
    CorruptSegment { path: PathBuf, reason: String },

    /// Malformed identifier pattern, rejected before any I/O
    #[error("Invalid pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    /// Invalid time range (start > end) or empty input
    #[error("Invalid time range: start must not be after end")]
    InvalidTimeRange,

    /// Any other index store failure
    #[error("Index store error: {0}")]
    Store(String),

    /// The pluggable reader failed on a file
    #[error("Reader error on {path:?}: {message}")]
    Reader { path: PathBuf, message: String },

    /// Serialization/deserialization failed
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<bincode::Error> for BankError {
    fn from(err: bincode::Error) -> Self {
        BankError::Serialization(err.to_string())
    }
}

impl From<crate::query::PatternError> for BankError {
    fn from(err: crate::query::PatternError) -> Self {
        BankError::InvalidPattern {
            pattern: err.pattern,
            reason: err.reason,
        }
    }
}

/// Non-fatal conditions reported next to a successful result
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BankWarning {
    /// The bank has no indexed entries at all
    BankEmpty { root: PathBuf },
    /// A file could not be read during indexing; retried next run
    UnreadableFile { path: String, reason: String },
    /// The reader rejected a file; skipped until it changes
    InvalidFile { path: String, reason: String },
    /// The index was written by an older layout and has been cleared
    IndexRebuilt { found: u32, required: u32 },
}

impl std::fmt::Display for BankWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BankWarning::BankEmpty { root } => {
                write!(f, "bank at {:?} has no indexed entries", root)
            }
            BankWarning::UnreadableFile { path, reason } => {
                write!(f, "could not read {}: {}", path, reason)
            }
            BankWarning::InvalidFile { path, reason } => {
                write!(f, "skipped invalid file {}: {}", path, reason)
            }
            BankWarning::IndexRebuilt { found, required } => write!(
                f,
                "index version {} is older than {}, index cleared for rebuild",
                found, required
            ),
        }
    }
}

/// Result type alias for bank operations
pub type BankResult<T> = Result<T, BankError>;
