//! Query error types
//!
//! Pattern errors are raised while parsing, before the index or any data
//! file is touched.

use thiserror::Error;

/// A malformed identifier pattern
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Invalid pattern '{pattern}': {reason}")]
pub struct PatternError {
    pub pattern: String,
    pub reason: String,
}

impl PatternError {
    pub fn new(pattern: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
            reason: reason.into(),
        }
    }
}

/// Result type for pattern parsing
pub type PatternResult<T> = Result<T, PatternError>;
