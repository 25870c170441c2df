//! Pluggable file reader contract
//!
//! The bank never assumes a binary layout. A [`FileReader`] supplies header
//! metadata for indexing and range extraction for queries; [`NativeReader`]
//! handles the crate's own `.wbk` format.

use crate::storage::datafile::{self, ChannelMeta, DataFile, NATIVE_FORMAT};
use crate::storage::types::{Identifier, Series, TimeSpan};
use std::io::ErrorKind;
use std::path::Path;
use thiserror::Error;

/// Errors a reader can report for one file
#[derive(Error, Debug)]
pub enum ReaderError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Format error: {0}")]
    Format(String),

    #[error("Checksum mismatch: {0}")]
    Checksum(String),
}

impl ReaderError {
    /// Whether the failure looks like a file replaced mid-read
    pub fn is_transient(&self) -> bool {
        match self {
            ReaderError::Checksum(_) => true,
            ReaderError::Io(e) => matches!(
                e.kind(),
                ErrorKind::NotFound
                    | ErrorKind::UnexpectedEof
                    | ErrorKind::Interrupted
                    | ErrorKind::WouldBlock
            ),
            ReaderError::Format(_) => false,
        }
    }
}

/// Metadata for one time range of one identifier in a file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderInfo {
    pub identifier: Identifier,
    pub start: i64,
    pub end: i64,
    pub sample_interval: i64,
    pub format: String,
}

impl HeaderInfo {
    pub(crate) fn native(channel: &ChannelMeta, span: TimeSpan) -> Self {
        Self {
            identifier: channel.identifier.clone(),
            start: span.start,
            end: span.end,
            sample_interval: channel.sample_interval,
            format: NATIVE_FORMAT.to_string(),
        }
    }
}

/// Result of inspecting a file's header
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeaderOutcome {
    /// The file is understood; zero or more ranges were found
    Valid(Vec<HeaderInfo>),
    /// The file is not in a format this reader handles
    Invalid(String),
}

/// Format-specific access to data files
///
/// Paths passed in are absolute. Implementations must be safe to call from
/// several threads at once.
pub trait FileReader: Send + Sync {
    /// Describe the contents of `path` without decoding samples
    fn read_header(&self, path: &Path) -> Result<HeaderOutcome, ReaderError>;

    /// Decode the samples of `identifier` inside `span`
    ///
    /// May return several segments when the file has gaps.
    fn read_range(
        &self,
        path: &Path,
        format: &str,
        identifier: &Identifier,
        span: &TimeSpan,
    ) -> Result<Vec<Series>, ReaderError>;
}

/// Reader for files produced by [`datafile::DataFileWriter`]
#[derive(Debug, Default, Clone, Copy)]
pub struct NativeReader;

impl FileReader for NativeReader {
    fn read_header(&self, path: &Path) -> Result<HeaderOutcome, ReaderError> {
        if !datafile::has_magic(path)? {
            return Ok(HeaderOutcome::Invalid("not a wavebank data file".into()));
        }
        let file = DataFile::open(path)?;
        Ok(HeaderOutcome::Valid(file.header_info()?))
    }

    fn read_range(
        &self,
        path: &Path,
        format: &str,
        identifier: &Identifier,
        span: &TimeSpan,
    ) -> Result<Vec<Series>, ReaderError> {
        if format != NATIVE_FORMAT {
            return Err(ReaderError::Format(format!("unsupported format '{}'", format)));
        }
        DataFile::open(path)?.read_range(identifier, span)
    }
}
