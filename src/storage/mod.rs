//! Wavebank storage layer
//!
//! - **types**: Core data structures (Identifier, TimeSpan, IndexEntry, Series)
//! - **error**: Error and warning types
//! - **compression**: XOR-delta encoding + LZ4 compression
//! - **datafile**: Native data file format
//! - **reader**: Pluggable file reader interface
//! - **retry**: Bounded retry with backoff
//! - **bank**: The `Bank` facade tying index and query together
//!
//! # Architecture
//!
//! ```text
//! Write Path:
//!   files on disk → Indexer → IndexStore (SQLite)
//!
//! Read Path:
//!   patterns + range → QueryPlanner → FileReader → SegmentAssembler → Series
//! ```
//!
//! # Example
//!
//! ```rust,no_run
//! use wavebank::storage::Bank;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let bank = Bank::open("./bank");
//!     let series = bank
//!         .update_index(None)?
//!         .get(&["UU.SRU..HH?"], 0, i64::MAX)?;
//!
//!     for s in &series {
//!         println!("{}: {} samples", s.identifier, s.len());
//!     }
//!     Ok(())
//! }
//! ```

pub mod bank;
pub mod compression;
pub mod datafile;
pub mod error;
pub mod reader;
pub mod retry;
pub mod types;

// Re-export commonly used types
pub use bank::{Bank, BankBuilder, BankConfig, BankStats};
pub use compression::{compress_samples, compression_stats, decompress_samples, CompressionStats};
pub use datafile::{Compression, DataFile, DataFileHeader, DataFileWriter};
pub use error::{BankError, BankResult, BankWarning};
pub use reader::{FileReader, HeaderInfo, HeaderOutcome, NativeReader, ReaderError};
pub use retry::RetryPolicy;
pub use types::{Fingerprint, Identifier, IndexEntry, ResolvedSlice, Series, TimeSpan};
