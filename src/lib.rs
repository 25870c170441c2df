//! # Wavebank
//!
//! An incrementally maintained, multi-process safe index over a directory
//! tree of time-stamped data files, and the query path that turns an
//! identifier pattern plus a time range into continuous series.
//!
//! ## Features
//!
//! - **Incremental indexing**: only new or changed files are re-read
//! - **Concurrency**: any number of processes may index and query one bank
//! - **Minimal reads**: queries are resolved from the index alone
//! - **Gap-aware assembly**: contiguous segments merge, true gaps split
//!
//! ## Modules
//!
//! - [`storage`]: core types, native data files and the [`Bank`] facade
//! - [`index`]: index store, locking and the incremental indexer
//! - [`query`]: identifier patterns, planning and segment assembly
//! - [`config`]: TOML and environment configuration
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use wavebank::Bank;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let bank = Bank::open("/data/bank");
//!     bank.update_index(None)?;
//!
//!     let series = bank.get(&["UU.*.*.HH?"], 0, i64::MAX)?;
//!     println!("Found {} series", series.len());
//!
//!     if let Some(at) = bank.last_updated()? {
//!         println!("Index complete up to {}", at);
//!     }
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod index;
pub mod query;
pub mod storage;

// Re-export top-level types for convenience
pub use storage::{
    Bank, BankBuilder, BankConfig, BankError, BankResult, BankStats, BankWarning, FileReader,
    HeaderInfo, HeaderOutcome, Identifier, IndexEntry, NativeReader, ReaderError, Series,
    TimeSpan,
};

pub use index::{FingerprintMode, LogProgress, NoProgress, Progress, UpdateReport};

pub use query::{IdentifierPattern, MergePolicy, PatternError, QueryPlan};

pub use config::{BankSection, Config, ConfigError, LoggingConfig};
