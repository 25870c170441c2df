//! Wavebank index
//!
//! - **IndexStore**: SQLite table of file fingerprints and per-identifier time ranges
//! - **LockManager**: re-entrant, cross-process advisory lock on the index
//! - **Indexer**: incremental scan of the bank's file tree
//!
//! # Architecture
//!
//! ```text
//! update_index
//!        ↓
//! Indexer: walk root, diff fingerprints → changed files only
//!        ↓
//! FileReader: header metadata → IndexEntry rows
//!        ↓
//! LockManager (exclusive) → IndexStore: one transaction
//! ```

mod fingerprint;
mod indexer;
mod lock;
mod progress;
mod store;

pub use fingerprint::{content_hash, fingerprint, unchanged, FingerprintMode};
pub use indexer::{Indexer, UpdateReport};
pub use lock::{LockGuard, LockManager, LockMode};
pub use progress::{LogProgress, NoProgress, Progress};
pub use store::{BatchStats, FileRecord, IndexBatch, IndexStore, INDEX_VERSION, MIN_INDEX_VERSION};
