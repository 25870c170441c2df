//! Wavebank query path
//!
//! - **pattern**: `NET.STA.LOC.CHA` identifier patterns with `*`/`?` wildcards
//! - **planner**: resolve patterns and a time range to file reads, from the index alone
//! - **assembler**: read planned slices and merge them into continuous series
//!
//! # Pattern syntax
//!
//! ```text
//! UU.SRU..HHZ     one channel, any location
//! UU.*.*.HH?      every high-rate channel of network UU
//! UU              everything of network UU
//! ```

mod assembler;
mod error;
mod pattern;
mod planner;

pub use assembler::{merge_segments, MergePolicy, SegmentAssembler};
pub use error::{PatternError, PatternResult};
pub use pattern::{IdentifierPattern, SegmentMatcher};
pub use planner::{parse_patterns, QueryPlan, QueryPlanner};
