//! Core data types for the bank
//!
//! This module defines the fundamental types used throughout the crate:
//! - `Identifier`: hierarchical network/station/location/channel codes
//! - `TimeSpan`: an inclusive time interval in nanoseconds
//! - `Fingerprint`: cheap proxy for file content
//! - `IndexEntry`: one persisted index row
//! - `ResolvedSlice`: one planned read
//! - `Series`: a regularly sampled run of values

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Nanoseconds in one second
pub const NANOS_PER_SEC: i64 = 1_000_000_000;

/// Current wall-clock time in nanoseconds since the Unix epoch
pub fn now_ns() -> i64 {
    Utc::now().timestamp_nanos_opt().unwrap_or(i64::MAX)
}

/// Convert nanoseconds since the epoch into a UTC datetime
pub fn to_datetime(ns: i64) -> DateTime<Utc> {
    Utc.timestamp_nanos(ns)
}

/// Nanoseconds since the epoch, saturating outside the representable range
pub fn from_datetime(time: &DateTime<Utc>) -> i64 {
    time.timestamp_nanos_opt().unwrap_or(if time.timestamp() < 0 {
        i64::MIN
    } else {
        i64::MAX
    })
}

/// Hierarchical data identifier (network, station, location, channel)
///
/// Stored identifiers are always concrete; wildcards live in
/// [`crate::query::IdentifierPattern`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Identifier {
    pub network: String,
    pub station: String,
    pub location: String,
    pub channel: String,
}

impl Identifier {
    pub fn new(
        network: impl Into<String>,
        station: impl Into<String>,
        location: impl Into<String>,
        channel: impl Into<String>,
    ) -> Self {
        Self {
            network: network.into(),
            station: station.into(),
            location: location.into(),
            channel: channel.into(),
        }
    }

    /// Parse a dotted `NET.STA.LOC.CHA` code; exactly four segments required
    pub fn parse(code: &str) -> Option<Self> {
        let mut parts = code.split('.');
        let id = Self::new(parts.next()?, parts.next()?, parts.next()?, parts.next()?);
        if parts.next().is_some() {
            return None;
        }
        Some(id)
    }

    /// Segments in hierarchical order
    pub fn segments(&self) -> [&str; 4] {
        [
            &self.network,
            &self.station,
            &self.location,
            &self.channel,
        ]
    }
}

impl std::fmt::Display for Identifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}.{}.{}.{}",
            self.network, self.station, self.location, self.channel
        )
    }
}

/// Time span for queries and index rows (closed interval: [start, end])
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TimeSpan {
    /// Start timestamp (inclusive), in nanoseconds
    pub start: i64,
    /// End timestamp (inclusive), in nanoseconds
    pub end: i64,
}

impl TimeSpan {
    /// Create a new time span
    ///
    /// # Panics
    /// Panics if start > end
    pub fn new(start: i64, end: i64) -> Self {
        assert!(start <= end, "TimeSpan: start must not be after end");
        Self { start, end }
    }

    /// Create a time span, returning None if invalid
    pub fn try_new(start: i64, end: i64) -> Option<Self> {
        if start <= end {
            Some(Self { start, end })
        } else {
            None
        }
    }

    /// The whole representable time line
    pub fn everything() -> Self {
        Self {
            start: i64::MIN,
            end: i64::MAX,
        }
    }

    /// Check if this span overlaps with another (touching ends count)
    pub fn overlaps(&self, other: &TimeSpan) -> bool {
        self.start <= other.end && self.end >= other.start
    }

    /// Get intersection with another span, if any
    pub fn intersection(&self, other: &TimeSpan) -> Option<Self> {
        Self::try_new(self.start.max(other.start), self.end.min(other.end))
    }

    /// Check whether `other` lies completely inside this span
    pub fn covers(&self, other: &TimeSpan) -> bool {
        self.start <= other.start && self.end >= other.end
    }
}

/// Cheap proxy for a file's content
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fingerprint {
    /// Last modification time in nanoseconds
    pub modified_ns: i64,
    /// File size in bytes
    pub size: u64,
    /// Hex xxh3-128 of the content, present only in content-hash mode
    #[serde(default)]
    pub content_hash: Option<String>,
}

/// One index row: a time range of one identifier inside one file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexEntry {
    pub identifier: Identifier,
    /// First sample time (inclusive)
    pub start: i64,
    /// Last sample time (inclusive)
    pub end: i64,
    /// Nanoseconds between samples
    pub sample_interval: i64,
    /// Path relative to the bank root, `/` separated
    pub path: String,
    pub fingerprint: Fingerprint,
    /// Format tag understood by the reader
    pub format: String,
}

impl IndexEntry {
    pub fn span(&self) -> TimeSpan {
        TimeSpan {
            start: self.start,
            end: self.end,
        }
    }
}

/// A planned read of one identifier from one file
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResolvedSlice {
    pub path: String,
    pub identifier: Identifier,
    /// Requested start, already clipped to the indexed range
    pub start: i64,
    /// Requested end, already clipped to the indexed range
    pub end: i64,
    /// Range the index claims the file covers for this identifier
    pub indexed: TimeSpan,
    pub format: String,
}

impl ResolvedSlice {
    pub fn span(&self) -> TimeSpan {
        TimeSpan {
            start: self.start,
            end: self.end,
        }
    }
}

/// A regularly sampled run of values for one identifier
///
/// Readers return raw, possibly partial segments in this shape; the
/// assembler merges them into continuous series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Series {
    pub identifier: Identifier,
    /// Nanoseconds between consecutive samples (> 0)
    pub sample_interval: i64,
    /// Timestamp of the first sample
    pub start: i64,
    pub samples: Vec<f64>,
}

impl Series {
    pub fn new(identifier: Identifier, sample_interval: i64, start: i64, samples: Vec<f64>) -> Self {
        Self {
            identifier,
            sample_interval,
            start,
            samples,
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Timestamp of the last sample (equals `start` when empty)
    ///
    /// Saturates at the ends of the time line; see [`Series::checked_end`].
    pub fn end(&self) -> i64 {
        self.checked_end().unwrap_or(if self.sample_interval < 0 {
            i64::MIN
        } else {
            i64::MAX
        })
    }

    /// Timestamp of the last sample, `None` if it is not representable
    pub fn checked_end(&self) -> Option<i64> {
        let steps = i64::try_from(self.samples.len().saturating_sub(1)).ok()?;
        steps.checked_mul(self.sample_interval)?.checked_add(self.start)
    }

    pub fn span(&self) -> TimeSpan {
        TimeSpan {
            start: self.start,
            end: self.end(),
        }
    }

    /// Timestamp of sample `idx`
    pub fn timestamp_at(&self, idx: usize) -> i64 {
        i64::try_from(idx)
            .unwrap_or(i64::MAX)
            .saturating_mul(self.sample_interval)
            .saturating_add(self.start)
    }

    pub fn timestamps(&self) -> impl Iterator<Item = i64> + '_ {
        (0..self.samples.len()).map(move |i| self.timestamp_at(i))
    }

    /// Iterate `(timestamp, value)` pairs
    pub fn iter(&self) -> impl Iterator<Item = (i64, f64)> + '_ {
        self.samples
            .iter()
            .enumerate()
            .map(move |(i, v)| (self.timestamp_at(i), *v))
    }

    /// Restrict the series to `span`
    ///
    /// A series already inside `span` is returned as-is without copying.
    /// Returns `None` when no sample falls inside.
    pub fn clip(mut self, span: &TimeSpan) -> Option<Self> {
        if self.is_empty() {
            return None;
        }
        if span.covers(&self.span()) {
            return Some(self);
        }
        if !span.overlaps(&self.span()) || self.sample_interval <= 0 {
            return None;
        }

        let interval = self.sample_interval as i128;
        let start = self.start as i128;
        // first index with timestamp >= span.start
        let first = if span.start as i128 <= start {
            0
        } else {
            ((span.start as i128 - start + interval - 1) / interval) as usize
        };
        // last index with timestamp <= span.end
        let last = ((span.end as i128 - start) / interval) as usize;
        let last = last.min(self.samples.len() - 1);
        if first > last {
            return None;
        }

        self.samples.truncate(last + 1);
        if first > 0 {
            self.samples.drain(..first);
        }
        self.start = self.timestamp_at(first);
        Some(self)
    }
}
