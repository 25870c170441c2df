//! Segment assembler - reads planned slices and stitches them into series
//!
//! ```text
//! slices ──► reader.read_range (retried) ──► raw segments
//!                                               ↓ clip to slice
//!                    group by (identifier, sample interval), sort by start
//!                                               ↓
//!      run of one segment ──► moved through as-is
//!      run of several     ──► rebuilt on a common sample grid
//! ```
//!
//! Two segments join a run when the second starts no later than one sample
//! interval after the run's end. Anything further apart stays a separate
//! series unless the caller asked for gaps to be filled.

use crate::storage::error::{BankError, BankResult};
use crate::storage::reader::{FileReader, ReaderError};
use crate::storage::retry::{retry, RetryError, RetryPolicy};
use crate::storage::types::{ResolvedSlice, Series};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;

/// How segments separated by a gap are handled
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergePolicy {
    /// Keep gaps; every continuous run becomes its own series
    #[default]
    SplitAtGaps,
    /// Join everything for one identifier, padding gaps with the value
    FillGaps(f64),
}

impl MergePolicy {
    fn bridges_gaps(&self) -> bool {
        matches!(self, MergePolicy::FillGaps(_))
    }
}

pub struct SegmentAssembler<'a> {
    root: &'a Path,
    reader: &'a dyn FileReader,
    retry: &'a RetryPolicy,
    policy: MergePolicy,
}

impl<'a> SegmentAssembler<'a> {
    pub fn new(root: &'a Path, reader: &'a dyn FileReader, retry: &'a RetryPolicy) -> Self {
        Self {
            root,
            reader,
            retry,
            policy: MergePolicy::default(),
        }
    }

    pub fn policy(mut self, policy: MergePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Read every slice and merge the results
    ///
    /// Output is ordered by identifier, then start time.
    pub fn assemble(&self, slices: &[ResolvedSlice]) -> BankResult<Vec<Series>> {
        let mut segments = Vec::new();
        for slice in slices {
            segments.extend(self.read_slice(slice)?);
        }

        let read = segments.len();
        let series = merge_segments(segments, self.policy);
        debug!(
            slices = slices.len(),
            segments = read,
            series = series.len(),
            "Assembled query"
        );
        Ok(series)
    }

    fn read_slice(&self, slice: &ResolvedSlice) -> BankResult<Vec<Series>> {
        let path = self.root.join(&slice.path);
        let span = slice.span();

        let raw = retry(self.retry, ReaderError::is_transient, || {
            self.reader
                .read_range(&path, &slice.format, &slice.identifier, &span)
        })
        .map_err(|e| match e {
            RetryError::Exhausted { attempts, .. } => BankError::TransientReadConflict {
                path: path.clone(),
                attempts,
            },
            RetryError::Fatal(e) => BankError::Reader {
                path: path.clone(),
                message: e.to_string(),
            },
        })?;

        let mut segments = Vec::with_capacity(raw.len());
        for segment in raw {
            if segment.identifier != slice.identifier || segment.is_empty() {
                continue;
            }
            if segment.sample_interval <= 0 {
                return Err(BankError::CorruptSegment {
                    path,
                    reason: format!("sample interval {} is not positive", segment.sample_interval),
                });
            }
            if !segment.span().overlaps(&slice.indexed) {
                return Err(BankError::CorruptSegment {
                    path,
                    reason: format!(
                        "decoded {} covers [{}, {}], index says [{}, {}]",
                        segment.identifier,
                        segment.start,
                        segment.end(),
                        slice.indexed.start,
                        slice.indexed.end
                    ),
                });
            }
            segments.extend(segment.clip(&span));
        }
        Ok(segments)
    }
}

/// Merge raw segments into continuous series
///
/// Segments that need no merging are moved into the output untouched.
pub fn merge_segments(mut segments: Vec<Series>, policy: MergePolicy) -> Vec<Series> {
    segments.retain(|s| !s.is_empty());
    segments.sort_by(|a, b| {
        (&a.identifier, a.sample_interval, a.start, a.end())
            .cmp(&(&b.identifier, b.sample_interval, b.start, b.end()))
    });

    let mut merged = Vec::new();
    let mut run: Vec<Series> = Vec::new();
    let mut run_end = 0i64;

    for segment in segments {
        let joins = run.last().is_some_and(|last| {
            last.identifier == segment.identifier
                && last.sample_interval == segment.sample_interval
                && (policy.bridges_gaps()
                    || segment.start <= run_end.saturating_add(segment.sample_interval))
        });

        if joins {
            run_end = run_end.max(segment.end());
        } else {
            merged.extend(flush_run(std::mem::take(&mut run), policy));
            run_end = segment.end();
        }
        run.push(segment);
    }
    merged.extend(flush_run(run, policy));

    merged.sort_by(|a, b| (&a.identifier, a.start).cmp(&(&b.identifier, b.start)));
    merged
}

fn flush_run(mut run: Vec<Series>, policy: MergePolicy) -> Option<Series> {
    if run.len() <= 1 {
        return run.pop();
    }

    let first = &run[0];
    let interval = first.sample_interval;
    let start = first.start;
    let slot = |ts: i64| grid_index(start, interval, ts);

    let len = run.iter().map(|s| slot(s.end()) + 1).max().unwrap_or(0);
    // Only FillGaps runs can contain holes
    let filler = match policy {
        MergePolicy::FillGaps(value) => value,
        MergePolicy::SplitAtGaps => f64::NAN,
    };
    let mut samples = vec![filler; len];

    // Later segments win where runs overlap
    for segment in &run {
        for (i, value) in segment.samples.iter().enumerate() {
            let idx = slot(segment.timestamp_at(i));
            if let Some(dst) = samples.get_mut(idx) {
                *dst = *value;
            }
        }
    }

    Some(Series::new(first.identifier.clone(), interval, start, samples))
}

/// Nearest grid position of `ts` on a grid starting at `start`
fn grid_index(start: i64, interval: i64, ts: i64) -> usize {
    let offset = (ts as i128 - start as i128).max(0);
    let interval = interval as i128;
    ((offset * 2 + interval) / (interval * 2)) as usize
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::datafile::{Compression, DataFileWriter};
    use crate::storage::reader::{HeaderOutcome, NativeReader};
    use crate::storage::types::{Identifier, TimeSpan};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;
    use tempfile::tempdir;

    fn chz() -> Identifier {
        Identifier::parse("NET.STA..CHZ").unwrap()
    }

    fn ramp(start: i64, count: usize, first: f64) -> Series {
        let samples = (0..count).map(|i| first + i as f64).collect();
        Series::new(chz(), 10, start, samples)
    }

    fn slice(path: &str, indexed: (i64, i64), query: (i64, i64)) -> ResolvedSlice {
        let indexed = TimeSpan::new(indexed.0, indexed.1);
        let window = indexed
            .intersection(&TimeSpan::new(query.0, query.1))
            .unwrap();
        ResolvedSlice {
            path: path.to_string(),
            identifier: chz(),
            start: window.start,
            end: window.end,
            indexed,
            format: "wbk".to_string(),
        }
    }

    fn fast_retry() -> RetryPolicy {
        RetryPolicy::new(3, Duration::from_millis(1))
    }

    /// Fails transiently a fixed number of times, then reads natively
    struct FlakyReader {
        failures: u32,
        calls: AtomicU32,
    }

    impl FileReader for FlakyReader {
        fn read_header(&self, path: &Path) -> Result<HeaderOutcome, ReaderError> {
            NativeReader.read_header(path)
        }

        fn read_range(
            &self,
            path: &Path,
            format: &str,
            identifier: &Identifier,
            span: &TimeSpan,
        ) -> Result<Vec<Series>, ReaderError> {
            if self.calls.fetch_add(1, Ordering::SeqCst) < self.failures {
                return Err(ReaderError::Checksum("replaced mid-read".into()));
            }
            NativeReader.read_range(path, format, identifier, span)
        }
    }

    /// Returns data from somewhere the index never saw
    struct ShiftedReader;

    impl FileReader for ShiftedReader {
        fn read_header(&self, _path: &Path) -> Result<HeaderOutcome, ReaderError> {
            Ok(HeaderOutcome::Invalid("unused".into()))
        }

        fn read_range(
            &self,
            _path: &Path,
            _format: &str,
            identifier: &Identifier,
            _span: &TimeSpan,
        ) -> Result<Vec<Series>, ReaderError> {
            Ok(vec![Series::new(identifier.clone(), 10, 10_000, vec![1.0; 5])])
        }
    }

    fn write(dir: &Path, name: &str, series: Series) {
        DataFileWriter::new(dir.join(name), Compression::Lz4)
            .write(&[series])
            .unwrap();
    }

    #[test]
    fn test_contiguous_files_merge_and_gap_splits() {
        let dir = tempdir().unwrap();
        write(dir.path(), "a.wbk", ramp(0, 10, 0.0));
        write(dir.path(), "b.wbk", ramp(100, 10, 10.0));
        write(dir.path(), "c.wbk", ramp(500, 10, 50.0));

        let slices = vec![
            slice("a.wbk", (0, 90), (0, 600)),
            slice("b.wbk", (100, 190), (0, 600)),
            slice("c.wbk", (500, 590), (0, 600)),
        ];
        let policy = fast_retry();
        let series = SegmentAssembler::new(dir.path(), &NativeReader, &policy)
            .assemble(&slices)
            .unwrap();

        assert_eq!(series.len(), 2);
        assert_eq!(series[0].span(), TimeSpan::new(0, 190));
        assert_eq!(series[0].len(), 20);
        assert_eq!(series[0].samples[15], 15.0);
        assert_eq!(series[1].span(), TimeSpan::new(500, 590));
        assert!(series.iter().all(|s| s.samples.iter().all(|v| !v.is_nan())));
    }

    #[test]
    fn test_reads_only_requested_range() {
        let dir = tempdir().unwrap();
        write(dir.path(), "a.wbk", ramp(0, 100, 0.0));

        let policy = fast_retry();
        let series = SegmentAssembler::new(dir.path(), &NativeReader, &policy)
            .assemble(&[slice("a.wbk", (0, 990), (205, 300))])
            .unwrap();

        assert_eq!(series.len(), 1);
        assert_eq!(series[0].start, 210);
        assert_eq!(series[0].end(), 300);
        assert_eq!(series[0].samples[0], 21.0);
    }

    #[test]
    fn test_overlap_counted_once() {
        let merged = merge_segments(
            vec![ramp(0, 10, 0.0), ramp(50, 10, 5.0)],
            MergePolicy::SplitAtGaps,
        );
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].len(), 15);
        assert_eq!(merged[0].samples, (0..15).map(|v| v as f64).collect::<Vec<_>>());
    }

    #[test]
    fn test_gap_of_more_than_one_interval_splits() {
        // last sample at 90, next at 110: one sample missing
        let merged = merge_segments(
            vec![ramp(110, 5, 0.0), ramp(0, 10, 0.0)],
            MergePolicy::SplitAtGaps,
        );
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].start, 0);
        assert_eq!(merged[1].start, 110);
    }

    #[test]
    fn test_single_segment_moved_through() {
        let segment = ramp(0, 1000, 0.0);
        let ptr = segment.samples.as_ptr();

        let merged = merge_segments(vec![segment], MergePolicy::SplitAtGaps);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].samples.as_ptr(), ptr);
        assert_eq!((merged[0].start, merged[0].end(), merged[0].len()), (0, 9990, 1000));
    }

    #[test]
    fn test_different_intervals_never_merge() {
        let fast = Series::new(chz(), 5, 100, vec![1.0; 4]);
        let merged = merge_segments(vec![ramp(0, 10, 0.0), fast], MergePolicy::FillGaps(0.0));
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].sample_interval, 10);
        assert_eq!(merged[1].sample_interval, 5);
    }

    #[test]
    fn test_fill_gaps_bridges() {
        let merged = merge_segments(
            vec![ramp(0, 2, 1.0), ramp(50, 2, 6.0)],
            MergePolicy::FillGaps(-1.0),
        );
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].samples, vec![1.0, 2.0, -1.0, -1.0, -1.0, 6.0, 7.0]);
    }

    #[test]
    fn test_identifiers_kept_apart() {
        let other = Series::new(Identifier::parse("NET.STA..CHN").unwrap(), 10, 100, vec![0.0; 3]);
        let merged = merge_segments(vec![ramp(100, 3, 0.0), other], MergePolicy::SplitAtGaps);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].identifier.channel, "CHN");
    }

    #[test]
    fn test_desync_is_corrupt_segment() {
        let dir = tempdir().unwrap();
        let policy = fast_retry();
        let err = SegmentAssembler::new(dir.path(), &ShiftedReader, &policy)
            .assemble(&[slice("a.wbk", (0, 90), (0, 90))])
            .unwrap_err();
        assert!(matches!(err, BankError::CorruptSegment { .. }));
    }

    #[test]
    fn test_transient_failures_recovered() {
        let dir = tempdir().unwrap();
        write(dir.path(), "a.wbk", ramp(0, 10, 0.0));

        let reader = FlakyReader {
            failures: 2,
            calls: AtomicU32::new(0),
        };
        let policy = fast_retry();
        let series = SegmentAssembler::new(dir.path(), &reader, &policy)
            .assemble(&[slice("a.wbk", (0, 90), (0, 90))])
            .unwrap();
        assert_eq!(series.len(), 1);
        assert_eq!(reader.calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_transient_failures_exhausted() {
        let dir = tempdir().unwrap();
        write(dir.path(), "a.wbk", ramp(0, 10, 0.0));

        let reader = FlakyReader {
            failures: 10,
            calls: AtomicU32::new(0),
        };
        let policy = fast_retry();
        let err = SegmentAssembler::new(dir.path(), &reader, &policy)
            .assemble(&[slice("a.wbk", (0, 90), (0, 90))])
            .unwrap_err();
        assert!(matches!(err, BankError::TransientReadConflict { attempts: 3, .. }));
    }

    #[test]
    fn test_foreign_format_is_reader_error() {
        let dir = tempdir().unwrap();
        write(dir.path(), "a.wbk", ramp(0, 10, 0.0));

        let mut foreign = slice("a.wbk", (0, 90), (0, 90));
        foreign.format = "mseed".to_string();
        let policy = fast_retry();
        let err = SegmentAssembler::new(dir.path(), &NativeReader, &policy)
            .assemble(&[foreign])
            .unwrap_err();
        assert!(matches!(err, BankError::Reader { .. }));
    }
}
