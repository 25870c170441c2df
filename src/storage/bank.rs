//! Bank - the public face of an indexed data directory
//!
//! ```text
//! update_index:  Indexer ──► IndexStore            (exclusive lock at commit)
//! get:           parse patterns ──► QueryPlanner   (shared lock)
//!                              ──► SegmentAssembler ──► Vec<Series>
//! ```
//!
//! A `Bank` opens its index lazily on first use. Several `Bank` values,
//! in one process or many, may point at the same root.

use crate::config::BankSection;
use crate::index::{
    FingerprintMode, IndexStore, Indexer, LockManager, LockMode, NoProgress, Progress,
    UpdateReport,
};
use crate::query::{
    parse_patterns, IdentifierPattern, MergePolicy, QueryPlan, QueryPlanner, SegmentAssembler,
};
use crate::storage::datafile::{Compression, DataFileWriter, DEFAULT_BLOCK_SAMPLES, NATIVE_EXTENSION};
use crate::storage::error::{BankError, BankResult};
use crate::storage::reader::{FileReader, NativeReader};
use crate::storage::retry::RetryPolicy;
use crate::storage::types::{from_datetime, to_datetime, IndexEntry, Series, TimeSpan};
use chrono::{DateTime, Datelike, Utc};
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tracing::{info, warn};

/// Runtime bank settings
#[derive(Debug, Clone)]
pub struct BankConfig {
    /// Index file, relative to the root
    pub index_file: String,
    /// How long an index update waits for the exclusive lock
    pub lock_timeout: Duration,
    /// How long a query waits for the shared lock
    pub read_lock_timeout: Duration,
    /// Attempts per file read (and per busy index call)
    pub read_retries: u32,
    /// First retry delay, doubled per attempt
    pub retry_backoff: Duration,
    pub fingerprint: FingerprintMode,
    /// Extensions to index; empty means every non-hidden file
    pub extensions: Vec<String>,
    pub follow_links: bool,
    pub progress_min_files: usize,
    /// Samples per block in files written by [`Bank::put`]
    pub block_samples: usize,
    pub merge: MergePolicy,
}

impl Default for BankConfig {
    fn default() -> Self {
        Self {
            index_file: ".wavebank.db".to_string(),
            lock_timeout: Duration::from_secs(10),
            read_lock_timeout: Duration::from_secs(2),
            read_retries: 3,
            retry_backoff: Duration::from_millis(25),
            fingerprint: FingerprintMode::default(),
            extensions: Vec::new(),
            follow_links: false,
            progress_min_files: 100,
            block_samples: DEFAULT_BLOCK_SAMPLES,
            merge: MergePolicy::default(),
        }
    }
}

impl BankConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.read_retries, self.retry_backoff)
    }
}

impl From<&BankSection> for BankConfig {
    fn from(section: &BankSection) -> Self {
        Self {
            index_file: section.index_file.clone(),
            lock_timeout: Duration::from_millis(section.lock_timeout_ms),
            read_lock_timeout: Duration::from_millis(section.read_lock_timeout_ms),
            read_retries: section.read_retries,
            retry_backoff: Duration::from_millis(section.retry_backoff_ms),
            fingerprint: section.fingerprint,
            extensions: section.extensions.clone(),
            follow_links: section.follow_links,
            progress_min_files: section.progress_min_files,
            block_samples: section.block_samples,
            merge: MergePolicy::default(),
        }
    }
}

/// Summary of what a bank's index holds
#[derive(Debug, Clone, PartialEq)]
pub struct BankStats {
    pub entries: u64,
    pub files: u64,
    pub time_bounds: Option<TimeSpan>,
    pub last_updated: Option<DateTime<Utc>>,
}

impl std::fmt::Display for BankStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Entries: {}, Files: {}", self.entries, self.files)?;
        match self.time_bounds {
            Some(span) => write!(
                f,
                ", Span: {} .. {}",
                to_datetime(span.start).to_rfc3339(),
                to_datetime(span.end).to_rfc3339()
            )?,
            None => write!(f, ", Span: -")?,
        }
        match self.last_updated {
            Some(t) => write!(f, ", Last updated: {}", t.to_rfc3339()),
            None => write!(f, ", Last updated: never"),
        }
    }
}

/// Builder for a [`Bank`] with a non-default reader or config
pub struct BankBuilder {
    root: PathBuf,
    config: BankConfig,
    reader: Arc<dyn FileReader>,
}

impl BankBuilder {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            config: BankConfig::default(),
            reader: Arc::new(NativeReader),
        }
    }

    pub fn config(mut self, config: BankConfig) -> Self {
        self.config = config;
        self
    }

    pub fn reader(mut self, reader: Arc<dyn FileReader>) -> Self {
        self.reader = reader;
        self
    }

    pub fn build(self) -> Bank {
        let locks = LockManager::new(self.root.join(format!("{}.lock", self.config.index_file)));
        Bank {
            root: self.root,
            config: self.config,
            reader: self.reader,
            locks,
            store: OnceLock::new(),
        }
    }
}

/// An indexed directory of data files
pub struct Bank {
    root: PathBuf,
    config: BankConfig,
    reader: Arc<dyn FileReader>,
    locks: LockManager,
    store: OnceLock<IndexStore>,
}

impl Bank {
    /// Bank over `root` with the native reader and default settings
    ///
    /// Nothing is touched on disk until the first operation.
    pub fn open(root: impl AsRef<Path>) -> Self {
        BankBuilder::new(root).build()
    }

    pub fn builder(root: impl AsRef<Path>) -> BankBuilder {
        BankBuilder::new(root)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config(&self) -> &BankConfig {
        &self.config
    }

    pub fn index_path(&self) -> PathBuf {
        self.root.join(&self.config.index_file)
    }

    fn store(&self) -> BankResult<&IndexStore> {
        if let Some(store) = self.store.get() {
            return Ok(store);
        }
        let store = IndexStore::open(self.index_path(), self.config.retry_policy())?;
        for warning in store.open_warnings() {
            warn!("{}", warning);
        }
        Ok(self.store.get_or_init(|| store))
    }

    /// Bring the index in line with the file tree
    ///
    /// With `since`, files last modified before it are assumed unchanged.
    pub fn update_index(&self, since: Option<DateTime<Utc>>) -> BankResult<&Self> {
        self.update_index_with(since, &mut NoProgress)?;
        Ok(self)
    }

    /// [`Bank::update_index`] with progress reporting and the full report
    pub fn update_index_with(
        &self,
        since: Option<DateTime<Utc>>,
        progress: &mut dyn Progress,
    ) -> BankResult<UpdateReport> {
        let report = self
            .indexer()?
            .run(since.as_ref().map(from_datetime), progress)?;
        log_report(&self.root, "Index update finished", &report);
        Ok(report)
    }

    /// Re-read every file and replace the whole index
    ///
    /// The scan runs without the lock; the old index stays readable until
    /// the new one is committed in a single transaction.
    pub fn rebuild_index(&self, progress: &mut dyn Progress) -> BankResult<UpdateReport> {
        let report = self.indexer()?.rebuild().run(None, progress)?;
        log_report(&self.root, "Index rebuild finished", &report);
        Ok(report)
    }

    fn indexer(&self) -> BankResult<Indexer<'_>> {
        Ok(Indexer::new(
            &self.root,
            self.store()?,
            &self.locks,
            self.reader.as_ref(),
            &self.config,
        ))
    }

    /// Fetch the data of every identifier matching `patterns` in `[start, end]`
    ///
    /// Patterns are validated before any I/O. No match is an empty result.
    pub fn get<P: AsRef<str>>(&self, patterns: &[P], start: i64, end: i64) -> BankResult<Vec<Series>> {
        let patterns = parse_patterns(patterns)?;
        let span = TimeSpan::try_new(start, end).ok_or(BankError::InvalidTimeRange)?;
        let plan = self.plan_parsed(&patterns, &span)?;
        self.assemble(&plan)
    }

    /// Run several requests; output `i` holds the data for request `i` only
    pub fn get_bulk<P: AsRef<str>>(&self, requests: &[(P, TimeSpan)]) -> BankResult<Vec<Vec<Series>>> {
        let parsed = requests
            .iter()
            .map(|(pattern, span)| {
                if span.start > span.end {
                    return Err(BankError::InvalidTimeRange);
                }
                Ok((IdentifierPattern::parse(pattern.as_ref())?, *span))
            })
            .collect::<BankResult<Vec<_>>>()?;

        parsed
            .iter()
            .map(|(pattern, span)| {
                let plan = self.plan_parsed(std::slice::from_ref(pattern), span)?;
                self.assemble(&plan)
            })
            .collect()
    }

    /// The reads `get` would perform, without performing them
    pub fn plan<P: AsRef<str>>(&self, patterns: &[P], span: &TimeSpan) -> BankResult<QueryPlan> {
        let patterns = parse_patterns(patterns)?;
        self.plan_parsed(&patterns, span)
    }

    fn plan_parsed(&self, patterns: &[IdentifierPattern], span: &TimeSpan) -> BankResult<QueryPlan> {
        if patterns.is_empty() {
            return Ok(QueryPlan::default());
        }
        let store = self.store()?;
        let _guard = self
            .locks
            .acquire(LockMode::Shared, self.config.read_lock_timeout)?;
        QueryPlanner::new(store, &self.root).plan(patterns, span)
    }

    fn assemble(&self, plan: &QueryPlan) -> BankResult<Vec<Series>> {
        if plan.is_empty() {
            return Ok(Vec::new());
        }
        let retry = self.config.retry_policy();
        SegmentAssembler::new(&self.root, self.reader.as_ref(), &retry)
            .policy(self.config.merge)
            .assemble(&plan.slices)
    }

    /// Time of the last committed index update
    pub fn last_updated(&self) -> BankResult<Option<DateTime<Utc>>> {
        Ok(self.store()?.watermark()?.map(to_datetime))
    }

    /// Index rows matching `pattern` (all when `None`) within `span`
    pub fn read_index(&self, pattern: Option<&str>, span: Option<TimeSpan>) -> BankResult<Vec<IndexEntry>> {
        let pattern = match pattern {
            Some(raw) => IdentifierPattern::parse(raw)?,
            None => IdentifierPattern::any(),
        };
        let store = self.store()?;
        let _guard = self
            .locks
            .acquire(LockMode::Shared, self.config.read_lock_timeout)?;
        store.query(&pattern, &span.unwrap_or_else(TimeSpan::everything))
    }

    pub fn stats(&self) -> BankResult<BankStats> {
        let store = self.store()?;
        Ok(BankStats {
            entries: store.entry_count()?,
            files: store.file_count()?,
            time_bounds: store.time_bounds()?,
            last_updated: store.watermark()?.map(to_datetime),
        })
    }

    /// Write `series` into a new native data file and index it
    ///
    /// The file lands at `NET/STA/<year>/NET.STA.LOC.CHA.<start>.wbk`,
    /// named after the first series.
    pub fn put(&self, series: &[Series]) -> BankResult<PathBuf> {
        let first = series
            .iter()
            .find(|s| !s.is_empty())
            .ok_or(BankError::InvalidTimeRange)?;

        let id = &first.identifier;
        let path = self
            .root
            .join(dir_name(&id.network))
            .join(dir_name(&id.station))
            .join(to_datetime(first.start).year().to_string())
            .join(format!("{}.{}.{}", id, first.start, NATIVE_EXTENSION));

        DataFileWriter::new(&path, Compression::Lz4)
            .block_samples(self.config.block_samples)
            .write(series)?;
        self.update_index(None)?;
        Ok(path)
    }
}

fn log_report(root: &Path, message: &str, report: &UpdateReport) {
    info!(
        root = %root.display(),
        seen = report.files_seen,
        changed = report.files_changed,
        indexed = report.files_indexed,
        removed = report.files_removed,
        entries = report.entries_written,
        warnings = report.warnings.len(),
        committed = report.committed,
        "{}",
        message
    );
}

fn dir_name(code: &str) -> &str {
    if code.is_empty() {
        "_"
    } else {
        code
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::error::BankWarning;
    use crate::storage::reader::{HeaderOutcome, ReaderError};
    use crate::storage::types::{Identifier, NANOS_PER_SEC};
    use parking_lot::Mutex;
    use std::thread;
    use tempfile::tempdir;

    fn chz() -> Identifier {
        Identifier::parse("NET.STA..CHZ").unwrap()
    }

    fn series(code: &str, start: i64, n: usize) -> Series {
        let samples = (0..n).map(|i| i as f64).collect();
        Series::new(Identifier::parse(code).unwrap(), 10, start, samples)
    }

    fn write(root: &Path, rel: &str, data: Series) {
        DataFileWriter::new(root.join(rel), Compression::Lz4)
            .write(&[data])
            .unwrap();
    }

    #[test]
    fn test_contiguous_and_gapped_files() {
        let dir = tempdir().unwrap();
        write(dir.path(), "a.wbk", series("NET.STA..CHZ", 0, 10));
        write(dir.path(), "b.wbk", series("NET.STA..CHZ", 100, 10));
        write(dir.path(), "c.wbk", series("NET.STA..CHZ", 500, 10));

        let bank = Bank::open(dir.path());
        let result = bank
            .update_index(None)
            .unwrap()
            .get(&["NET.STA..CHZ"], 0, 600)
            .unwrap();

        assert_eq!(result.len(), 2);
        assert_eq!(result[0].span(), TimeSpan::new(0, 190));
        assert_eq!(result[0].len(), 20);
        assert_eq!(result[1].span(), TimeSpan::new(500, 590));
    }

    #[test]
    fn test_put_is_immediately_queryable() {
        let dir = tempdir().unwrap();
        let bank = Bank::open(dir.path().join("bank"));

        let start = 1_700_000_000 * NANOS_PER_SEC;
        let path = bank.put(&[series("UU.SRU..HHZ", start, 100)]).unwrap();
        assert!(path.ends_with(format!("UU/SRU/2023/UU.SRU..HHZ.{}.wbk", start)));

        let result = bank.get(&["UU.*.*.HH?"], start, start + 1_000).unwrap();
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].len(), 100);
        assert!(bank.last_updated().unwrap().is_some());
    }

    #[test]
    fn test_put_rejects_empty_input() {
        let dir = tempdir().unwrap();
        let bank = Bank::open(dir.path());
        let empty: [Series; 0] = [];
        assert!(matches!(bank.put(&empty), Err(BankError::InvalidTimeRange)));
    }

    #[test]
    fn test_put_rejects_end_past_time_line() {
        let dir = tempdir().unwrap();
        let bank = Bank::open(dir.path());

        let late = Series::new(chz(), 10, i64::MAX - 100, vec![1.0; 20]);
        assert!(matches!(bank.put(&[late]), Err(BankError::InvalidTimeRange)));

        bank.update_index(None).unwrap();
        assert_eq!(bank.stats().unwrap().files, 0);
    }

    #[test]
    fn test_invalid_pattern_touches_nothing() {
        let dir = tempdir().unwrap();
        let root = dir.path().join("never-created");
        let bank = Bank::open(&root);

        let err = bank.get(&["A.B.C.D.E"], 0, 10).unwrap_err();
        assert!(matches!(err, BankError::InvalidPattern { .. }));
        assert!(!root.exists());
    }

    #[test]
    fn test_invalid_time_range() {
        let dir = tempdir().unwrap();
        let bank = Bank::open(dir.path());
        assert!(matches!(
            bank.get(&["NET"], 10, 0),
            Err(BankError::InvalidTimeRange)
        ));
    }

    #[test]
    fn test_no_data_is_empty_result() {
        let dir = tempdir().unwrap();
        let bank = Bank::open(dir.path());
        bank.update_index(None).unwrap();

        assert!(bank.get(&["NET"], 0, 100).unwrap().is_empty());
        let plan = bank.plan(&["NET"], &TimeSpan::new(0, 100)).unwrap();
        assert!(matches!(plan.warnings.as_slice(), [BankWarning::BankEmpty { .. }]));
    }

    #[test]
    fn test_second_update_writes_nothing() {
        let dir = tempdir().unwrap();
        write(dir.path(), "a.wbk", series("NET.STA..CHZ", 0, 10));
        let bank = Bank::open(dir.path());

        let first = bank.update_index_with(None, &mut NoProgress).unwrap();
        assert!(first.committed);
        let before = bank.last_updated().unwrap();

        let second = bank.update_index_with(None, &mut NoProgress).unwrap();
        assert!(!second.committed);
        assert_eq!(bank.last_updated().unwrap(), before);
    }

    #[test]
    fn test_get_bulk_keeps_requests_apart() {
        let dir = tempdir().unwrap();
        write(dir.path(), "a.wbk", series("NET.STA..CHZ", 0, 10));
        write(dir.path(), "b.wbk", series("NET.STA..CHZ", 100, 10));
        let bank = Bank::open(dir.path());
        bank.update_index(None).unwrap();

        let out = bank
            .get_bulk(&[
                ("NET.STA..CHZ", TimeSpan::new(0, 50)),
                ("NET.STA..CHZ", TimeSpan::new(100, 150)),
                ("XX", TimeSpan::new(0, 1000)),
            ])
            .unwrap();
        assert_eq!(out.len(), 3);
        assert_eq!(out[0][0].span(), TimeSpan::new(0, 50));
        assert_eq!(out[1][0].span(), TimeSpan::new(100, 150));
        assert!(out[2].is_empty());

        let none: [(&str, TimeSpan); 0] = [];
        assert!(bank.get_bulk(&none).unwrap().is_empty());
    }

    #[test]
    fn test_read_index_and_stats() {
        let dir = tempdir().unwrap();
        write(dir.path(), "a.wbk", series("NET.STA..CHZ", 0, 10));
        write(dir.path(), "b.wbk", series("NET.STA..CHN", 500, 10));
        let bank = Bank::open(dir.path());
        bank.update_index(None).unwrap();

        let all = bank.read_index(None, None).unwrap();
        assert_eq!(all.len(), 2);
        let chn = bank.read_index(Some("*.*.*.CHN"), None).unwrap();
        assert_eq!(chn.len(), 1);
        assert_eq!(chn[0].path, "b.wbk");
        assert!(bank
            .read_index(None, Some(TimeSpan::new(200, 300)))
            .unwrap()
            .is_empty());

        let stats = bank.stats().unwrap();
        assert_eq!((stats.entries, stats.files), (2, 2));
        assert_eq!(stats.time_bounds, Some(TimeSpan::new(0, 590)));
        assert!(stats.to_string().starts_with("Entries: 2, Files: 2"));
    }

    #[test]
    fn test_rebuild_index() {
        let dir = tempdir().unwrap();
        write(dir.path(), "a.wbk", series("NET.STA..CHZ", 0, 10));
        let bank = Bank::open(dir.path());
        bank.update_index(None).unwrap();

        let report = bank.rebuild_index(&mut NoProgress).unwrap();
        assert!(report.committed);
        assert_eq!(report.files_indexed, 1);
        assert_eq!(bank.read_index(None, None).unwrap().len(), 1);
    }

    /// Looks at the index through a second bank while each header is read
    struct ObservingReader {
        root: PathBuf,
        seen: Mutex<Vec<(usize, u64)>>,
    }

    impl FileReader for ObservingReader {
        fn read_header(&self, path: &Path) -> Result<HeaderOutcome, ReaderError> {
            let other = Bank::open(&self.root);
            let rows = other.read_index(None, None).map(|e| e.len()).unwrap_or(0);
            let entries = other.stats().map(|s| s.entries).unwrap_or(0);
            self.seen.lock().push((rows, entries));
            NativeReader.read_header(path)
        }

        fn read_range(
            &self,
            path: &Path,
            format: &str,
            identifier: &Identifier,
            span: &TimeSpan,
        ) -> Result<Vec<Series>, ReaderError> {
            NativeReader.read_range(path, format, identifier, span)
        }
    }

    #[test]
    fn test_rebuild_keeps_old_index_readable() {
        let dir = tempdir().unwrap();
        write(dir.path(), "a.wbk", series("NET.STA..CHZ", 0, 10));
        write(dir.path(), "b.wbk", series("NET.STA..CHZ", 100, 10));
        write(dir.path(), "c.wbk", series("NET.STA..CHZ", 500, 10));
        Bank::open(dir.path()).update_index(None).unwrap();
        std::fs::remove_file(dir.path().join("c.wbk")).unwrap();

        let reader = Arc::new(ObservingReader {
            root: dir.path().to_path_buf(),
            seen: Mutex::new(Vec::new()),
        });
        let bank = Bank::builder(dir.path()).reader(reader.clone()).build();
        let report = bank.rebuild_index(&mut NoProgress).unwrap();
        assert_eq!(report.files_indexed, 2);
        assert_eq!(report.files_removed, 1);

        // queries during the scan neither block nor see a half-built index
        let seen = reader.seen.lock();
        assert_eq!(seen.len(), 2);
        assert!(seen.iter().all(|&(rows, entries)| rows == 3 && entries == 3));

        assert_eq!(bank.read_index(None, None).unwrap().len(), 2);
        assert_eq!(bank.last_updated().unwrap().map(|t| from_datetime(&t)), Some(report.started_at));
    }

    #[test]
    fn test_fill_gaps_policy() {
        let dir = tempdir().unwrap();
        write(dir.path(), "a.wbk", series("NET.STA..CHZ", 0, 2));
        write(dir.path(), "b.wbk", series("NET.STA..CHZ", 40, 2));
        let config = BankConfig {
            merge: MergePolicy::FillGaps(0.5),
            ..BankConfig::default()
        };
        let bank = Bank::builder(dir.path()).config(config).build();
        bank.update_index(None).unwrap();

        let result = bank.get(&["NET"], 0, 100).unwrap();
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].samples, vec![0.0, 1.0, 0.5, 0.5, 0.0, 1.0]);
    }

    #[test]
    fn test_update_times_out_on_held_lock() {
        let dir = tempdir().unwrap();
        let config = BankConfig {
            lock_timeout: Duration::from_millis(50),
            ..BankConfig::default()
        };
        let holder = LockManager::new(dir.path().join(format!("{}.lock", config.index_file)));
        let _guard = holder
            .acquire(LockMode::Exclusive, Duration::from_secs(1))
            .unwrap();

        let bank = Bank::builder(dir.path()).config(config).build();
        let err = bank.update_index(None).err().unwrap();
        assert!(matches!(err, BankError::IndexLocked { .. }));
    }

    #[test]
    fn test_config_from_section() {
        let section = BankSection {
            lock_timeout_ms: 1500,
            fingerprint: FingerprintMode::ContentHash,
            ..BankSection::default()
        };
        let config = BankConfig::from(&section);
        assert_eq!(config.lock_timeout, Duration::from_millis(1500));
        assert_eq!(config.fingerprint, FingerprintMode::ContentHash);
        assert_eq!(config.index_file, ".wavebank.db");
        assert_eq!(config.retry_policy().attempts, 3);
    }

    #[test]
    fn test_concurrent_updates_match_sequential() {
        let dir = tempdir().unwrap();
        for i in 0..8 {
            let start = i * 1_000;
            write(
                dir.path(),
                &format!("d{}.wbk", i),
                series("NET.STA..CHZ", start, 50),
            );
        }

        let root = dir.path().to_path_buf();
        let workers: Vec<_> = (0..4)
            .map(|_| {
                let root = root.clone();
                thread::spawn(move || {
                    Bank::open(&root).update_index(None).map(|_| ())
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap().unwrap();
        }

        let concurrent = Bank::open(&root);
        let result = concurrent.get(&["NET"], 0, 10_000).unwrap();
        let entries = concurrent.read_index(None, None).unwrap();

        let sequential_dir = tempdir().unwrap();
        for i in 0..8 {
            std::fs::copy(
                root.join(format!("d{}.wbk", i)),
                sequential_dir.path().join(format!("d{}.wbk", i)),
            )
            .unwrap();
        }
        let sequential = Bank::open(sequential_dir.path());
        sequential.update_index(None).unwrap();
        sequential.update_index(None).unwrap();

        assert_eq!(result, sequential.get(&["NET"], 0, 10_000).unwrap());
        assert_eq!(entries.len(), 8);
        assert_eq!(result.len(), 8);
        assert!(result.iter().all(|s| s.identifier == chz()));
    }

    #[test]
    fn test_queries_during_update() {
        let dir = tempdir().unwrap();
        for i in 0..20 {
            write(
                dir.path(),
                &format!("d{:02}.wbk", i),
                series("NET.STA..CHZ", i * 1_000, 10),
            );
        }
        let root = dir.path().to_path_buf();
        Bank::open(&root).update_index(None).unwrap();

        let writer = {
            let root = root.clone();
            thread::spawn(move || {
                for i in 20..30 {
                    write(&root, &format!("d{:02}.wbk", i), series("NET.STA..CHZ", i * 1_000, 10));
                    Bank::open(&root).update_index(None).unwrap();
                }
            })
        };

        let bank = Bank::open(&root);
        for _ in 0..10 {
            let result = bank.get(&["NET"], 0, 100_000).unwrap();
            assert!(result.len() >= 20);
        }
        writer.join().unwrap();
        assert_eq!(bank.get(&["NET"], 0, 100_000).unwrap().len(), 30);
    }
}
