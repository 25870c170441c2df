//! Index Store - SQLite-backed table of indexed files and their time ranges
//!
//! One row in `files` per data file (its fingerprint), zero or more rows in
//! `entries` per file (one per identifier and contiguous time range).
//! Keeping the fingerprint in `files` means a path can never carry two
//! fingerprints at once.
//!
//! ```text
//! bank_meta(key, value)                 index_version, watermark
//! files(path, modified_ns, size, hash)  one row per seen file
//! entries(net, sta, loc, cha, path,     one row per identifier range
//!         start, end, interval, format)
//! ```
//!
//! Every batch is applied in a single IMMEDIATE transaction, so readers see
//! either all of it or none of it. Time range scans hit the `start`/`end`
//! indexes; literal identifier segments are pushed into SQL, wildcard
//! segments are matched in Rust.

use crate::query::{IdentifierPattern, SegmentMatcher};
use crate::storage::error::{BankError, BankResult, BankWarning};
use crate::storage::retry::{retry, RetryError, RetryPolicy};
use crate::storage::types::{Fingerprint, Identifier, IndexEntry, TimeSpan};
use parking_lot::Mutex;
use rusqlite::types::Value;
use rusqlite::{
    params, params_from_iter, Connection, ErrorCode, OpenFlags, OptionalExtension,
    TransactionBehavior,
};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

/// Layout version written by this build
pub const INDEX_VERSION: u32 = 1;

/// Oldest layout this build can read; older stores are cleared
pub const MIN_INDEX_VERSION: u32 = 1;

const META_VERSION: &str = "index_version";
const META_WATERMARK: &str = "last_updated_ns";

/// Readers kept open between queries
const READER_POOL: usize = 4;

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS bank_meta (
        key TEXT PRIMARY KEY,
        value TEXT NOT NULL
    );
    CREATE TABLE IF NOT EXISTS files (
        path TEXT PRIMARY KEY,
        modified_ns INTEGER NOT NULL,
        size INTEGER NOT NULL,
        content_hash TEXT
    );
    CREATE TABLE IF NOT EXISTS entries (
        network TEXT NOT NULL,
        station TEXT NOT NULL,
        location TEXT NOT NULL,
        channel TEXT NOT NULL,
        path TEXT NOT NULL,
        start INTEGER NOT NULL,
        \"end\" INTEGER NOT NULL,
        sample_interval INTEGER NOT NULL,
        format TEXT NOT NULL,
        PRIMARY KEY (network, station, location, channel, path, start, \"end\"),
        CHECK (start <= \"end\")
    );
    CREATE INDEX IF NOT EXISTS idx_entries_start ON entries(start);
    CREATE INDEX IF NOT EXISTS idx_entries_end ON entries(\"end\");
    CREATE INDEX IF NOT EXISTS idx_entries_path ON entries(path);
";

/// Everything known about one file after reading its header
#[derive(Debug, Clone, PartialEq)]
pub struct FileRecord {
    pub path: String,
    pub fingerprint: Fingerprint,
    /// Empty for files the reader rejected
    pub entries: Vec<IndexEntry>,
}

/// One atomic change to the store
#[derive(Debug, Default, Clone)]
pub struct IndexBatch {
    pub upserts: Vec<FileRecord>,
    pub deletes: Vec<String>,
    /// New last-update watermark, written in the same transaction
    pub watermark: Option<i64>,
    /// Drop every file and entry before applying the rest
    pub clear_first: bool,
}

impl IndexBatch {
    pub fn is_empty(&self) -> bool {
        !self.clear_first
            && self.upserts.is_empty()
            && self.deletes.is_empty()
            && self.watermark.is_none()
    }
}

/// Rows written and removed by one batch
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BatchStats {
    pub files_written: usize,
    pub entries_written: usize,
    pub files_deleted: usize,
}

/// SQLite-backed index of one bank
pub struct IndexStore {
    path: PathBuf,
    writer: Mutex<Connection>,
    readers: Mutex<Vec<Connection>>,
    retry: RetryPolicy,
    open_warnings: Vec<BankWarning>,
}

impl IndexStore {
    /// Create or open the index at `path`
    ///
    /// A store written by an older layout is cleared and reported through
    /// [`IndexStore::open_warnings`].
    pub fn open(path: impl AsRef<Path>, retry: RetryPolicy) -> BankResult<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut conn = Self::connect(&path)?;
        let open_warnings = Self::init_schema(&mut conn)?;

        Ok(Self {
            path,
            writer: Mutex::new(conn),
            readers: Mutex::new(Vec::new()),
            retry,
            open_warnings,
        })
    }

    fn connect(path: &Path) -> BankResult<Connection> {
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(classify)?;

        conn.busy_timeout(Duration::from_secs(5)).map_err(classify)?;

        // Configure for concurrent readers and a single writer.
        // Switching a fresh file to WAL can race another process doing the same.
        retry(&RetryPolicy::default(), is_busy, || {
            conn.execute_batch(
                "
                PRAGMA journal_mode = WAL;
                PRAGMA synchronous = NORMAL;
                PRAGMA temp_store = MEMORY;
                ",
            )
        })
        .map_err(from_retry)?;

        Ok(conn)
    }

    fn init_schema(conn: &mut Connection) -> BankResult<Vec<BankWarning>> {
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(classify)?;

        let tables: Vec<String> = {
            let mut stmt = tx
                .prepare("SELECT name FROM sqlite_master WHERE type = 'table'")
                .map_err(classify)?;
            let rows = stmt.query_map([], |row| row.get(0)).map_err(classify)?;
            rows.collect::<Result<_, _>>().map_err(classify)?
        };
        let has = |name: &str| tables.iter().any(|t| t == name);

        if (has("files") || has("entries")) && !has("bank_meta") {
            return Err(BankError::StoreCorrupt(
                "index has data tables but no metadata table".into(),
            ));
        }

        tx.execute_batch(SCHEMA).map_err(classify)?;

        let mut warnings = Vec::new();
        match get_meta(&tx, META_VERSION)? {
            None => {
                set_meta(&tx, META_VERSION, &INDEX_VERSION.to_string())?;
            }
            Some(raw) => {
                let found: u32 = raw.parse().map_err(|_| {
                    BankError::StoreCorrupt(format!("unreadable index version '{}'", raw))
                })?;
                if found < MIN_INDEX_VERSION {
                    warn!(
                        found,
                        required = MIN_INDEX_VERSION,
                        "Index layout is outdated, clearing it for a rebuild"
                    );
                    clear_tables(&tx).map_err(classify)?;
                    set_meta(&tx, META_VERSION, &INDEX_VERSION.to_string())?;
                    warnings.push(BankWarning::IndexRebuilt {
                        found,
                        required: MIN_INDEX_VERSION,
                    });
                }
            }
        }

        tx.commit().map_err(classify)?;
        Ok(warnings)
    }

    /// Get the database file path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Warnings raised while opening (e.g. a cleared outdated index)
    pub fn open_warnings(&self) -> &[BankWarning] {
        &self.open_warnings
    }

    /// Run `op` on a pooled read connection, retrying while the database is busy
    fn read<T>(&self, mut op: impl FnMut(&Connection) -> rusqlite::Result<T>) -> BankResult<T> {
        let conn = match self.readers.lock().pop() {
            Some(conn) => conn,
            None => Self::connect(&self.path)?,
        };

        let result = retry(&self.retry, is_busy, || op(&conn));

        let mut pool = self.readers.lock();
        if pool.len() < READER_POOL {
            pool.push(conn);
        }
        drop(pool);

        result.map_err(from_retry)
    }

    /// Apply a batch in one transaction
    pub fn apply(&self, batch: &IndexBatch) -> BankResult<BatchStats> {
        if batch.is_empty() {
            return Ok(BatchStats::default());
        }

        let mut conn = self.writer.lock();
        let stats = retry(&self.retry, is_busy, || write_batch(&mut conn, batch))
            .map_err(from_retry)?;

        debug!(
            files = stats.files_written,
            entries = stats.entries_written,
            deleted = stats.files_deleted,
            "Committed index batch"
        );
        Ok(stats)
    }

    /// Insert or replace the rows of the given files
    pub fn upsert(&self, records: &[FileRecord]) -> BankResult<BatchStats> {
        self.apply(&IndexBatch {
            upserts: records.to_vec(),
            ..IndexBatch::default()
        })
    }

    /// Remove files and all their entries
    pub fn delete(&self, paths: &[String]) -> BankResult<BatchStats> {
        self.apply(&IndexBatch {
            deletes: paths.to_vec(),
            ..IndexBatch::default()
        })
    }

    /// Entries overlapping `span` whose identifier matches `pattern`
    ///
    /// Ordered by start, then path, then identifier.
    pub fn query(&self, pattern: &IdentifierPattern, span: &TimeSpan) -> BankResult<Vec<IndexEntry>> {
        let columns = ["e.network", "e.station", "e.location", "e.channel"];

        let mut sql = String::from(
            "SELECT e.network, e.station, e.location, e.channel, e.path, e.start, e.\"end\",
                    e.sample_interval, e.format, f.modified_ns, f.size, f.content_hash
             FROM entries e JOIN files f ON f.path = e.path
             WHERE e.start <= ? AND e.\"end\" >= ?",
        );
        let mut args: Vec<Value> = vec![Value::Integer(span.end), Value::Integer(span.start)];

        for (column, matcher) in columns.iter().zip(pattern.segments()) {
            if let Some(code) = matcher.exact() {
                sql.push_str(&format!(" AND {} = ?", column));
                args.push(Value::Text(code.to_string()));
            }
        }
        sql.push_str(
            " ORDER BY e.start, e.path, e.network, e.station, e.location, e.channel, e.\"end\"",
        );

        let has_globs = pattern
            .segments()
            .iter()
            .any(|m| matches!(m, SegmentMatcher::Glob { .. }));

        let entries = self.read(|conn| {
            let mut stmt = conn.prepare_cached(&sql)?;
            let rows = stmt.query_map(params_from_iter(args.iter()), row_to_entry)?;
            rows.collect::<Result<Vec<_>, _>>()
        })?;

        if has_globs {
            Ok(entries
                .into_iter()
                .filter(|e| pattern.matches(&e.identifier))
                .collect())
        } else {
            Ok(entries)
        }
    }

    /// Every entry in the store, in query order
    pub fn all_entries(&self) -> BankResult<Vec<IndexEntry>> {
        self.query(&IdentifierPattern::any(), &TimeSpan::everything())
    }

    /// Stored fingerprint for one path
    pub fn fingerprint_of(&self, path: &str) -> BankResult<Option<Fingerprint>> {
        self.read(|conn| {
            conn.query_row(
                "SELECT modified_ns, size, content_hash FROM files WHERE path = ?",
                params![path],
                |row| {
                    Ok(Fingerprint {
                        modified_ns: row.get(0)?,
                        size: row.get::<_, i64>(1)? as u64,
                        content_hash: row.get(2)?,
                    })
                },
            )
            .optional()
        })
    }

    /// All stored fingerprints keyed by path
    pub fn fingerprints(&self) -> BankResult<HashMap<String, Fingerprint>> {
        self.read(|conn| {
            let mut stmt =
                conn.prepare_cached("SELECT path, modified_ns, size, content_hash FROM files")?;
            let rows = stmt.query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    Fingerprint {
                        modified_ns: row.get(1)?,
                        size: row.get::<_, i64>(2)? as u64,
                        content_hash: row.get(3)?,
                    },
                ))
            })?;
            rows.collect()
        })
    }

    /// Number of entries in the store
    pub fn entry_count(&self) -> BankResult<u64> {
        self.read(|conn| conn.query_row("SELECT COUNT(*) FROM entries", [], |row| row.get::<_, i64>(0)))
            .map(|n| n as u64)
    }

    /// Number of files recorded, including rejected ones
    pub fn file_count(&self) -> BankResult<u64> {
        self.read(|conn| conn.query_row("SELECT COUNT(*) FROM files", [], |row| row.get::<_, i64>(0)))
            .map(|n| n as u64)
    }

    /// Earliest start and latest end over all entries
    pub fn time_bounds(&self) -> BankResult<Option<TimeSpan>> {
        let bounds = self.read(|conn| {
            conn.query_row("SELECT MIN(start), MAX(\"end\") FROM entries", [], |row| {
                Ok((row.get::<_, Option<i64>>(0)?, row.get::<_, Option<i64>>(1)?))
            })
        })?;
        Ok(match bounds {
            (Some(start), Some(end)) => TimeSpan::try_new(start, end),
            _ => None,
        })
    }

    /// Last committed update watermark, in nanoseconds
    pub fn watermark(&self) -> BankResult<Option<i64>> {
        let raw = self.read(|conn| {
            conn.query_row(
                "SELECT value FROM bank_meta WHERE key = ?",
                params![META_WATERMARK],
                |row| row.get::<_, String>(0),
            )
            .optional()
        })?;
        raw.map(|v| {
            v.parse::<i64>()
                .map_err(|_| BankError::StoreCorrupt(format!("unreadable watermark '{}'", v)))
        })
        .transpose()
    }

}

fn write_batch(conn: &mut Connection, batch: &IndexBatch) -> rusqlite::Result<BatchStats> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    let mut stats = BatchStats::default();

    if batch.clear_first {
        clear_tables(&tx)?;
    }

    {
        let mut delete_entries = tx.prepare_cached("DELETE FROM entries WHERE path = ?")?;
        let mut delete_file = tx.prepare_cached("DELETE FROM files WHERE path = ?")?;
        for path in &batch.deletes {
            delete_entries.execute(params![path])?;
            stats.files_deleted += delete_file.execute(params![path])?;
        }

        let mut upsert_file = tx.prepare_cached(
            "INSERT INTO files (path, modified_ns, size, content_hash) VALUES (?, ?, ?, ?)
             ON CONFLICT(path) DO UPDATE SET
                modified_ns = excluded.modified_ns,
                size = excluded.size,
                content_hash = excluded.content_hash",
        )?;
        let mut insert_entry = tx.prepare_cached(
            "INSERT OR REPLACE INTO entries
                (network, station, location, channel, path, start, \"end\", sample_interval, format)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )?;

        for record in &batch.upserts {
            let fp = &record.fingerprint;
            upsert_file.execute(params![
                record.path,
                fp.modified_ns,
                fp.size as i64,
                fp.content_hash
            ])?;
            delete_entries.execute(params![record.path])?;

            for entry in &record.entries {
                let id = &entry.identifier;
                insert_entry.execute(params![
                    id.network,
                    id.station,
                    id.location,
                    id.channel,
                    record.path,
                    entry.start,
                    entry.end,
                    entry.sample_interval,
                    entry.format
                ])?;
                stats.entries_written += 1;
            }
            stats.files_written += 1;
        }
    }

    if let Some(watermark) = batch.watermark {
        tx.execute(
            "INSERT INTO bank_meta (key, value) VALUES (?, ?)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![META_WATERMARK, watermark.to_string()],
        )?;
    }

    tx.commit()?;
    Ok(stats)
}

fn row_to_entry(row: &rusqlite::Row<'_>) -> rusqlite::Result<IndexEntry> {
    Ok(IndexEntry {
        identifier: Identifier::new(
            row.get::<_, String>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, String>(2)?,
            row.get::<_, String>(3)?,
        ),
        path: row.get(4)?,
        start: row.get(5)?,
        end: row.get(6)?,
        sample_interval: row.get(7)?,
        format: row.get(8)?,
        fingerprint: Fingerprint {
            modified_ns: row.get(9)?,
            size: row.get::<_, i64>(10)? as u64,
            content_hash: row.get(11)?,
        },
    })
}

fn get_meta(conn: &Connection, key: &str) -> BankResult<Option<String>> {
    conn.query_row(
        "SELECT value FROM bank_meta WHERE key = ?",
        params![key],
        |row| row.get(0),
    )
    .optional()
    .map_err(classify)
}

fn set_meta(conn: &Connection, key: &str, value: &str) -> BankResult<()> {
    conn.execute(
        "INSERT INTO bank_meta (key, value) VALUES (?, ?)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        params![key, value],
    )
    .map_err(classify)?;
    Ok(())
}

fn clear_tables(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch("DELETE FROM entries; DELETE FROM files;")?;
    conn.execute("DELETE FROM bank_meta WHERE key = ?", params![META_WATERMARK])?;
    Ok(())
}

fn is_busy(err: &rusqlite::Error) -> bool {
    matches!(
        err.sqlite_error_code(),
        Some(ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked)
    )
}

/// Map SQLite failures onto the bank's error taxonomy
fn classify(err: rusqlite::Error) -> BankError {
    match err.sqlite_error_code() {
        Some(ErrorCode::NotADatabase | ErrorCode::DatabaseCorrupt) => {
            BankError::StoreCorrupt(err.to_string())
        }
        _ => BankError::Store(err.to_string()),
    }
}

fn from_retry(err: RetryError<rusqlite::Error>) -> BankError {
    match err {
        RetryError::Fatal(e) => classify(e),
        RetryError::Exhausted { last, attempts } => {
            BankError::Store(format!("database busy after {} attempts: {}", attempts, last))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn open(dir: &Path) -> IndexStore {
        IndexStore::open(dir.join(".wavebank.db"), RetryPolicy::default()).unwrap()
    }

    fn fp(modified_ns: i64) -> Fingerprint {
        Fingerprint {
            modified_ns,
            size: 100,
            content_hash: None,
        }
    }

    fn record(path: &str, modified_ns: i64, ranges: &[(&str, i64, i64)]) -> FileRecord {
        FileRecord {
            path: path.to_string(),
            fingerprint: fp(modified_ns),
            entries: ranges
                .iter()
                .map(|(code, start, end)| IndexEntry {
                    identifier: Identifier::parse(code).unwrap(),
                    start: *start,
                    end: *end,
                    sample_interval: 10,
                    path: path.to_string(),
                    fingerprint: fp(modified_ns),
                    format: "wbk".to_string(),
                })
                .collect(),
        }
    }

    fn pattern(raw: &str) -> IdentifierPattern {
        IdentifierPattern::parse(raw).unwrap()
    }

    #[test]
    fn test_store_creation() {
        let dir = tempdir().unwrap();
        let store = open(dir.path());
        assert_eq!(store.entry_count().unwrap(), 0);
        assert_eq!(store.watermark().unwrap(), None);
        assert!(store.open_warnings().is_empty());
    }

    #[test]
    fn test_upsert_and_query() {
        let dir = tempdir().unwrap();
        let store = open(dir.path());

        store
            .upsert(&[
                record("b.wbk", 1, &[("UU.SRU..HHZ", 100, 190)]),
                record("a.wbk", 1, &[("UU.SRU..HHZ", 0, 90), ("UU.SRU..HHN", 0, 90)]),
                record("c.wbk", 1, &[("UU.SRU..HHZ", 500, 590)]),
            ])
            .unwrap();
        assert_eq!(store.entry_count().unwrap(), 4);

        let hits = store.query(&pattern("UU.SRU..HHZ"), &TimeSpan::new(50, 150)).unwrap();
        let paths: Vec<&str> = hits.iter().map(|e| e.path.as_str()).collect();
        assert_eq!(paths, vec!["a.wbk", "b.wbk"]);

        let hits = store.query(&pattern("UU.*.*.HH?"), &TimeSpan::new(0, 0)).unwrap();
        let codes: Vec<String> = hits.iter().map(|e| e.identifier.to_string()).collect();
        assert_eq!(codes, vec!["UU.SRU..HHN", "UU.SRU..HHZ"]);
    }

    #[test]
    fn test_query_is_inclusive_and_case_sensitive() {
        let dir = tempdir().unwrap();
        let store = open(dir.path());
        store.upsert(&[record("a.wbk", 1, &[("UU.SRU..HHZ", 100, 200)])]).unwrap();

        assert_eq!(store.query(&pattern("UU"), &TimeSpan::new(200, 300)).unwrap().len(), 1);
        assert_eq!(store.query(&pattern("UU"), &TimeSpan::new(0, 100)).unwrap().len(), 1);
        assert!(store.query(&pattern("UU"), &TimeSpan::new(201, 300)).unwrap().is_empty());
        assert!(store.query(&pattern("uu"), &TimeSpan::everything()).unwrap().is_empty());
    }

    #[test]
    fn test_time_filter_property() {
        let dir = tempdir().unwrap();
        let store = open(dir.path());

        let ranges: Vec<(i64, i64)> = (0..40).map(|i| (i * 37 % 500, i * 37 % 500 + i * 3)).collect();
        let records: Vec<FileRecord> = ranges
            .iter()
            .enumerate()
            .map(|(i, (s, e))| record(&format!("f{:02}.wbk", i), 1, &[("UU.SRU..HHZ", *s, *e)]))
            .collect();
        store.upsert(&records).unwrap();

        for (qs, qe) in [(0, 10), (100, 250), (499, 499), (600, 700), (-50, 1000)] {
            let span = TimeSpan::new(qs, qe);
            let got: Vec<String> = {
                let mut v: Vec<String> = store
                    .query(&IdentifierPattern::any(), &span)
                    .unwrap()
                    .into_iter()
                    .map(|e| e.path)
                    .collect();
                v.sort();
                v
            };
            let expected: Vec<String> = ranges
                .iter()
                .enumerate()
                .filter(|(_, (s, e))| *s <= qe && *e >= qs)
                .map(|(i, _)| format!("f{:02}.wbk", i))
                .collect();
            assert_eq!(got, expected, "query [{}, {}]", qs, qe);
        }
    }

    #[test]
    fn test_upsert_replaces_stale_rows() {
        let dir = tempdir().unwrap();
        let store = open(dir.path());

        store.upsert(&[record("a.wbk", 1, &[("UU.SRU..HHZ", 0, 90)])]).unwrap();
        store.upsert(&[record("a.wbk", 2, &[("UU.SRU..HHZ", 0, 190)])]).unwrap();

        let all = store.all_entries().unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].end, 190);
        assert_eq!(all[0].fingerprint.modified_ns, 2);
        assert_eq!(store.fingerprint_of("a.wbk").unwrap(), Some(fp(2)));
    }

    #[test]
    fn test_delete_and_rejected_files() {
        let dir = tempdir().unwrap();
        let store = open(dir.path());

        store
            .upsert(&[
                record("a.wbk", 1, &[("UU.SRU..HHZ", 0, 90)]),
                record("notes.txt", 1, &[]),
            ])
            .unwrap();
        assert_eq!(store.file_count().unwrap(), 2);
        assert_eq!(store.entry_count().unwrap(), 1);

        let stats = store.delete(&["a.wbk".to_string()]).unwrap();
        assert_eq!(stats.files_deleted, 1);
        assert_eq!(store.entry_count().unwrap(), 0);
        assert!(store.fingerprint_of("a.wbk").unwrap().is_none());
        assert_eq!(store.fingerprints().unwrap().len(), 1);
    }

    #[test]
    fn test_watermark_and_bounds_persist() {
        let dir = tempdir().unwrap();
        {
            let store = open(dir.path());
            store
                .apply(&IndexBatch {
                    upserts: vec![record("a.wbk", 1, &[("UU.SRU..HHZ", 10, 90), ("UU.SRU..HHN", 5, 40)])],
                    watermark: Some(12345),
                    ..IndexBatch::default()
                })
                .unwrap();
        }

        let store = open(dir.path());
        assert_eq!(store.watermark().unwrap(), Some(12345));
        assert_eq!(store.time_bounds().unwrap(), Some(TimeSpan::new(5, 90)));
    }

    #[test]
    fn test_outdated_version_is_cleared() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(".wavebank.db");
        {
            let store = open(dir.path());
            store.upsert(&[record("a.wbk", 1, &[("UU.SRU..HHZ", 0, 90)])]).unwrap();
        }
        {
            let conn = Connection::open(&path).unwrap();
            conn.execute(
                "UPDATE bank_meta SET value = '0' WHERE key = 'index_version'",
                [],
            )
            .unwrap();
        }

        let store = open(dir.path());
        assert_eq!(
            store.open_warnings(),
            &[BankWarning::IndexRebuilt {
                found: 0,
                required: MIN_INDEX_VERSION
            }]
        );
        assert_eq!(store.entry_count().unwrap(), 0);
    }

    #[test]
    fn test_garbage_file_is_store_corrupt() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(".wavebank.db");
        std::fs::write(&path, vec![0x5Au8; 8192]).unwrap();

        match IndexStore::open(&path, RetryPolicy::default()) {
            Err(BankError::StoreCorrupt(_)) => {}
            Err(other) => panic!("unexpected error: {}", other),
            Ok(_) => panic!("garbage index should not open"),
        }
    }

    #[test]
    fn test_clear_first_replaces_index_in_one_batch() {
        let dir = tempdir().unwrap();
        let store = open(dir.path());
        store
            .upsert(&[
                record("a.wbk", 1, &[("UU.SRU..HHZ", 0, 90)]),
                record("gone.wbk", 1, &[("UU.SRU..HHN", 0, 90)]),
            ])
            .unwrap();

        let stats = store
            .apply(&IndexBatch {
                upserts: vec![record("a.wbk", 2, &[("UU.SRU..HHZ", 0, 490)])],
                watermark: Some(7),
                clear_first: true,
                ..IndexBatch::default()
            })
            .unwrap();
        assert_eq!(stats.files_written, 1);

        let entries = store.all_entries().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!((entries[0].path.as_str(), entries[0].end), ("a.wbk", 490));
        assert!(store.fingerprint_of("gone.wbk").unwrap().is_none());
        assert_eq!(store.watermark().unwrap(), Some(7));
    }
}
