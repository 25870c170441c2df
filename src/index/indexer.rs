//! Indexer - incremental scan of a bank's file tree
//!
//! ```text
//! started_at = now()                      (before any file is read)
//!        ↓
//! walk root  ──► listing (path, metadata)
//!        ↓
//! pass 1: fingerprint + diff against store ──► changed, removed
//!        ↓                                     progress.set_total(changed)
//! pass 2: reader.read_header(changed)      ──► FileRecords
//!        ↓                                     progress.advance(1) each
//! exclusive lock: re-check, apply batch + watermark in one transaction
//! ```
//!
//! Per-file failures become warnings and never abort the run. Files the
//! reader rejects are recorded with no entries so they are not re-read
//! until they change; files that fail to read are left out and retried on
//! the next run.

use crate::index::fingerprint;
use crate::index::lock::{LockManager, LockMode};
use crate::index::progress::Progress;
use crate::index::store::{FileRecord, IndexBatch, IndexStore};
use crate::storage::bank::BankConfig;
use crate::storage::error::{BankResult, BankWarning};
use crate::storage::reader::{FileReader, HeaderInfo, HeaderOutcome};
use crate::storage::types::{now_ns, Fingerprint, IndexEntry};
use std::collections::{HashMap, HashSet};
use std::fs::Metadata;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::{DirEntry, WalkDir};

/// Outcome of one `update_index` run
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpdateReport {
    /// Watermark candidate, taken before any file was read
    pub started_at: i64,
    pub files_seen: usize,
    pub files_changed: usize,
    /// Changed files that were recorded (valid or rejected)
    pub files_indexed: usize,
    pub files_removed: usize,
    pub entries_written: usize,
    pub warnings: Vec<BankWarning>,
    /// Whether anything was written to the store
    pub committed: bool,
}

/// A data file found on disk
struct ListedFile {
    rel: String,
    abs: PathBuf,
    metadata: Metadata,
}

/// A file whose fingerprint differs from the stored one
struct ChangedFile {
    rel: String,
    abs: PathBuf,
    fingerprint: Fingerprint,
    previous: Option<Fingerprint>,
}

/// A record read in pass 2, waiting for the re-check under the lock
struct PendingRecord {
    record: FileRecord,
    abs: PathBuf,
    /// Stored fingerprint the diff was taken against
    previous: Option<Fingerprint>,
}

/// One update run over a bank
pub struct Indexer<'a> {
    root: &'a Path,
    store: &'a IndexStore,
    locks: &'a LockManager,
    reader: &'a dyn FileReader,
    config: &'a BankConfig,
    rebuild: bool,
}

impl<'a> Indexer<'a> {
    pub fn new(
        root: &'a Path,
        store: &'a IndexStore,
        locks: &'a LockManager,
        reader: &'a dyn FileReader,
        config: &'a BankConfig,
    ) -> Self {
        Self {
            root,
            store,
            locks,
            reader,
            config,
            rebuild: false,
        }
    }

    /// Re-read every file and replace the whole index in one transaction
    pub fn rebuild(mut self) -> Self {
        self.rebuild = true;
        self
    }

    /// Bring the index in line with the file tree
    ///
    /// With `since`, files last modified before it are assumed unchanged;
    /// removals are still detected from the full listing. The exclusive
    /// lock is only held for the final re-check and commit.
    pub fn run(&self, since: Option<i64>, progress: &mut dyn Progress) -> BankResult<UpdateReport> {
        let mut report = UpdateReport {
            started_at: now_ns(),
            ..UpdateReport::default()
        };
        let since = since.filter(|_| !self.rebuild);

        let listing = self.list_files(&mut report.warnings);
        report.files_seen = listing.len();

        let stored = self.store.fingerprints()?;
        let removed = removed_paths(&listing, &stored);
        let diff_base = if self.rebuild { HashMap::new() } else { stored };
        let changed = self.diff(&listing, &diff_base, since, &mut report.warnings);
        report.files_changed = changed.len();

        progress.set_total(changed.len());
        let mut pending = Vec::with_capacity(changed.len());
        for file in changed {
            if let Some(record) = self.read_file(&file, &mut report.warnings) {
                pending.push(PendingRecord {
                    record,
                    abs: file.abs,
                    previous: file.previous,
                });
            }
            progress.advance(1);
        }
        progress.finish();

        let _guard = self
            .locks
            .acquire(LockMode::Exclusive, self.config.lock_timeout)?;

        let current = self.store.fingerprints()?;
        let watermark = self.store.watermark()?;

        let batch = if self.rebuild {
            let upserts: Vec<FileRecord> = pending.into_iter().map(|p| p.record).collect();
            let kept: HashSet<&str> = upserts.iter().map(|r| r.path.as_str()).collect();
            report.files_removed = current.keys().filter(|p| !kept.contains(p.as_str())).count();
            IndexBatch {
                upserts,
                deletes: Vec::new(),
                watermark: Some(report.started_at),
                clear_first: true,
            }
        } else {
            // Another writer may have committed since our diff was taken
            pending.retain(|p| self.should_commit(p, current.get(&p.record.path)));
            let deletes: Vec<String> = removed
                .into_iter()
                .filter(|path| current.contains_key(path))
                .collect();

            if pending.is_empty() && deletes.is_empty() && watermark.is_some() {
                debug!("Index already up to date");
                return Ok(report);
            }
            IndexBatch {
                upserts: pending.into_iter().map(|p| p.record).collect(),
                deletes,
                watermark: Some(watermark.map_or(report.started_at, |w| w.max(report.started_at))),
                clear_first: false,
            }
        };
        let stats = self.store.apply(&batch)?;

        report.files_indexed = stats.files_written;
        if !self.rebuild {
            report.files_removed = stats.files_deleted;
        }
        report.entries_written = stats.entries_written;
        report.committed = true;
        Ok(report)
    }

    /// Whether a pending record still belongs in the index
    ///
    /// `now` is the stored fingerprint as seen under the exclusive lock.
    fn should_commit(&self, pending: &PendingRecord, now: Option<&Fingerprint>) -> bool {
        let mode = self.config.fingerprint;
        let ours = &pending.record.fingerprint;
        if now.is_some_and(|fp| fingerprint::unchanged(fp, ours, mode)) {
            return false;
        }
        if now == pending.previous.as_ref() {
            return true;
        }
        // A different version was committed meanwhile; the file on disk decides
        let on_disk = std::fs::metadata(&pending.abs)
            .and_then(|metadata| fingerprint::fingerprint(&pending.abs, &metadata, mode));
        match on_disk {
            Ok(disk) => fingerprint::unchanged(ours, &disk, mode),
            Err(e) => {
                debug!(path = %pending.record.path, error = %e, "Dropping record of vanished file");
                false
            }
        }
    }

    /// Walk the root, skipping hidden entries and the index's own files
    fn list_files(&self, warnings: &mut Vec<BankWarning>) -> Vec<ListedFile> {
        let index_files: HashSet<String> = ["", "-wal", "-shm", "-journal", ".lock"]
            .iter()
            .map(|suffix| format!("{}{}", self.config.index_file, suffix))
            .collect();

        let walker = WalkDir::new(self.root)
            .follow_links(self.config.follow_links)
            .into_iter()
            .filter_entry(|e| e.depth() == 0 || !is_hidden(e));

        let mut files = Vec::new();
        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    let path = e
                        .path()
                        .map(|p| p.display().to_string())
                        .unwrap_or_else(|| self.root.display().to_string());
                    push_warning(
                        warnings,
                        BankWarning::UnreadableFile {
                            path,
                            reason: e.to_string(),
                        },
                    );
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }

            let Some(rel) = relative_path(self.root, entry.path()) else {
                push_warning(
                    warnings,
                    BankWarning::UnreadableFile {
                        path: entry.path().display().to_string(),
                        reason: "path is not valid UTF-8".into(),
                    },
                );
                continue;
            };
            if index_files.contains(&rel) || !self.extension_allowed(entry.path()) {
                continue;
            }

            match entry.metadata() {
                Ok(metadata) => files.push(ListedFile {
                    rel,
                    abs: entry.into_path(),
                    metadata,
                }),
                // vanished between listing and stat; treat as not present
                Err(e) => debug!(path = %rel, error = %e, "Skipping file that disappeared"),
            }
        }

        files.sort_by(|a, b| a.rel.cmp(&b.rel));
        files
    }

    fn extension_allowed(&self, path: &Path) -> bool {
        if self.config.extensions.is_empty() {
            return true;
        }
        let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
            return false;
        };
        self.config
            .extensions
            .iter()
            .any(|allowed| allowed.trim_start_matches('.').eq_ignore_ascii_case(ext))
    }

    /// Files in the listing whose fingerprint differs from `stored`
    fn diff(
        &self,
        listing: &[ListedFile],
        stored: &HashMap<String, Fingerprint>,
        since: Option<i64>,
        warnings: &mut Vec<BankWarning>,
    ) -> Vec<ChangedFile> {
        let mode = self.config.fingerprint;
        let mut changed = Vec::new();

        for file in listing {
            if let (Some(since), Ok(modified)) = (since, fingerprint::modified_ns(&file.metadata)) {
                if modified < since {
                    continue;
                }
            }

            let current = match fingerprint::fingerprint(&file.abs, &file.metadata, mode) {
                Ok(fp) => fp,
                Err(e) => {
                    push_warning(
                        warnings,
                        BankWarning::UnreadableFile {
                            path: file.rel.clone(),
                            reason: e.to_string(),
                        },
                    );
                    continue;
                }
            };

            let previous = stored.get(&file.rel);
            if previous.is_some_and(|p| fingerprint::unchanged(p, &current, mode)) {
                continue;
            }
            changed.push(ChangedFile {
                rel: file.rel.clone(),
                abs: file.abs.clone(),
                fingerprint: current,
                previous: previous.cloned(),
            });
        }

        changed
    }

    /// Read one changed file's header into a record
    fn read_file(&self, file: &ChangedFile, warnings: &mut Vec<BankWarning>) -> Option<FileRecord> {
        let infos = match self.reader.read_header(&file.abs) {
            Ok(HeaderOutcome::Valid(infos)) => infos,
            Ok(HeaderOutcome::Invalid(reason)) => {
                push_warning(
                    warnings,
                    BankWarning::InvalidFile {
                        path: file.rel.clone(),
                        reason,
                    },
                );
                Vec::new()
            }
            Err(e) => {
                push_warning(
                    warnings,
                    BankWarning::UnreadableFile {
                        path: file.rel.clone(),
                        reason: e.to_string(),
                    },
                );
                return None;
            }
        };

        if let Some(bad) = infos.iter().find(|i| !is_consistent(i)) {
            push_warning(
                warnings,
                BankWarning::InvalidFile {
                    path: file.rel.clone(),
                    reason: format!(
                        "header for {} has range [{}, {}] with interval {}",
                        bad.identifier, bad.start, bad.end, bad.sample_interval
                    ),
                },
            );
            return Some(FileRecord {
                path: file.rel.clone(),
                fingerprint: file.fingerprint.clone(),
                entries: Vec::new(),
            });
        }

        let entries = infos
            .into_iter()
            .map(|info| IndexEntry {
                identifier: info.identifier,
                start: info.start,
                end: info.end,
                sample_interval: info.sample_interval,
                path: file.rel.clone(),
                fingerprint: file.fingerprint.clone(),
                format: info.format,
            })
            .collect();

        Some(FileRecord {
            path: file.rel.clone(),
            fingerprint: file.fingerprint.clone(),
            entries,
        })
    }
}

/// Stored paths no longer present in the listing
fn removed_paths(listing: &[ListedFile], stored: &HashMap<String, Fingerprint>) -> Vec<String> {
    let present: HashSet<&str> = listing.iter().map(|f| f.rel.as_str()).collect();
    let mut removed: Vec<String> = stored
        .keys()
        .filter(|path| !present.contains(path.as_str()))
        .cloned()
        .collect();
    removed.sort();
    removed
}

fn is_consistent(info: &HeaderInfo) -> bool {
    info.start <= info.end && info.sample_interval > 0
}

fn push_warning(warnings: &mut Vec<BankWarning>, warning: BankWarning) {
    warn!("{}", warning);
    warnings.push(warning);
}

fn is_hidden(entry: &DirEntry) -> bool {
    entry
        .file_name()
        .to_str()
        .map(|name| name.starts_with('.'))
        .unwrap_or(false)
}

/// `/`-separated path of `path` below `root`
fn relative_path(root: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    let parts: Option<Vec<&str>> = rel.components().map(|c| c.as_os_str().to_str()).collect();
    Some(parts?.join("/"))
}
