//! Progress reporting for index updates
//!
//! The indexer calls `set_total` once, after the changed files are known,
//! then `advance` once per file it reads.

/// Capability interface for progress reporting
pub trait Progress {
    /// Number of work units in this run; called exactly once
    fn set_total(&mut self, total: usize);

    /// `n` more units are done
    fn advance(&mut self, n: usize);

    fn finish(&mut self) {}
}

/// Discards all progress
#[derive(Debug, Default, Clone, Copy)]
pub struct NoProgress;

impl Progress for NoProgress {
    fn set_total(&mut self, _total: usize) {}

    fn advance(&mut self, _n: usize) {}
}

/// Reports progress through `tracing` in ten-percent steps
///
/// Small runs (fewer than `min_files` units) stay silent.
#[derive(Debug)]
pub struct LogProgress {
    min_files: usize,
    total: usize,
    done: usize,
    last_decile: usize,
}

impl LogProgress {
    pub fn new(min_files: usize) -> Self {
        Self {
            min_files,
            total: 0,
            done: 0,
            last_decile: 0,
        }
    }

    fn enabled(&self) -> bool {
        self.total > 0 && self.total >= self.min_files
    }

    pub fn done(&self) -> usize {
        self.done
    }
}

impl Progress for LogProgress {
    fn set_total(&mut self, total: usize) {
        self.total = total;
        if self.enabled() {
            tracing::info!(files = total, "Indexing changed files");
        }
    }

    fn advance(&mut self, n: usize) {
        self.done = (self.done + n).min(self.total);
        if !self.enabled() {
            return;
        }
        let decile = self.done * 10 / self.total;
        if decile > self.last_decile {
            self.last_decile = decile;
            tracing::info!(
                done = self.done,
                total = self.total,
                "Indexing {}% complete",
                decile * 10
            );
        }
    }

    fn finish(&mut self) {
        if self.enabled() {
            tracing::info!(files = self.done, "Indexing finished");
        }
    }
}
