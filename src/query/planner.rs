//! Query planner - turns patterns and a time range into file reads
//!
//! Only the index is consulted here. Every planned read comes from an
//! index row that overlaps the requested range, so no file outside the
//! time-filtered result is ever opened.

use crate::index::IndexStore;
use crate::query::pattern::IdentifierPattern;
use crate::storage::error::{BankResult, BankWarning};
use crate::storage::types::{Identifier, ResolvedSlice, TimeSpan};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, warn};

/// Planned reads plus any non-fatal findings
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryPlan {
    /// Ordered by indexed start, then path, then identifier
    pub slices: Vec<ResolvedSlice>,
    pub warnings: Vec<BankWarning>,
}

impl QueryPlan {
    pub fn is_empty(&self) -> bool {
        self.slices.is_empty()
    }

    /// Distinct files the plan will open
    pub fn paths(&self) -> Vec<&str> {
        let mut paths: Vec<&str> = self.slices.iter().map(|s| s.path.as_str()).collect();
        paths.sort_unstable();
        paths.dedup();
        paths
    }
}

/// Parse every pattern up front, before any I/O
pub fn parse_patterns<P: AsRef<str>>(patterns: &[P]) -> BankResult<Vec<IdentifierPattern>> {
    patterns
        .iter()
        .map(|p| IdentifierPattern::parse(p.as_ref()).map_err(Into::into))
        .collect()
}

pub struct QueryPlanner<'a> {
    store: &'a IndexStore,
    root: &'a Path,
}

impl<'a> QueryPlanner<'a> {
    pub fn new(store: &'a IndexStore, root: &'a Path) -> Self {
        Self { store, root }
    }

    /// Resolve `patterns` over `span` into reads
    ///
    /// Entries matched by several patterns are planned once.
    pub fn plan(&self, patterns: &[IdentifierPattern], span: &TimeSpan) -> BankResult<QueryPlan> {
        let mut unique: BTreeMap<(i64, String, Identifier, i64), ResolvedSlice> = BTreeMap::new();

        for pattern in patterns {
            for entry in self.store.query(pattern, span)? {
                let indexed = entry.span();
                let Some(window) = indexed.intersection(span) else {
                    continue;
                };
                let key = (
                    entry.start,
                    entry.path.clone(),
                    entry.identifier.clone(),
                    entry.end,
                );
                unique.entry(key).or_insert_with(|| ResolvedSlice {
                    path: entry.path,
                    identifier: entry.identifier,
                    start: window.start,
                    end: window.end,
                    indexed,
                    format: entry.format,
                });
            }
        }

        let mut plan = QueryPlan {
            slices: unique.into_values().collect(),
            warnings: Vec::new(),
        };

        if plan.slices.is_empty() && self.store.entry_count()? == 0 {
            let warning = BankWarning::BankEmpty {
                root: self.root.to_path_buf(),
            };
            warn!("{}", warning);
            plan.warnings.push(warning);
        }

        debug!(
            patterns = patterns.len(),
            start = span.start,
            end = span.end,
            slices = plan.slices.len(),
            "Planned query"
        );
        Ok(plan)
    }
}
