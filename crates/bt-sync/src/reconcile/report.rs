//! Results of sync runs and consistency checks.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Per-record failures kept in a report; the count keeps going past this.
pub const MAX_LISTED_FAILURES: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
    Full,
    Incremental,
    Verify,
}

impl SyncMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::Incremental => "incremental",
            Self::Verify => "verify",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "full" => Some(Self::Full),
            "incremental" => Some(Self::Incremental),
            "verify" => Some(Self::Verify),
            _ => None,
        }
    }
}

impl std::fmt::Display for SyncMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncOptions {
    /// Lower bound for incremental runs; defaults to the last clean run.
    pub watermark: Option<DateTime<Utc>>,
    /// Plan only: no graph writes, queue changes or run records.
    pub dry_run: bool,
}

/// Counts for one entity type.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EntityTally {
    pub planned: u64,
    pub synced: u64,
    pub failed: u64,
}

/// A record that could not be synced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecordFailure {
    pub entity: &'static str,
    pub id: String,
    pub error: String,
}

/// Queue drain outcome.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DrainReport {
    pub examined: u64,
    pub resolved: u64,
    pub retrying: u64,
    pub abandoned: u64,
    pub cancelled: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyncReport {
    pub run_id: String,
    pub mode: SyncMode,
    pub dry_run: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Lower bound actually applied; `None` means everything was considered.
    pub watermark: Option<DateTime<Utc>>,
    pub items: EntityTally,
    pub events: EntityTally,
    /// Graph-only items removed (or, in a dry run, that would be).
    pub pruned: EntityTally,
    pub queue: DrainReport,
    /// Queue entries settled by a clean full run.
    pub queue_resolved: u64,
    pub failure_count: u64,
    pub failures: Vec<RecordFailure>,
    pub cancelled: bool,
    pub verification: Option<ConsistencyReport>,
}

impl SyncReport {
    pub(crate) fn new(run_id: String, mode: SyncMode, dry_run: bool, started_at: DateTime<Utc>) -> Self {
        Self {
            run_id,
            mode,
            dry_run,
            started_at,
            finished_at: started_at,
            watermark: None,
            items: EntityTally::default(),
            events: EntityTally::default(),
            pruned: EntityTally::default(),
            queue: DrainReport::default(),
            queue_resolved: 0,
            failure_count: 0,
            failures: Vec::new(),
            cancelled: false,
            verification: None,
        }
    }

    pub(crate) fn record_failure(&mut self, entity: &'static str, id: &str, error: impl ToString) {
        self.failure_count += 1;
        if self.failures.len() < MAX_LISTED_FAILURES {
            self.failures.push(RecordFailure {
                entity,
                id: id.to_string(),
                error: error.to_string(),
            });
        }
    }

    /// Nothing failed and the run went to the end.
    pub fn is_clean(&self) -> bool {
        self.failure_count == 0 && !self.cancelled
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CountComparison {
    pub primary: u64,
    pub graph: u64,
}

impl CountComparison {
    pub fn matches(&self) -> bool {
        self.primary == self.graph
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MismatchKind {
    MissingInGraph,
    /// Present in both stores with different field values.
    Stale,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Mismatch {
    pub entity: &'static str,
    pub id: String,
    pub kind: MismatchKind,
}

/// Count-and-sample comparison of the two stores.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConsistencyReport {
    pub checked_at: DateTime<Utc>,
    pub items: CountComparison,
    pub events: CountComparison,
    pub sampled_items: usize,
    pub sampled_events: usize,
    pub mismatches: Vec<Mismatch>,
    /// Items present in the graph but not in the primary store.
    pub orphans: Vec<String>,
    pub cancelled: bool,
}

impl ConsistencyReport {
    /// Every discrepancy found: differing counts, bad samples and orphans.
    pub fn mismatch_count(&self) -> usize {
        let counts = [self.items, self.events]
            .iter()
            .filter(|c| !c.matches())
            .count();
        counts + self.mismatches.len() + self.orphans.len()
    }

    pub fn is_consistent(&self) -> bool {
        self.mismatch_count() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_list_is_capped() {
        let mut report = SyncReport::new("r".into(), SyncMode::Full, false, Utc::now());
        for n in 0..(MAX_LISTED_FAILURES + 20) {
            report.record_failure("item", &format!("T{}", n), "boom");
        }
        assert_eq!(report.failure_count, (MAX_LISTED_FAILURES + 20) as u64);
        assert_eq!(report.failures.len(), MAX_LISTED_FAILURES);
        assert!(!report.is_clean());
    }

    #[test]
    fn test_mismatch_count_includes_counts_and_orphans() {
        let report = ConsistencyReport {
            checked_at: Utc::now(),
            items: CountComparison { primary: 3, graph: 4 },
            events: CountComparison { primary: 2, graph: 2 },
            sampled_items: 3,
            sampled_events: 2,
            mismatches: vec![Mismatch {
                entity: "item",
                id: "X1".into(),
                kind: MismatchKind::Stale,
            }],
            orphans: vec!["GHOST".into()],
            cancelled: false,
        };
        assert_eq!(report.mismatch_count(), 3);
        assert!(!report.is_consistent());
    }

    #[test]
    fn test_mode_parse() {
        assert_eq!(SyncMode::parse("Incremental"), Some(SyncMode::Incremental));
        assert_eq!(SyncMode::parse("partial"), None);
    }
}
