//! Counters shared by every task of a merge plan.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Live counters, updated concurrently by reducers.
#[derive(Debug, Default)]
pub struct MergeMetrics {
    docs_processed: AtomicU64,
    docs_deleted: AtomicU64,
    docs_duplicated: AtomicU64,
    terms_merged: AtomicU64,
    postings_merged: AtomicU64,
    terms_truncated: AtomicU64,
    truncate_failures: AtomicU64,
    task_errors: AtomicU64,
}

macro_rules! counter {
    ($add:ident, $field:ident) => {
        pub fn $add(&self, n: u64) {
            self.$field.fetch_add(n, Ordering::Relaxed);
        }
    };
}

impl MergeMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    counter!(add_docs_processed, docs_processed);
    counter!(add_docs_deleted, docs_deleted);
    counter!(add_docs_duplicated, docs_duplicated);
    counter!(add_terms_merged, terms_merged);
    counter!(add_postings_merged, postings_merged);
    counter!(add_terms_truncated, terms_truncated);
    counter!(add_truncate_failures, truncate_failures);
    counter!(add_task_errors, task_errors);

    /// Take a consistent-enough copy of all counters.
    pub fn snapshot(&self) -> MergeStats {
        MergeStats {
            docs_processed: self.docs_processed.load(Ordering::Relaxed),
            docs_deleted: self.docs_deleted.load(Ordering::Relaxed),
            docs_duplicated: self.docs_duplicated.load(Ordering::Relaxed),
            terms_merged: self.terms_merged.load(Ordering::Relaxed),
            postings_merged: self.postings_merged.load(Ordering::Relaxed),
            terms_truncated: self.terms_truncated.load(Ordering::Relaxed),
            truncate_failures: self.truncate_failures.load(Ordering::Relaxed),
            task_errors: self.task_errors.load(Ordering::Relaxed),
            merge_time_ms: 0,
        }
    }
}

/// Statistics about a merge operation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MergeStats {
    /// Documents written by attribute or document reducers.
    pub docs_processed: u64,

    /// Documents dropped because they were deleted.
    pub docs_deleted: u64,

    /// Documents dropped because a newer copy of their key exists.
    pub docs_duplicated: u64,

    /// Terms written to merged inverted indexes.
    pub terms_merged: u64,

    /// Postings written to merged inverted indexes.
    pub postings_merged: u64,

    /// Terms whose posting list was actually cut by a truncate profile.
    pub terms_truncated: u64,

    /// Truncate profiles whose output was dropped.
    pub truncate_failures: u64,

    /// Tasks that failed.
    pub task_errors: u64,

    /// Time taken for merge (in milliseconds).
    pub merge_time_ms: u64,
}

impl MergeStats {
    /// Fraction of source documents that were reclaimed.
    pub fn reclaim_ratio(&self, total_source_docs: u64) -> f64 {
        if total_source_docs == 0 {
            0.0
        } else {
            (self.docs_deleted + self.docs_duplicated) as f64 / total_source_docs as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot() {
        let metrics = MergeMetrics::new();
        metrics.add_docs_processed(5);
        metrics.add_docs_processed(2);
        metrics.add_truncate_failures(1);

        let stats = metrics.snapshot();
        assert_eq!(stats.docs_processed, 7);
        assert_eq!(stats.truncate_failures, 1);
        assert_eq!(stats.terms_merged, 0);
    }

    #[test]
    fn test_reclaim_ratio() {
        let stats = MergeStats {
            docs_deleted: 2,
            docs_duplicated: 3,
            ..Default::default()
        };
        assert_eq!(stats.reclaim_ratio(10), 0.5);
        assert_eq!(stats.reclaim_ratio(0), 0.0);
    }
}
