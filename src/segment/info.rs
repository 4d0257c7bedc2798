//! Frozen per-segment metadata captured when a merge plan is built.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SegmergeError};
use crate::segment::{DocId, SegmentId};

/// Snapshot of one source segment, immutable for the lifetime of a merge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SegmentMergeInfo {
    /// Process-unique segment identifier.
    pub segment_id: SegmentId,

    /// First global document id owned by this segment.
    pub base_doc_id: u64,

    /// Number of local documents, deleted ones included.
    pub doc_count: u32,

    /// Number of documents marked deleted when the snapshot was taken.
    pub deleted_doc_count: u32,
}

impl SegmentMergeInfo {
    /// Create a new segment snapshot.
    pub fn new(segment_id: SegmentId, base_doc_id: u64, doc_count: u32, deleted_doc_count: u32) -> Self {
        SegmentMergeInfo {
            segment_id,
            base_doc_id,
            doc_count,
            deleted_doc_count,
        }
    }

    /// Documents expected to survive, before deduplication.
    pub fn valid_doc_count(&self) -> u32 {
        self.doc_count.saturating_sub(self.deleted_doc_count)
    }

    /// Get deletion ratio (0.0 to 1.0).
    pub fn deletion_ratio(&self) -> f64 {
        if self.doc_count == 0 {
            0.0
        } else {
            self.deleted_doc_count as f64 / self.doc_count as f64
        }
    }

    /// Global document id of a local document.
    pub fn global_doc_id(&self, local: DocId) -> u64 {
        self.base_doc_id + local as u64
    }

    fn end_doc_id(&self) -> u64 {
        self.base_doc_id + self.doc_count as u64
    }
}

/// The ordered source segments of one merge, oldest first.
///
/// The position of a segment in this list is its *segment index*, which is
/// how every other merge structure refers to it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SegmentMergeInfos(Vec<SegmentMergeInfo>);

impl SegmentMergeInfos {
    /// Wrap segment snapshots without validating them.
    pub fn new(infos: Vec<SegmentMergeInfo>) -> Self {
        SegmentMergeInfos(infos)
    }

    /// Build snapshots for consecutive segments, assigning base doc ids by
    /// stacking `(segment_id, doc_count, deleted_doc_count)` in order.
    pub fn stacked(segments: &[(SegmentId, u32, u32)]) -> Self {
        let mut base = 0u64;
        let infos = segments
            .iter()
            .map(|&(segment_id, doc_count, deleted)| {
                let info = SegmentMergeInfo::new(segment_id, base, doc_count, deleted);
                base += doc_count as u64;
                info
            })
            .collect();
        SegmentMergeInfos(infos)
    }

    /// Check the ordering invariants the reclaim map relies on.
    ///
    /// The list must be non-empty, segment ids unique, and the global doc id
    /// ranges `[base_doc_id, base_doc_id + doc_count)` increasing and
    /// non-overlapping.
    pub fn validate(&self) -> Result<()> {
        if self.0.is_empty() {
            return Err(SegmergeError::config("merge plan has no source segments"));
        }

        let mut seen = HashSet::with_capacity(self.0.len());
        for info in &self.0 {
            if !seen.insert(info.segment_id) {
                return Err(SegmergeError::config(format!(
                    "segment {} appears more than once",
                    info.segment_id
                )));
            }
            if info.deleted_doc_count > info.doc_count {
                return Err(SegmergeError::config(format!(
                    "segment {} has {} deleted docs but only {} docs",
                    info.segment_id, info.deleted_doc_count, info.doc_count
                )));
            }
        }

        for pair in self.0.windows(2) {
            let (prev, next) = (&pair[0], &pair[1]);
            // Equal bases are only possible when the earlier segment is empty.
            if next.base_doc_id < prev.base_doc_id || prev.end_doc_id() > next.base_doc_id {
                return Err(SegmergeError::config(format!(
                    "base doc id of segment {} ({}) overlaps or precedes segment {} ({}..{})",
                    next.segment_id,
                    next.base_doc_id,
                    prev.segment_id,
                    prev.base_doc_id,
                    prev.end_doc_id()
                )));
            }
        }

        Ok(())
    }

    /// Number of source segments.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether there are no source segments.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Snapshot at a segment index.
    pub fn get(&self, segment_index: usize) -> Option<&SegmentMergeInfo> {
        self.0.get(segment_index)
    }

    /// Iterate snapshots in merge order.
    pub fn iter(&self) -> std::slice::Iter<'_, SegmentMergeInfo> {
        self.0.iter()
    }

    /// Segment index of a segment id.
    pub fn index_of(&self, segment_id: SegmentId) -> Option<usize> {
        self.0.iter().position(|info| info.segment_id == segment_id)
    }

    /// Total documents across all segments, deleted ones included.
    pub fn total_doc_count(&self) -> u64 {
        self.0.iter().map(|info| info.doc_count as u64).sum()
    }

    /// Total documents marked deleted across all segments.
    pub fn total_deleted_doc_count(&self) -> u64 {
        self.0.iter().map(|info| info.deleted_doc_count as u64).sum()
    }

    /// Largest segment id in the list.
    pub fn max_segment_id(&self) -> Option<SegmentId> {
        self.0.iter().map(|info| info.segment_id).max()
    }
}

impl<'a> IntoIterator for &'a SegmentMergeInfos {
    type Item = &'a SegmentMergeInfo;
    type IntoIter = std::slice::Iter<'a, SegmentMergeInfo>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}
