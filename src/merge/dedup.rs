//! Primary-key deduplication across source segments.
//!
//! When several source segments carry a document with the same primary key,
//! only the most recent copy survives the merge. Recency is segment order
//! first (a later segment wins), then local doc id within a segment.

use std::sync::Arc;

use ahash::AHashSet;
use bit_vec::BitVec;
use log::debug;

use crate::error::Result;
use crate::segment::{DeletionProvider, DocId, PrimaryKeySource, SegmentMergeInfos};

/// Documents superseded by a newer copy of the same key, per segment index.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DuplicateSet {
    per_segment: Vec<BitVec>,
    count: u64,
}

impl DuplicateSet {
    /// An empty set sized for the given segments.
    pub fn new(infos: &SegmentMergeInfos) -> Self {
        DuplicateSet {
            per_segment: infos
                .iter()
                .map(|info| BitVec::from_elem(info.doc_count as usize, false))
                .collect(),
            count: 0,
        }
    }

    /// Mark a document superseded.
    pub fn insert(&mut self, segment_index: usize, doc_id: DocId) {
        if let Some(bits) = self.per_segment.get_mut(segment_index)
            && !bits.get(doc_id as usize).unwrap_or(true)
        {
            bits.set(doc_id as usize, true);
            self.count += 1;
        }
    }

    pub fn contains(&self, segment_index: usize, doc_id: DocId) -> bool {
        self.per_segment
            .get(segment_index)
            .and_then(|bits| bits.get(doc_id as usize))
            .unwrap_or(false)
    }

    pub fn len(&self) -> u64 {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }
}

/// Finds documents that must be reclaimed as duplicates.
pub trait DedupHandler: Send + Sync {
    fn find_duplicates(
        &self,
        infos: &SegmentMergeInfos,
        deletions: &dyn DeletionProvider,
    ) -> Result<DuplicateSet>;
}

/// Last-write-wins deduplication keyed by primary key.
pub struct PrimaryKeyDeduplicator {
    keys: Arc<dyn PrimaryKeySource>,
}

impl PrimaryKeyDeduplicator {
    pub fn new(keys: Arc<dyn PrimaryKeySource>) -> Self {
        PrimaryKeyDeduplicator { keys }
    }
}

impl DedupHandler for PrimaryKeyDeduplicator {
    fn find_duplicates(
        &self,
        infos: &SegmentMergeInfos,
        deletions: &dyn DeletionProvider,
    ) -> Result<DuplicateSet> {
        let mut duplicates = DuplicateSet::new(infos);
        let mut seen = AHashSet::new();

        // Newest first, so the first copy of a key seen is the winner.
        for (segment_index, info) in infos.iter().enumerate().rev() {
            let before = duplicates.len();
            for doc_id in (0..info.doc_count).rev() {
                if deletions.is_deleted(info.segment_id, doc_id) {
                    continue;
                }
                if let Some(key) = self.keys.primary_key(info.segment_id, doc_id)?
                    && !seen.insert(key)
                {
                    duplicates.insert(segment_index, doc_id);
                }
            }
            debug!(
                "segment {}: {} documents superseded by newer keys",
                info.segment_id,
                duplicates.len() - before
            );
        }

        Ok(duplicates)
    }
}
