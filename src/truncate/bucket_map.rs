//! Per-document rank tables used to pick truncation survivors.
//!
//! One [`BucketMap`] covers one target segment and one [`SortKey`]. Slots
//! are indexed by new doc id; after [`BucketMap::finalize`] every slot holds
//! a rank in `[0, len)` where a higher rank is a better document.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::Arc;

use log::debug;
use rayon::prelude::*;

use crate::error::{Result, SegmergeError};
use crate::merge::doc_heap::DocumentMergeInfoHeap;
use crate::merge::reclaim_map::ReclaimMap;
use crate::segment::{AttributeValue, AttributeValueReader, DocId, SegmentMergeInfos};
use crate::truncate::config::{SortKey, SortOrder};

/// Rank table of one target segment.
#[derive(Debug, Clone)]
pub struct BucketMap {
    order: SortOrder,
    values: Vec<Option<AttributeValue>>,
    ranks: Vec<u32>,
}

impl BucketMap {
    /// Allocate one slot per surviving document.
    pub fn init(total_doc_count: u32, order: SortOrder) -> Self {
        BucketMap {
            order,
            values: vec![None; total_doc_count as usize],
            ranks: Vec::new(),
        }
    }

    /// Record the sort value of a document.
    pub fn set_sort_value(&mut self, new_doc_id: DocId, value: Option<AttributeValue>) -> Result<()> {
        if !self.ranks.is_empty() {
            return Err(SegmergeError::invalid_operation(
                "bucket map is already finalized",
            ));
        }
        let len = self.values.len();
        let slot = self.values.get_mut(new_doc_id as usize).ok_or_else(|| {
            SegmergeError::invalid_operation(format!(
                "doc {new_doc_id} out of range for bucket map of {len} docs"
            ))
        })?;
        *slot = value;
        Ok(())
    }

    /// Compare two documents; `Greater` means `a` ranks above `b`.
    fn compare(&self, a: DocId, b: DocId) -> Ordering {
        let by_value = match (&self.values[a as usize], &self.values[b as usize]) {
            (Some(va), Some(vb)) => match self.order {
                SortOrder::Descending => va.total_cmp(vb),
                SortOrder::Ascending => vb.total_cmp(va),
            },
            (Some(_), None) => Ordering::Greater,
            (None, Some(_)) => Ordering::Less,
            (None, None) => Ordering::Equal,
        };
        // Ties: the smaller doc id ranks higher.
        by_value.then_with(|| b.cmp(&a))
    }

    /// Turn sort values into ranks. Values are dropped afterwards.
    pub fn finalize(&mut self) {
        let n = self.values.len();
        let mut docs: Vec<DocId> = (0..n as DocId).collect();
        docs.par_sort_unstable_by(|&a, &b| self.compare(a, b));

        let mut ranks = vec![0u32; n];
        for (rank, doc) in docs.into_iter().enumerate() {
            ranks[doc as usize] = rank as u32;
        }
        self.ranks = ranks;
        self.values = Vec::new();
    }

    pub fn is_finalized(&self) -> bool {
        self.ranks.len() == self.len()
    }

    /// Rank of a document, higher is better.
    pub fn rank(&self, new_doc_id: DocId) -> Option<u32> {
        self.ranks.get(new_doc_id as usize).copied()
    }

    pub fn len(&self) -> usize {
        self.ranks.len().max(self.values.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn sort_order(&self) -> SortOrder {
        self.order
    }

    /// Build the bucket maps of every target segment for one sort key.
    pub fn build(
        reclaim_map: &ReclaimMap,
        infos: &SegmentMergeInfos,
        reader: &dyn AttributeValueReader,
        key: &SortKey,
    ) -> Result<Vec<BucketMap>> {
        let mut maps: Vec<BucketMap> = reclaim_map
            .target_doc_counts()
            .into_iter()
            .map(|count| BucketMap::init(count, key.order))
            .collect();

        for doc in DocumentMergeInfoHeap::new(reclaim_map) {
            let info = infos.get(doc.segment_index).ok_or_else(|| {
                SegmergeError::invalid_operation(format!(
                    "segment index {} missing from plan",
                    doc.segment_index
                ))
            })?;
            let value = reader.read(&key.field, info.segment_id, doc.old_doc_id)?;
            maps[doc.target_segment_index].set_sort_value(doc.new_doc_id, value)?;
        }

        for map in &mut maps {
            map.finalize();
        }
        debug!(
            "bucket maps for {}:{:?} built over {} targets",
            key.field,
            key.order,
            maps.len()
        );
        Ok(maps)
    }
}

/// Bucket maps shared by all truncate writers of a plan, per sort key.
pub type BucketMaps = BTreeMap<SortKey, Arc<Vec<BucketMap>>>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::segment::{MemorySegment, MemorySegmentSet, NoDeletions};

    fn ranked(values: Vec<Option<AttributeValue>>, order: SortOrder) -> BucketMap {
        let mut map = BucketMap::init(values.len() as u32, order);
        for (doc, value) in values.into_iter().enumerate() {
            map.set_sort_value(doc as DocId, value).unwrap();
        }
        map.finalize();
        map
    }

    #[test]
    fn test_descending_ranks() {
        let map = ranked(
            vec![
                Some(AttributeValue::Int(5)),
                Some(AttributeValue::Int(9)),
                None,
                Some(AttributeValue::Int(1)),
            ],
            SortOrder::Descending,
        );
        assert!(map.is_finalized());
        assert_eq!(map.rank(1), Some(3));
        assert_eq!(map.rank(0), Some(2));
        assert_eq!(map.rank(3), Some(1));
        assert_eq!(map.rank(2), Some(0));
        assert_eq!(map.rank(4), None);
    }

    #[test]
    fn test_ascending_ranks_and_missing_lowest() {
        let map = ranked(
            vec![None, Some(AttributeValue::Int(5)), Some(AttributeValue::Int(1))],
            SortOrder::Ascending,
        );
        assert_eq!(map.rank(2), Some(2));
        assert_eq!(map.rank(1), Some(1));
        assert_eq!(map.rank(0), Some(0));
    }

    #[test]
    fn test_ties_prefer_smaller_doc_id() {
        let map = ranked(vec![Some(AttributeValue::Int(7)); 3], SortOrder::Descending);
        assert_eq!(map.rank(0), Some(2));
        assert_eq!(map.rank(1), Some(1));
        assert_eq!(map.rank(2), Some(0));
    }

    #[test]
    fn test_rejects_late_writes() {
        let mut map = ranked(vec![None], SortOrder::Descending);
        assert!(map.set_sort_value(0, None).is_err());
        let mut map = BucketMap::init(1, SortOrder::Descending);
        let err = map.set_sort_value(1, None).unwrap_err();
        assert!(matches!(err, SegmergeError::InvalidOperation(_)));
        assert!(err.to_string().contains("of 1 docs"));
        assert!(map.set_sort_value(0, Some(AttributeValue::Int(3))).is_ok());
    }

    #[test]
    fn test_build_from_reclaim_map() {
        let mut seg0 = MemorySegment::new(0, 2);
        seg0.set_attribute("price", 0, AttributeValue::Int(3)).unwrap();
        seg0.set_attribute("price", 1, AttributeValue::Int(8)).unwrap();
        let mut seg1 = MemorySegment::new(1, 1);
        seg1.set_attribute("price", 0, AttributeValue::Int(5)).unwrap();
        let mut set = MemorySegmentSet::new();
        set.push(seg0).unwrap();
        set.push(seg1).unwrap();
        let infos = set.merge_infos();

        let reclaim = ReclaimMap::build(&infos, &NoDeletions, None, None).unwrap();
        let key = SortKey {
            field: "price".to_string(),
            order: SortOrder::Descending,
        };
        let maps = BucketMap::build(&reclaim, &infos, &set, &key).unwrap();

        assert_eq!(maps.len(), 1);
        assert_eq!(maps[0].rank(1), Some(2));
        assert_eq!(maps[0].rank(2), Some(1));
        assert_eq!(maps[0].rank(0), Some(0));
    }
}
