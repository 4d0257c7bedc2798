//! Single-pass stream of surviving documents in merge order.

use crate::merge::reclaim_map::ReclaimMap;
use crate::segment::DocId;

/// One surviving document, as seen by a reducer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DocumentMergeInfo {
    pub segment_index: usize,
    pub old_doc_id: DocId,
    pub new_doc_id: DocId,
    pub target_segment_index: usize,
}

/// Forward-only iterator over surviving documents, ordered by segment index
/// and then by local doc id.
///
/// The heap keeps one cursor per source segment and never revisits a
/// document. It is deliberately not `Clone`: a reducer that needs a second
/// pass must build a new heap from the reclaim map.
#[derive(Debug)]
pub struct DocumentMergeInfoHeap<'a> {
    reclaim_map: &'a ReclaimMap,
    cursors: Vec<DocId>,
    current_segment: usize,
    target_filter: Option<usize>,
    top: Option<DocumentMergeInfo>,
}

impl<'a> DocumentMergeInfoHeap<'a> {
    /// Stream every surviving document.
    pub fn new(reclaim_map: &'a ReclaimMap) -> Self {
        Self::with_filter(reclaim_map, None)
    }

    /// Stream only the documents of one target segment.
    pub fn for_target(reclaim_map: &'a ReclaimMap, target_segment_index: usize) -> Self {
        Self::with_filter(reclaim_map, Some(target_segment_index))
    }

    fn with_filter(reclaim_map: &'a ReclaimMap, target_filter: Option<usize>) -> Self {
        let mut heap = DocumentMergeInfoHeap {
            reclaim_map,
            cursors: vec![0; reclaim_map.segment_count()],
            current_segment: 0,
            target_filter,
            top: None,
        };
        heap.top = heap.advance();
        heap
    }

    fn advance(&mut self) -> Option<DocumentMergeInfo> {
        while self.current_segment < self.cursors.len() {
            let segment_index = self.current_segment;
            let doc_count = self.reclaim_map.segment_doc_count(segment_index);
            while self.cursors[segment_index] < doc_count {
                let old_doc_id = self.cursors[segment_index];
                self.cursors[segment_index] += 1;
                let Some((new_doc_id, target)) =
                    self.reclaim_map.get_new_doc_id(segment_index, old_doc_id)
                else {
                    continue;
                };
                if self.target_filter.is_some_and(|t| t != target) {
                    continue;
                }
                return Some(DocumentMergeInfo {
                    segment_index,
                    old_doc_id,
                    new_doc_id,
                    target_segment_index: target,
                });
            }
            self.current_segment += 1;
        }
        None
    }

    pub fn is_empty(&self) -> bool {
        self.top.is_none()
    }

    /// Next document without consuming it.
    pub fn top(&self) -> Option<&DocumentMergeInfo> {
        self.top.as_ref()
    }

    /// Consume and return the next document.
    pub fn get_next(&mut self) -> Option<DocumentMergeInfo> {
        let current = self.top.take()?;
        self.top = self.advance();
        Some(current)
    }
}

impl Iterator for DocumentMergeInfoHeap<'_> {
    type Item = DocumentMergeInfo;

    fn next(&mut self) -> Option<Self::Item> {
        self.get_next()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::merge::split::DefaultSplitStrategy;
    use crate::segment::{DeletionBitmap, DeletionMap, SegmentMergeInfos};

    fn sample_map(targets: usize) -> ReclaimMap {
        let infos = SegmentMergeInfos::stacked(&[(0, 3, 1), (1, 2, 0)]);
        let mut deletions = DeletionMap::new();
        let mut bitmap = DeletionBitmap::new(0, 3);
        bitmap.delete_document(1).unwrap();
        deletions.insert(bitmap);
        let mut split = DefaultSplitStrategy::new(targets);
        ReclaimMap::build(&infos, &deletions, None, Some(&mut split)).unwrap()
    }

    #[test]
    fn test_stream_order() {
        let map = sample_map(1);
        let docs: Vec<(usize, DocId, DocId)> = DocumentMergeInfoHeap::new(&map)
            .map(|d| (d.segment_index, d.old_doc_id, d.new_doc_id))
            .collect();
        assert_eq!(docs, vec![(0, 0, 0), (0, 2, 1), (1, 0, 2), (1, 1, 3)]);
    }

    #[test]
    fn test_peek_does_not_consume() {
        let map = sample_map(1);
        let mut heap = DocumentMergeInfoHeap::new(&map);

        assert!(!heap.is_empty());
        assert_eq!(heap.top().map(|d| d.old_doc_id), Some(0));
        assert_eq!(heap.top().map(|d| d.old_doc_id), Some(0));
        assert_eq!(heap.get_next().map(|d| d.old_doc_id), Some(0));
        assert_eq!(heap.top().map(|d| d.old_doc_id), Some(2));

        while heap.get_next().is_some() {}
        assert!(heap.is_empty());
        assert!(heap.get_next().is_none());
    }

    #[test]
    fn test_target_filter() {
        let map = sample_map(2);
        let target1: Vec<(usize, DocId, DocId)> = DocumentMergeInfoHeap::for_target(&map, 1)
            .map(|d| (d.segment_index, d.old_doc_id, d.new_doc_id))
            .collect();
        assert_eq!(target1, vec![(1, 0, 0), (1, 1, 1)]);

        let all: Vec<usize> = DocumentMergeInfoHeap::new(&map)
            .map(|d| d.target_segment_index)
            .collect();
        assert_eq!(all, vec![0, 0, 1, 1]);
    }
}
