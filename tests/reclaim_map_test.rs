use std::collections::HashSet;
use std::sync::Arc;

use segmerge::error::SegmergeError;
use segmerge::merge::{
    DedupHandler, DefaultSplitStrategy, DocumentMergeInfoHeap, PrimaryKeyDeduplicator,
    ReclaimMap, SplitSegmentStrategy,
};
use segmerge::segment::{
    MemorySegment, MemorySegmentSet, NoDeletions, SegmentMergeInfo, SegmentMergeInfos,
};
use segmerge::storage::{MemoryStorage, Storage};

/// seg0 = {0, 1, 2} with doc 1 deleted, seg1 = {0, 1}.
fn two_segments() -> Arc<MemorySegmentSet> {
    let mut seg0 = MemorySegment::new(0, 3);
    seg0.delete(1).unwrap();
    let mut set = MemorySegmentSet::new();
    set.push(seg0).unwrap();
    set.push(MemorySegment::new(1, 2)).unwrap();
    Arc::new(set)
}

/// Segments of varying size with a deterministic deletion pattern.
fn mixed_segments(sizes: &[u32]) -> Arc<MemorySegmentSet> {
    let mut set = MemorySegmentSet::new();
    for (i, &size) in sizes.iter().enumerate() {
        let mut segment = MemorySegment::new(i as u32 + 10, size);
        for doc in 0..size {
            if (doc + i as u32) % 3 == 0 {
                segment.delete(doc).unwrap();
            }
        }
        set.push(segment).unwrap();
    }
    Arc::new(set)
}

fn build(set: &MemorySegmentSet, targets: usize) -> ReclaimMap {
    let mut split = DefaultSplitStrategy::new(targets);
    ReclaimMap::build(
        &set.merge_infos(),
        set,
        None,
        Some(&mut split as &mut dyn SplitSegmentStrategy),
    )
    .unwrap()
}

#[test]
fn test_single_target_scenario() {
    let set = two_segments();
    let map = build(&set, 1);

    assert_eq!(map.get_new_doc_id(0, 0), Some((0, 0)));
    assert_eq!(map.get_new_doc_id(0, 1), None);
    assert_eq!(map.get_new_doc_id(0, 2), Some((1, 0)));
    assert_eq!(map.get_new_doc_id(1, 0), Some((2, 0)));
    assert_eq!(map.get_new_doc_id(1, 1), Some((3, 0)));
    assert_eq!(map.target_doc_count(0), 4);
    assert_eq!(map.deleted_doc_count(), 1);
}

#[test]
fn test_two_target_scenario() {
    let set = two_segments();
    let map = build(&set, 2);

    assert_eq!(map.target_doc_counts(), vec![2, 2]);
    assert_eq!(map.get_new_doc_id(0, 0), Some((0, 0)));
    assert_eq!(map.get_new_doc_id(0, 2), Some((1, 0)));
    assert_eq!(map.get_new_doc_id(1, 0), Some((0, 1)));
    assert_eq!(map.get_new_doc_id(1, 1), Some((1, 1)));
}

#[test]
fn test_completeness_order_and_contiguity() {
    let set = mixed_segments(&[7, 0, 13, 4, 21]);
    let infos = set.merge_infos();

    for targets in 1..=4 {
        let map = build(&set, targets);
        let mut assigned: Vec<Vec<u32>> = vec![Vec::new(); targets];

        for (segment_index, info) in infos.iter().enumerate() {
            for doc in 0..info.doc_count {
                let deleted = (doc + segment_index as u32) % 3 == 0;
                match map.get_new_doc_id(segment_index, doc) {
                    Some((new_doc, target)) => {
                        assert!(!deleted, "deleted doc ({segment_index}, {doc}) was mapped");
                        // Walked in merge order, so ids per target only grow.
                        if let Some(&last) = assigned[target].last() {
                            assert!(new_doc > last);
                        }
                        assigned[target].push(new_doc);
                    }
                    None => assert!(deleted, "live doc ({segment_index}, {doc}) was dropped"),
                }
            }
        }

        for (target, ids) in assigned.iter().enumerate() {
            let expected: Vec<u32> = (0..map.target_doc_count(target)).collect();
            assert_eq!(ids, &expected, "target {target} of {targets} is not contiguous");
        }
    }
}

#[test]
fn test_default_split_balance() {
    let set = mixed_segments(&[5, 9, 2, 17]);
    let total = set.merge_infos().total_doc_count() - set.merge_infos().total_deleted_doc_count();

    for targets in 1..=7usize {
        let map = build(&set, targets);
        let floor = total / targets as u64;
        let ceil = total.div_ceil(targets as u64);
        for count in map.target_doc_counts() {
            assert!(
                count as u64 == floor || count as u64 == ceil,
                "{count} docs outside [{floor}, {ceil}] for {targets} targets"
            );
        }
        assert_eq!(map.new_doc_count(), total);
    }
}

#[test]
fn test_reverse_mapping_matches_heap() {
    let set = mixed_segments(&[6, 6, 6]);
    let map = build(&set, 2);

    let mut seen = HashSet::new();
    for doc in DocumentMergeInfoHeap::new(&map) {
        let addr = map
            .old_doc_addr(doc.target_segment_index, doc.new_doc_id)
            .unwrap();
        assert_eq!(addr.segment_index, doc.segment_index);
        assert_eq!(addr.doc_id, doc.old_doc_id);
        assert!(seen.insert((doc.segment_index, doc.old_doc_id)));
    }
    assert_eq!(seen.len() as u64, map.new_doc_count());
}

#[test]
fn test_rebuild_is_byte_identical() {
    let set = mixed_segments(&[11, 3, 8]);
    let storage = MemoryStorage::new_default();
    storage.create_dir("a").unwrap();

    build(&set, 3).store(&storage, "a/first").unwrap();
    build(&set, 3).store(&storage, "a/second").unwrap();

    assert_eq!(
        storage.read_file("a/first").unwrap(),
        storage.read_file("a/second").unwrap()
    );
    let loaded = ReclaimMap::load(&storage, "a/first").unwrap();
    assert_eq!(loaded, build(&set, 3));
}

#[test]
fn test_dedup_keeps_newest_copy() {
    let mut seg0 = MemorySegment::new(0, 3);
    seg0.set_primary_key(0, "a").unwrap();
    seg0.set_primary_key(1, "b").unwrap();
    seg0.set_primary_key(2, "c").unwrap();
    let mut seg1 = MemorySegment::new(1, 2);
    seg1.set_primary_key(0, "b").unwrap();
    seg1.set_primary_key(1, "a").unwrap();
    seg1.delete(1).unwrap();
    let mut set = MemorySegmentSet::new();
    set.push(seg0).unwrap();
    set.push(seg1).unwrap();
    let set = Arc::new(set);

    let dedup = PrimaryKeyDeduplicator::new(set.clone());
    let map = ReclaimMap::build(
        &set.merge_infos(),
        set.as_ref(),
        Some(&dedup as &dyn DedupHandler),
        None,
    )
    .unwrap();

    // "b" lives on in seg1; the deleted newer "a" does not shadow seg0's copy.
    assert_eq!(map.get_new_doc_id(0, 0), Some((0, 0)));
    assert_eq!(map.get_new_doc_id(0, 1), None);
    assert_eq!(map.get_new_doc_id(0, 2), Some((1, 0)));
    assert_eq!(map.get_new_doc_id(1, 0), Some((2, 0)));
    assert_eq!(map.duplicate_doc_count(), 1);
    assert_eq!(map.deleted_doc_count(), 1);
}

#[test]
fn test_invalid_infos_are_config_errors() {
    let empty = SegmentMergeInfos::new(Vec::new());
    let err = ReclaimMap::build(&empty, &NoDeletions, None, None).unwrap_err();
    assert!(matches!(err, SegmergeError::Config(_)));

    let overlapping = SegmentMergeInfos::new(vec![
        SegmentMergeInfo::new(0, 0, 10, 0),
        SegmentMergeInfo::new(1, 5, 10, 0),
    ]);
    let err = ReclaimMap::build(&overlapping, &NoDeletions, None, None).unwrap_err();
    assert!(err.is_config());
}
