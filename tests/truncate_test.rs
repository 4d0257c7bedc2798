use std::cmp::Reverse;
use std::sync::Arc;

use segmerge::config::MergeConfig;
use segmerge::error::{Result, SegmergeError};
use segmerge::merge::meta::{MergeMeta, plan_meta_dir};
use segmerge::merge::posting_file::read_posting_file;
use segmerge::merge::{MergeContext, MergeEngine, MergePlan};
use segmerge::segment::{
    AttributeValue, AttributeValueReader, DocId, MemorySegment, MemorySegmentSet, SegmentId,
};
use segmerge::storage::{MemoryStorage, Storage};

const DOCS: u32 = 20;

fn price(doc: DocId) -> Option<i64> {
    (doc % 6 != 5).then_some(((doc * 7) % 10) as i64)
}

/// One segment whose "hot" term hits every doc, "mid" every other doc and
/// "cold" three docs. Docs 3 and 7 are deleted.
fn priced_segments() -> Arc<MemorySegmentSet> {
    let mut segment = MemorySegment::new(0, DOCS);
    for doc in 0..DOCS {
        if let Some(p) = price(doc) {
            segment.set_attribute("price", doc, AttributeValue::Int(p)).unwrap();
        }
        segment.add_posting("body", "hot", doc, 1).unwrap();
        if doc % 2 == 0 {
            segment.add_posting("body", "mid", doc, 2).unwrap();
        }
        if doc < 3 {
            segment.add_posting("body", "cold", doc, 3).unwrap();
        }
    }
    segment.delete(3).unwrap();
    segment.delete(7).unwrap();

    let mut set = MemorySegmentSet::new();
    set.push(segment).unwrap();
    Arc::new(set)
}

fn truncate_config(profiles: &str) -> MergeConfig {
    MergeConfig::from_json_str(&format!(
        r#"{{
            "thread_count": 2,
            "fields": {{ "indexes": ["body"] }},
            "truncate": {{
                "profiles": [{profiles}],
                "indexes": {{ "body": ["top5", "cheap"] }}
            }}
        }}"#
    ))
    .unwrap()
}

const PROFILES: &str = r#"
    { "name": "top5", "sort_field": "price", "limit": { "top_k": 5 } },
    { "name": "cheap", "sort_field": "price", "sort_order": "ascending", "limit": { "ratio": 0.25 } }
"#;

#[test]
fn test_truncation_keeps_best_ranked() {
    let segments = priced_segments();
    let storage = Arc::new(MemoryStorage::new_default());
    let engine = MergeEngine::new(
        truncate_config(PROFILES),
        MergeContext::from_memory(storage.clone(), segments.clone()),
    )
    .unwrap();
    let outcome = engine.execute(&MergePlan::new(segments.merge_infos(), 1)).unwrap();
    assert!(outcome.truncate_failures.is_empty());
    assert_eq!(outcome.targets[0].doc_count, DOCS - 2);

    let merged = read_posting_file(storage.as_ref(), "segment_1/index/body/postings").unwrap();
    for (profile, descending) in [("top5", true), ("cheap", false)] {
        let path = format!("segment_1/index/body/truncate/{profile}/postings");
        let truncated = read_posting_file(storage.as_ref(), &path).unwrap();
        assert_eq!(truncated.len(), merged.len());

        // 18 surviving docs, ratio 0.25 keeps ceil(4.5) = 5 as well.
        let limit = 5;
        for ((term, full), (truncated_term, kept)) in merged.iter().zip(&truncated) {
            assert_eq!(term, truncated_term);
            assert_eq!(kept.len(), limit.min(full.len()), "{profile}/{term}");

            // Rank by (has value, value in profile order, smaller doc id).
            let mut expected: Vec<_> = full
                .iter()
                .map(|posting| {
                    let addr = outcome.reclaim_map.old_doc_addr(0, posting.doc_id).unwrap();
                    let value = price(addr.doc_id)
                        .map(|p| if descending { p } else { -p });
                    (Reverse((value.is_some(), value)), posting.doc_id)
                })
                .collect();
            expected.sort();
            let mut expected: Vec<DocId> =
                expected.into_iter().take(limit).map(|(_, doc)| doc).collect();
            expected.sort();

            let kept: Vec<DocId> = kept.iter().map(|p| p.doc_id).collect();
            assert_eq!(kept, expected, "{profile}/{term}");
        }
    }
    assert_eq!(outcome.stats.terms_truncated, 4);
}

/// Attribute reader that cannot read one field.
struct PartiallyBrokenReader {
    inner: Arc<MemorySegmentSet>,
}

impl AttributeValueReader for PartiallyBrokenReader {
    fn read(&self, field: &str, segment_id: SegmentId, doc_id: DocId) -> Result<Option<AttributeValue>> {
        if field == "rating" {
            return Err(SegmergeError::storage("rating column is corrupt"));
        }
        self.inner.read(field, segment_id, doc_id)
    }
}

#[test]
fn test_failed_profile_is_isolated() {
    let segments = priced_segments();
    let storage = Arc::new(MemoryStorage::new_default());
    let context = MergeContext::from_memory(storage.clone(), segments.clone())
        .with_attributes(Arc::new(PartiallyBrokenReader {
            inner: segments.clone(),
        }));
    let profiles = r#"
        { "name": "top5", "sort_field": "price", "limit": { "top_k": 5 } },
        { "name": "cheap", "sort_field": "rating", "limit": { "top_k": 2 } }
    "#;
    let engine = MergeEngine::new(truncate_config(profiles), context).unwrap();
    let outcome = engine.execute(&MergePlan::new(segments.merge_infos(), 1)).unwrap();

    assert_eq!(outcome.truncate_failures.len(), 1);
    assert_eq!(outcome.truncate_failures[0].index_name, "body");
    assert_eq!(outcome.truncate_failures[0].profile_name, "cheap");
    assert!(outcome.truncate_failures[0].reason.contains("corrupt"));
    assert_eq!(outcome.stats.truncate_failures, 1);

    assert!(storage.file_exists("segment_1/index/body/postings"));
    assert!(storage.file_exists("segment_1/index/body/truncate/top5/postings"));
    assert!(!storage.dir_exists("segment_1/index/body/truncate/cheap"));

    let meta = MergeMeta::load(storage.as_ref(), &plan_meta_dir(0)).unwrap().unwrap();
    assert_eq!(meta.failed_truncate_profiles, outcome.truncate_failures);
}

#[test]
fn test_trigger_skips_rare_terms() {
    let segments = priced_segments();
    let storage = Arc::new(MemoryStorage::new_default());
    let profiles = r#"
        { "name": "top5", "sort_field": "price", "limit": { "top_k": 2 },
          "trigger": { "min_doc_freq": 12 } },
        { "name": "cheap", "sort_field": "price", "limit": { "top_k": 2 } }
    "#;
    let engine = MergeEngine::new(
        truncate_config(profiles),
        MergeContext::from_memory(storage.clone(), segments.clone()),
    )
    .unwrap();
    engine.execute(&MergePlan::new(segments.merge_infos(), 1)).unwrap();

    // Only "hot" (18 postings) reaches the trigger; "mid" (10) and "cold" (3) are copied.
    let truncated =
        read_posting_file(storage.as_ref(), "segment_1/index/body/truncate/top5/postings").unwrap();
    let lengths: Vec<(String, usize)> = truncated
        .into_iter()
        .map(|(term, postings)| (term, postings.len()))
        .collect();
    assert_eq!(
        lengths,
        vec![
            ("cold".to_string(), 3),
            ("hot".to_string(), 2),
            ("mid".to_string(), 10),
        ]
    );
}

#[test]
fn test_truncate_config_errors() {
    let bad_ratio = r#"
        { "name": "top5", "sort_field": "price", "limit": { "ratio": 1.5 } },
        { "name": "cheap", "sort_field": "price", "limit": { "top_k": 2 } }
    "#;
    let json = format!(
        r#"{{ "fields": {{ "indexes": ["body"] }},
              "truncate": {{ "profiles": [{bad_ratio}], "indexes": {{ "body": ["top5"] }} }} }}"#
    );
    assert!(MergeConfig::from_json_str(&json).unwrap_err().is_config());

    let json = r#"{ "truncate": { "profiles": [], "indexes": { "body": ["missing"] } } }"#;
    assert!(MergeConfig::from_json_str(json).unwrap_err().is_config());
}
