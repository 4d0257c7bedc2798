//! Inverted index reducer, including the index's truncate profiles.

use std::collections::BTreeSet;
use std::sync::Arc;

use log::{debug, info};

use crate::error::{Result, SegmergeError};
use crate::merge::posting_file::PostingFileWriter;
use crate::merge::reducer::{FieldReducer, ReduceContext};
use crate::segment::{Posting, PostingSource};
use crate::storage::join_path;
use crate::truncate::{TruncateFailure, TruncateIndexProperty, TruncateIndexWriter};

pub const POSTINGS_FILE: &str = "postings";

/// Directory of an inverted index, relative to its segment directory.
pub fn index_dir(index_name: &str) -> String {
    format!("index/{index_name}")
}

/// Merges one inverted index term by term.
///
/// Each merged posting list is also handed to the index's truncate writers,
/// so truncation reads exactly the postings the primary index receives. A
/// truncate writer that fails is aborted and recorded; the primary merge and
/// the other profiles go on.
pub struct InvertedIndexReducer {
    index_name: String,
    source: Arc<dyn PostingSource>,
    truncate: Vec<TruncateIndexProperty>,
}

impl InvertedIndexReducer {
    pub fn new(index_name: impl Into<String>, source: Arc<dyn PostingSource>) -> Self {
        InvertedIndexReducer {
            index_name: index_name.into(),
            source,
            truncate: Vec::new(),
        }
    }

    pub fn with_truncate(mut self, properties: Vec<TruncateIndexProperty>) -> Self {
        self.truncate = properties;
        self
    }

    fn open_truncate_writers(
        &self,
        ctx: &ReduceContext<'_>,
        failures: &mut Vec<TruncateFailure>,
    ) -> Vec<Option<TruncateIndexWriter>> {
        self.truncate
            .iter()
            .map(|property| {
                let opened = ctx
                    .bucket_maps
                    .get(&property.profile.sort_key())
                    .cloned()
                    .ok_or_else(|| {
                        SegmergeError::truncation(format!(
                            "no bucket map for sort field {}",
                            property.profile.sort_field
                        ))
                    })
                    .and_then(|maps| {
                        TruncateIndexWriter::open(property.clone(), maps, ctx.storage, ctx.outputs)
                    });
                match opened {
                    Ok(writer) => Some(writer),
                    Err(err) => {
                        failures.push(ctx.truncate_failure(property, &err));
                        None
                    }
                }
            })
            .collect()
    }
}

impl FieldReducer for InvertedIndexReducer {
    fn name(&self) -> String {
        format!("index:{}", self.index_name)
    }

    fn estimate_memory(&self, ctx: &ReduceContext<'_>) -> u64 {
        // Term dictionary plus one merged posting list per target.
        let writers = ctx.outputs.len() as u64 * (1 + self.truncate.len() as u64);
        writers * 64 * 1024 + ctx.reclaim_map.new_doc_count() * 8
    }

    fn reduce(&self, ctx: &ReduceContext<'_>) -> Result<Vec<TruncateFailure>> {
        let mut failures = Vec::new();
        let mut writers = Vec::with_capacity(ctx.outputs.len());
        for output in ctx.outputs {
            let dir = join_path(&output.output_path, &index_dir(&self.index_name));
            ctx.storage.create_dir(&dir)?;
            writers.push(PostingFileWriter::create(ctx.storage, &join_path(&dir, POSTINGS_FILE))?);
        }
        let mut truncate_writers = self.open_truncate_writers(ctx, &mut failures);

        let mut terms = BTreeSet::new();
        for info in ctx.segment_infos {
            terms.extend(self.source.terms(&self.index_name, info.segment_id)?);
        }
        debug!("index {}: {} distinct terms", self.index_name, terms.len());

        let (mut term_count, mut posting_count, mut truncated) = (0u64, 0u64, 0u64);
        let mut merged: Vec<Vec<Posting>> = vec![Vec::new(); ctx.outputs.len()];
        for term in &terms {
            merged.iter_mut().for_each(Vec::clear);
            for (segment_index, info) in ctx.segment_infos.iter().enumerate() {
                for posting in self.source.postings(&self.index_name, info.segment_id, term)? {
                    if let Some((new_doc_id, target)) =
                        ctx.reclaim_map.get_new_doc_id(segment_index, posting.doc_id)
                    {
                        merged[target].push(Posting::new(new_doc_id, posting.term_freq));
                    }
                }
            }

            for (target, postings) in merged.iter().enumerate() {
                if postings.is_empty() {
                    continue;
                }
                writers[target].write_term(term, postings)?;
                term_count += 1;
                posting_count += postings.len() as u64;

                for slot in truncate_writers.iter_mut() {
                    let Some(writer) = slot.as_mut() else {
                        continue;
                    };
                    match writer.add_term(target, term, postings) {
                        Ok(cut) => truncated += u64::from(cut),
                        Err(err) => {
                            if let Some(failed) = slot.take() {
                                failures.push(ctx.truncate_failure(failed.property(), &err));
                                failed.abort(ctx.storage);
                            }
                        }
                    }
                }
            }
        }

        for writer in writers {
            writer.close()?;
        }
        for writer in truncate_writers.into_iter().flatten() {
            let property = writer.property().clone();
            if let Err(err) = writer.finish(ctx.storage) {
                failures.push(ctx.truncate_failure(&property, &err));
            }
        }

        ctx.metrics.add_terms_merged(term_count);
        ctx.metrics.add_postings_merged(posting_count);
        ctx.metrics.add_terms_truncated(truncated);
        info!(
            "index {} merged: {term_count} terms, {posting_count} postings, {truncated} truncated",
            self.index_name
        );
        Ok(failures)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::merge::metrics::MergeMetrics;
    use crate::merge::plan::MergePlan;
    use crate::merge::posting_file::read_posting_file;
    use crate::merge::reclaim_map::ReclaimMap;
    use crate::segment::{AttributeValue, MemorySegment, MemorySegmentSet};
    use crate::storage::{MemoryStorage, Storage};
    use crate::truncate::{BucketMap, BucketMaps, TruncateLimit, TruncateProfile};

    fn source() -> Arc<MemorySegmentSet> {
        let mut seg0 = MemorySegment::new(0, 3);
        seg0.add_posting("title", "rust", 0, 1).unwrap();
        seg0.add_posting("title", "rust", 2, 3).unwrap();
        seg0.add_posting("title", "safe", 1, 1).unwrap();
        seg0.delete(1).unwrap();
        for (doc, price) in [(0, 10), (1, 99), (2, 30)] {
            seg0.set_attribute("price", doc, AttributeValue::Int(price)).unwrap();
        }
        let mut seg1 = MemorySegment::new(1, 2);
        seg1.add_posting("title", "rust", 1, 2).unwrap();
        seg1.set_attribute("price", 0, AttributeValue::Int(5)).unwrap();
        seg1.set_attribute("price", 1, AttributeValue::Int(20)).unwrap();

        let mut set = MemorySegmentSet::new();
        set.push(seg0).unwrap();
        set.push(seg1).unwrap();
        Arc::new(set)
    }

    #[test]
    fn test_merges_and_truncates() {
        let set = source();
        let infos = set.merge_infos();
        let reclaim = ReclaimMap::build(&infos, set.as_ref(), None, None).unwrap();
        let mut outputs = MergePlan::new(infos.clone(), 1).output_segments().unwrap();
        outputs[0].doc_count = reclaim.target_doc_count(0);

        let good = TruncateIndexProperty {
            index_name: "title".to_string(),
            profile: TruncateProfile::new("top", "price", TruncateLimit::TopK(2)),
        };
        let broken = TruncateIndexProperty {
            index_name: "title".to_string(),
            profile: TruncateProfile::new("no_maps", "rating", TruncateLimit::TopK(1)),
        };
        let mut bucket_maps = BucketMaps::new();
        let key = good.profile.sort_key();
        bucket_maps.insert(
            key.clone(),
            Arc::new(BucketMap::build(&reclaim, &infos, set.as_ref(), &key).unwrap()),
        );

        let storage = MemoryStorage::new_default();
        let metrics = MergeMetrics::new();
        let ctx = ReduceContext {
            plan_index: 0,
            reclaim_map: &reclaim,
            segment_infos: &infos,
            outputs: &outputs,
            storage: &storage,
            metrics: &metrics,
            bucket_maps: &bucket_maps,
        };

        let reducer = InvertedIndexReducer::new("title", set.clone()).with_truncate(vec![good, broken]);
        assert_eq!(reducer.name(), "index:title");
        let failures = reducer.reduce(&ctx).unwrap();

        // New ids: (0,0)->0, (0,2)->1, (1,0)->2, (1,1)->3. "safe" only hit a deleted doc.
        let merged = read_posting_file(&storage, "segment_2/index/title/postings").unwrap();
        assert_eq!(merged.len(), 1);
        assert_eq!(
            merged[0].1,
            vec![Posting::new(0, 1), Posting::new(1, 3), Posting::new(3, 2)]
        );

        // Prices of docs 0, 1, 3 are 10, 30, 20: keep 1 and 3.
        let truncated =
            read_posting_file(&storage, "segment_2/index/title/truncate/top/postings").unwrap();
        assert_eq!(truncated[0].1, vec![Posting::new(1, 3), Posting::new(3, 2)]);

        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].profile_name, "no_maps");
        assert!(!storage.dir_exists("segment_2/index/title/truncate/no_maps"));

        let stats = metrics.snapshot();
        assert_eq!(stats.terms_merged, 1);
        assert_eq!(stats.postings_merged, 3);
        assert_eq!(stats.terms_truncated, 1);
        assert_eq!(stats.truncate_failures, 1);
    }
}
