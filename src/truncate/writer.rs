//! Writes the truncated copy of one inverted index under one profile.

use std::sync::Arc;

use log::warn;

use crate::error::{Result, SegmergeError};
use crate::merge::plan::OutputSegmentMergeInfo;
use crate::merge::posting_file::PostingFileWriter;
use crate::segment::Posting;
use crate::storage::{Storage, join_path};
use crate::truncate::bucket_map::BucketMap;
use crate::truncate::config::TruncateIndexProperty;
use crate::truncate::trigger::AdaptiveBitmapTrigger;

pub const TRUNCATE_POSTINGS_FILE: &str = "postings";

/// Directory of a truncated index, relative to its segment directory.
pub fn truncate_dir(index_name: &str, profile_name: &str) -> String {
    format!("index/{index_name}/truncate/{profile_name}")
}

/// Keep the `limit` best-ranked postings, in doc id order.
pub fn truncate_postings(postings: &[Posting], bucket_map: &BucketMap, limit: usize) -> Result<Vec<Posting>> {
    if postings.len() <= limit {
        return Ok(postings.to_vec());
    }

    let mut ranked = postings
        .iter()
        .map(|posting| {
            bucket_map
                .rank(posting.doc_id)
                .map(|rank| (rank, *posting))
                .ok_or_else(|| {
                    SegmergeError::truncation(format!("doc {} has no bucket rank", posting.doc_id))
                })
        })
        .collect::<Result<Vec<_>>>()?;

    if limit == 0 {
        return Ok(Vec::new());
    }
    ranked.select_nth_unstable_by(limit - 1, |a, b| b.0.cmp(&a.0));
    ranked.truncate(limit);

    let mut kept: Vec<Posting> = ranked.into_iter().map(|(_, posting)| posting).collect();
    kept.sort_unstable_by_key(|posting| posting.doc_id);
    Ok(kept)
}

struct TruncateTarget {
    path: String,
    limit: usize,
    trigger: AdaptiveBitmapTrigger,
    writer: PostingFileWriter,
}

/// Truncated posting output of one `(index, profile)` pair across all
/// target segments.
///
/// Fed term by term from the merged posting lists; every target gets its own
/// file under [`truncate_dir`].
pub struct TruncateIndexWriter {
    property: TruncateIndexProperty,
    bucket_maps: Arc<Vec<BucketMap>>,
    targets: Vec<TruncateTarget>,
    terms_truncated: u64,
}

impl TruncateIndexWriter {
    pub fn open(
        property: TruncateIndexProperty,
        bucket_maps: Arc<Vec<BucketMap>>,
        storage: &dyn Storage,
        outputs: &[OutputSegmentMergeInfo],
    ) -> Result<Self> {
        if bucket_maps.len() != outputs.len() {
            return Err(SegmergeError::truncation(format!(
                "{}: {} bucket maps for {} target segments",
                property.id(),
                bucket_maps.len(),
                outputs.len()
            )));
        }

        let mut targets = Vec::with_capacity(outputs.len());
        for output in outputs {
            let dir = join_path(
                &output.output_path,
                &truncate_dir(&property.index_name, &property.profile.name),
            );
            storage.create_dir(&dir)?;
            let path = join_path(&dir, TRUNCATE_POSTINGS_FILE);
            let limit = property.profile.limit.limit_for(output.doc_count);
            targets.push(TruncateTarget {
                writer: PostingFileWriter::create(storage, &path)?,
                trigger: AdaptiveBitmapTrigger::new(
                    property.profile.trigger.as_ref(),
                    limit,
                    output.doc_count,
                ),
                limit,
                path,
            });
        }

        Ok(TruncateIndexWriter {
            property,
            bucket_maps,
            targets,
            terms_truncated: 0,
        })
    }

    pub fn property(&self) -> &TruncateIndexProperty {
        &self.property
    }

    /// Write the truncated form of a merged posting list. Returns whether
    /// postings were actually cut.
    pub fn add_term(&mut self, target_segment_index: usize, term: &str, postings: &[Posting]) -> Result<bool> {
        if postings.is_empty() {
            return Ok(false);
        }
        let target = self.targets.get_mut(target_segment_index).ok_or_else(|| {
            SegmergeError::truncation(format!("no target segment {target_segment_index}"))
        })?;

        if !target.trigger.need_truncate(postings.len()) {
            target.writer.write_term(term, postings)?;
            return Ok(false);
        }

        let kept = truncate_postings(postings, &self.bucket_maps[target_segment_index], target.limit)?;
        target.writer.write_term(term, &kept)?;
        let truncated = kept.len() < postings.len();
        if truncated {
            self.terms_truncated += 1;
        }
        Ok(truncated)
    }

    pub fn terms_truncated(&self) -> u64 {
        self.terms_truncated
    }

    /// Close every target file. Returns the number of truncated terms.
    ///
    /// If any target fails to close, every target file of this writer is
    /// removed before the error is returned.
    pub fn finish(self, storage: &dyn Storage) -> Result<u64> {
        let id = self.property.id();
        let mut paths = Vec::with_capacity(self.targets.len());
        let mut closed = Ok(());
        for target in self.targets {
            paths.push(target.path);
            if closed.is_ok() {
                closed = target.writer.close();
            }
        }
        if let Err(err) = closed {
            remove_partial_output(storage, &id, &paths);
            return Err(err);
        }
        Ok(self.terms_truncated)
    }

    /// Drop partial output after a failure.
    pub fn abort(self, storage: &dyn Storage) {
        let id = self.property.id();
        let paths: Vec<String> = self.targets.into_iter().map(|target| target.path).collect();
        remove_partial_output(storage, &id, &paths);
    }
}

fn remove_partial_output(storage: &dyn Storage, id: &str, paths: &[String]) {
    for path in paths {
        if let Err(e) = storage.delete_file(path) {
            warn!("{id}: failed to remove partial truncate output {path}: {e}");
        }
    }
}
