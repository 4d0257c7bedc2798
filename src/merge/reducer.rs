//! Field reducers: per-field-group writers of merged output.
//!
//! Each reducer reads one field group from the source segments, walks the
//! surviving documents in merge order and writes the field's files into
//! every target segment directory. Reducers of different field groups write
//! disjoint files and run concurrently.

pub mod attribute;
pub mod document;
pub mod inverted_index;

pub use attribute::*;
pub use document::*;
pub use inverted_index::*;

use log::warn;

use crate::error::{Result, SegmergeError};
use crate::merge::metrics::MergeMetrics;
use crate::merge::plan::OutputSegmentMergeInfo;
use crate::merge::reclaim_map::ReclaimMap;
use crate::segment::{SegmentId, SegmentMergeInfos};
use crate::storage::Storage;
use crate::truncate::{BucketMaps, TruncateFailure, TruncateIndexProperty};

/// Shared, read-only state handed to every reducer of a plan.
pub struct ReduceContext<'a> {
    pub plan_index: usize,
    pub reclaim_map: &'a ReclaimMap,
    pub segment_infos: &'a SegmentMergeInfos,
    pub outputs: &'a [OutputSegmentMergeInfo],
    pub storage: &'a dyn Storage,
    pub metrics: &'a MergeMetrics,
    pub bucket_maps: &'a BucketMaps,
}

impl ReduceContext<'_> {
    /// Segment id of a segment index.
    pub fn segment_id(&self, segment_index: usize) -> Result<SegmentId> {
        self.segment_infos
            .get(segment_index)
            .map(|info| info.segment_id)
            .ok_or_else(|| {
                SegmergeError::invalid_operation(format!(
                    "segment index {segment_index} is not part of the plan"
                ))
            })
    }

    /// Log and count a dropped truncate profile.
    pub fn truncate_failure(&self, property: &TruncateIndexProperty, err: &SegmergeError) -> TruncateFailure {
        warn!("truncate profile {} dropped: {err}", property.id());
        self.metrics.add_truncate_failures(1);
        TruncateFailure::new(property, err.to_string())
    }
}

/// Writes one field group of every target segment.
pub trait FieldReducer: Send + Sync {
    /// Stable task name, e.g. `attribute:price`.
    fn name(&self) -> String;

    /// Estimated peak memory in bytes, used as the scheduler resource.
    fn estimate_memory(&self, ctx: &ReduceContext<'_>) -> u64;

    /// Write the field group. Returns the truncate profiles dropped on the way.
    fn reduce(&self, ctx: &ReduceContext<'_>) -> Result<Vec<TruncateFailure>>;
}
