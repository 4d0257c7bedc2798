//! Segment merge and document reclaim.
//!
//! A [`MergePlan`] names the source segments and the number of target
//! segments. Executing it builds a [`ReclaimMap`] (old doc id to new doc id,
//! with deleted and superseded documents dropped), then runs one reducer per
//! field group under the [`ResourceControlledScheduler`], and finally writes
//! a [`MergeMeta`] describing what was produced.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use segmerge::config::MergeConfig;
//! use segmerge::merge::{MergeContext, MergeEngine, MergePlan};
//! use segmerge::segment::{MemorySegment, MemorySegmentSet};
//! use segmerge::storage::MemoryStorage;
//!
//! # fn main() -> segmerge::error::Result<()> {
//! let mut seg0 = MemorySegment::new(0, 3);
//! seg0.delete(1)?;
//! let mut segments = MemorySegmentSet::new();
//! segments.push(seg0)?;
//! segments.push(MemorySegment::new(1, 2))?;
//!
//! let segments = Arc::new(segments);
//! let plan = MergePlan::new(segments.merge_infos(), 1);
//! let context = MergeContext::from_memory(Arc::new(MemoryStorage::new_default()), segments);
//! let engine = MergeEngine::new(MergeConfig::default(), context)?;
//!
//! let outcome = engine.execute(&plan)?;
//! assert_eq!(outcome.targets[0].doc_count, 4);
//! assert_eq!(outcome.reclaim_map.get_new_doc_id(0, 2), Some((1, 0)));
//! # Ok(())
//! # }
//! ```

pub mod context;
pub mod dedup;
pub mod doc_heap;
pub mod engine;
pub mod meta;
pub mod metrics;
pub mod plan;
pub mod posting_file;
pub mod reclaim_map;
pub mod reducer;
pub mod scheduler;
pub mod split;

pub use context::MergeContext;
pub use dedup::{DedupHandler, DuplicateSet, PrimaryKeyDeduplicator};
pub use doc_heap::{DocumentMergeInfo, DocumentMergeInfoHeap};
pub use engine::{MergeEngine, MergeOutcome, MergeTask};
pub use meta::MergeMeta;
pub use metrics::{MergeMetrics, MergeStats};
pub use plan::{MergePlan, MergeTaskMeta, OutputSegmentMergeInfo};
pub use reclaim_map::{DocAddress, ReclaimFilter, ReclaimMap};
pub use scheduler::{ResourceControlledScheduler, WorkItem};
pub use split::{
    DefaultSplitStrategy, SplitSegmentStrategy, SplitStrategyConfig, SplitStrategyKind,
    SplitStrategyRegistry, TimeSeriesSplitStrategy,
};
