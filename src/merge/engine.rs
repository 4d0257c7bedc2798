//! Merge engine for combining source segments into target segments.
//!
//! One call to [`MergeEngine::execute_plan`] runs a whole plan:
//!
//! 1. validate the plan and check the needed readers exist (nothing written)
//! 2. return early if the merge meta records this exact plan, with the same
//!    field groups and truncate profiles, as completed
//! 3. create the split strategy, deduplicate and build the [`ReclaimMap`]
//! 4. create the target directories and persist the reclaim map
//! 5. build the bucket maps of every truncate sort key
//! 6. run one task per field group under the resource scheduler
//! 7. write the merge meta
//!
//! A failure in steps 1 to 3 leaves storage untouched. Later failures leave
//! partial output that callers must discard.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use log::{debug, info, warn};
use parking_lot::Mutex;

use crate::config::MergeConfig;
use crate::error::Result;
use crate::merge::context::MergeContext;
use crate::merge::dedup::{DedupHandler, PrimaryKeyDeduplicator};
use crate::merge::meta::{
    MERGE_META_VERSION, MergeMeta, RECLAIM_MAP_FILE, TaskMarker, load_completed_tasks,
    plan_meta_dir, store_task_marker,
};
use crate::merge::metrics::{MergeMetrics, MergeStats};
use crate::merge::plan::{MergePlan, MergeTaskMeta, OutputSegmentMergeInfo};
use crate::merge::reclaim_map::ReclaimMap;
use crate::merge::reducer::{
    AttributeReducer, DocumentReducer, FieldReducer, InvertedIndexReducer, ReduceContext,
};
use crate::merge::scheduler::{ResourceControlledScheduler, TaskStatus, WorkItem};
use crate::merge::split::create_split_strategy;
use crate::storage::join_path;
use crate::truncate::{BucketMap, BucketMaps, TruncateFailure, TruncateIndexProperty};

/// Result of executing one merge plan.
#[derive(Debug, Clone)]
pub struct MergeOutcome {
    pub plan_index: usize,
    pub targets: Vec<OutputSegmentMergeInfo>,
    pub reclaim_map: Arc<ReclaimMap>,
    pub tasks: Vec<MergeTaskMeta>,
    pub truncate_failures: Vec<TruncateFailure>,
    pub stats: MergeStats,
    /// The plan had completed before; nothing was rewritten.
    pub already_completed: bool,
}

/// A field reducer scheduled as one task of a plan.
pub struct MergeTask<'a> {
    meta: MergeTaskMeta,
    reducer: Box<dyn FieldReducer>,
    ctx: &'a ReduceContext<'a>,
    meta_dir: &'a str,
    truncate_failures: &'a Mutex<Vec<TruncateFailure>>,
}

impl MergeTask<'_> {
    pub fn meta(&self) -> &MergeTaskMeta {
        &self.meta
    }
}

impl WorkItem for MergeTask<'_> {
    fn name(&self) -> String {
        self.meta.name.clone()
    }

    fn required_resource(&self) -> u64 {
        self.meta.cost
    }

    fn process(&self) -> Result<()> {
        let start = Instant::now();
        let failures = self.reducer.reduce(self.ctx)?;
        let marker = TaskMarker::new(self.meta.clone(), failures);
        store_task_marker(self.ctx.storage, self.meta_dir, &marker)?;
        self.truncate_failures.lock().extend(marker.truncate_failures);
        info!(
            "task {}/{} ({}) completed in {} ms",
            self.meta.plan_index,
            self.meta.task_index,
            self.meta.name,
            start.elapsed().as_millis()
        );
        Ok(())
    }
}

/// Executes merge plans against one merge context.
pub struct MergeEngine {
    config: MergeConfig,
    context: MergeContext,
}

impl MergeEngine {
    pub fn new(config: MergeConfig, context: MergeContext) -> Result<Self> {
        config.validate()?;
        Ok(MergeEngine { config, context })
    }

    pub fn config(&self) -> &MergeConfig {
        &self.config
    }

    pub fn context(&self) -> &MergeContext {
        &self.context
    }

    /// Execute a single plan as plan 0.
    pub fn execute(&self, plan: &MergePlan) -> Result<MergeOutcome> {
        self.execute_plan(0, plan)
    }

    /// Execute plans in order, stopping at the first failure.
    pub fn execute_all(&self, plans: &[MergePlan]) -> Result<Vec<MergeOutcome>> {
        plans
            .iter()
            .enumerate()
            .map(|(index, plan)| self.execute_plan(index, plan))
            .collect()
    }

    fn truncate_properties(&self) -> Vec<TruncateIndexProperty> {
        let Some(truncate) = &self.config.truncate else {
            return Vec::new();
        };
        self.config
            .fields
            .indexes
            .iter()
            .flat_map(|index| truncate.properties_for(index))
            .collect()
    }

    pub fn execute_plan(&self, plan_index: usize, plan: &MergePlan) -> Result<MergeOutcome> {
        let start = Instant::now();
        plan.validate()?;
        let storage = self.context.storage.as_ref();
        let meta_dir = plan_meta_dir(plan_index);
        let fields = &self.config.fields;

        if let Some(meta) = MergeMeta::load(storage, &meta_dir)?
            && meta.matches_run(plan, fields, self.config.truncate.as_ref())
        {
            info!("plan {plan_index} already completed at {}, skipping", meta.completed_at);
            let reclaim_map = ReclaimMap::load(storage, &join_path(&meta_dir, RECLAIM_MAP_FILE))?;
            return Ok(MergeOutcome {
                plan_index,
                targets: meta.targets,
                reclaim_map: Arc::new(reclaim_map),
                tasks: meta.tasks,
                truncate_failures: meta.failed_truncate_profiles,
                stats: meta.stats,
                already_completed: true,
            });
        }

        let properties = self.truncate_properties();
        let attributes = if !fields.attributes.is_empty() || !properties.is_empty() {
            Some(self.context.require_attributes()?)
        } else {
            None
        };
        let postings = if fields.indexes.is_empty() {
            None
        } else {
            Some(self.context.require_postings()?)
        };
        let documents = if fields.store_documents {
            Some(self.context.require_documents()?)
        } else {
            None
        };

        info!(
            "plan {plan_index}: merging {} segments ({} docs) into {} targets with {:?} split",
            plan.input_segments.len(),
            plan.input_segments.total_doc_count(),
            plan.output_segment_count,
            plan.split.name
        );

        let mut split = create_split_strategy(
            &plan.split,
            plan.output_segment_count,
            self.context.attributes.as_ref(),
            &self.context.split_registry,
        )?;
        let dedup = self
            .context
            .primary_keys
            .clone()
            .map(PrimaryKeyDeduplicator::new);
        let reclaim_map = ReclaimMap::build(
            &plan.input_segments,
            self.context.deletions.as_ref(),
            dedup.as_ref().map(|d| d as &dyn DedupHandler),
            Some(split.as_mut()),
        )?;

        let metrics = MergeMetrics::new();
        metrics.add_docs_deleted(reclaim_map.deleted_doc_count());
        metrics.add_docs_duplicated(reclaim_map.duplicate_doc_count());

        let mut outputs = plan.output_segments()?;
        for output in &mut outputs {
            output.doc_count = reclaim_map.target_doc_count(output.target_segment_index);
            storage.create_dir(&output.output_path)?;
        }
        storage.create_dir(&meta_dir)?;
        reclaim_map.store(storage, &join_path(&meta_dir, RECLAIM_MAP_FILE))?;

        // Bucket maps; a sort key that cannot be ranked drops its profiles.
        let mut bucket_maps = BucketMaps::new();
        let mut failures = Vec::new();
        let mut failed_keys = HashSet::new();
        if let Some(reader) = &attributes {
            let keys: BTreeSet<_> =
                properties.iter().map(|p| p.profile.sort_key()).collect();
            for key in keys {
                match BucketMap::build(&reclaim_map, &plan.input_segments, reader.as_ref(), &key) {
                    Ok(maps) => {
                        bucket_maps.insert(key, Arc::new(maps));
                    }
                    Err(err) => {
                        for property in properties.iter().filter(|p| p.profile.sort_key() == key) {
                            warn!("truncate profile {} dropped: {err}", property.id());
                            metrics.add_truncate_failures(1);
                            failures.push(TruncateFailure::new(property, err.to_string()));
                        }
                        failed_keys.insert(key);
                    }
                }
            }
        }

        let mut reducers: Vec<Box<dyn FieldReducer>> = Vec::new();
        if let Some(reader) = &attributes {
            for field in &fields.attributes {
                reducers.push(Box::new(AttributeReducer::new(field.clone(), reader.clone())));
            }
        }
        if let Some(source) = &postings {
            for index in &fields.indexes {
                let index_properties = properties
                    .iter()
                    .filter(|p| &p.index_name == index && !failed_keys.contains(&p.profile.sort_key()))
                    .cloned()
                    .collect();
                reducers.push(Box::new(
                    InvertedIndexReducer::new(index.clone(), source.clone())
                        .with_truncate(index_properties),
                ));
            }
        }
        if let Some(source) = documents {
            reducers.push(Box::new(DocumentReducer::new(source)));
        }

        let truncate_failures = Mutex::new(failures);
        let ctx = ReduceContext {
            plan_index,
            reclaim_map: &reclaim_map,
            segment_infos: &plan.input_segments,
            outputs: &outputs,
            storage,
            metrics: &metrics,
            bucket_maps: &bucket_maps,
        };

        let mut completed: HashMap<(usize, String), Vec<TruncateFailure>> =
            if self.config.resume_completed_tasks {
                load_completed_tasks(storage, &meta_dir)?
                    .into_iter()
                    .filter(|m| m.task.plan_index == plan_index)
                    .map(|m| ((m.task.task_index, m.task.name), m.truncate_failures))
                    .collect()
            } else {
                HashMap::new()
            };

        let mut task_metas = Vec::with_capacity(reducers.len());
        let mut items: Vec<Box<dyn WorkItem + '_>> = Vec::with_capacity(reducers.len());
        for (task_index, reducer) in reducers.into_iter().enumerate() {
            let meta = MergeTaskMeta::new(
                plan_index,
                task_index,
                reducer.name(),
                reducer.estimate_memory(&ctx),
            );
            task_metas.push(meta.clone());
            if let Some(dropped) = completed.remove(&(task_index, meta.name.clone())) {
                info!("task {plan_index}/{task_index} ({}) already completed, skipping", meta.name);
                metrics.add_truncate_failures(dropped.len() as u64);
                truncate_failures.lock().extend(dropped);
                continue;
            }
            debug!("task {plan_index}/{task_index} ({}) costs {} bytes", meta.name, meta.cost);
            items.push(Box::new(MergeTask {
                meta,
                reducer,
                ctx: &ctx,
                meta_dir: &meta_dir,
                truncate_failures: &truncate_failures,
            }));
        }

        let mut scheduler = ResourceControlledScheduler::new(self.config.memory_budget_bytes());
        scheduler.init(items, self.config.thread_count)?;
        if let Err(err) = scheduler.run() {
            let failed = scheduler
                .statuses()
                .iter()
                .filter(|s| matches!(s, TaskStatus::Failed(_)))
                .count();
            metrics.add_task_errors(failed as u64);
            warn!("plan {plan_index} failed: {err}");
            return Err(err);
        }
        drop(scheduler);

        let mut stats = metrics.snapshot();
        stats.merge_time_ms = start.elapsed().as_millis() as u64;
        let mut truncate_failures = truncate_failures.into_inner();
        truncate_failures.sort_by(|a, b| {
            (&a.index_name, &a.profile_name).cmp(&(&b.index_name, &b.profile_name))
        });
        let meta = MergeMeta {
            version: MERGE_META_VERSION,
            plan_index,
            plan: plan.clone(),
            plan_fingerprint: plan.fingerprint()?,
            targets: outputs.clone(),
            fields: fields.clone(),
            truncate: self.config.truncate.clone(),
            failed_truncate_profiles: truncate_failures.clone(),
            tasks: task_metas.clone(),
            stats: stats.clone(),
            completed_at: Utc::now(),
        };
        meta.store(storage, &meta_dir)?;

        info!(
            "plan {plan_index} completed in {} ms: {:?} docs per target, {} reclaimed",
            stats.merge_time_ms,
            reclaim_map.target_doc_counts(),
            stats.docs_deleted + stats.docs_duplicated
        );

        Ok(MergeOutcome {
            plan_index,
            targets: outputs,
            reclaim_map: Arc::new(reclaim_map),
            tasks: task_metas,
            truncate_failures,
            stats,
            already_completed: false,
        })
    }
}
