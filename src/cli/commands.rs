//! Command implementations for the segmerge CLI.
//!
//! Every command reads a merge output directory through [`FileStorage`] and
//! never writes to it.

use std::path::Path;

use log::debug;

use crate::cli::args::*;
use crate::cli::output::*;
use crate::error::{Result, SegmergeError};
use crate::merge::meta::{MergeMeta, RECLAIM_MAP_FILE, load_completed_tasks, plan_meta_dir};
use crate::merge::{MergePlan, ReclaimMap};
use crate::storage::{FileStorage, StorageConfig, join_path};

/// Execute a CLI command.
pub fn execute_command(args: SegmergeArgs) -> Result<()> {
    match &args.command {
        Command::Meta(meta_args) => {
            let report = meta_report(meta_args)?;
            output_result(&format!("Merge meta of plan {}", report.plan_index), &report, &args)
        }
        Command::Lookup(lookup_args) => {
            let result = lookup_doc(lookup_args)?;
            output_result("Doc id lookup", &result, &args)
        }
        Command::Check(check_args) => {
            let result = check_plan(check_args)?;
            output_result("Plan completion", &result, &args)
        }
    }
}

/// Open an existing merge output directory.
fn open_storage(dir: &Path) -> Result<FileStorage> {
    if !dir.is_dir() {
        return Err(SegmergeError::not_found(format!(
            "merge directory {}",
            dir.display()
        )));
    }
    FileStorage::new(dir, StorageConfig::default())
}

fn load_meta(storage: &FileStorage, plan_index: usize) -> Result<MergeMeta> {
    MergeMeta::load(storage, &plan_meta_dir(plan_index))?.ok_or_else(|| {
        SegmergeError::not_found(format!("merge meta of plan {plan_index}"))
    })
}

/// Summarise the merge meta of one plan.
pub fn meta_report(args: &MetaArgs) -> Result<MetaReport> {
    let storage = open_storage(&args.dir)?;
    let meta = load_meta(&storage, args.plan)?;
    let source_doc_count = meta.plan.input_segments.total_doc_count();

    Ok(MetaReport {
        plan_index: meta.plan_index,
        completed_at: meta.completed_at.to_rfc3339(),
        source_segments: meta.plan.input_segments.iter().map(|s| s.segment_id).collect(),
        source_doc_count,
        merged_doc_count: meta.total_doc_count(),
        reclaim_ratio: meta.stats.reclaim_ratio(source_doc_count),
        targets: meta.targets,
        stats: meta.stats,
        tasks: args.detailed.then_some(meta.tasks),
        truncate_failures: args.detailed.then_some(meta.failed_truncate_profiles),
    })
}

/// Translate an old doc id using the stored reclaim map.
pub fn lookup_doc(args: &LookupArgs) -> Result<LookupResult> {
    let storage = open_storage(&args.dir)?;
    let meta_dir = plan_meta_dir(args.plan);
    let reclaim_map = ReclaimMap::load(&storage, &join_path(&meta_dir, RECLAIM_MAP_FILE))?;

    if args.segment_index >= reclaim_map.segment_count() {
        return Err(SegmergeError::invalid_operation(format!(
            "segment index {} out of range, plan has {} segments",
            args.segment_index,
            reclaim_map.segment_count()
        )));
    }
    if args.old_doc_id >= reclaim_map.segment_doc_count(args.segment_index) {
        return Err(SegmergeError::invalid_operation(format!(
            "doc {} out of range for segment index {}",
            args.old_doc_id, args.segment_index
        )));
    }

    let mapped = reclaim_map.get_new_doc_id(args.segment_index, args.old_doc_id);
    // Target ids are only known once the plan completed.
    let target_segment_id = match (mapped, MergeMeta::load(&storage, &meta_dir)?) {
        (Some((_, target)), Some(meta)) => meta.targets.get(target).map(|t| t.target_segment_id),
        _ => None,
    };
    debug!(
        "lookup ({}, {}) in plan {} -> {mapped:?}",
        args.segment_index, args.old_doc_id, args.plan
    );

    Ok(LookupResult {
        segment_index: args.segment_index,
        old_doc_id: args.old_doc_id,
        reclaimed: mapped.is_none(),
        new_doc_id: mapped.map(|(doc, _)| doc),
        target_segment_index: mapped.map(|(_, target)| target),
        target_segment_id,
    })
}

/// Report whether the plan in `args.plan_file` already completed.
pub fn check_plan(args: &CheckArgs) -> Result<CheckResult> {
    let json = std::fs::read_to_string(&args.plan_file)?;
    let plan: MergePlan = serde_json::from_str(&json)?;
    plan.validate()?;

    let storage = open_storage(&args.dir)?;
    let meta_dir = plan_meta_dir(args.plan);
    let meta = MergeMeta::load(&storage, &meta_dir)?;
    let completed = meta.as_ref().is_some_and(|m| m.matches_plan(&plan));
    let completed_tasks = load_completed_tasks(&storage, &meta_dir)?
        .into_iter()
        .filter(|m| m.task.plan_index == args.plan)
        .map(|m| m.task.name)
        .collect();

    Ok(CheckResult {
        plan_index: args.plan,
        completed,
        plan_mismatch: meta.is_some() && !completed,
        completed_tasks,
    })
}
