//! The merge meta artifact persisted next to the output segments.
//!
//! Layout under the merge output directory:
//!
//! ```text
//! merge_meta/plan_<i>/meta.json       plan, targets and configuration used
//! merge_meta/plan_<i>/reclaim_map     binary ReclaimMap
//! merge_meta/plan_<i>/tasks/*.json    one marker per completed task
//! ```
//!
//! `meta.json` is written last, so its presence means the plan completed.

use std::io::{Read, Write};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::FieldMergePolicy;
use crate::error::{Result, SegmergeError};
use crate::merge::metrics::MergeStats;
use crate::merge::plan::{MergePlan, MergeTaskMeta, OutputSegmentMergeInfo};
use crate::storage::{Storage, join_path};
use crate::truncate::{TruncateFailure, TruncateIndexConfig};

pub const MERGE_META_DIR: &str = "merge_meta";
pub const META_FILE: &str = "meta.json";
pub const RECLAIM_MAP_FILE: &str = "reclaim_map";
pub const TASKS_DIR: &str = "tasks";
pub const MERGE_META_VERSION: u32 = 1;

/// Directory holding the meta of one plan.
pub fn plan_meta_dir(plan_index: usize) -> String {
    join_path(MERGE_META_DIR, &format!("plan_{plan_index}"))
}

/// Description of a completed merge plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergeMeta {
    pub version: u32,
    pub plan_index: usize,
    pub plan: MergePlan,
    pub plan_fingerprint: u32,
    pub targets: Vec<OutputSegmentMergeInfo>,
    #[serde(default)]
    pub fields: FieldMergePolicy,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub truncate: Option<TruncateIndexConfig>,
    #[serde(default)]
    pub failed_truncate_profiles: Vec<TruncateFailure>,
    #[serde(default)]
    pub tasks: Vec<MergeTaskMeta>,
    #[serde(default)]
    pub stats: MergeStats,
    pub completed_at: DateTime<Utc>,
}

impl MergeMeta {
    /// Whether this meta records exactly `plan` as completed.
    pub fn matches_plan(&self, plan: &MergePlan) -> bool {
        self.version == MERGE_META_VERSION && self.plan == *plan
    }

    /// Whether `plan` completed with the same field groups and truncate
    /// profiles, so rerunning it would write nothing new.
    pub fn matches_run(
        &self,
        plan: &MergePlan,
        fields: &FieldMergePolicy,
        truncate: Option<&TruncateIndexConfig>,
    ) -> bool {
        self.matches_plan(plan) && self.fields == *fields && self.truncate.as_ref() == truncate
    }

    pub fn total_doc_count(&self) -> u64 {
        self.targets.iter().map(|t| t.doc_count as u64).sum()
    }

    pub fn store(&self, storage: &dyn Storage, dir: &str) -> Result<()> {
        storage.create_dir(dir)?;
        let path = join_path(dir, META_FILE);
        let tmp = format!("{path}.tmp");
        let json = serde_json::to_vec_pretty(self)?;
        let mut output = storage.create_output(&tmp)?;
        output.write_all(&json)?;
        output.flush_and_sync()?;
        output.close()?;
        drop(output);
        storage.rename_file(&tmp, &path)
    }

    /// Load the meta in `dir`, `None` when the plan never completed.
    pub fn load(storage: &dyn Storage, dir: &str) -> Result<Option<MergeMeta>> {
        let path = join_path(dir, META_FILE);
        if !storage.file_exists(&path) {
            return Ok(None);
        }
        let meta: MergeMeta = serde_json::from_slice(&read_all(storage, &path)?)?;
        if meta.version != MERGE_META_VERSION {
            return Err(SegmergeError::storage(format!(
                "unsupported merge meta version {} in {path}",
                meta.version
            )));
        }
        Ok(Some(meta))
    }
}

fn read_all(storage: &dyn Storage, path: &str) -> Result<Vec<u8>> {
    let mut input = storage.open_input(path)?;
    let mut bytes = Vec::new();
    input.read_to_end(&mut bytes)?;
    Ok(bytes)
}

/// Completion marker of one task, with the truncate profiles it dropped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskMarker {
    #[serde(flatten)]
    pub task: MergeTaskMeta,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub truncate_failures: Vec<TruncateFailure>,
}

impl TaskMarker {
    pub fn new(task: MergeTaskMeta, truncate_failures: Vec<TruncateFailure>) -> Self {
        TaskMarker {
            task,
            truncate_failures,
        }
    }
}

/// Persist the completion marker of one task.
pub fn store_task_marker(storage: &dyn Storage, dir: &str, marker: &TaskMarker) -> Result<()> {
    let tasks_dir = join_path(dir, TASKS_DIR);
    storage.create_dir(&tasks_dir)?;
    let mut output = storage.create_output(&join_path(&tasks_dir, &marker.task.marker_name()))?;
    output.write_all(&serde_json::to_vec(marker)?)?;
    output.close()
}

/// Markers of all completed tasks under `dir`, ordered by task index.
pub fn load_completed_tasks(storage: &dyn Storage, dir: &str) -> Result<Vec<TaskMarker>> {
    let prefix = format!("{}/", join_path(dir, TASKS_DIR));
    let mut markers = Vec::new();
    for name in storage.list_files()? {
        if !name.starts_with(&prefix) || !name.ends_with(".json") {
            continue;
        }
        markers.push(serde_json::from_slice::<TaskMarker>(&read_all(storage, &name)?)?);
    }
    markers.sort_by_key(|m| m.task.task_index);
    Ok(markers)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::segment::SegmentMergeInfos;
    use crate::storage::MemoryStorage;
    use crate::truncate::{TruncateLimit, TruncateProfile};

    fn sample_meta() -> MergeMeta {
        let plan = MergePlan::new(SegmentMergeInfos::stacked(&[(1, 3, 1), (2, 2, 0)]), 1);
        let mut target = OutputSegmentMergeInfo::new(3, 0);
        target.doc_count = 4;
        MergeMeta {
            version: MERGE_META_VERSION,
            plan_index: 0,
            plan_fingerprint: plan.fingerprint().unwrap(),
            plan,
            targets: vec![target],
            fields: FieldMergePolicy {
                indexes: vec!["title".to_string()],
                ..FieldMergePolicy::default()
            },
            truncate: None,
            failed_truncate_profiles: Vec::new(),
            tasks: vec![MergeTaskMeta::new(0, 0, "documents", 4)],
            stats: MergeStats::default(),
            completed_at: Utc::now(),
        }
    }

    #[test]
    fn test_store_and_load() {
        let storage = MemoryStorage::new_default();
        let meta = sample_meta();
        let dir = plan_meta_dir(0);
        assert_eq!(dir, "merge_meta/plan_0");

        assert!(MergeMeta::load(&storage, &dir).unwrap().is_none());
        meta.store(&storage, &dir).unwrap();

        let loaded = MergeMeta::load(&storage, &dir).unwrap().unwrap();
        assert_eq!(loaded, meta);
        assert!(loaded.matches_plan(&meta.plan));
        assert_eq!(loaded.total_doc_count(), 4);
        assert!(!storage.file_exists("merge_meta/plan_0/meta.json.tmp"));

        let other = MergePlan::new(meta.plan.input_segments.clone(), 2);
        assert!(!loaded.matches_plan(&other));
    }

    #[test]
    fn test_changed_fields_or_profiles_do_not_match() {
        let meta = sample_meta();
        assert!(meta.matches_run(&meta.plan, &meta.fields, None));

        let mut fields = meta.fields.clone();
        fields.store_documents = true;
        assert!(!meta.matches_run(&meta.plan, &fields, None));

        let truncate = TruncateIndexConfig {
            profiles: vec![TruncateProfile::new("top", "price", TruncateLimit::TopK(10))],
            indexes: [("title".to_string(), vec!["top".to_string()])].into_iter().collect(),
        };
        assert!(!meta.matches_run(&meta.plan, &meta.fields, Some(&truncate)));
        assert!(meta.matches_plan(&meta.plan));
    }

    #[test]
    fn test_task_markers() {
        let storage = MemoryStorage::new_default();
        let dir = plan_meta_dir(1);
        let failure = TruncateFailure {
            index_name: "title".to_string(),
            profile_name: "top".to_string(),
            reason: "disk full".to_string(),
        };
        let marker = TaskMarker::new(MergeTaskMeta::new(1, 2, "index:title", 9), vec![failure]);
        store_task_marker(&storage, &dir, &marker).unwrap();
        store_task_marker(
            &storage,
            &dir,
            &TaskMarker::new(MergeTaskMeta::new(1, 0, "attribute:price", 3), Vec::new()),
        )
        .unwrap();

        let markers = load_completed_tasks(&storage, &dir).unwrap();
        let indexes: Vec<usize> = markers.iter().map(|m| m.task.task_index).collect();
        assert_eq!(indexes, vec![0, 2]);
        assert_eq!(markers[1], marker);
        assert!(markers[0].truncate_failures.is_empty());
        assert!(load_completed_tasks(&storage, &plan_meta_dir(2)).unwrap().is_empty());
    }

    #[test]
    fn test_plain_task_marker_loads() {
        let storage = MemoryStorage::new_default();
        let dir = plan_meta_dir(0);
        storage.create_dir("merge_meta/plan_0/tasks").unwrap();
        let json = br#"{"plan_index":0,"task_index":1,"name":"summary","cost":4}"#;
        let mut output = storage.create_output("merge_meta/plan_0/tasks/task_0_1.json").unwrap();
        output.write_all(json).unwrap();
        output.close().unwrap();

        let markers = load_completed_tasks(&storage, &dir).unwrap();
        assert_eq!(markers[0].task, MergeTaskMeta::new(0, 1, "summary", 4));
        assert!(markers[0].truncate_failures.is_empty());
    }
}
