//! Merge plans and the descriptors derived from them.

use serde::{Deserialize, Serialize};

use crate::error::{Result, SegmergeError};
use crate::merge::split::SplitStrategyConfig;
use crate::segment::{SegmentId, SegmentMergeInfos};

/// Which source segments combine into how many target segments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergePlan {
    pub input_segments: SegmentMergeInfos,
    pub output_segment_count: usize,
    #[serde(default)]
    pub split: SplitStrategyConfig,
    /// First target segment id; defaults to one past the largest input id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_segment_base: Option<SegmentId>,
}

impl MergePlan {
    /// A plan using the default split strategy.
    pub fn new(input_segments: SegmentMergeInfos, output_segment_count: usize) -> Self {
        MergePlan {
            input_segments,
            output_segment_count,
            split: SplitStrategyConfig::default(),
            target_segment_base: None,
        }
    }

    pub fn with_split(mut self, split: SplitStrategyConfig) -> Self {
        self.split = split;
        self
    }

    pub fn with_target_segment_base(mut self, base: SegmentId) -> Self {
        self.target_segment_base = Some(base);
        self
    }

    /// Check everything that can be checked without touching any segment.
    pub fn validate(&self) -> Result<()> {
        self.input_segments.validate()?;
        if self.output_segment_count == 0 {
            return Err(SegmergeError::config("output segment count must be positive"));
        }
        if self.split.name.is_empty() {
            return Err(SegmergeError::config("split strategy name must not be empty"));
        }
        let base = self.first_target_segment_id()?;
        if base
            .checked_add(self.output_segment_count as SegmentId - 1)
            .is_none()
        {
            return Err(SegmergeError::config(format!(
                "target segment ids starting at {base} overflow"
            )));
        }
        if let Some(clash) = self
            .target_segment_ids()?
            .into_iter()
            .find(|id| self.input_segments.index_of(*id).is_some())
        {
            return Err(SegmergeError::config(format!(
                "target segment id {clash} collides with a source segment"
            )));
        }
        Ok(())
    }

    fn first_target_segment_id(&self) -> Result<SegmentId> {
        match self.target_segment_base {
            Some(base) => Ok(base),
            None => self
                .input_segments
                .max_segment_id()
                .and_then(|max| max.checked_add(1))
                .ok_or_else(|| SegmergeError::config("cannot derive target segment ids")),
        }
    }

    /// Ids of the target segments, in target index order.
    pub fn target_segment_ids(&self) -> Result<Vec<SegmentId>> {
        let base = self.first_target_segment_id()?;
        Ok((0..self.output_segment_count as SegmentId)
            .map(|i| base + i)
            .collect())
    }

    /// Output descriptors with paths assigned and doc counts still zero.
    pub fn output_segments(&self) -> Result<Vec<OutputSegmentMergeInfo>> {
        Ok(self
            .target_segment_ids()?
            .into_iter()
            .enumerate()
            .map(|(index, id)| OutputSegmentMergeInfo::new(id, index))
            .collect())
    }

    /// Stable fingerprint of the plan's JSON form.
    pub fn fingerprint(&self) -> Result<u32> {
        let bytes = serde_json::to_vec(self)?;
        Ok(crc32fast::hash(&bytes))
    }
}

/// Directory name of a target segment.
pub fn segment_dir_name(segment_id: SegmentId) -> String {
    format!("segment_{segment_id}")
}

/// Descriptor of one target segment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputSegmentMergeInfo {
    pub target_segment_id: SegmentId,
    pub target_segment_index: usize,
    pub output_path: String,
    pub doc_count: u32,
}

impl OutputSegmentMergeInfo {
    pub fn new(target_segment_id: SegmentId, target_segment_index: usize) -> Self {
        OutputSegmentMergeInfo {
            target_segment_id,
            target_segment_index,
            output_path: segment_dir_name(target_segment_id),
            doc_count: 0,
        }
    }
}

/// Identity of one executable task of a plan, persisted once it completes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MergeTaskMeta {
    pub plan_index: usize,
    pub task_index: usize,
    pub name: String,
    pub cost: u64,
}

impl MergeTaskMeta {
    pub fn new(plan_index: usize, task_index: usize, name: impl Into<String>, cost: u64) -> Self {
        MergeTaskMeta {
            plan_index,
            task_index,
            name: name.into(),
            cost,
        }
    }

    /// File name of the completion marker.
    pub fn marker_name(&self) -> String {
        format!("task_{}_{}.json", self.plan_index, self.task_index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn infos() -> SegmentMergeInfos {
        SegmentMergeInfos::stacked(&[(3, 5, 0), (7, 2, 1)])
    }

    #[test]
    fn test_target_ids_follow_inputs() {
        let plan = MergePlan::new(infos(), 2);
        assert!(plan.validate().is_ok());
        assert_eq!(plan.target_segment_ids().unwrap(), vec![8, 9]);

        let outputs = plan.output_segments().unwrap();
        assert_eq!(outputs[1].output_path, "segment_9");
        assert_eq!(outputs[1].target_segment_index, 1);
    }

    #[test]
    fn test_explicit_target_base() {
        let plan = MergePlan::new(infos(), 1).with_target_segment_base(100);
        assert_eq!(plan.target_segment_ids().unwrap(), vec![100]);

        let clash = MergePlan::new(infos(), 2).with_target_segment_base(2);
        assert!(clash.validate().unwrap_err().is_config());
    }

    #[test]
    fn test_validate_rejects_zero_outputs() {
        assert!(MergePlan::new(infos(), 0).validate().unwrap_err().is_config());
        assert!(MergePlan::new(SegmentMergeInfos::default(), 1)
            .validate()
            .unwrap_err()
            .is_config());
    }

    #[test]
    fn test_json_and_fingerprint() {
        let plan = MergePlan::new(infos(), 2);
        let json = serde_json::to_string(&plan).unwrap();
        let back: MergePlan = serde_json::from_str(&json).unwrap();
        assert_eq!(back, plan);
        assert_eq!(back.fingerprint().unwrap(), plan.fingerprint().unwrap());

        let other = MergePlan::new(infos(), 1);
        assert_ne!(other.fingerprint().unwrap(), plan.fingerprint().unwrap());
    }

    #[test]
    fn test_task_marker_name() {
        let meta = MergeTaskMeta::new(0, 3, "attribute:price", 10);
        assert_eq!(meta.marker_name(), "task_0_3.json");
    }
}
