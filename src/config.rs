//! Engine configuration.
//!
//! ```
//! use segmerge::config::MergeConfig;
//!
//! let config = MergeConfig::from_json_str(r#"{
//!     "max_memory_mb": 256,
//!     "fields": { "attributes": ["price"], "indexes": ["title"] }
//! }"#).unwrap();
//! assert_eq!(config.fields.attributes, vec!["price".to_string()]);
//! assert!(config.thread_count > 0);
//! ```

use std::collections::BTreeSet;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SegmergeError};
use crate::truncate::TruncateIndexConfig;

/// Which field groups are carried into the target segments.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FieldMergePolicy {
    /// Attribute fields to copy.
    #[serde(default)]
    pub attributes: Vec<String>,

    /// Inverted indexes to merge.
    #[serde(default)]
    pub indexes: Vec<String>,

    /// Whether stored documents are copied.
    #[serde(default)]
    pub store_documents: bool,
}

/// Configuration for merge operations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MergeConfig {
    /// Memory budget shared by concurrently running tasks.
    pub max_memory_mb: u64,

    /// Worker threads.
    pub thread_count: usize,

    /// Skip tasks whose completion marker already exists.
    pub resume_completed_tasks: bool,

    /// Field groups to merge.
    pub fields: FieldMergePolicy,

    /// Truncated index copies to build.
    pub truncate: Option<TruncateIndexConfig>,
}

impl Default for MergeConfig {
    fn default() -> Self {
        MergeConfig {
            max_memory_mb: 512,
            thread_count: num_cpus::get(),
            resume_completed_tasks: false,
            fields: FieldMergePolicy::default(),
            truncate: None,
        }
    }
}

impl MergeConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: MergeConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let json = std::fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&json)
    }

    /// Budget in bytes handed to the scheduler.
    pub fn memory_budget_bytes(&self) -> u64 {
        self.max_memory_mb.saturating_mul(1024 * 1024)
    }

    pub fn validate(&self) -> Result<()> {
        if self.thread_count == 0 {
            return Err(SegmergeError::config("thread_count must be positive"));
        }
        if self.max_memory_mb == 0 {
            return Err(SegmergeError::config("max_memory_mb must be positive"));
        }

        let mut seen = BTreeSet::new();
        for field in self.fields.attributes.iter().chain(&self.fields.indexes) {
            if field.is_empty() || field.contains('/') {
                return Err(SegmergeError::config(format!("invalid field name {field:?}")));
            }
        }
        for field in &self.fields.attributes {
            if !seen.insert(field) {
                return Err(SegmergeError::config(format!("attribute {field:?} listed twice")));
            }
        }
        seen.clear();
        for index in &self.fields.indexes {
            if !seen.insert(index) {
                return Err(SegmergeError::config(format!("index {index:?} listed twice")));
            }
        }

        if let Some(truncate) = &self.truncate {
            truncate.validate()?;
            if let Some(unknown) = truncate
                .indexes
                .keys()
                .find(|index| !self.fields.indexes.contains(index))
            {
                return Err(SegmergeError::config(format!(
                    "truncate config names index {unknown:?} which is not merged"
                )));
            }
        }
        Ok(())
    }
}
