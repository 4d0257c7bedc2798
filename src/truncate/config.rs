//! Truncate index configuration.
//!
//! A profile says how to rank documents (sort field and order) and how many
//! to keep per term. The config then attaches profiles to inverted indexes;
//! each `(index, profile)` pair becomes one [`TruncateIndexProperty`].

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::error::{Result, SegmergeError};

/// Which end of the sort field ranks best.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    Ascending,
    #[default]
    Descending,
}

/// How many postings a truncated list keeps.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TruncateLimit {
    /// Keep at most `k` postings.
    TopK(usize),
    /// Keep a fraction of the target segment's documents, at least one.
    Ratio(f64),
}

impl TruncateLimit {
    /// Limit for a target segment holding `doc_count` documents.
    pub fn limit_for(&self, doc_count: u32) -> usize {
        match *self {
            TruncateLimit::TopK(k) => k,
            TruncateLimit::Ratio(ratio) => ((doc_count as f64 * ratio).ceil() as usize).max(1),
        }
    }

    fn validate(&self, profile: &str) -> Result<()> {
        match *self {
            TruncateLimit::TopK(0) => Err(SegmergeError::config(format!(
                "truncate profile {profile:?} keeps zero postings"
            ))),
            TruncateLimit::Ratio(r) if !(r > 0.0 && r <= 1.0) => Err(SegmergeError::config(
                format!("truncate profile {profile:?} ratio {r} not in (0, 1]"),
            )),
            _ => Ok(()),
        }
    }
}

/// Term-frequency gate evaluated before a term is truncated.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TriggerConfig {
    /// Only truncate terms with at least this many postings.
    #[serde(default)]
    pub min_doc_freq: Option<u32>,
    /// Only truncate terms present in at least this fraction of documents.
    #[serde(default)]
    pub min_doc_freq_ratio: Option<f64>,
}

/// One way of ranking and cutting posting lists.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TruncateProfile {
    pub name: String,
    pub sort_field: String,
    #[serde(default)]
    pub sort_order: SortOrder,
    pub limit: TruncateLimit,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trigger: Option<TriggerConfig>,
}

impl TruncateProfile {
    pub fn new(name: impl Into<String>, sort_field: impl Into<String>, limit: TruncateLimit) -> Self {
        TruncateProfile {
            name: name.into(),
            sort_field: sort_field.into(),
            sort_order: SortOrder::Descending,
            limit,
            trigger: None,
        }
    }

    pub fn with_sort_order(mut self, order: SortOrder) -> Self {
        self.sort_order = order;
        self
    }

    pub fn with_trigger(mut self, trigger: TriggerConfig) -> Self {
        self.trigger = Some(trigger);
        self
    }

    pub fn sort_key(&self) -> SortKey {
        SortKey {
            field: self.sort_field.clone(),
            order: self.sort_order,
        }
    }
}

/// Field and order a bucket map ranks by.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SortKey {
    pub field: String,
    pub order: SortOrder,
}

/// A truncated copy of one inverted index under one profile.
#[derive(Debug, Clone, PartialEq)]
pub struct TruncateIndexProperty {
    pub index_name: String,
    pub profile: TruncateProfile,
}

impl TruncateIndexProperty {
    /// Identifier used in logs and failure records.
    pub fn id(&self) -> String {
        format!("{}/{}", self.index_name, self.profile.name)
    }
}

/// Which inverted indexes get which truncated copies.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TruncateIndexConfig {
    pub profiles: Vec<TruncateProfile>,
    /// Index name to the profile names applied to it.
    #[serde(default)]
    pub indexes: BTreeMap<String, Vec<String>>,
}

impl TruncateIndexConfig {
    pub fn validate(&self) -> Result<()> {
        let mut names = BTreeSet::new();
        for profile in &self.profiles {
            if profile.name.is_empty() || profile.name.contains('/') {
                return Err(SegmergeError::config(format!(
                    "invalid truncate profile name {:?}",
                    profile.name
                )));
            }
            if !names.insert(profile.name.as_str()) {
                return Err(SegmergeError::config(format!(
                    "truncate profile {:?} defined twice",
                    profile.name
                )));
            }
            if profile.sort_field.is_empty() {
                return Err(SegmergeError::config(format!(
                    "truncate profile {:?} has no sort field",
                    profile.name
                )));
            }
            profile.limit.validate(&profile.name)?;
        }

        for (index, profiles) in &self.indexes {
            if let Some(missing) = profiles.iter().find(|p| !names.contains(p.as_str())) {
                return Err(SegmergeError::config(format!(
                    "index {index:?} refers to unknown truncate profile {missing:?}"
                )));
            }
        }
        Ok(())
    }

    pub fn profile(&self, name: &str) -> Option<&TruncateProfile> {
        self.profiles.iter().find(|p| p.name == name)
    }

    /// Properties of one index, in configured order.
    pub fn properties_for(&self, index_name: &str) -> Vec<TruncateIndexProperty> {
        self.indexes
            .get(index_name)
            .into_iter()
            .flatten()
            .filter_map(|name| self.profile(name))
            .map(|profile| TruncateIndexProperty {
                index_name: index_name.to_string(),
                profile: profile.clone(),
            })
            .collect()
    }

    /// Distinct sort keys used by the given indexes.
    pub fn sort_keys<'a>(&self, index_names: impl IntoIterator<Item = &'a str>) -> BTreeSet<SortKey> {
        index_names
            .into_iter()
            .flat_map(|index| self.properties_for(index))
            .map(|property| property.profile.sort_key())
            .collect()
    }
}
