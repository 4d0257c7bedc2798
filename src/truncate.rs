//! Truncated (top-K) copies of inverted indexes.
//!
//! For each configured `(index, profile)` pair the merge writes a second
//! posting file per target segment that keeps only the best-ranked documents
//! of each term. Ranks come from a [`BucketMap`] built over the profile's
//! sort field before any truncate writer runs.
//!
//! A failing profile never fails the merge: its output is dropped, the
//! failure is logged and recorded in the merge meta.

pub mod bucket_map;
pub mod config;
pub mod trigger;
pub mod writer;

pub use bucket_map::*;
pub use config::*;
pub use trigger::*;
pub use writer::*;

use serde::{Deserialize, Serialize};

/// A truncate profile whose output was dropped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TruncateFailure {
    pub index_name: String,
    pub profile_name: String,
    pub reason: String,
}

impl TruncateFailure {
    pub fn new(property: &TruncateIndexProperty, reason: impl Into<String>) -> Self {
        TruncateFailure {
            index_name: property.index_name.clone(),
            profile_name: property.profile.name.clone(),
            reason: reason.into(),
        }
    }
}
