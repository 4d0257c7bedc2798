//! Source segment model consumed by the merge engine.
//!
//! A merge never touches segment internals directly. It reads a frozen
//! [`SegmentMergeInfos`] snapshot plus the collaborator traits in
//! [`source`] and [`deletion`], and refers to each source segment by its
//! ordinal position (segment index) within that snapshot.

pub mod deletion;
pub mod info;
pub mod memory;
pub mod source;

pub use deletion::*;
pub use info::*;
pub use memory::*;
pub use source::*;

/// Local or merged document identifier.
pub type DocId = u32;

/// Process-unique segment identifier.
pub type SegmentId = u32;

/// Marker for a document that does not survive the merge.
pub const INVALID_DOCID: DocId = DocId::MAX;
