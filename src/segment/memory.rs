//! In-memory source segments.
//!
//! [`MemorySegmentSet`] implements every read-side collaborator trait, which
//! makes it the reference source for tests, benchmarks and dry runs.

use std::collections::BTreeMap;

use ahash::AHashMap;

use crate::error::{Result, SegmergeError};
use crate::segment::deletion::{DeletionBitmap, DeletionProvider};
use crate::segment::info::SegmentMergeInfos;
use crate::segment::source::{
    AttributeValue, AttributeValueReader, DocumentSource, Posting, PostingSource,
    PrimaryKeySource,
};
use crate::segment::{DocId, SegmentId};

/// One immutable in-memory segment.
#[derive(Debug, Clone)]
pub struct MemorySegment {
    segment_id: SegmentId,
    doc_count: u32,
    deletions: DeletionBitmap,
    attributes: AHashMap<String, Vec<Option<AttributeValue>>>,
    indexes: AHashMap<String, BTreeMap<String, Vec<Posting>>>,
    documents: Vec<Option<Vec<u8>>>,
    primary_keys: Vec<Option<String>>,
}

impl MemorySegment {
    /// Create a segment with `doc_count` empty documents.
    pub fn new(segment_id: SegmentId, doc_count: u32) -> Self {
        MemorySegment {
            segment_id,
            doc_count,
            deletions: DeletionBitmap::new(segment_id, doc_count),
            attributes: AHashMap::new(),
            indexes: AHashMap::new(),
            documents: vec![None; doc_count as usize],
            primary_keys: vec![None; doc_count as usize],
        }
    }

    pub fn segment_id(&self) -> SegmentId {
        self.segment_id
    }

    pub fn doc_count(&self) -> u32 {
        self.doc_count
    }

    pub fn deleted_count(&self) -> u32 {
        self.deletions.deleted_count()
    }

    fn check_doc(&self, doc_id: DocId) -> Result<()> {
        if doc_id >= self.doc_count {
            return Err(SegmergeError::invalid_operation(format!(
                "doc {doc_id} out of range for segment {} with {} docs",
                self.segment_id, self.doc_count
            )));
        }
        Ok(())
    }

    /// Mark a document deleted.
    pub fn delete(&mut self, doc_id: DocId) -> Result<&mut Self> {
        self.deletions.delete_document(doc_id)?;
        Ok(self)
    }

    /// Set an attribute value of a document.
    pub fn set_attribute(
        &mut self,
        field: &str,
        doc_id: DocId,
        value: AttributeValue,
    ) -> Result<&mut Self> {
        self.check_doc(doc_id)?;
        let doc_count = self.doc_count as usize;
        let column = self
            .attributes
            .entry(field.to_string())
            .or_insert_with(|| vec![None; doc_count]);
        column[doc_id as usize] = Some(value);
        Ok(self)
    }

    /// Add a posting; postings of a term must be added in doc id order.
    pub fn add_posting(
        &mut self,
        index: &str,
        term: &str,
        doc_id: DocId,
        term_freq: u32,
    ) -> Result<&mut Self> {
        self.check_doc(doc_id)?;
        let list = self
            .indexes
            .entry(index.to_string())
            .or_default()
            .entry(term.to_string())
            .or_default();
        if list.last().is_some_and(|p| p.doc_id >= doc_id) {
            return Err(SegmergeError::invalid_operation(format!(
                "postings of term {term:?} must be added in increasing doc id order"
            )));
        }
        list.push(Posting::new(doc_id, term_freq));
        Ok(self)
    }

    /// Set the stored bytes of a document.
    pub fn set_document(&mut self, doc_id: DocId, data: impl Into<Vec<u8>>) -> Result<&mut Self> {
        self.check_doc(doc_id)?;
        self.documents[doc_id as usize] = Some(data.into());
        Ok(self)
    }

    /// Set the primary key of a document.
    pub fn set_primary_key(&mut self, doc_id: DocId, key: impl Into<String>) -> Result<&mut Self> {
        self.check_doc(doc_id)?;
        self.primary_keys[doc_id as usize] = Some(key.into());
        Ok(self)
    }
}

/// An ordered arena of in-memory segments, oldest first.
#[derive(Debug, Clone, Default)]
pub struct MemorySegmentSet {
    segments: Vec<MemorySegment>,
    by_id: AHashMap<SegmentId, usize>,
}

impl MemorySegmentSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a segment; it becomes the newest one.
    pub fn push(&mut self, segment: MemorySegment) -> Result<()> {
        if self.by_id.contains_key(&segment.segment_id) {
            return Err(SegmergeError::invalid_operation(format!(
                "segment {} already registered",
                segment.segment_id
            )));
        }
        self.by_id.insert(segment.segment_id, self.segments.len());
        self.segments.push(segment);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Snapshot of all segments, stacked in insertion order.
    pub fn merge_infos(&self) -> SegmentMergeInfos {
        let stacked: Vec<_> = self
            .segments
            .iter()
            .map(|s| (s.segment_id, s.doc_count, s.deleted_count()))
            .collect();
        SegmentMergeInfos::stacked(&stacked)
    }

    fn segment(&self, segment_id: SegmentId) -> Result<&MemorySegment> {
        self.by_id
            .get(&segment_id)
            .map(|&idx| &self.segments[idx])
            .ok_or_else(|| SegmergeError::not_found(format!("segment {segment_id}")))
    }
}

impl DeletionProvider for MemorySegmentSet {
    fn is_deleted(&self, segment_id: SegmentId, doc_id: DocId) -> bool {
        self.segment(segment_id)
            .is_ok_and(|segment| segment.deletions.is_deleted(doc_id))
    }
}

impl AttributeValueReader for MemorySegmentSet {
    fn read(
        &self,
        field: &str,
        segment_id: SegmentId,
        doc_id: DocId,
    ) -> Result<Option<AttributeValue>> {
        let segment = self.segment(segment_id)?;
        Ok(segment
            .attributes
            .get(field)
            .and_then(|column| column.get(doc_id as usize))
            .cloned()
            .flatten())
    }
}

impl PostingSource for MemorySegmentSet {
    fn terms(&self, index: &str, segment_id: SegmentId) -> Result<Vec<String>> {
        let segment = self.segment(segment_id)?;
        Ok(segment
            .indexes
            .get(index)
            .map(|terms| terms.keys().cloned().collect())
            .unwrap_or_default())
    }

    fn postings(&self, index: &str, segment_id: SegmentId, term: &str) -> Result<Vec<Posting>> {
        let segment = self.segment(segment_id)?;
        Ok(segment
            .indexes
            .get(index)
            .and_then(|terms| terms.get(term))
            .cloned()
            .unwrap_or_default())
    }
}

impl DocumentSource for MemorySegmentSet {
    fn document(&self, segment_id: SegmentId, doc_id: DocId) -> Result<Option<Vec<u8>>> {
        let segment = self.segment(segment_id)?;
        Ok(segment.documents.get(doc_id as usize).cloned().flatten())
    }
}

impl PrimaryKeySource for MemorySegmentSet {
    fn primary_key(&self, segment_id: SegmentId, doc_id: DocId) -> Result<Option<String>> {
        let segment = self.segment(segment_id)?;
        Ok(segment.primary_keys.get(doc_id as usize).cloned().flatten())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_set() -> MemorySegmentSet {
        let mut seg0 = MemorySegment::new(10, 3);
        seg0.delete(1).unwrap();
        seg0.set_attribute("price", 0, AttributeValue::Int(5)).unwrap();
        seg0.add_posting("title", "rust", 0, 2).unwrap();
        seg0.add_posting("title", "rust", 2, 1).unwrap();
        seg0.set_document(2, b"doc two".to_vec()).unwrap();

        let mut seg1 = MemorySegment::new(11, 2);
        seg1.set_primary_key(1, "pk-1").unwrap();

        let mut set = MemorySegmentSet::new();
        set.push(seg0).unwrap();
        set.push(seg1).unwrap();
        set
    }

    #[test]
    fn test_merge_infos() {
        let set = sample_set();
        let infos = set.merge_infos();

        assert_eq!(infos.len(), 2);
        assert_eq!(infos.get(0).unwrap().deleted_doc_count, 1);
        assert_eq!(infos.get(1).unwrap().base_doc_id, 3);
        assert!(infos.validate().is_ok());
    }

    #[test]
    fn test_collaborator_reads() {
        let set = sample_set();

        assert!(set.is_deleted(10, 1));
        assert!(!set.is_deleted(11, 1));
        assert_eq!(set.read("price", 10, 0).unwrap(), Some(AttributeValue::Int(5)));
        assert_eq!(set.read("price", 10, 2).unwrap(), None);
        assert_eq!(set.terms("title", 10).unwrap(), vec!["rust".to_string()]);
        assert_eq!(set.postings("title", 10, "rust").unwrap().len(), 2);
        assert!(set.postings("title", 11, "rust").unwrap().is_empty());
        assert_eq!(set.document(10, 2).unwrap(), Some(b"doc two".to_vec()));
        assert_eq!(set.primary_key(11, 1).unwrap(), Some("pk-1".to_string()));
        assert!(set.read("price", 99, 0).is_err());
    }

    #[test]
    fn test_rejects_bad_input() {
        let mut seg = MemorySegment::new(1, 2);
        assert!(seg.set_attribute("a", 2, AttributeValue::Int(1)).is_err());
        seg.add_posting("i", "t", 1, 1).unwrap();
        assert!(seg.add_posting("i", "t", 0, 1).is_err());

        let mut set = MemorySegmentSet::new();
        set.push(MemorySegment::new(1, 1)).unwrap();
        assert!(set.push(MemorySegment::new(1, 1)).is_err());
    }
}
