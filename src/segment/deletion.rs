//! Deletion state of source segments.
//!
//! Deletions are logical: a bit per local document, set when the document
//! was deleted or superseded. The merge engine only reads this state through
//! [`DeletionProvider`].

use ahash::AHashMap;
use bit_vec::BitVec;

use crate::error::{Result, SegmergeError};
use crate::segment::{DocId, SegmentId};
use crate::storage::structured::{StructReader, StructWriter};
use crate::storage::{StorageInput, StorageOutput};

const DELETION_BITMAP_MAGIC: u32 = 0x44454C42; // "DELB"
const DELETION_BITMAP_VERSION: u32 = 1;

/// Answers whether a local document of a source segment is deleted.
pub trait DeletionProvider: Send + Sync {
    /// Check if a local document is deleted.
    fn is_deleted(&self, segment_id: SegmentId, doc_id: DocId) -> bool;
}

/// Provider for merges whose sources carry no deletions.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoDeletions;

impl DeletionProvider for NoDeletions {
    fn is_deleted(&self, _segment_id: SegmentId, _doc_id: DocId) -> bool {
        false
    }
}

/// A bitmap-based deletion tracker for one segment.
#[derive(Debug, Clone, PartialEq)]
pub struct DeletionBitmap {
    /// Segment ID this bitmap belongs to.
    pub segment_id: SegmentId,

    /// Bitmap of deleted documents (bit set = deleted).
    deleted_docs: BitVec,

    /// Number of deleted documents.
    deleted_count: u32,
}

impl DeletionBitmap {
    /// Create an empty deletion bitmap for a segment.
    pub fn new(segment_id: SegmentId, total_docs: u32) -> Self {
        DeletionBitmap {
            segment_id,
            deleted_docs: BitVec::from_elem(total_docs as usize, false),
            deleted_count: 0,
        }
    }

    /// Mark a document as deleted. Returns false if it already was.
    pub fn delete_document(&mut self, doc_id: DocId) -> Result<bool> {
        if doc_id as usize >= self.deleted_docs.len() {
            return Err(SegmergeError::invalid_operation(format!(
                "Document ID {doc_id} out of range for segment {}",
                self.segment_id
            )));
        }

        let was_already_deleted = self.deleted_docs.get(doc_id as usize).unwrap_or(false);
        if !was_already_deleted {
            self.deleted_docs.set(doc_id as usize, true);
            self.deleted_count += 1;
        }

        Ok(!was_already_deleted)
    }

    /// Check if a document is deleted.
    pub fn is_deleted(&self, doc_id: DocId) -> bool {
        self.deleted_docs.get(doc_id as usize).unwrap_or(false)
    }

    /// Number of documents covered by this bitmap.
    pub fn total_docs(&self) -> u32 {
        self.deleted_docs.len() as u32
    }

    /// Number of deleted documents.
    pub fn deleted_count(&self) -> u32 {
        self.deleted_count
    }

    /// Get number of live (non-deleted) documents.
    pub fn live_count(&self) -> u32 {
        self.total_docs() - self.deleted_count
    }

    /// Write bitmap to storage.
    pub fn write_to_storage<W: StorageOutput>(&self, writer: &mut StructWriter<W>) -> Result<()> {
        writer.write_u32(DELETION_BITMAP_MAGIC)?;
        writer.write_u32(DELETION_BITMAP_VERSION)?;

        writer.write_u32(self.segment_id)?;
        writer.write_u32(self.total_docs())?;
        writer.write_u32(self.deleted_count)?;
        writer.write_bytes(&self.deleted_docs.to_bytes())?;

        Ok(())
    }

    /// Read bitmap from storage.
    pub fn read_from_storage<R: StorageInput>(reader: &mut StructReader<R>) -> Result<Self> {
        let magic = reader.read_u32()?;
        if magic != DELETION_BITMAP_MAGIC {
            return Err(SegmergeError::storage("Invalid deletion bitmap format"));
        }

        let version = reader.read_u32()?;
        if version != DELETION_BITMAP_VERSION {
            return Err(SegmergeError::storage(format!(
                "Unsupported bitmap version: {version}"
            )));
        }

        let segment_id = reader.read_u32()?;
        let total_docs = reader.read_u32()?;
        let deleted_count = reader.read_u32()?;

        let mut deleted_docs = BitVec::from_bytes(&reader.read_bytes()?);
        deleted_docs.truncate(total_docs as usize);
        if deleted_docs.len() != total_docs as usize {
            return Err(SegmergeError::storage(format!(
                "Deletion bitmap of segment {segment_id} is shorter than {total_docs} docs"
            )));
        }

        Ok(DeletionBitmap {
            segment_id,
            deleted_docs,
            deleted_count,
        })
    }
}

/// Deletion bitmaps for a set of segments, keyed by segment id.
///
/// Segments without a bitmap are treated as having no deletions.
#[derive(Debug, Clone, Default)]
pub struct DeletionMap {
    bitmaps: AHashMap<SegmentId, DeletionBitmap>,
}

impl DeletionMap {
    /// Create an empty deletion map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the bitmap of one segment, replacing any previous one.
    pub fn insert(&mut self, bitmap: DeletionBitmap) {
        self.bitmaps.insert(bitmap.segment_id, bitmap);
    }

    /// Bitmap of a segment, if registered.
    pub fn get(&self, segment_id: SegmentId) -> Option<&DeletionBitmap> {
        self.bitmaps.get(&segment_id)
    }

    /// Number of deleted documents registered for a segment.
    pub fn deleted_count(&self, segment_id: SegmentId) -> u32 {
        self.bitmaps
            .get(&segment_id)
            .map(DeletionBitmap::deleted_count)
            .unwrap_or(0)
    }
}

impl DeletionProvider for DeletionMap {
    fn is_deleted(&self, segment_id: SegmentId, doc_id: DocId) -> bool {
        self.bitmaps
            .get(&segment_id)
            .is_some_and(|bitmap| bitmap.is_deleted(doc_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{MemoryStorage, Storage};

    #[test]
    fn test_delete_document() {
        let mut bitmap = DeletionBitmap::new(7, 10);

        assert!(bitmap.delete_document(3).unwrap());
        assert!(!bitmap.delete_document(3).unwrap());
        assert!(bitmap.is_deleted(3));
        assert!(!bitmap.is_deleted(4));
        assert_eq!(bitmap.deleted_count(), 1);
        assert_eq!(bitmap.live_count(), 9);

        assert!(bitmap.delete_document(10).is_err());
    }

    #[test]
    fn test_bitmap_persistence() {
        let storage = MemoryStorage::new_default();
        let mut bitmap = DeletionBitmap::new(2, 13);
        bitmap.delete_document(0).unwrap();
        bitmap.delete_document(12).unwrap();

        {
            let mut writer = StructWriter::new(storage.create_output("del").unwrap());
            bitmap.write_to_storage(&mut writer).unwrap();
            writer.close().unwrap();
        }

        let mut reader = StructReader::new(storage.open_input("del").unwrap()).unwrap();
        let loaded = DeletionBitmap::read_from_storage(&mut reader).unwrap();
        assert!(reader.verify_checksum().unwrap());
        assert_eq!(loaded, bitmap);
    }

    #[test]
    fn test_deletion_map_provider() {
        let mut map = DeletionMap::new();
        let mut bitmap = DeletionBitmap::new(1, 3);
        bitmap.delete_document(1).unwrap();
        map.insert(bitmap);

        assert!(map.is_deleted(1, 1));
        assert!(!map.is_deleted(1, 0));
        assert!(!map.is_deleted(2, 1));
        assert_eq!(map.deleted_count(1), 1);
        assert_eq!(map.deleted_count(2), 0);
        assert!(!NoDeletions.is_deleted(1, 1));
    }
}
