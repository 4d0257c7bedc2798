//! Posting file written for merged and truncated inverted indexes.
//!
//! Layout: magic, version, then one record per term (`1u8`, term, doc ids
//! delta-coded, term frequencies), a `0u8` terminator, the term count, and
//! the trailing checksum of [`StructWriter`].

use crate::error::{Result, SegmergeError};
use crate::segment::Posting;
use crate::storage::{Storage, StorageOutput, StructReader, StructWriter};

const POSTING_FILE_MAGIC: u32 = 0x504F5354; // "POST"
const POSTING_FILE_VERSION: u32 = 1;

/// Streams term posting lists to one file.
pub struct PostingFileWriter {
    writer: StructWriter<Box<dyn StorageOutput>>,
    term_count: u64,
    last_term: Option<String>,
}

impl PostingFileWriter {
    pub fn create(storage: &dyn Storage, name: &str) -> Result<Self> {
        let mut writer = StructWriter::new(storage.create_output(name)?);
        writer.write_u32(POSTING_FILE_MAGIC)?;
        writer.write_u32(POSTING_FILE_VERSION)?;
        Ok(PostingFileWriter {
            writer,
            term_count: 0,
            last_term: None,
        })
    }

    /// Append a term. Terms must arrive in strictly ascending order and
    /// postings in ascending doc id order.
    pub fn write_term(&mut self, term: &str, postings: &[Posting]) -> Result<()> {
        if self.last_term.as_deref().is_some_and(|last| last >= term) {
            return Err(SegmergeError::invalid_operation(format!(
                "term {term:?} written out of order"
            )));
        }
        if postings.windows(2).any(|w| w[0].doc_id >= w[1].doc_id) {
            return Err(SegmergeError::invalid_operation(format!(
                "postings of term {term:?} are not in doc id order"
            )));
        }

        self.writer.write_u8(1)?;
        self.writer.write_string(term)?;
        let doc_ids: Vec<u32> = postings.iter().map(|p| p.doc_id).collect();
        self.writer.write_delta_compressed_u32s(&doc_ids)?;
        for posting in postings {
            self.writer.write_varint(posting.term_freq as u64)?;
        }
        self.term_count += 1;
        self.last_term = Some(term.to_string());
        Ok(())
    }

    pub fn term_count(&self) -> u64 {
        self.term_count
    }

    pub fn close(mut self) -> Result<()> {
        self.writer.write_u8(0)?;
        self.writer.write_u64(self.term_count)?;
        self.writer.close()
    }
}

/// Read a whole posting file back, verifying its checksum.
pub fn read_posting_file(storage: &dyn Storage, name: &str) -> Result<Vec<(String, Vec<Posting>)>> {
    let mut reader = StructReader::new(storage.open_input(name)?)?;
    if reader.read_u32()? != POSTING_FILE_MAGIC {
        return Err(SegmergeError::storage(format!("{name} is not a posting file")));
    }
    let version = reader.read_u32()?;
    if version != POSTING_FILE_VERSION {
        return Err(SegmergeError::storage(format!(
            "unsupported posting file version {version}"
        )));
    }

    let mut terms = Vec::new();
    while reader.read_u8()? == 1 {
        let term = reader.read_string()?;
        let doc_ids = reader.read_delta_compressed_u32s()?;
        let mut postings = Vec::with_capacity(doc_ids.len());
        for doc_id in doc_ids {
            postings.push(Posting::new(doc_id, reader.read_varint()? as u32));
        }
        terms.push((term, postings));
    }

    let term_count = reader.read_u64()?;
    if term_count != terms.len() as u64 {
        return Err(SegmergeError::storage(format!(
            "{name} declares {term_count} terms but holds {}",
            terms.len()
        )));
    }
    if !reader.verify_checksum()? {
        return Err(SegmergeError::storage(format!("checksum mismatch in {name}")));
    }
    Ok(terms)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;

    #[test]
    fn test_write_and_read() {
        let storage = MemoryStorage::new_default();
        let mut writer = PostingFileWriter::create(&storage, "postings").unwrap();
        writer
            .write_term("apple", &[Posting::new(0, 2), Posting::new(5, 1)])
            .unwrap();
        writer.write_term("banana", &[Posting::new(3, 4)]).unwrap();
        assert_eq!(writer.term_count(), 2);
        writer.close().unwrap();

        let terms = read_posting_file(&storage, "postings").unwrap();
        assert_eq!(terms.len(), 2);
        assert_eq!(terms[0].0, "apple");
        assert_eq!(terms[0].1, vec![Posting::new(0, 2), Posting::new(5, 1)]);
        assert_eq!(terms[1].1, vec![Posting::new(3, 4)]);
    }

    #[test]
    fn test_rejects_unordered_input() {
        let storage = MemoryStorage::new_default();
        let mut writer = PostingFileWriter::create(&storage, "postings").unwrap();
        writer.write_term("b", &[Posting::new(1, 1)]).unwrap();
        assert!(writer.write_term("a", &[Posting::new(1, 1)]).is_err());
        assert!(writer
            .write_term("c", &[Posting::new(4, 1), Posting::new(2, 1)])
            .is_err());
    }

    #[test]
    fn test_empty_file() {
        let storage = MemoryStorage::new_default();
        PostingFileWriter::create(&storage, "empty")
            .unwrap()
            .close()
            .unwrap();
        assert!(read_posting_file(&storage, "empty").unwrap().is_empty());
    }
}
