//! Stored (summary) document reducer.

use std::sync::Arc;

use log::info;

use crate::error::{Result, SegmergeError};
use crate::merge::doc_heap::DocumentMergeInfoHeap;
use crate::merge::reducer::{FieldReducer, ReduceContext};
use crate::segment::DocumentSource;
use crate::storage::{Storage, StructReader, StructWriter, join_path};
use crate::truncate::TruncateFailure;

const SUMMARY_FILE_MAGIC: u32 = 0x53554D4D; // "SUMM"
const SUMMARY_FILE_VERSION: u32 = 1;

pub const SUMMARY_DIR: &str = "summary";
pub const SUMMARY_DATA_FILE: &str = "data";

/// Copies stored documents into every target segment.
pub struct DocumentReducer {
    source: Arc<dyn DocumentSource>,
}

impl DocumentReducer {
    pub fn new(source: Arc<dyn DocumentSource>) -> Self {
        DocumentReducer { source }
    }
}

impl FieldReducer for DocumentReducer {
    fn name(&self) -> String {
        "summary".to_string()
    }

    fn estimate_memory(&self, ctx: &ReduceContext<'_>) -> u64 {
        ctx.outputs.len() as u64 * 64 * 1024 + 64 * 1024
    }

    fn reduce(&self, ctx: &ReduceContext<'_>) -> Result<Vec<TruncateFailure>> {
        let mut writers = Vec::with_capacity(ctx.outputs.len());
        for output in ctx.outputs {
            let dir = join_path(&output.output_path, SUMMARY_DIR);
            ctx.storage.create_dir(&dir)?;
            let mut writer = StructWriter::new(ctx.storage.create_output(&join_path(&dir, SUMMARY_DATA_FILE))?);
            writer.write_u32(SUMMARY_FILE_MAGIC)?;
            writer.write_u32(SUMMARY_FILE_VERSION)?;
            writer.write_varint(ctx.reclaim_map.target_doc_count(output.target_segment_index) as u64)?;
            writers.push(writer);
        }

        let (mut docs, mut bytes) = (0u64, 0u64);
        for doc in DocumentMergeInfoHeap::new(ctx.reclaim_map) {
            let segment_id = ctx.segment_id(doc.segment_index)?;
            let writer = &mut writers[doc.target_segment_index];
            match self.source.document(segment_id, doc.old_doc_id)? {
                Some(data) => {
                    writer.write_u8(1)?;
                    writer.write_bytes(&data)?;
                    bytes += data.len() as u64;
                }
                None => writer.write_u8(0)?,
            }
            docs += 1;
        }

        for writer in writers {
            writer.close()?;
        }
        ctx.metrics.add_docs_processed(docs);
        info!("summary merged: {docs} docs, {bytes} bytes");
        Ok(Vec::new())
    }
}

/// Read a merged summary file back, indexed by new doc id.
pub fn read_document_file(storage: &dyn Storage, name: &str) -> Result<Vec<Option<Vec<u8>>>> {
    let mut reader = StructReader::new(storage.open_input(name)?)?;
    if reader.read_u32()? != SUMMARY_FILE_MAGIC {
        return Err(SegmergeError::storage(format!("{name} is not a summary file")));
    }
    let version = reader.read_u32()?;
    if version != SUMMARY_FILE_VERSION {
        return Err(SegmergeError::storage(format!(
            "unsupported summary file version {version}"
        )));
    }

    let doc_count = reader.read_varint()? as usize;
    let mut docs = Vec::with_capacity(doc_count.min(1 << 20));
    for _ in 0..doc_count {
        docs.push(match reader.read_u8()? {
            0 => None,
            _ => Some(reader.read_bytes()?),
        });
    }
    if !reader.verify_checksum()? {
        return Err(SegmergeError::storage(format!("checksum mismatch in {name}")));
    }
    Ok(docs)
}
