//! Attribute (column) reducer.

use std::sync::Arc;

use log::info;

use crate::error::{Result, SegmergeError};
use crate::merge::doc_heap::DocumentMergeInfoHeap;
use crate::merge::reducer::{FieldReducer, ReduceContext};
use crate::segment::{AttributeValue, AttributeValueReader};
use crate::storage::{Storage, StorageOutput, StructReader, StructWriter, join_path};
use crate::truncate::TruncateFailure;

const ATTRIBUTE_FILE_MAGIC: u32 = 0x41545452; // "ATTR"
const ATTRIBUTE_FILE_VERSION: u32 = 1;

pub const ATTRIBUTE_DATA_FILE: &str = "data";

/// Directory of an attribute, relative to its segment directory.
pub fn attribute_dir(field: &str) -> String {
    format!("attribute/{field}")
}

fn write_value<W: StorageOutput>(writer: &mut StructWriter<W>, value: Option<&AttributeValue>) -> Result<()> {
    let Some(value) = value else {
        return writer.write_u8(0);
    };
    writer.write_u8(value.tag())?;
    match value {
        AttributeValue::Int(v) => writer.write_i64(*v),
        AttributeValue::UInt(v) => writer.write_u64(*v),
        AttributeValue::Float(v) => writer.write_f64(*v),
        AttributeValue::Text(v) => writer.write_string(v),
    }
}

/// Copies one attribute column into every target segment, in new doc id order.
pub struct AttributeReducer {
    field: String,
    reader: Arc<dyn AttributeValueReader>,
}

impl AttributeReducer {
    pub fn new(field: impl Into<String>, reader: Arc<dyn AttributeValueReader>) -> Self {
        AttributeReducer {
            field: field.into(),
            reader,
        }
    }
}

impl FieldReducer for AttributeReducer {
    fn name(&self) -> String {
        format!("attribute:{}", self.field)
    }

    fn estimate_memory(&self, ctx: &ReduceContext<'_>) -> u64 {
        // One buffered writer per target plus a value in flight.
        ctx.outputs.len() as u64 * 64 * 1024 + 4096
    }

    fn reduce(&self, ctx: &ReduceContext<'_>) -> Result<Vec<TruncateFailure>> {
        let mut writers = Vec::with_capacity(ctx.outputs.len());
        for output in ctx.outputs {
            let dir = join_path(&output.output_path, &attribute_dir(&self.field));
            ctx.storage.create_dir(&dir)?;
            let mut writer = StructWriter::new(ctx.storage.create_output(&join_path(&dir, ATTRIBUTE_DATA_FILE))?);
            writer.write_u32(ATTRIBUTE_FILE_MAGIC)?;
            writer.write_u32(ATTRIBUTE_FILE_VERSION)?;
            writer.write_varint(ctx.reclaim_map.target_doc_count(output.target_segment_index) as u64)?;
            writers.push(writer);
        }

        let mut docs = 0u64;
        for doc in DocumentMergeInfoHeap::new(ctx.reclaim_map) {
            let segment_id = ctx.segment_id(doc.segment_index)?;
            let value = self.reader.read(&self.field, segment_id, doc.old_doc_id)?;
            write_value(&mut writers[doc.target_segment_index], value.as_ref())?;
            docs += 1;
        }

        for writer in writers {
            writer.close()?;
        }
        ctx.metrics.add_docs_processed(docs);
        info!("attribute {} merged: {docs} docs", self.field);
        Ok(Vec::new())
    }
}

/// Read a merged attribute file back, indexed by new doc id.
pub fn read_attribute_file(storage: &dyn Storage, name: &str) -> Result<Vec<Option<AttributeValue>>> {
    let mut reader = StructReader::new(storage.open_input(name)?)?;
    if reader.read_u32()? != ATTRIBUTE_FILE_MAGIC {
        return Err(SegmergeError::storage(format!("{name} is not an attribute file")));
    }
    let version = reader.read_u32()?;
    if version != ATTRIBUTE_FILE_VERSION {
        return Err(SegmergeError::storage(format!(
            "unsupported attribute file version {version}"
        )));
    }

    let doc_count = reader.read_varint()? as usize;
    let mut values = Vec::with_capacity(doc_count.min(1 << 20));
    for _ in 0..doc_count {
        let value = match reader.read_u8()? {
            0 => None,
            1 => Some(AttributeValue::Int(reader.read_i64()?)),
            2 => Some(AttributeValue::UInt(reader.read_u64()?)),
            3 => Some(AttributeValue::Float(reader.read_f64()?)),
            4 => Some(AttributeValue::Text(reader.read_string()?)),
            tag => {
                return Err(SegmergeError::storage(format!(
                    "unknown attribute tag {tag} in {name}"
                )));
            }
        };
        values.push(value);
    }
    if !reader.verify_checksum()? {
        return Err(SegmergeError::storage(format!("checksum mismatch in {name}")));
    }
    Ok(values)
}
