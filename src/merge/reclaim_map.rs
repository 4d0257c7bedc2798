//! The old doc id to new doc id table of one merge plan.
//!
//! Source segments are walked in plan order and, within a segment, by
//! increasing local doc id. Every surviving document takes the next free id
//! of its target segment, so ids are contiguous from zero per target and
//! preserve source order. Deleted and superseded documents map to nothing.
//!
//! The map is built once and then shared read-only by every reducer.

use log::{debug, info};

use crate::error::{Result, SegmergeError};
use crate::merge::dedup::{DedupHandler, DuplicateSet};
use crate::merge::split::SplitSegmentStrategy;
use crate::segment::{DeletionProvider, DocId, INVALID_DOCID, SegmentMergeInfos};
use crate::storage::{Storage, StructReader, StructWriter};

const RECLAIM_MAP_MAGIC: u32 = 0x52434C4D; // "RCLM"
const RECLAIM_MAP_VERSION: u32 = 1;
const NO_TARGET: u16 = u16::MAX;

/// Reclaim state available while the map is still being built.
pub struct ReclaimFilter<'a> {
    infos: &'a SegmentMergeInfos,
    deletions: &'a dyn DeletionProvider,
    duplicates: Option<&'a DuplicateSet>,
}

impl<'a> ReclaimFilter<'a> {
    pub fn new(
        infos: &'a SegmentMergeInfos,
        deletions: &'a dyn DeletionProvider,
        duplicates: Option<&'a DuplicateSet>,
    ) -> Self {
        ReclaimFilter {
            infos,
            deletions,
            duplicates,
        }
    }

    pub fn infos(&self) -> &'a SegmentMergeInfos {
        self.infos
    }

    pub fn is_deleted(&self, segment_index: usize, doc_id: DocId) -> bool {
        self.infos
            .get(segment_index)
            .is_some_and(|info| self.deletions.is_deleted(info.segment_id, doc_id))
    }

    pub fn is_duplicate(&self, segment_index: usize, doc_id: DocId) -> bool {
        self.duplicates
            .is_some_and(|dups| dups.contains(segment_index, doc_id))
    }

    /// Whether a document is dropped by the merge.
    pub fn is_reclaimed(&self, segment_index: usize, doc_id: DocId) -> bool {
        self.is_deleted(segment_index, doc_id) || self.is_duplicate(segment_index, doc_id)
    }
}

/// Location of a document in the source segments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DocAddress {
    pub segment_index: usize,
    pub doc_id: DocId,
}

/// Immutable old-to-new doc id mapping of one merge plan.
#[derive(Debug, Clone, PartialEq)]
pub struct ReclaimMap {
    /// New doc id per source document, `INVALID_DOCID` when reclaimed.
    new_doc_ids: Vec<Vec<DocId>>,
    /// Target index per source document; empty when there is one target.
    target_indexes: Vec<Vec<u16>>,
    /// Source address per new doc id, per target segment.
    old_doc_addrs: Vec<Vec<DocAddress>>,
    deleted_doc_count: u64,
    duplicate_doc_count: u64,
}

impl ReclaimMap {
    /// Build the map of a plan.
    ///
    /// The split strategy is prepared here, after deduplication, and decides
    /// the target of each surviving document. Without one every document goes
    /// to target 0.
    pub fn build(
        infos: &SegmentMergeInfos,
        deletions: &dyn DeletionProvider,
        dedup: Option<&dyn DedupHandler>,
        mut split: Option<&mut (dyn SplitSegmentStrategy + '_)>,
    ) -> Result<ReclaimMap> {
        infos.validate()?;

        let duplicates = match dedup {
            Some(handler) => Some(handler.find_duplicates(infos, deletions)?),
            None => None,
        };
        let filter = ReclaimFilter::new(infos, deletions, duplicates.as_ref());

        let target_count = match split.as_deref_mut() {
            Some(strategy) => {
                strategy.prepare(&filter)?;
                strategy.target_segment_count()
            }
            None => 1,
        };
        if target_count == 0 || target_count >= NO_TARGET as usize {
            return Err(SegmergeError::config(format!(
                "unsupported target segment count {target_count}"
            )));
        }
        let multi_target = target_count > 1;

        let mut new_doc_ids = Vec::with_capacity(infos.len());
        let mut target_indexes = Vec::with_capacity(infos.len());
        let mut old_doc_addrs: Vec<Vec<DocAddress>> = vec![Vec::new(); target_count];
        let mut deleted_doc_count = 0u64;
        let mut duplicate_doc_count = 0u64;

        for (segment_index, info) in infos.iter().enumerate() {
            let doc_count = info.doc_count as usize;
            let mut segment_new_ids = Vec::with_capacity(doc_count);
            let mut segment_targets = if multi_target {
                Vec::with_capacity(doc_count)
            } else {
                Vec::new()
            };
            let (mut deleted, mut duplicated) = (0u32, 0u32);

            for doc_id in 0..info.doc_count {
                let reclaimed = if filter.is_deleted(segment_index, doc_id) {
                    deleted += 1;
                    true
                } else if filter.is_duplicate(segment_index, doc_id) {
                    duplicated += 1;
                    true
                } else {
                    false
                };
                if reclaimed {
                    segment_new_ids.push(INVALID_DOCID);
                    if multi_target {
                        segment_targets.push(NO_TARGET);
                    }
                    continue;
                }

                let target = match split.as_deref() {
                    Some(strategy) => strategy.process(info.segment_id, doc_id)?,
                    None => 0,
                };
                if target >= target_count {
                    return Err(SegmergeError::invalid_operation(format!(
                        "split strategy sent doc {doc_id} of segment {} to target {target}, \
                         only {target_count} targets exist",
                        info.segment_id
                    )));
                }

                let addrs = &mut old_doc_addrs[target];
                let new_doc_id = DocId::try_from(addrs.len())
                    .ok()
                    .filter(|&id| id != INVALID_DOCID)
                    .ok_or_else(|| {
                        SegmergeError::invalid_operation(format!(
                            "target segment {target} exceeds the doc id space"
                        ))
                    })?;
                addrs.push(DocAddress {
                    segment_index,
                    doc_id,
                });
                segment_new_ids.push(new_doc_id);
                if multi_target {
                    segment_targets.push(target as u16);
                }
            }

            if deleted != info.deleted_doc_count {
                debug!(
                    "segment {}: snapshot reported {} deleted docs, provider reports {deleted}",
                    info.segment_id, info.deleted_doc_count
                );
            }
            debug!(
                "segment {}: {} docs, {deleted} deleted, {duplicated} duplicated",
                info.segment_id, info.doc_count
            );
            deleted_doc_count += deleted as u64;
            duplicate_doc_count += duplicated as u64;
            new_doc_ids.push(segment_new_ids);
            target_indexes.push(segment_targets);
        }

        let map = ReclaimMap {
            new_doc_ids,
            target_indexes,
            old_doc_addrs,
            deleted_doc_count,
            duplicate_doc_count,
        };
        info!(
            "reclaim map built: {} segments -> {:?} docs, {} deleted, {} duplicated",
            map.segment_count(),
            map.target_doc_counts(),
            deleted_doc_count,
            duplicate_doc_count
        );
        Ok(map)
    }

    /// New doc id and target segment index of a source document, `None` when
    /// the document was reclaimed or does not exist.
    pub fn get_new_doc_id(&self, segment_index: usize, old_doc_id: DocId) -> Option<(DocId, usize)> {
        let new_doc_id = *self.new_doc_ids.get(segment_index)?.get(old_doc_id as usize)?;
        if new_doc_id == INVALID_DOCID {
            return None;
        }
        Some((new_doc_id, self.target_index(segment_index, old_doc_id)))
    }

    fn target_index(&self, segment_index: usize, old_doc_id: DocId) -> usize {
        self.target_indexes
            .get(segment_index)
            .and_then(|targets| targets.get(old_doc_id as usize))
            .map(|&t| t as usize)
            .unwrap_or(0)
    }

    /// Whether a source document is dropped by the merge.
    pub fn is_reclaimed(&self, segment_index: usize, old_doc_id: DocId) -> bool {
        self.get_new_doc_id(segment_index, old_doc_id).is_none()
    }

    /// Source address of a merged document.
    pub fn old_doc_addr(&self, target_segment_index: usize, new_doc_id: DocId) -> Option<DocAddress> {
        self.old_doc_addrs
            .get(target_segment_index)?
            .get(new_doc_id as usize)
            .copied()
    }

    /// Source addresses of a target segment, indexed by new doc id.
    pub fn target_doc_addrs(&self, target_segment_index: usize) -> &[DocAddress] {
        self.old_doc_addrs
            .get(target_segment_index)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn segment_count(&self) -> usize {
        self.new_doc_ids.len()
    }

    /// Source doc count of a segment, reclaimed ones included.
    pub fn segment_doc_count(&self, segment_index: usize) -> u32 {
        self.new_doc_ids
            .get(segment_index)
            .map(|ids| ids.len() as u32)
            .unwrap_or(0)
    }

    pub fn target_segment_count(&self) -> usize {
        self.old_doc_addrs.len()
    }

    pub fn target_doc_count(&self, target_segment_index: usize) -> u32 {
        self.target_doc_addrs(target_segment_index).len() as u32
    }

    pub fn target_doc_counts(&self) -> Vec<u32> {
        self.old_doc_addrs.iter().map(|a| a.len() as u32).collect()
    }

    /// Surviving documents across all targets.
    pub fn new_doc_count(&self) -> u64 {
        self.old_doc_addrs.iter().map(|a| a.len() as u64).sum()
    }

    pub fn deleted_doc_count(&self) -> u64 {
        self.deleted_doc_count
    }

    pub fn duplicate_doc_count(&self) -> u64 {
        self.duplicate_doc_count
    }

    /// Persist the map as a checksummed binary file.
    pub fn store(&self, storage: &dyn Storage, name: &str) -> Result<()> {
        let mut writer = StructWriter::new(storage.create_output(name)?);
        writer.write_u32(RECLAIM_MAP_MAGIC)?;
        writer.write_u32(RECLAIM_MAP_VERSION)?;
        writer.write_varint(self.segment_count() as u64)?;
        writer.write_varint(self.target_segment_count() as u64)?;
        writer.write_u64(self.deleted_doc_count)?;
        writer.write_u64(self.duplicate_doc_count)?;

        let multi_target = self.target_segment_count() > 1;
        for (segment_index, ids) in self.new_doc_ids.iter().enumerate() {
            writer.write_varint(ids.len() as u64)?;
            for (doc, &new_doc_id) in ids.iter().enumerate() {
                // Zero marks a reclaimed document.
                if new_doc_id == INVALID_DOCID {
                    writer.write_varint(0)?;
                    continue;
                }
                writer.write_varint(new_doc_id as u64 + 1)?;
                if multi_target {
                    writer.write_varint(self.target_index(segment_index, doc as DocId) as u64)?;
                }
            }
        }
        writer.close()
    }

    /// Load a map written by [`ReclaimMap::store`].
    pub fn load(storage: &dyn Storage, name: &str) -> Result<ReclaimMap> {
        let mut reader = StructReader::new(storage.open_input(name)?)?;
        if reader.read_u32()? != RECLAIM_MAP_MAGIC {
            return Err(SegmergeError::storage(format!("{name} is not a reclaim map")));
        }
        let version = reader.read_u32()?;
        if version != RECLAIM_MAP_VERSION {
            return Err(SegmergeError::storage(format!(
                "unsupported reclaim map version {version}"
            )));
        }

        let segment_count = reader.read_varint()? as usize;
        let target_count = reader.read_varint()? as usize;
        if target_count == 0 || target_count >= NO_TARGET as usize {
            return Err(SegmergeError::storage(format!(
                "corrupt reclaim map: {target_count} targets"
            )));
        }
        let deleted_doc_count = reader.read_u64()?;
        let duplicate_doc_count = reader.read_u64()?;
        let multi_target = target_count > 1;

        let mut new_doc_ids = Vec::with_capacity(segment_count);
        let mut target_indexes = Vec::with_capacity(segment_count);
        let mut old_doc_addrs: Vec<Vec<DocAddress>> = vec![Vec::new(); target_count];

        for segment_index in 0..segment_count {
            let doc_count = reader.read_varint()? as usize;
            let mut ids = Vec::with_capacity(doc_count);
            let mut targets = Vec::new();
            for doc_id in 0..doc_count as DocId {
                let encoded = reader.read_varint()?;
                if encoded == 0 {
                    ids.push(INVALID_DOCID);
                    if multi_target {
                        targets.push(NO_TARGET);
                    }
                    continue;
                }
                let new_doc_id = (encoded - 1) as DocId;
                let target = if multi_target {
                    reader.read_varint()? as usize
                } else {
                    0
                };
                let addrs = old_doc_addrs.get_mut(target).ok_or_else(|| {
                    SegmergeError::storage(format!("corrupt reclaim map: target {target}"))
                })?;
                if addrs.len() != new_doc_id as usize {
                    return Err(SegmergeError::storage(format!(
                        "corrupt reclaim map: non-contiguous doc id {new_doc_id} in target {target}"
                    )));
                }
                addrs.push(DocAddress {
                    segment_index,
                    doc_id,
                });
                ids.push(new_doc_id);
                if multi_target {
                    targets.push(target as u16);
                }
            }
            new_doc_ids.push(ids);
            target_indexes.push(targets);
        }

        if !reader.verify_checksum()? {
            return Err(SegmergeError::storage(format!("checksum mismatch in {name}")));
        }

        Ok(ReclaimMap {
            new_doc_ids,
            target_indexes,
            old_doc_addrs,
            deleted_doc_count,
            duplicate_doc_count,
        })
    }
}
