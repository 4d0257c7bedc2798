//! Collaborators a merge reads from, bundled once per process.

use std::sync::Arc;

use crate::error::{Result, SegmergeError};
use crate::merge::split::SplitStrategyRegistry;
use crate::segment::{
    AttributeValueReader, DeletionProvider, DocumentSource, MemorySegmentSet, PostingSource,
    PrimaryKeySource,
};
use crate::storage::{PrefixedStorage, Storage};

/// Source readers, output storage and strategy registry of a merge.
///
/// Field groups whose reader is absent cannot be merged; asking for them
/// fails with [`SegmergeError::Unsupported`]. When primary keys are present,
/// superseded documents are reclaimed.
#[derive(Clone)]
pub struct MergeContext {
    pub storage: Arc<dyn Storage>,
    pub deletions: Arc<dyn DeletionProvider>,
    pub attributes: Option<Arc<dyn AttributeValueReader>>,
    pub postings: Option<Arc<dyn PostingSource>>,
    pub documents: Option<Arc<dyn DocumentSource>>,
    pub primary_keys: Option<Arc<dyn PrimaryKeySource>>,
    pub split_registry: SplitStrategyRegistry,
}

impl MergeContext {
    pub fn new(storage: Arc<dyn Storage>, deletions: Arc<dyn DeletionProvider>) -> Self {
        MergeContext {
            storage,
            deletions,
            attributes: None,
            postings: None,
            documents: None,
            primary_keys: None,
            split_registry: SplitStrategyRegistry::new(),
        }
    }

    /// Read everything from an in-memory segment set, without deduplication.
    pub fn from_memory(storage: Arc<dyn Storage>, segments: Arc<MemorySegmentSet>) -> Self {
        MergeContext::new(storage, segments.clone())
            .with_attributes(segments.clone())
            .with_postings(segments.clone())
            .with_documents(segments)
    }

    pub fn with_attributes(mut self, reader: Arc<dyn AttributeValueReader>) -> Self {
        self.attributes = Some(reader);
        self
    }

    pub fn with_postings(mut self, source: Arc<dyn PostingSource>) -> Self {
        self.postings = Some(source);
        self
    }

    pub fn with_documents(mut self, source: Arc<dyn DocumentSource>) -> Self {
        self.documents = Some(source);
        self
    }

    pub fn with_primary_keys(mut self, source: Arc<dyn PrimaryKeySource>) -> Self {
        self.primary_keys = Some(source);
        self
    }

    /// Write all merge output below `dir` instead of the storage root.
    pub fn with_output_dir(mut self, dir: impl Into<String>) -> Self {
        self.storage = Arc::new(PrefixedStorage::new(dir, self.storage));
        self
    }

    pub fn with_split_registry(mut self, registry: SplitStrategyRegistry) -> Self {
        self.split_registry = registry;
        self
    }

    pub(crate) fn require_attributes(&self) -> Result<Arc<dyn AttributeValueReader>> {
        self.attributes
            .clone()
            .ok_or_else(|| SegmergeError::unsupported("no attribute reader in merge context"))
    }

    pub(crate) fn require_postings(&self) -> Result<Arc<dyn PostingSource>> {
        self.postings
            .clone()
            .ok_or_else(|| SegmergeError::unsupported("no posting source in merge context"))
    }

    pub(crate) fn require_documents(&self) -> Result<Arc<dyn DocumentSource>> {
        self.documents
            .clone()
            .ok_or_else(|| SegmergeError::unsupported("no document source in merge context"))
    }
}

impl std::fmt::Debug for MergeContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MergeContext")
            .field("storage", &self.storage)
            .field("attributes", &self.attributes.is_some())
            .field("postings", &self.postings.is_some())
            .field("documents", &self.documents.is_some())
            .field("primary_keys", &self.primary_keys.is_some())
            .field("split_registry", &self.split_registry)
            .finish()
    }
}
