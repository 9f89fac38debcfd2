use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

use crate::error::Result;
use crate::ingest::{IngestHandle, IngestOptions, IngestionPipeline};
use crate::metadata::MetadataExtractor;
use crate::state::data::{NormalizedMetadata, TagEntry};
use crate::state::index::ImageIndex;
use crate::state::library::Library;

/// One UI session over the image cache.
///
/// Holds the index of the currently open collection. Opening a collection
/// replaces the index wholesale; closing drops it.
#[derive(Debug)]
pub struct Gallery {
    pipeline: IngestionPipeline,
    index: Arc<ImageIndex>,
    root: Option<PathBuf>,
}

impl Gallery {
    pub fn new(store: Arc<Library>, extractor: Arc<MetadataExtractor>, options: IngestOptions) -> Self {
        Self {
            pipeline: IngestionPipeline::new(store, extractor, options),
            index: Arc::new(ImageIndex::new()),
            root: None,
        }
    }

    pub fn store(&self) -> &Library {
        self.pipeline.store()
    }

    /// Root of the open collection, if any.
    pub fn root(&self) -> Option<&Path> {
        self.root.as_deref()
    }

    /// The open collection's index. Shared with a running ingestion.
    pub fn index(&self) -> Arc<ImageIndex> {
        Arc::clone(&self.index)
    }

    /// Start ingesting `root` into a fresh index, which becomes this
    /// session's index immediately and fills as the run progresses.
    pub fn open_collection(&mut self, root: &Path, force_refresh: bool) -> Result<IngestHandle> {
        let handle = self.pipeline.ingest(root, force_refresh)?;
        self.index = handle.index();
        self.root = Some(handle.root().to_path_buf());
        Ok(handle)
    }

    /// Drop the open collection's index.
    pub fn close_collection(&mut self) {
        if let Some(root) = self.root.take() {
            info!(root = %root.display(), "Closed collection");
        }
        self.index = Arc::new(ImageIndex::new());
    }

    /// Rebuild the index from cached rows under `root` without reading any
    /// image files. Returns the number of records loaded.
    pub fn restore_collection(&mut self, root: &Path) -> Result<usize> {
        let root = canonical_or_raw(root);
        let records = self.store().records_under(&root)?;
        let count = records.len();
        self.index = Arc::new(ImageIndex::from_records(records));
        info!(root = %root.display(), records = count, "Restored collection from cache");
        self.root = Some(root);
        Ok(count)
    }

    /// Forget a collection: close it if it's open and drop its cached rows.
    /// Returns the number of rows removed.
    pub fn delete_collection(&mut self, root: &Path) -> Result<usize> {
        let root = canonical_or_raw(root);
        if self.root.as_deref().map_or(false, |open| open.starts_with(&root)) {
            self.close_collection();
        }
        self.store().delete_by_prefix(&root)
    }

    pub fn record_for(&self, path: &Path) -> Option<Arc<NormalizedMetadata>> {
        self.index.get(path)
    }

    /// Every indexed record, newest first.
    pub fn images(&self) -> Vec<Arc<NormalizedMetadata>> {
        self.index.all()
    }

    /// Tags ordered by how many images carry them.
    pub fn tags(&self) -> Vec<TagEntry> {
        self.index.tag_index()
    }

    pub fn query_by_tags<S: AsRef<str>>(&self, tags: &[S]) -> Vec<PathBuf> {
        self.index.query_by_tags(tags)
    }

    pub fn favorites(&self) -> Vec<Arc<NormalizedMetadata>> {
        self.index.favorites()
    }

    /// Set the favorite flag in the cache, then the index. Returns false when
    /// neither knows the path. A failed cache write leaves the index as it was.
    pub fn set_favorite(&self, path: &Path, favorite: bool) -> Result<bool> {
        let stored = self.store().set_favorite(path, favorite)?;
        let indexed = self.index.set_favorite(path, favorite);
        Ok(indexed || stored)
    }

    /// Flip the favorite flag. Returns the new value, or `None` for an
    /// unknown path.
    pub fn toggle_favorite(&self, path: &Path) -> Result<Option<bool>> {
        let current = match self.index.get(path) {
            Some(record) => record.favorite,
            None => match self.store().get(path)? {
                Some(record) => record.favorite,
                None => return Ok(None),
            },
        };
        self.set_favorite(path, !current)?;
        Ok(Some(!current))
    }

    /// Drop a single image (e.g. after its file was deleted).
    pub fn forget(&self, path: &Path) -> Result<bool> {
        let indexed = self.index.remove(path).is_some();
        let stored = self.store().delete(path)?;
        Ok(indexed || stored)
    }

    /// Drop cached rows and index entries under `root` whose files are gone.
    pub fn prune_missing(&self, root: &Path) -> Result<usize> {
        let root = canonical_or_raw(root);
        let removed = self.store().prune_missing(&root)?;
        for record in self.index.all() {
            if record.image_path.starts_with(&root) && !record.image_path.exists() {
                self.index.remove(&record.image_path);
            }
        }
        Ok(removed)
    }
}

/// Deleted collections may no longer exist on disk, so fall back to the
/// path as given.
fn canonical_or_raw(path: &Path) -> PathBuf {
    path.canonicalize().unwrap_or_else(|_| path.to_path_buf())
}
