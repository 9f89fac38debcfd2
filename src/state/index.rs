use parking_lot::RwLock;
use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::data::{NormalizedMetadata, TagEntry};

/// In-memory view of one open collection: path → record plus an inverted
/// tag → paths index.
///
/// Owned by a session and rebuilt per opened collection; the cache database
/// stays the system of record.
#[derive(Debug, Default)]
pub struct ImageIndex {
    inner: RwLock<IndexInner>,
}

#[derive(Debug, Default)]
struct IndexInner {
    images: HashMap<PathBuf, Arc<NormalizedMetadata>>,
    tags: HashMap<String, BTreeSet<PathBuf>>,
}

impl IndexInner {
    fn link_tags(&mut self, record: &NormalizedMetadata) {
        for tag in &record.tags {
            self.tags
                .entry(tag.clone())
                .or_default()
                .insert(record.image_path.clone());
        }
    }

    fn unlink_tags(&mut self, record: &NormalizedMetadata) {
        for tag in &record.tags {
            if let Some(files) = self.tags.get_mut(tag) {
                files.remove(&record.image_path);
                if files.is_empty() {
                    self.tags.remove(tag);
                }
            }
        }
    }
}

impl ImageIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build an index from a batch of records.
    pub fn from_records(records: impl IntoIterator<Item = NormalizedMetadata>) -> Self {
        let index = Self::new();
        for record in records {
            index.put(record);
        }
        index
    }

    /// Insert or replace the record for its path and update the tag buckets.
    /// Returns the record it replaced.
    pub fn put(&self, record: NormalizedMetadata) -> Option<Arc<NormalizedMetadata>> {
        let record = Arc::new(record);
        let mut inner = self.inner.write();
        let previous = inner
            .images
            .insert(record.image_path.clone(), Arc::clone(&record));
        if let Some(previous) = &previous {
            inner.unlink_tags(previous);
        }
        inner.link_tags(&record);
        previous
    }

    pub fn remove(&self, path: &Path) -> Option<Arc<NormalizedMetadata>> {
        let mut inner = self.inner.write();
        let removed = inner.images.remove(path);
        if let Some(removed) = &removed {
            inner.unlink_tags(removed);
        }
        removed
    }

    pub fn get(&self, path: &Path) -> Option<Arc<NormalizedMetadata>> {
        self.inner.read().images.get(path).cloned()
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.inner.read().images.contains_key(path)
    }

    pub fn len(&self) -> usize {
        self.inner.read().images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All records, newest first.
    pub fn all(&self) -> Vec<Arc<NormalizedMetadata>> {
        let mut records: Vec<_> = self.inner.read().images.values().cloned().collect();
        records.sort_by(|a, b| newest_first(a, b));
        records
    }

    /// Favorite records, newest first.
    pub fn favorites(&self) -> Vec<Arc<NormalizedMetadata>> {
        let mut records: Vec<_> = self
            .inner
            .read()
            .images
            .values()
            .filter(|record| record.favorite)
            .cloned()
            .collect();
        records.sort_by(|a, b| newest_first(a, b));
        records
    }

    /// Set the favorite flag on an indexed record. Returns false if the path isn't indexed.
    pub fn set_favorite(&self, path: &Path, favorite: bool) -> bool {
        let mut inner = self.inner.write();
        match inner.images.get_mut(path) {
            Some(record) => {
                Arc::make_mut(record).favorite = favorite;
                true
            }
            None => false,
        }
    }

    /// Tag entries ordered by file count (descending), then name.
    pub fn tag_index(&self) -> Vec<TagEntry> {
        let inner = self.inner.read();
        let mut entries: Vec<TagEntry> = inner
            .tags
            .iter()
            .map(|(name, files)| TagEntry {
                name: name.clone(),
                files: files.clone(),
            })
            .collect();
        entries.sort_by(|a, b| b.count().cmp(&a.count()).then_with(|| a.name.cmp(&b.name)));
        entries
    }

    /// Number of images carrying `tag`.
    pub fn tag_count(&self, tag: &str) -> usize {
        self.inner
            .read()
            .tags
            .get(&query_key(tag))
            .map_or(0, BTreeSet::len)
    }

    /// Paths carrying every one of `tags`, newest first.
    ///
    /// An empty selection matches every indexed image. Query tags are only
    /// trimmed and lowercased, so synthetic tags like `model:name` match as-is.
    pub fn query_by_tags<S: AsRef<str>>(&self, tags: &[S]) -> Vec<PathBuf> {
        let inner = self.inner.read();

        let mut selected: Vec<&BTreeSet<PathBuf>> = Vec::with_capacity(tags.len());
        for tag in tags {
            match inner.tags.get(&query_key(tag.as_ref())) {
                Some(files) => selected.push(files),
                None => return Vec::new(),
            }
        }

        let mut matches: Vec<&Arc<NormalizedMetadata>> = if selected.is_empty() {
            inner.images.values().collect()
        } else {
            // intersect starting from the smallest bucket
            selected.sort_by_key(|files| files.len());
            let (smallest, rest) = (selected[0], &selected[1..]);
            smallest
                .iter()
                .filter(|path| rest.iter().all(|files| files.contains(*path)))
                .filter_map(|path| inner.images.get(path))
                .collect()
        };

        matches.sort_by(|a, b| newest_first(a, b));
        matches.iter().map(|record| record.image_path.clone()).collect()
    }

    /// Recompute the tag buckets from the stored records.
    pub fn rebuild_tags(&self) {
        let mut inner = self.inner.write();
        let records: Vec<_> = inner.images.values().cloned().collect();
        inner.tags.clear();
        for record in records {
            inner.link_tags(&record);
        }
    }
}

fn query_key(tag: &str) -> String {
    tag.trim().to_lowercase()
}

fn newest_first(a: &NormalizedMetadata, b: &NormalizedMetadata) -> Ordering {
    b.created_at
        .cmp(&a.created_at)
        .then_with(|| a.image_path.cmp(&b.image_path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn record(path: &str, day: u32, tags: &[&str]) -> NormalizedMetadata {
        let mut record = NormalizedMetadata::new(path);
        record.created_at = Utc.with_ymd_and_hms(2024, 3, day, 0, 0, 0).unwrap();
        record.tags = tags.iter().map(|t| t.to_string()).collect();
        record
    }

    fn sample_index() -> ImageIndex {
        ImageIndex::from_records(vec![
            record("/c/1.png", 1, &["a cat", "model:sdxl"]),
            record("/c/2.png", 2, &["a cat", "night"]),
            record("/c/3.png", 3, &["a cat", "night", "model:sdxl"]),
            record("/c/4.png", 4, &["a dog"]),
        ])
    }

    #[test]
    fn test_tag_index_counts_and_order() {
        let index = sample_index();
        let entries = index.tag_index();
        let summary: Vec<(&str, usize)> =
            entries.iter().map(|e| (e.name.as_str(), e.count())).collect();
        assert_eq!(
            summary,
            vec![("a cat", 3), ("model:sdxl", 2), ("night", 2), ("a dog", 1)]
        );
        assert_eq!(index.tag_count(" A Cat "), 3);
    }

    #[test]
    fn test_query_intersection() {
        let index = sample_index();
        assert_eq!(
            index.query_by_tags(&["a cat", "night"]),
            vec![PathBuf::from("/c/3.png"), PathBuf::from("/c/2.png")]
        );
        assert_eq!(
            index.query_by_tags(&["Model:SDXL", "night"]),
            vec![PathBuf::from("/c/3.png")]
        );
        assert!(index.query_by_tags(&["a dog", "night"]).is_empty());
        assert!(index.query_by_tags(&["unknown"]).is_empty());
    }

    #[test]
    fn test_empty_query_returns_everything_newest_first() {
        let index = sample_index();
        let empty: [&str; 0] = [];
        assert_eq!(
            index.query_by_tags(&empty),
            vec![
                PathBuf::from("/c/4.png"),
                PathBuf::from("/c/3.png"),
                PathBuf::from("/c/2.png"),
                PathBuf::from("/c/1.png"),
            ]
        );
    }

    #[test]
    fn test_put_replaces_tags() {
        let index = sample_index();
        let previous = index.put(record("/c/4.png", 4, &["a cat"]));
        assert!(previous.is_some());
        assert_eq!(index.len(), 4);
        assert_eq!(index.tag_count("a dog"), 0);
        assert_eq!(index.tag_count("a cat"), 4);
    }

    #[test]
    fn test_remove() {
        let index = sample_index();
        assert!(index.remove(Path::new("/c/3.png")).is_some());
        assert_eq!(index.tag_count("night"), 1);
        assert!(!index.contains(Path::new("/c/3.png")));
    }

    #[test]
    fn test_favorites() {
        let index = sample_index();
        assert!(index.set_favorite(Path::new("/c/2.png"), true));
        assert!(!index.set_favorite(Path::new("/c/missing.png"), true));
        let favorites: Vec<_> = index.favorites().iter().map(|r| r.image_path.clone()).collect();
        assert_eq!(favorites, vec![PathBuf::from("/c/2.png")]);
    }

    #[test]
    fn test_rebuild_tags_matches_incremental() {
        let index = sample_index();
        let before = index.tag_index();
        index.rebuild_tags();
        assert_eq!(index.tag_index(), before);
    }
}
