use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::error::GalleryError;
use crate::metadata::MetadataExtractor;
use crate::state::data::NormalizedMetadata;
use crate::state::library::Library;

/// Outcome of one extraction unit.
#[derive(Debug)]
pub enum UnitReport {
    /// A record ready for the index, whether reused from the cache or freshly
    /// extracted. `store_warning` is set when the cache could not be read or
    /// written for this file.
    Indexed {
        record: NormalizedMetadata,
        fresh: bool,
        store_warning: Option<String>,
    },
    /// The image could not be opened or decoded. Nothing is cached or indexed.
    Unreadable { path: PathBuf, reason: String },
}

impl UnitReport {
    pub fn path(&self) -> &Path {
        match self {
            UnitReport::Indexed { record, .. } => &record.image_path,
            UnitReport::Unreadable { path, .. } => path,
        }
    }
}

/// Resolve one file: cache hit, or extract and cache.
///
/// Panics inside the unit are caught and reported as an unreadable file.
pub fn run_unit(
    store: &Library,
    extractor: &MetadataExtractor,
    path: &Path,
    force_refresh: bool,
) -> UnitReport {
    match panic::catch_unwind(AssertUnwindSafe(|| resolve(store, extractor, path, force_refresh))) {
        Ok(report) => report,
        Err(payload) => {
            let reason = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "extraction panicked".to_string());
            warn!(path = %path.display(), reason = %reason, "Extraction unit panicked");
            UnitReport::Unreadable {
                path: path.to_path_buf(),
                reason,
            }
        }
    }
}

fn resolve(
    store: &Library,
    extractor: &MetadataExtractor,
    path: &Path,
    force_refresh: bool,
) -> UnitReport {
    let (prior, lookup_failed) = match store.get(path) {
        Ok(prior) => (prior, None),
        Err(GalleryError::Serialization(e)) => {
            warn!(path = %path.display(), error = %e, "Cached row is undecodable, replacing it");
            (None, None)
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Cache lookup failed");
            (None, Some(e.to_string()))
        }
    };

    if let Some(cached) = &prior {
        if !force_refresh {
            debug!(path = %path.display(), "Reusing cached record");
            return UnitReport::Indexed {
                record: cached.clone(),
                fresh: false,
                store_warning: None,
            };
        }
    }

    let mut record = match extractor.read(path) {
        Ok(record) => record,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Skipping unreadable image");
            return UnitReport::Unreadable {
                path: path.to_path_buf(),
                reason: e.to_string(),
            };
        }
    };
    record.favorite = prior.as_ref().map_or(false, |cached| cached.favorite);

    // an unknown prior row may hold a favorite flag, so it is left alone
    let store_warning = match lookup_failed {
        Some(reason) => Some(reason),
        None => store.upsert(&record).err().map(|e| {
            warn!(path = %path.display(), error = %e, "Failed to cache record");
            e.to_string()
        }),
    };

    UnitReport::Indexed {
        record,
        fresh: true,
        store_warning,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, ImageFormat, RgbImage};
    use std::io::Cursor;

    fn write_png(dir: &Path, name: &str) -> PathBuf {
        let mut bytes = Vec::new();
        DynamicImage::ImageRgb8(RgbImage::new(8, 8))
            .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .unwrap();
        let path = dir.join(name);
        std::fs::write(&path, bytes).unwrap();
        path
    }

    #[test]
    fn test_miss_then_hit() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_png(dir.path(), "a.png");
        let store = Library::open_in_memory().unwrap();
        let extractor = MetadataExtractor::default();

        let first = run_unit(&store, &extractor, &path, false);
        assert!(matches!(first, UnitReport::Indexed { fresh: true, store_warning: None, .. }));
        assert!(store.get(&path).unwrap().is_some());

        let second = run_unit(&store, &extractor, &path, false);
        assert!(matches!(second, UnitReport::Indexed { fresh: false, .. }));
    }

    #[test]
    fn test_forced_refresh_keeps_favorite() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_png(dir.path(), "a.png");
        let store = Library::open_in_memory().unwrap();
        let extractor = MetadataExtractor::default();

        run_unit(&store, &extractor, &path, false);
        assert!(store.set_favorite(&path, true).unwrap());

        match run_unit(&store, &extractor, &path, true) {
            UnitReport::Indexed { record, fresh, .. } => {
                assert!(fresh);
                assert!(record.favorite);
            }
            other => panic!("unexpected report: {:?}", other),
        }
        assert!(store.get(&path).unwrap().unwrap().favorite);
    }

    #[test]
    fn test_undecodable_row_is_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_png(dir.path(), "a.png");
        let db = dir.path().join("cache.sqlite3");
        let store = Library::open(&db).unwrap();
        let extractor = MetadataExtractor::default();

        let raw = rusqlite::Connection::open(&db).unwrap();
        raw.execute(
            "INSERT INTO images (image_path, metadata, updated_at) VALUES (?1, ?2, 0)",
            rusqlite::params![
                path.to_string_lossy(),
                r#"{"image_path": "x", "thumbnail": "!!notbase64"}"#
            ],
        )
        .unwrap();
        assert!(store.get(&path).is_err());

        let first = run_unit(&store, &extractor, &path, false);
        assert!(matches!(first, UnitReport::Indexed { fresh: true, store_warning: None, .. }));
        assert!(store.get(&path).unwrap().is_some());

        let second = run_unit(&store, &extractor, &path, false);
        assert!(matches!(second, UnitReport::Indexed { fresh: false, store_warning: None, .. }));
    }

    #[test]
    fn test_unreadable_file_is_not_cached() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.png");
        std::fs::write(&path, b"not a png").unwrap();
        let store = Library::open_in_memory().unwrap();

        let report = run_unit(&store, &MetadataExtractor::default(), &path, false);
        assert!(matches!(report, UnitReport::Unreadable { .. }));
        assert_eq!(report.path(), path.as_path());
        assert_eq!(store.image_count().unwrap(), 0);
    }
}
