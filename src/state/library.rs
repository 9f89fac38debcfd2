use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf, MAIN_SEPARATOR};
use std::time::Duration;
use tracing::{debug, info};

use super::data::NormalizedMetadata;
use crate::error::{GalleryError, Result};

/// The Library manages the SQLite metadata cache.
///
/// One row per image, keyed by absolute path, holding the record as a JSON
/// blob. The connection sits behind a mutex so worker threads can share one
/// `Library`; every statement is a single round trip, so a reader never sees
/// a half-written row.
pub struct Library {
    conn: Mutex<Connection>,
    db_path: Option<PathBuf>,
}

impl Library {
    /// Open the cache in the user's data directory:
    /// - Linux: ~/.local/share/prompt-gallery/cache.sqlite3
    /// - macOS: ~/Library/Application Support/prompt-gallery/cache.sqlite3
    /// - Windows: %APPDATA%\prompt-gallery\cache.sqlite3
    pub fn open_default() -> Result<Self> {
        Self::open(Self::default_path()?)
    }

    /// Open (or create) the cache database at `db_path`.
    pub fn open(db_path: impl Into<PathBuf>) -> Result<Self> {
        let db_path = db_path.into();
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(&db_path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        // journal_mode returns a row, so it can't go through execute()
        conn.query_row("PRAGMA journal_mode = WAL", [], |_| Ok(()))?;

        info!(path = %db_path.display(), "Metadata cache opened");

        let library = Library {
            conn: Mutex::new(conn),
            db_path: Some(db_path),
        };
        library.init_schema()?;
        Ok(library)
    }

    /// A throwaway cache, mostly for tests.
    pub fn open_in_memory() -> Result<Self> {
        let library = Library {
            conn: Mutex::new(Connection::open_in_memory()?),
            db_path: None,
        };
        library.init_schema()?;
        Ok(library)
    }

    /// Get the path where the database should be stored
    pub fn default_path() -> Result<PathBuf> {
        let mut path = dirs::data_dir()
            .or_else(dirs::home_dir)
            .ok_or(GalleryError::NoDataDir)?;
        path.push("prompt-gallery");
        path.push("cache.sqlite3");
        Ok(path)
    }

    /// Create the table if it doesn't exist. Never drops or rewrites columns.
    fn init_schema(&self) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "CREATE TABLE IF NOT EXISTS images (
                image_path      TEXT PRIMARY KEY NOT NULL,
                metadata        TEXT NOT NULL,
                updated_at      INTEGER NOT NULL
            )",
            [],
        )?;
        Ok(())
    }

    /// Path to the database file, `None` for in-memory caches.
    pub fn path(&self) -> Option<&Path> {
        self.db_path.as_deref()
    }

    /// Get a count of cached images
    pub fn image_count(&self) -> Result<i64> {
        let count = self
            .conn
            .lock()
            .query_row("SELECT COUNT(*) FROM images", [], |row| row.get(0))?;
        Ok(count)
    }

    /// Point lookup by image path.
    pub fn get(&self, path: &Path) -> Result<Option<NormalizedMetadata>> {
        let blob: Option<String> = self
            .conn
            .lock()
            .query_row(
                "SELECT metadata FROM images WHERE image_path = ?1",
                params![path_key(path)],
                |row| row.get(0),
            )
            .optional()?;

        match blob {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    /// Create or replace the row for `record.image_path`.
    pub fn upsert(&self, record: &NormalizedMetadata) -> Result<()> {
        if record.image_path.as_os_str().is_empty() {
            return Err(GalleryError::MissingPath);
        }
        let json = serde_json::to_string(record)?;

        self.conn.lock().execute(
            "INSERT INTO images (image_path, metadata, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(image_path) DO UPDATE SET
                metadata = excluded.metadata,
                updated_at = excluded.updated_at",
            params![path_key(&record.image_path), json, chrono::Utc::now().timestamp()],
        )?;
        debug!(path = %record.image_path.display(), "Cached record");
        Ok(())
    }

    /// Remove a single row. Returns whether a row existed.
    pub fn delete(&self, path: &Path) -> Result<bool> {
        let removed = self.conn.lock().execute(
            "DELETE FROM images WHERE image_path = ?1",
            params![path_key(path)],
        )?;
        Ok(removed > 0)
    }

    /// Remove every row at or below the directory `prefix`.
    ///
    /// The prefix is matched on a path-component boundary, so deleting
    /// `/collections/A` leaves `/collections/AB/...` alone.
    pub fn delete_by_prefix(&self, prefix: &Path) -> Result<usize> {
        let (exact, dir) = prefix_bounds(prefix);
        let removed = self.conn.lock().execute(
            "DELETE FROM images
             WHERE image_path = ?1 OR substr(image_path, 1, length(?2)) = ?2",
            params![exact, dir],
        )?;
        info!(prefix = %prefix.display(), removed, "Deleted cached rows");
        Ok(removed)
    }

    /// All cached records at or below `prefix`.
    pub fn records_under(&self, prefix: &Path) -> Result<Vec<NormalizedMetadata>> {
        let (exact, dir) = prefix_bounds(prefix);
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT metadata FROM images
             WHERE image_path = ?1 OR substr(image_path, 1, length(?2)) = ?2",
        )?;
        let blobs = stmt
            .query_map(params![exact, dir], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let mut records = Vec::with_capacity(blobs.len());
        for blob in blobs {
            records.push(serde_json::from_str(&blob)?);
        }
        Ok(records)
    }

    /// Flip the favorite flag of a cached row. Returns false when the row is absent.
    pub fn set_favorite(&self, path: &Path, favorite: bool) -> Result<bool> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let blob: Option<String> = tx
            .query_row(
                "SELECT metadata FROM images WHERE image_path = ?1",
                params![path_key(path)],
                |row| row.get(0),
            )
            .optional()?;
        let Some(blob) = blob else {
            return Ok(false);
        };

        let mut record: NormalizedMetadata = serde_json::from_str(&blob)?;
        record.favorite = favorite;
        tx.execute(
            "UPDATE images SET metadata = ?1, updated_at = ?2 WHERE image_path = ?3",
            params![
                serde_json::to_string(&record)?,
                chrono::Utc::now().timestamp(),
                path_key(path)
            ],
        )?;
        tx.commit()?;
        Ok(true)
    }

    /// Remove rows under `prefix` whose source file no longer exists.
    pub fn prune_missing(&self, prefix: &Path) -> Result<usize> {
        let (exact, dir) = prefix_bounds(prefix);
        let paths: Vec<String> = {
            let conn = self.conn.lock();
            let mut stmt = conn.prepare(
                "SELECT image_path FROM images
                 WHERE image_path = ?1 OR substr(image_path, 1, length(?2)) = ?2",
            )?;
            let rows = stmt
                .query_map(params![exact, dir], |row| row.get(0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            rows
        };

        let mut removed = 0;
        for path in paths {
            if !Path::new(&path).exists() && self.delete(Path::new(&path))? {
                removed += 1;
            }
        }

        if removed > 0 {
            info!(prefix = %prefix.display(), removed, "Pruned rows for deleted files");
        }
        Ok(removed)
    }
}

fn path_key(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

/// `(exact, directory-with-separator)` match keys for a prefix.
fn prefix_bounds(prefix: &Path) -> (String, String) {
    let raw = path_key(prefix);
    let trimmed = raw.trim_end_matches(MAIN_SEPARATOR);
    if trimmed.is_empty() {
        return (raw, MAIN_SEPARATOR.to_string());
    }
    (trimmed.to_string(), format!("{}{}", trimmed, MAIN_SEPARATOR))
}

// Implement Debug for better error messages
impl std::fmt::Debug for Library {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Library")
            .field("db_path", &self.db_path)
            .finish()
    }
}
