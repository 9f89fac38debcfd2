use chrono::{DateTime, Utc};
use image::DynamicImage;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use super::png::read_text_chunks;
use crate::error::Result;

/// An image opened for extraction: the file is read once, its embedded text
/// chunks collected and its pixels decoded from the same buffer.
#[derive(Debug)]
pub struct SourceImage {
    path: PathBuf,
    text_chunks: HashMap<String, String>,
    image: DynamicImage,
}

impl SourceImage {
    /// Read and decode `path`. Fails only when the file can't be read or decoded.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let bytes = std::fs::read(&path)?;
        Self::from_bytes(path, &bytes)
    }

    /// Build from an in-memory file, e.g. one already read by the caller.
    pub fn from_bytes(path: impl Into<PathBuf>, bytes: &[u8]) -> Result<Self> {
        let text_chunks = read_text_chunks(bytes);
        let image = image::load_from_memory(bytes)?;
        Ok(Self::from_parts(path, text_chunks, image))
    }

    /// Assemble from pieces decoded elsewhere.
    pub fn from_parts(
        path: impl Into<PathBuf>,
        text_chunks: HashMap<String, String>,
        image: DynamicImage,
    ) -> Self {
        Self {
            path: path.into(),
            text_chunks,
            image,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn image(&self) -> &DynamicImage {
        &self.image
    }

    /// Embedded text stored under `keyword`, if any.
    pub fn text(&self, keyword: &str) -> Option<&str> {
        self.text_chunks.get(keyword).map(String::as_str)
    }

    pub fn text_chunks(&self) -> &HashMap<String, String> {
        &self.text_chunks
    }
}

/// Where a record's capture time comes from.
pub trait TimestampSource: Send + Sync {
    fn created_at(&self, path: &Path) -> DateTime<Utc>;
}

/// File-system timestamps: creation time, else modification time, else now.
#[derive(Debug, Clone, Copy, Default)]
pub struct FileTimestamps;

impl TimestampSource for FileTimestamps {
    fn created_at(&self, path: &Path) -> DateTime<Utc> {
        std::fs::metadata(path)
            .and_then(|meta| meta.created().or_else(|_| meta.modified()))
            .map(DateTime::<Utc>::from)
            .unwrap_or_else(|_| Utc::now())
    }
}
