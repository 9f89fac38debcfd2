use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, GalleryError>;

/// Errors surfaced to callers of the library.
///
/// Per-file extraction problems never show up here; they are written into
/// `NormalizedMetadata::error` or counted in the ingestion summary.
#[derive(Error, Debug)]
pub enum GalleryError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Image decode error: {0}")]
    Image(#[from] image::ImageError),

    #[error("Collection root not found: {}", .0.display())]
    RootNotFound(PathBuf),

    #[error("Collection root is not a directory: {}", .0.display())]
    NotADirectory(PathBuf),

    #[error("Record has no image path")]
    MissingPath,

    #[error("Could not determine user data directory")]
    NoDataDir,

    #[error("Ingestion coordinator panicked")]
    CoordinatorPanicked,
}
