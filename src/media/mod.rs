/// Image file handling
///
/// This module handles:
/// - Reading embedded PNG text chunks (png.rs)
/// - Opening source images once for extraction (source.rs)
/// - Generating thumbnails (thumbnail.rs)
pub mod png;
pub mod source;
pub mod thumbnail;

pub use source::{FileTimestamps, SourceImage, TimestampSource};
pub use thumbnail::{JpegThumbnailer, ThumbnailEncoder};
