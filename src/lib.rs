//! Generation-metadata extraction, tag indexing and caching for collections
//! of AI-generated images.
//!
//! A [`Gallery`] opens a collection directory through the
//! [`IngestionPipeline`]: every PNG is resolved either from the
//! [`Library`] cache or by running the [`MetadataExtractor`], and lands in
//! an [`ImageIndex`] that answers tag queries for the presentation layer.

pub mod config;
pub mod error;
pub mod ingest;
pub mod media;
pub mod metadata;
pub mod session;
pub mod state;

pub use config::{Configurations, ImageCollection, Settings};
pub use error::{GalleryError, Result};
pub use ingest::{IngestEvent, IngestHandle, IngestOptions, IngestState, IngestSummary, IngestionPipeline};
pub use metadata::{ExtractorConfig, MetadataExtractor};
pub use session::Gallery;
pub use state::data::{NormalizedMetadata, TagEntry};
pub use state::index::ImageIndex;
pub use state::library::Library;
