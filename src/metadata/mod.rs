/// Generation-metadata extraction
///
/// This module handles:
/// - Tag normalization shared by both parsers (tags.rs)
/// - ComfyUI workflow graphs (comfy.rs)
/// - Delimited parameter text (params.rs)
/// - Parser tuning knobs (config.rs)
pub mod comfy;
pub mod config;
pub mod params;
pub mod tags;

pub use comfy::{GraphError, NodeRole, RoleMatcher, WorkflowPrompt};
pub use config::ExtractorConfig;
pub use params::ParameterText;

use std::path::Path;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::Result;
use crate::media::{FileTimestamps, JpegThumbnailer, SourceImage, ThumbnailEncoder, TimestampSource};
use crate::state::data::NormalizedMetadata;

/// Turns an image file into a [`NormalizedMetadata`] record.
///
/// Shared by every ingestion worker, so it holds no mutable state.
pub struct MetadataExtractor {
    config: ExtractorConfig,
    roles: RoleMatcher,
    thumbnailer: Arc<dyn ThumbnailEncoder>,
    timestamps: Arc<dyn TimestampSource>,
}

impl MetadataExtractor {
    pub fn new(config: ExtractorConfig) -> Self {
        Self {
            roles: RoleMatcher::new(&config),
            config,
            thumbnailer: Arc::new(JpegThumbnailer::default()),
            timestamps: Arc::new(FileTimestamps),
        }
    }

    pub fn with_thumbnailer(mut self, thumbnailer: Arc<dyn ThumbnailEncoder>) -> Self {
        self.thumbnailer = thumbnailer;
        self
    }

    pub fn with_timestamps(mut self, timestamps: Arc<dyn TimestampSource>) -> Self {
        self.timestamps = timestamps;
        self
    }

    pub fn config(&self) -> &ExtractorConfig {
        &self.config
    }

    /// Open `path` and extract it.
    ///
    /// The only error is the image itself failing to open or decode; every
    /// metadata problem ends up in the record's `error` field instead.
    pub fn read(&self, path: &Path) -> Result<NormalizedMetadata> {
        let source = SourceImage::open(path)?;
        Ok(self.extract(&source))
    }

    /// Extract an already opened image. Never fails.
    pub fn extract(&self, source: &SourceImage) -> NormalizedMetadata {
        let mut record = NormalizedMetadata::new(source.path());
        record.created_at = self.timestamps.created_at(source.path());
        record.thumbnail = match self.thumbnailer.encode(source.image()) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(path = %source.path().display(), error = %e, "Thumbnail encoding failed");
                Vec::new()
            }
        };

        if let Some(workflow) = source.text(&self.config.graph_key) {
            record.raw_metadata = workflow.to_string();
            match comfy::parse(workflow, &self.roles, &self.config) {
                Ok(prompt) => {
                    let loras: Vec<String> = prompt.loras.into_iter().map(|lora| lora.name).collect();
                    fill(
                        &mut record,
                        prompt.positive_prompt,
                        prompt.negative_prompt,
                        prompt.checkpoint.unwrap_or_default(),
                        loras,
                    );
                }
                Err(e) => {
                    debug!(path = %source.path().display(), error = %e, "Workflow graph rejected");
                    record.fail(e.to_string());
                }
            }
        } else if let Some(text) = source.text(&self.config.parameters_key) {
            record.raw_metadata = text.to_string();
            let parsed = params::parse(text);
            fill(
                &mut record,
                parsed.positive_prompt,
                parsed.negative_prompt,
                parsed.model.unwrap_or_default(),
                parsed.loras,
            );
        }

        record
    }
}

impl Default for MetadataExtractor {
    fn default() -> Self {
        Self::new(ExtractorConfig::default())
    }
}

impl std::fmt::Debug for MetadataExtractor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetadataExtractor")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

fn fill(
    record: &mut NormalizedMetadata,
    positive: String,
    negative: String,
    checkpoint: String,
    loras: Vec<String>,
) {
    record.tags = tags::build_tags(&positive, &checkpoint, &loras);
    record.positive_prompt = positive;
    record.negative_prompt = negative;
    record.checkpoint = checkpoint;
    record.loras = loras;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, TimeZone, Utc};
    use image::{DynamicImage, ImageError, ImageResult, RgbImage};
    use std::collections::{BTreeSet, HashMap};

    struct FixedTime;

    impl TimestampSource for FixedTime {
        fn created_at(&self, _path: &Path) -> DateTime<Utc> {
            Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
        }
    }

    struct FixedBytes;

    impl ThumbnailEncoder for FixedBytes {
        fn encode(&self, _image: &DynamicImage) -> ImageResult<Vec<u8>> {
            Ok(vec![1, 2, 3])
        }
    }

    struct Broken;

    impl ThumbnailEncoder for Broken {
        fn encode(&self, _image: &DynamicImage) -> ImageResult<Vec<u8>> {
            Err(ImageError::IoError(std::io::Error::other("encoder offline")))
        }
    }

    fn extractor() -> MetadataExtractor {
        MetadataExtractor::default()
            .with_thumbnailer(Arc::new(FixedBytes))
            .with_timestamps(Arc::new(FixedTime))
    }

    fn source(chunks: &[(&str, &str)]) -> SourceImage {
        let chunks: HashMap<String, String> = chunks
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        SourceImage::from_parts(
            "/gallery/a.png",
            chunks,
            DynamicImage::ImageRgb8(RgbImage::new(2, 2)),
        )
    }

    #[test]
    fn test_parameter_text() {
        let text = "a cat, <lora:sketch:0.8>\nNegative prompt: blurry\nSteps: 20, Model: myModel";
        let record = extractor().extract(&source(&[("parameters", text)]));

        assert_eq!(record.positive_prompt, "a cat, <lora:sketch:0.8>");
        assert_eq!(record.negative_prompt, "blurry");
        assert_eq!(record.checkpoint, "myModel");
        assert_eq!(record.loras, vec!["sketch"]);
        let expected: BTreeSet<String> = ["a cat", "model:mymodel", "lora:sketch"]
            .iter()
            .map(|t| t.to_string())
            .collect();
        assert_eq!(record.tags, expected);
        assert_eq!(record.raw_metadata, text);
        assert_eq!(record.thumbnail, vec![1, 2, 3]);
        assert!(!record.has_error());
    }

    #[test]
    fn test_unsupported_is_not_an_error() {
        let record = extractor().extract(&source(&[("Software", "paint")]));
        assert!(record.is_unsupported());
        assert!(record.tags.is_empty());
        assert_eq!(record.thumbnail, vec![1, 2, 3]);
        assert_eq!(record.created_at, FixedTime.created_at(Path::new("")));
    }

    #[test]
    fn test_malformed_graph_keeps_thumbnail_and_time() {
        let record = extractor().extract(&source(&[("workflow", r#"{"nodes": [], "links": []}"#)]));
        assert_eq!(record.error, GraphError::MissingSampler.to_string());
        assert!(record.positive_prompt.is_empty());
        assert!(record.tags.is_empty());
        assert_eq!(record.thumbnail, vec![1, 2, 3]);
        assert_eq!(record.created_at, FixedTime.created_at(Path::new("")));
        assert!(!record.raw_metadata.is_empty());
    }

    #[test]
    fn test_graph_wins_over_parameters() {
        let record = extractor().extract(&source(&[
            ("workflow", "not json"),
            ("parameters", "a cat\nSteps: 1"),
        ]));
        assert!(record.error.starts_with("Workflow is not valid JSON"));
        assert!(record.positive_prompt.is_empty());
    }

    #[test]
    fn test_thumbnail_failure_is_not_fatal() {
        let extractor = MetadataExtractor::default().with_thumbnailer(Arc::new(Broken));
        let record = extractor.extract(&source(&[("parameters", "a dog")]));
        assert!(record.thumbnail.is_empty());
        assert_eq!(record.positive_prompt, "a dog");
    }

    #[test]
    fn test_read_missing_file_is_an_error() {
        assert!(extractor().read(Path::new("/no/such/file.png")).is_err());
    }
}
