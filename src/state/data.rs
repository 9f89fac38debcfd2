/// Shared data structures for the application state
///
/// These structs represent the data model that flows between
/// the extractor, the cache database and the UI layer.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

/// Generation provenance of a single image, normalized across tools.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedMetadata {
    /// Absolute path of the source image; the identity key.
    pub image_path: PathBuf,
    /// Set by the user, never by the extractor.
    #[serde(default)]
    pub favorite: bool,
    /// Checkpoint (model) name, empty when unknown.
    #[serde(default)]
    pub checkpoint: String,
    /// LoRA names in workflow/prompt order.
    #[serde(default)]
    pub loras: Vec<String>,
    #[serde(default)]
    pub positive_prompt: String,
    #[serde(default)]
    pub negative_prompt: String,
    /// Normalized, lowercase, deduplicated tags.
    #[serde(default)]
    pub tags: BTreeSet<String>,
    /// Encoded preview bytes (JPEG by default).
    #[serde(default, with = "base64_bytes")]
    pub thumbnail: Vec<u8>,
    /// Capture time, used for the default newest-first ordering.
    #[serde(default)]
    pub created_at: DateTime<Utc>,
    /// Verbatim embedded text or workflow JSON.
    #[serde(default)]
    pub raw_metadata: String,
    /// Extraction diagnostic; empty on success.
    #[serde(default)]
    pub error: String,
}

impl NormalizedMetadata {
    /// Create an empty record for `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            image_path: path.into(),
            favorite: false,
            checkpoint: String::new(),
            loras: Vec::new(),
            positive_prompt: String::new(),
            negative_prompt: String::new(),
            tags: BTreeSet::new(),
            thumbnail: Vec::new(),
            created_at: DateTime::<Utc>::default(),
            raw_metadata: String::new(),
            error: String::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.image_path
    }

    /// True when extraction produced a diagnostic.
    pub fn has_error(&self) -> bool {
        !self.error.is_empty()
    }

    /// True when no recognized metadata block was found (and no error).
    pub fn is_unsupported(&self) -> bool {
        !self.has_error() && self.raw_metadata.is_empty()
    }

    /// Clear everything derived from a parse, keeping thumbnail and timestamp.
    pub(crate) fn fail(&mut self, message: impl Into<String>) {
        self.checkpoint.clear();
        self.loras.clear();
        self.positive_prompt.clear();
        self.negative_prompt.clear();
        self.tags.clear();
        self.error = message.into();
    }

    /// Human-readable provenance text for the viewer's info panel.
    pub fn summary(&self) -> String {
        let mut text = String::new();
        if !self.checkpoint.is_empty() {
            text.push_str(&format!("MODEL: {}\n\n", self.checkpoint));
        }
        for lora in &self.loras {
            text.push_str(&format!("LORA: {}\n", lora));
        }
        if !self.loras.is_empty() {
            text.push('\n');
        }
        text.push_str(&format!(
            "POSITIVE:\n{}\n\nNEGATIVE:\n{}\n",
            self.positive_prompt.replace('\n', " "),
            self.negative_prompt.replace('\n', " ")
        ));
        if self.has_error() {
            text.push_str(&format!("\nERROR:\n{}\n", self.error));
        }
        text
    }
}

/// A normalized tag and the images carrying it. Derived, never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagEntry {
    pub name: String,
    pub files: BTreeSet<PathBuf>,
}

impl TagEntry {
    pub fn count(&self) -> usize {
        self.files.len()
    }
}

/// Serde adapter storing thumbnail bytes as base64 text in the JSON blob.
mod base64_bytes {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(encoded).map_err(serde::de::Error::custom)
    }
}
