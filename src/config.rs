use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::error::{GalleryError, Result};
use crate::ingest::IngestOptions;
use crate::metadata::ExtractorConfig;

/// Settings file name inside the application data directory
pub const CONFIG_FILE_NAME: &str = "config.json";

/// A named directory the user browses as one gallery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageCollection {
    pub name: String,
    pub directory_path: PathBuf,
}

impl ImageCollection {
    pub fn new(name: impl Into<String>, directory_path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            directory_path: directory_path.into(),
        }
    }
}

/// Everything persisted in the settings file. Missing keys take defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub collections: Vec<ImageCollection>,
    #[serde(alias = "slideshow_delay")]
    pub slideshow_delay_ms: u64,
    pub images_per_page: usize,
    pub ingest: IngestOptions,
    pub extractor: ExtractorConfig,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            collections: Vec::new(),
            slideshow_delay_ms: 3000,
            images_per_page: 128,
            ingest: IngestOptions::default(),
            extractor: ExtractorConfig::default(),
        }
    }
}

/// Settings bound to the file they live in. Every change is written back
/// immediately.
#[derive(Debug)]
pub struct Configurations {
    path: PathBuf,
    settings: Settings,
}

impl Configurations {
    /// Load from `<data_dir>/prompt-gallery/config.json`.
    pub fn open_default() -> Result<Self> {
        let dir = dirs::data_dir().ok_or(GalleryError::NoDataDir)?;
        Self::load(dir.join("prompt-gallery").join(CONFIG_FILE_NAME))
    }

    /// Load from `path`; a missing file yields defaults.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let settings = match fs::read_to_string(&path) {
            Ok(json) => serde_json::from_str(&json)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "No settings file, using defaults");
                Settings::default()
            }
            Err(e) => return Err(e.into()),
        };
        Ok(Self { path, settings })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.path, serde_json::to_string_pretty(&self.settings)?)?;
        debug!(path = %self.path.display(), "Saved settings");
        Ok(())
    }

    pub fn collections(&self) -> &[ImageCollection] {
        &self.settings.collections
    }

    pub fn collection_exists(&self, name: &str) -> bool {
        self.collection(name).is_some()
    }

    pub fn collection(&self, name: &str) -> Option<&ImageCollection> {
        self.settings.collections.iter().find(|c| c.name == name)
    }

    /// Register a collection. Returns false if the name is taken.
    pub fn add_collection(&mut self, collection: ImageCollection) -> Result<bool> {
        if self.collection_exists(&collection.name) {
            return Ok(false);
        }
        info!(name = %collection.name, path = %collection.directory_path.display(), "Added collection");
        self.settings.collections.push(collection);
        self.save()?;
        Ok(true)
    }

    /// Unregister a collection by name and return it. Cached rows are left
    /// to `Gallery::delete_collection`.
    pub fn remove_collection(&mut self, name: &str) -> Result<Option<ImageCollection>> {
        let Some(pos) = self.settings.collections.iter().position(|c| c.name == name) else {
            return Ok(None);
        };
        let removed = self.settings.collections.remove(pos);
        self.save()?;
        Ok(Some(removed))
    }

    pub fn set_slideshow_delay(&mut self, delay_ms: u64) -> Result<()> {
        self.settings.slideshow_delay_ms = delay_ms;
        self.save()
    }

    pub fn set_images_per_page(&mut self, count: usize) -> Result<()> {
        self.settings.images_per_page = count;
        self.save()
    }
}
