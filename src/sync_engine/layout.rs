//! On-disk layout of a download folder.
//!
//! ```text
//! <root>/<collection>/<file>
//! <root>/<collection>/favorites/<file>
//! <root>/.hidden_images/<image basename>
//! <root>/sync-history.json
//! ```

use std::path::{Path, PathBuf};

use crate::path_validation::{join_within, validate_component};
use crate::sync_engine::types::RemoteAudioEntry;

pub const FAVORITES_DIR: &str = "favorites";
pub const HIDDEN_IMAGES_DIR: &str = ".hidden_images";
pub const HISTORY_FILE: &str = "sync-history.json";

/// Resolved locations for one manifest entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryPaths {
    pub collection_dir: PathBuf,
    pub plain: PathBuf,
    pub favorite: PathBuf,
    pub is_favorite: bool,
}

impl EntryPaths {
    /// Where the file must end up.
    pub fn target(&self) -> &Path {
        if self.is_favorite {
            &self.favorite
        } else {
            &self.plain
        }
    }

    /// The other slot; a file here is moved rather than downloaded again.
    pub fn counterpart(&self) -> &Path {
        if self.is_favorite {
            &self.plain
        } else {
            &self.favorite
        }
    }
}

#[derive(Debug, Clone)]
pub struct SyncLayout {
    root: PathBuf,
}

impl SyncLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn image_dir(&self) -> PathBuf {
        self.root.join(HIDDEN_IMAGES_DIR)
    }

    pub fn history_path(&self) -> PathBuf {
        self.root.join(HISTORY_FILE)
    }

    pub fn resolve(&self, entry: &RemoteAudioEntry) -> Result<EntryPaths, String> {
        let collection = entry.collection.as_str();
        if collection == HIDDEN_IMAGES_DIR || collection == HISTORY_FILE {
            return Err(format!("Collection name '{collection}' is reserved"));
        }

        let filename = entry.audio_filename.as_str();
        if filename == FAVORITES_DIR {
            return Err(format!("File name '{filename}' is reserved"));
        }

        let collection_dir = join_within(&self.root, &[collection])?;
        let plain = join_within(&self.root, &[collection, filename])?;
        let favorite = join_within(&self.root, &[collection, FAVORITES_DIR, filename])?;

        Ok(EntryPaths {
            collection_dir,
            plain,
            favorite,
            is_favorite: entry.is_favorite,
        })
    }

    /// Cache location of an image, keyed by the basename of its URL path.
    pub fn image_path(&self, image_url: &str) -> Result<PathBuf, String> {
        let url = reqwest::Url::parse(image_url).map_err(|e| format!("Invalid image URL: {e}"))?;
        let name = url
            .path_segments()
            .and_then(|mut segments| segments.next_back())
            .unwrap_or("");
        validate_component(name)?;
        Ok(self.image_dir().join(name))
    }

    /// Whether `path` is one of the bookkeeping files that cleanup never touches.
    pub fn is_history_file(&self, path: &Path) -> bool {
        path == self.history_path()
    }

    /// True when the folder holds anything besides the history file.
    pub fn has_synced_content(&self) -> bool {
        let Ok(entries) = std::fs::read_dir(&self.root) else {
            return false;
        };
        entries
            .flatten()
            .any(|entry| entry.file_name() != HISTORY_FILE)
    }
}
