use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::path::PathBuf;

use crate::history::SyncEvent;

/// Identifier the remote API may send either as a JSON number or a string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct RemoteId(String);

impl RemoteId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RemoteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RemoteId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Loose {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl<'de> Deserialize<'de> for RemoteId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let id = match Loose::deserialize(deserializer)? {
            Loose::Int(n) => n.to_string(),
            Loose::Float(f) => format!("{f}"),
            Loose::Text(s) => s,
            Loose::Bool(_) => return Err(serde::de::Error::custom("identifier cannot be a boolean")),
        };
        Ok(Self(id))
    }
}

/// Accepts `true`, `1`, `"1"`, `"true"` as well as their negatives.
pub(crate) fn loose_bool<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
    Ok(match Option::<Loose>::deserialize(deserializer)? {
        None => false,
        Some(Loose::Bool(b)) => b,
        Some(Loose::Int(n)) => n != 0,
        Some(Loose::Float(f)) => f != 0.0,
        Some(Loose::Text(s)) => matches!(s.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes"),
    })
}

/// Epoch-seconds marker; tolerates numeric strings and null.
pub(crate) fn loose_marker<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<i64>, D::Error> {
    Ok(match Option::<Loose>::deserialize(deserializer)? {
        None | Some(Loose::Bool(_)) => None,
        Some(Loose::Int(n)) => Some(n),
        Some(Loose::Float(f)) => Some(f as i64),
        Some(Loose::Text(s)) => s.trim().parse::<i64>().ok(),
    })
}

/// One audio file the user should have locally.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteAudioEntry {
    pub collection: String,
    pub audio_filename: String,
    #[serde(default)]
    pub download_url: Option<String>,
    #[serde(default, alias = "es_favorito", deserialize_with = "loose_bool")]
    pub is_favorite: bool,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub post_id: Option<RemoteId>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AudioAction {
    /// Already at its expected location.
    Keep,
    Download,
    Relocate { from: PathBuf },
}

#[derive(Debug, Clone)]
pub struct PlannedEntry {
    pub target: PathBuf,
    pub audio: AudioAction,
    pub image: Option<PathBuf>,
    pub image_missing: bool,
}

/// Result of comparing a manifest against the download folder, without touching it.
#[derive(Debug, Clone, Default)]
pub struct SyncPlan {
    pub teardown: bool,
    pub stale_files: Vec<PathBuf>,
    pub stale_images: Vec<PathBuf>,
    pub entries: Vec<PlannedEntry>,
    pub invalid: Vec<EntryError>,
}

impl SyncPlan {
    pub fn downloads(&self) -> usize {
        self.entries.iter().filter(|e| e.audio == AudioAction::Download).count()
    }

    pub fn relocations(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| matches!(e.audio, AudioAction::Relocate { .. }))
            .count()
    }

    pub fn image_downloads(&self) -> usize {
        self.entries.iter().filter(|e| e.image_missing).count()
    }

    pub fn is_noop(&self) -> bool {
        !self.teardown
            && self.stale_files.is_empty()
            && self.stale_images.is_empty()
            && self.downloads() == 0
            && self.relocations() == 0
            && self.image_downloads() == 0
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum EntryErrorKind {
    DownloadFailed,
    RelocateFailed,
    DeleteFailed,
    ImageFailed,
    InvalidEntry,
    Other,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntryError {
    pub path: Option<PathBuf>,
    pub kind: EntryErrorKind,
    pub message: String,
}

impl EntryError {
    pub fn new(kind: EntryErrorKind, path: Option<PathBuf>, message: impl Into<String>) -> Self {
        Self {
            path,
            kind,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReconcileReport {
    pub downloaded: u64,
    pub relocated: u64,
    pub deleted: u64,
    pub images_downloaded: u64,
    pub images_deleted: u64,
    pub torn_down: bool,
    pub errors: Vec<EntryError>,
    /// Entries that cannot be applied as sent; retrying will not help.
    pub skipped: Vec<EntryError>,
    pub events: Vec<SyncEvent>,
}

impl ReconcileReport {
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn mutations(&self) -> u64 {
        self.downloaded
            + self.relocated
            + self.deleted
            + self.images_downloaded
            + self.images_deleted
            + u64::from(self.torn_down)
    }

    pub fn summary(&self) -> CycleSummary {
        CycleSummary {
            downloaded: self.downloaded,
            relocated: self.relocated,
            deleted: self.deleted,
            images_downloaded: self.images_downloaded,
            images_deleted: self.images_deleted,
            torn_down: self.torn_down,
            errors: self.errors.len(),
        }
    }
}

/// Counts sent to the UI when a cycle finishes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CycleSummary {
    pub downloaded: u64,
    pub relocated: u64,
    pub deleted: u64,
    pub images_downloaded: u64,
    pub images_deleted: u64,
    pub torn_down: bool,
    pub errors: usize,
}
