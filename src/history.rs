//! Sync history shown in the desktop shell.
//!
//! A capped JSON array stored as `sync-history.json` inside the download
//! folder, newest first. The whole file is rewritten on every append.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::error::{Result, SyncError};
use crate::events::{EventBus, SyncNotification};
use crate::sync_engine::layout::HISTORY_FILE;

/// Default number of history entries kept on disk
pub const DEFAULT_HISTORY_LIMIT: usize = 50;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum SyncEventType {
    Download,
    Relocate,
    Delete,
    DeleteImage,
    DeleteAll,
    ImageDownload,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SyncEvent {
    pub timestamp: String,
    pub event_type: SyncEventType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, alias = "audio", alias = "filePath", skip_serializing_if = "Option::is_none")]
    pub audio_path: Option<PathBuf>,
    #[serde(default, alias = "image", skip_serializing_if = "Option::is_none")]
    pub image_path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_changed_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_changed_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub download_dir: Option<PathBuf>,
}

pub(crate) fn now_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

impl SyncEvent {
    pub fn new(event_type: SyncEventType) -> Self {
        Self {
            timestamp: now_timestamp(),
            event_type,
            user_id: None,
            audio_path: None,
            image_path: None,
            audio_changed_at: None,
            image_changed_at: None,
            previous_path: None,
            download_dir: None,
        }
    }

    pub fn user(mut self, user_id: &str) -> Self {
        self.user_id = Some(user_id.to_string());
        self
    }

    pub fn audio(mut self, path: impl Into<PathBuf>, changed_at: Option<String>) -> Self {
        self.audio_path = Some(path.into());
        self.audio_changed_at = changed_at;
        self
    }

    pub fn image(mut self, path: impl Into<PathBuf>, changed_at: Option<String>) -> Self {
        self.image_path = Some(path.into());
        self.image_changed_at = changed_at;
        self
    }

    pub fn moved_from(mut self, path: impl Into<PathBuf>) -> Self {
        self.previous_path = Some(path.into());
        self
    }

    pub fn folder(mut self, path: impl Into<PathBuf>) -> Self {
        self.download_dir = Some(path.into());
        self
    }

    fn parsed_timestamp(&self) -> Option<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(&self.timestamp)
            .ok()
            .map(|t| t.with_timezone(&Utc))
    }
}

pub struct SyncHistory {
    path: PathBuf,
    limit: usize,
    bus: Option<EventBus>,
}

impl SyncHistory {
    pub fn for_root(root: &Path, limit: usize) -> Self {
        Self {
            path: root.join(HISTORY_FILE),
            limit: limit.max(1),
            bus: None,
        }
    }

    /// Publish `HistoryUpdated` after every append.
    pub fn with_notifier(mut self, bus: EventBus) -> Self {
        self.bus = Some(bus);
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Add one event, keep the newest `limit` entries and rewrite the file.
    pub fn append(&self, event: SyncEvent) -> Result<Vec<SyncEvent>> {
        let mut history = self.load();
        history.insert(0, event);
        sort_newest_first(&mut history);
        history.truncate(self.limit);

        self.write(&history)?;
        debug!(path = %self.path.display(), entries = history.len(), "sync history updated");

        if let Some(bus) = &self.bus {
            bus.emit(SyncNotification::HistoryUpdated {
                history: history.clone(),
            });
        }

        Ok(history)
    }

    /// Current history; creates an empty file when none exists yet.
    pub fn read(&self) -> Vec<SyncEvent> {
        if !self.path.exists() {
            if let Err(e) = self.write(&[]) {
                warn!("Could not create sync history file: {}", e);
            }
            return Vec::new();
        }
        self.load()
    }

    fn load(&self) -> Vec<SyncEvent> {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Vec::new(),
            Err(e) => {
                warn!("Could not read sync history {}: {}", self.path.display(), e);
                return Vec::new();
            }
        };

        match serde_json::from_str::<Vec<SyncEvent>>(&raw) {
            Ok(history) => history,
            Err(e) => {
                let err = SyncError::CorruptState {
                    path: self.path.clone(),
                    reason: e.to_string(),
                };
                warn!("{}; starting a fresh history", err);
                Vec::new()
            }
        }
    }

    fn write(&self, history: &[SyncEvent]) -> Result<()> {
        let dir = self.path.parent().unwrap_or_else(|| Path::new("."));
        std::fs::create_dir_all(dir).map_err(|e| SyncError::fs(dir, e))?;

        let json = serde_json::to_vec_pretty(history).map_err(|e| SyncError::CorruptState {
            path: self.path.clone(),
            reason: e.to_string(),
        })?;

        let mut temp = tempfile::NamedTempFile::new_in(dir).map_err(|e| SyncError::fs(dir, e))?;
        temp.write_all(&json).map_err(|e| SyncError::fs(temp.path(), e))?;
        temp.persist(&self.path)
            .map_err(|e| SyncError::fs(&self.path, e.error))?;
        Ok(())
    }
}

fn sort_newest_first(history: &mut [SyncEvent]) {
    // Stable: among equal timestamps the most recently appended stays in front.
    history.sort_by(|a, b| match (a.parsed_timestamp(), b.parsed_timestamp()) {
        (Some(a), Some(b)) => b.cmp(&a),
        (Some(_), None) => std::cmp::Ordering::Less,
        (None, Some(_)) => std::cmp::Ordering::Greater,
        (None, None) => std::cmp::Ordering::Equal,
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn event_at(timestamp: &str, path: &str) -> SyncEvent {
        let mut event = SyncEvent::new(SyncEventType::Download).audio(path, None);
        event.timestamp = timestamp.to_string();
        event
    }

    #[test]
    fn test_append_creates_file_lazily() {
        let temp = TempDir::new().unwrap();
        let history = SyncHistory::for_root(temp.path(), DEFAULT_HISTORY_LIMIT);
        assert!(!history.path().exists());

        let entries = history.append(SyncEvent::new(SyncEventType::Download).user("355")).unwrap();
        assert_eq!(entries.len(), 1);
        assert!(history.path().exists());
        assert_eq!(history.read(), entries);
    }

    #[test]
    fn test_append_caps_and_orders_newest_first() {
        let temp = TempDir::new().unwrap();
        let history = SyncHistory::for_root(temp.path(), 3);

        for i in 0..5 {
            history
                .append(event_at(&format!("2024-12-24T18:26:0{i}.000Z"), &format!("{i}.wav")))
                .unwrap();
        }

        let entries = history.read();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].audio_path, Some(PathBuf::from("4.wav")));
        assert_eq!(entries[2].audio_path, Some(PathBuf::from("2.wav")));
    }

    #[test]
    fn test_out_of_order_timestamps_are_sorted() {
        let temp = TempDir::new().unwrap();
        let history = SyncHistory::for_root(temp.path(), 10);
        history.append(event_at("2024-12-24T18:26:09.000Z", "late.wav")).unwrap();
        history.append(event_at("2024-12-24T18:26:01.000Z", "early.wav")).unwrap();

        let entries = history.read();
        assert_eq!(entries[0].audio_path, Some(PathBuf::from("late.wav")));
        assert_eq!(entries[1].audio_path, Some(PathBuf::from("early.wav")));
    }

    #[test]
    fn test_equal_timestamps_keep_latest_append_first() {
        let temp = TempDir::new().unwrap();
        let history = SyncHistory::for_root(temp.path(), 10);
        history.append(event_at("2024-12-24T18:26:00.000Z", "first.wav")).unwrap();
        history.append(event_at("2024-12-24T18:26:00.000Z", "second.wav")).unwrap();

        let entries = history.read();
        assert_eq!(entries[0].audio_path, Some(PathBuf::from("second.wav")));
    }

    #[test]
    fn test_read_self_heals_missing_file() {
        let temp = TempDir::new().unwrap();
        let history = SyncHistory::for_root(temp.path(), 10);

        assert!(history.read().is_empty());
        let raw = std::fs::read_to_string(history.path()).unwrap();
        assert_eq!(raw.trim(), "[]");
    }

    #[test]
    fn test_corrupt_file_is_treated_as_empty() {
        let temp = TempDir::new().unwrap();
        let history = SyncHistory::for_root(temp.path(), 10);
        std::fs::write(history.path(), "{ not json").unwrap();

        assert!(history.read().is_empty());

        let entries = history.append(SyncEvent::new(SyncEventType::Delete)).unwrap();
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn test_reads_legacy_field_names() {
        let temp = TempDir::new().unwrap();
        let history = SyncHistory::for_root(temp.path(), 10);
        std::fs::write(
            history.path(),
            r#"[{"timestamp":"2024-12-24T18:26:07.868Z","eventType":"download","userId":"355","audio":"/s/a.wav","image":"/s/.hidden_images/a.jpeg"}]"#,
        )
        .unwrap();

        let entries = history.read();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].event_type, SyncEventType::Download);
        assert_eq!(entries[0].audio_path, Some(PathBuf::from("/s/a.wav")));
        assert_eq!(entries[0].image_path, Some(PathBuf::from("/s/.hidden_images/a.jpeg")));
    }

    #[test]
    fn test_serialized_names() {
        let event = SyncEvent::new(SyncEventType::DeleteImage).user("7");
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["eventType"], "delete-image");
        assert_eq!(json["userId"], "7");
        assert!(json.get("audioPath").is_none());
    }

    #[tokio::test]
    async fn test_append_notifies_subscribers() {
        let temp = TempDir::new().unwrap();
        let bus = EventBus::default();
        let mut rx = bus.subscribe();
        let history = SyncHistory::for_root(temp.path(), 10).with_notifier(bus);

        history.append(SyncEvent::new(SyncEventType::Download)).unwrap();

        match rx.recv().await.unwrap() {
            SyncNotification::HistoryUpdated { history } => assert_eq!(history.len(), 1),
            other => panic!("unexpected notification: {other:?}"),
        }
    }
}
