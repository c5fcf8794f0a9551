//! In-process notification bus between the sync engine and the desktop shell.
//!
//! Built on `tokio::sync::broadcast`: every subscriber sees every notification
//! in publish order. A subscriber that falls more than the buffer size behind
//! receives `RecvError::Lagged` and skips ahead.

use serde::Serialize;
use std::path::PathBuf;
use tokio::sync::broadcast;
use tracing::trace;

use crate::history::SyncEvent;
use crate::sync_engine::types::CycleSummary;

pub use tokio::sync::broadcast::error::RecvError;
pub use tokio::sync::broadcast::Receiver;

/// Default buffer size per subscriber
pub const DEFAULT_EVENT_BUFFER_SIZE: usize = 256;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum SyncNotification {
    /// A file was downloaded or moved.
    #[serde(rename_all = "camelCase")]
    FilesChanged {
        audio_path: Option<PathBuf>,
        image_path: Option<PathBuf>,
    },
    HistoryUpdated { history: Vec<SyncEvent> },
    CycleCompleted { summary: CycleSummary },
    /// The cycle was abandoned; the next tick retries.
    CycleFailed { code: String, message: String },
}

impl SyncNotification {
    /// Channel name used when forwarding to a UI.
    pub fn channel(&self) -> &'static str {
        match self {
            Self::FilesChanged { .. } => "sync-file-downloaded",
            Self::HistoryUpdated { .. } => "sync-history-updated",
            Self::CycleCompleted { .. } => "sync-completed",
            Self::CycleFailed { .. } => "sync-error",
        }
    }
}

#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<SyncNotification>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_BUFFER_SIZE)
    }
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publish to all current subscribers; returns how many received it.
    pub fn emit(&self, notification: SyncNotification) -> usize {
        let channel = notification.channel();
        match self.sender.send(notification) {
            Ok(n) => n,
            Err(_) => {
                trace!(channel, "no subscribers for notification");
                0
            }
        }
    }

    pub fn subscribe(&self) -> Receiver<SyncNotification> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}
