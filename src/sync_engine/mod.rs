pub mod engine;
pub mod layout;
pub mod types;

pub use engine::SyncEngine;
pub use layout::{EntryPaths, SyncLayout, FAVORITES_DIR, HIDDEN_IMAGES_DIR, HISTORY_FILE};
pub use types::{
    AudioAction, CycleSummary, EntryError, EntryErrorKind, PlannedEntry, ReconcileReport, RemoteAudioEntry,
    RemoteId, SyncPlan,
};
