use std::path::PathBuf;
use thiserror::Error;

use crate::error_codes;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Network error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Server error: {status} for {url}")]
    Status { status: u16, url: String },

    #[error("I/O error for {path}: {source}")]
    FileSystem {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Corrupt state in {path}: {reason}")]
    CorruptState { path: PathBuf, reason: String },

    #[error("Invalid manifest entry: {reason}")]
    InvalidEntry { reason: String },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("No active sync target configured")]
    NotConfigured,
}

impl SyncError {
    pub fn fs(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::FileSystem {
            path: path.into(),
            source,
        }
    }

    /// Stable code for the UI collaborator.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Transport(_) | Self::Status { .. } => error_codes::ERR_TRANSPORT,
            Self::FileSystem { .. } => error_codes::ERR_FILESYSTEM,
            Self::CorruptState { .. } => error_codes::ERR_CORRUPT_STATE,
            Self::InvalidEntry { .. } => error_codes::ERR_INVALID_ENTRY,
            Self::InvalidConfig(_) | Self::NotConfigured => error_codes::ERR_NOT_CONFIGURED,
        }
    }

    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::Status { .. })
    }
}

pub type Result<T, E = SyncError> = std::result::Result<T, E>;
