pub mod config;
pub mod error;
pub mod error_codes;
pub mod events;
pub mod history;
pub mod logging;
pub mod manifest;
pub mod path_validation;
pub mod scheduler;
pub mod sync_engine;
pub mod system_integration;
pub mod webhook;

#[cfg(test)]
pub(crate) mod test_support;

use std::sync::Arc;

pub use config::{AgentConfig, ConfigStore};
pub use error::{Result, SyncError};
pub use events::{EventBus, SyncNotification};
pub use history::{SyncEvent, SyncEventType, SyncHistory};
pub use manifest::{ChangeProbe, HttpApi, RemoteApi};
pub use scheduler::{CycleOutcome, SyncScheduler, SyncSession, Trigger};
pub use sync_engine::{ReconcileReport, RemoteAudioEntry, RemoteId, SyncEngine, SyncPlan};

/// Scheduler talking to the HTTP API named in `settings`.
///
/// `settings` is the effective configuration (file plus environment and flags);
/// `config` only persists what the file holds, so overrides never reach disk.
pub fn build_scheduler(config: Arc<ConfigStore>, settings: &AgentConfig, bus: EventBus) -> Result<SyncScheduler> {
    settings.validate()?;
    let api = HttpApi::new(&settings.api_base, settings.request_timeout())?;
    Ok(SyncScheduler::new(Arc::new(api), config, bus))
}

pub fn app_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
