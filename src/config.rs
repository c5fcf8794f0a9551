//! Agent configuration and persisted sync state.
//!
//! Sources, lowest to highest priority: defaults, the YAML file, environment
//! variables, then command line flags (applied by the binary).

use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::{Result, SyncError};
use crate::history::DEFAULT_HISTORY_LIMIT;
use crate::scheduler::SyncSession;

pub const DEFAULT_API_BASE: &str = "https://2upra.com/wp-json/1/v1";
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 30;
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 60;

pub const ENV_CONFIG_PATH: &str = "SAMPLESYNC_CONFIG";
pub const ENV_API_BASE: &str = "SAMPLESYNC_API_BASE";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub api_base: String,
    pub poll_interval_secs: u64,
    pub history_limit: usize,
    pub request_timeout_secs: u64,
    pub user_id: Option<String>,
    pub download_dir: Option<PathBuf>,
    /// Watermark of the last fully applied remote change, epoch seconds.
    pub last_sync_timestamp: i64,
    pub webhook_port: Option<u16>,
    pub log_level: String,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            api_base: DEFAULT_API_BASE.to_string(),
            poll_interval_secs: DEFAULT_POLL_INTERVAL_SECS,
            history_limit: DEFAULT_HISTORY_LIMIT,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            user_id: None,
            download_dir: None,
            last_sync_timestamp: 0,
            webhook_port: None,
            log_level: "info".to_string(),
        }
    }
}

impl AgentConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Persisted target, if both halves are present.
    pub fn session(&self) -> Option<SyncSession> {
        match (&self.user_id, &self.download_dir) {
            (Some(user), Some(dir)) if !user.trim().is_empty() => Some(SyncSession::new(user.as_str(), dir.clone())),
            _ => None,
        }
    }

    pub fn apply_env(&mut self) {
        self.apply_env_from(|key| std::env::var(key).ok());
    }

    fn apply_env_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(base) = lookup(ENV_API_BASE).filter(|v| !v.trim().is_empty()) {
            debug!(api_base = %base, "api_base overridden from environment");
            self.api_base = base;
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.api_base.trim().is_empty() {
            return Err(SyncError::InvalidConfig("api_base cannot be empty".to_string()));
        }
        if self.poll_interval_secs == 0 {
            return Err(SyncError::InvalidConfig("poll_interval_secs must be greater than 0".to_string()));
        }
        if self.request_timeout_secs == 0 {
            return Err(SyncError::InvalidConfig("request_timeout_secs must be greater than 0".to_string()));
        }
        if self.history_limit == 0 {
            return Err(SyncError::InvalidConfig("history_limit must be greater than 0".to_string()));
        }
        if let Some(dir) = &self.download_dir {
            if !dir.is_absolute() {
                return Err(SyncError::InvalidConfig(format!(
                    "download_dir must be absolute: {}",
                    dir.display()
                )));
            }
        }
        Ok(())
    }
}

/// File-backed configuration shared by the scheduler and the binary.
pub struct ConfigStore {
    path: PathBuf,
    config: Mutex<AgentConfig>,
}

impl ConfigStore {
    /// `<config dir>/samplesync/config.yaml`
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("samplesync")
            .join("config.yaml")
    }

    /// CLI flag, then `SAMPLESYNC_CONFIG`, then the platform default.
    pub fn resolve_path(cli: Option<PathBuf>) -> PathBuf {
        cli.or_else(|| std::env::var_os(ENV_CONFIG_PATH).map(PathBuf::from))
            .unwrap_or_else(Self::default_path)
    }

    /// Missing and unreadable files both fall back to defaults.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let config = match std::fs::read_to_string(&path) {
            Ok(raw) => match serde_yaml::from_str::<AgentConfig>(&raw) {
                Ok(config) => config,
                Err(e) => {
                    let err = SyncError::CorruptState {
                        path: path.clone(),
                        reason: e.to_string(),
                    };
                    warn!("{}; using defaults", err);
                    AgentConfig::default()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => AgentConfig::default(),
            Err(e) => {
                warn!("Could not read config {}: {}; using defaults", path.display(), e);
                AgentConfig::default()
            }
        };

        Self {
            path,
            config: Mutex::new(config),
        }
    }

    pub fn with_config(path: impl Into<PathBuf>, config: AgentConfig) -> Self {
        Self {
            path: path.into(),
            config: Mutex::new(config),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn guard(&self) -> MutexGuard<'_, AgentConfig> {
        self.config.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn snapshot(&self) -> AgentConfig {
        self.guard().clone()
    }

    pub fn watermark(&self) -> i64 {
        self.guard().last_sync_timestamp
    }

    pub fn set_watermark(&self, watermark: i64) -> Result<()> {
        self.update(|config| config.last_sync_timestamp = watermark)
    }

    /// Remember the active target; a different target starts from watermark 0.
    pub fn set_target(&self, session: &SyncSession) -> Result<()> {
        self.update(|config| {
            let same = config.user_id.as_deref() == Some(session.user_id.as_str())
                && config.download_dir.as_deref() == Some(session.download_root.as_path());
            if !same {
                config.last_sync_timestamp = 0;
            }
            config.user_id = Some(session.user_id.clone());
            config.download_dir = Some(session.download_root.clone());
        })
    }

    pub fn clear_target(&self) -> Result<()> {
        self.update(|config| {
            config.user_id = None;
            config.download_dir = None;
            config.last_sync_timestamp = 0;
        })
    }

    /// Store `watermark` only if `session` is still the persisted target.
    /// Returns whether it was stored.
    pub fn advance_watermark(&self, session: &SyncSession, watermark: i64) -> Result<bool> {
        let mut config = self.guard();
        if config.session().as_ref() != Some(session) {
            return Ok(false);
        }
        config.last_sync_timestamp = watermark;
        self.persist(&config)?;
        Ok(true)
    }

    /// Apply `change` and persist. The in-memory copy is kept even when the write fails.
    /// Writes are serialised by the config lock.
    pub fn update(&self, change: impl FnOnce(&mut AgentConfig)) -> Result<()> {
        let mut config = self.guard();
        change(&mut config);
        self.persist(&config)
    }

    fn persist(&self, config: &AgentConfig) -> Result<()> {
        let dir = self.path.parent().unwrap_or_else(|| Path::new("."));
        std::fs::create_dir_all(dir).map_err(|e| SyncError::fs(dir, e))?;

        let yaml = serde_yaml::to_string(config).map_err(|e| SyncError::CorruptState {
            path: self.path.clone(),
            reason: e.to_string(),
        })?;

        let mut temp = tempfile::NamedTempFile::new_in(dir).map_err(|e| SyncError::fs(dir, e))?;
        temp.write_all(yaml.as_bytes())
            .map_err(|e| SyncError::fs(temp.path(), e))?;
        temp.persist(&self.path)
            .map_err(|e| SyncError::fs(&self.path, e.error))?;
        debug!(path = %self.path.display(), "config saved");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = AgentConfig::default();
        assert_eq!(config.api_base, DEFAULT_API_BASE);
        assert_eq!(config.poll_interval(), Duration::from_secs(30));
        assert_eq!(config.history_limit, 50);
        assert_eq!(config.last_sync_timestamp, 0);
        assert!(config.session().is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_missing_file_loads_defaults() {
        let temp = TempDir::new().unwrap();
        let store = ConfigStore::load(temp.path().join("config.yaml"));
        assert_eq!(store.snapshot(), AgentConfig::default());
    }

    #[test]
    fn test_corrupt_file_loads_defaults() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.yaml");
        std::fs::write(&path, "poll_interval_secs: [not, a, number").unwrap();

        let store = ConfigStore::load(&path);
        assert_eq!(store.snapshot(), AgentConfig::default());
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.yaml");
        std::fs::write(&path, "user_id: \"355\"\nlast_sync_timestamp: 1700000000\n").unwrap();

        let config = ConfigStore::load(&path).snapshot();
        assert_eq!(config.user_id.as_deref(), Some("355"));
        assert_eq!(config.last_sync_timestamp, 1700000000);
        assert_eq!(config.poll_interval_secs, DEFAULT_POLL_INTERVAL_SECS);
    }

    #[test]
    fn test_mutations_survive_reload() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("nested/config.yaml");
        let store = ConfigStore::load(&path);
        let session = SyncSession::new("355", temp.path().join("Sync 2upra"));

        store.set_target(&session).unwrap();
        store.set_watermark(1700000200).unwrap();

        let reloaded = ConfigStore::load(&path);
        assert_eq!(reloaded.watermark(), 1700000200);
        assert_eq!(reloaded.snapshot().session(), Some(session));
    }

    #[test]
    fn test_retarget_resets_watermark() {
        let temp = TempDir::new().unwrap();
        let store = ConfigStore::load(temp.path().join("config.yaml"));
        let first = SyncSession::new("355", temp.path().join("a"));

        store.set_target(&first).unwrap();
        store.set_watermark(42).unwrap();
        store.set_target(&first).unwrap();
        assert_eq!(store.watermark(), 42);

        store.set_target(&SyncSession::new("356", temp.path().join("a"))).unwrap();
        assert_eq!(store.watermark(), 0);
    }

    #[test]
    fn test_advance_watermark_requires_current_target() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.yaml");
        let store = ConfigStore::load(&path);
        let old = SyncSession::new("355", temp.path().join("a"));
        let new = SyncSession::new("356", temp.path().join("b"));

        store.set_target(&old).unwrap();
        assert!(store.advance_watermark(&old, 10).unwrap());
        assert_eq!(store.watermark(), 10);

        // Retarget while a cycle for the old session is still finishing.
        store.set_target(&new).unwrap();
        assert!(!store.advance_watermark(&old, 20).unwrap());
        assert_eq!(store.watermark(), 0);
        assert_eq!(ConfigStore::load(&path).watermark(), 0);
    }

    #[test]
    fn test_concurrent_updates_leave_latest_on_disk() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.yaml");
        let store = std::sync::Arc::new(ConfigStore::load(&path));

        let workers: Vec<_> = (0..8)
            .map(|worker| {
                let store = store.clone();
                std::thread::spawn(move || {
                    for round in 0..20 {
                        store.set_watermark(worker * 100 + round).unwrap();
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }

        assert_eq!(ConfigStore::load(&path).watermark(), store.watermark());
    }

    #[test]
    fn test_clear_target() {
        let temp = TempDir::new().unwrap();
        let store = ConfigStore::load(temp.path().join("config.yaml"));
        store.set_target(&SyncSession::new("355", temp.path())).unwrap();
        store.set_watermark(9).unwrap();

        store.clear_target().unwrap();
        let config = store.snapshot();
        assert!(config.session().is_none());
        assert_eq!(config.last_sync_timestamp, 0);
    }

    #[test]
    fn test_env_overrides_api_base() {
        let mut config = AgentConfig::default();
        config.apply_env_from(|key| (key == ENV_API_BASE).then(|| "http://localhost:9000/api".to_string()));
        assert_eq!(config.api_base, "http://localhost:9000/api");

        config.apply_env_from(|_| Some("   ".to_string()));
        assert_eq!(config.api_base, "http://localhost:9000/api");
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let config = AgentConfig {
            poll_interval_secs: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(SyncError::InvalidConfig(_))));

        let config = AgentConfig {
            download_dir: Some(PathBuf::from("relative/dir")),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
