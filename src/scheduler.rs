//! Polling loop and explicit sync triggers.
//!
//! One loop per scheduler; restarting it for another user or folder cancels the
//! previous loop first. Cycles against the same download folder never overlap:
//! periodic ticks skip while a cycle holds the folder, explicit triggers wait.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::OwnedMutexGuard;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::ConfigStore;
use crate::error::{Result, SyncError};
use crate::events::{EventBus, SyncNotification};
use crate::history::SyncEvent;
use crate::manifest::RemoteApi;
use crate::sync_engine::{ReconcileReport, RemoteId, SyncEngine, SyncPlan};

/// Who is being synced, and where to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncSession {
    pub user_id: String,
    pub download_root: PathBuf,
}

impl SyncSession {
    pub fn new(user_id: impl Into<String>, download_root: impl Into<PathBuf>) -> Self {
        Self {
            user_id: user_id.into(),
            download_root: download_root.into(),
        }
    }

    fn validate(&self) -> Result<()> {
        if self.user_id.trim().is_empty() {
            return Err(SyncError::InvalidConfig("user id cannot be empty".to_string()));
        }
        if self.download_root.as_os_str().is_empty() {
            return Err(SyncError::InvalidConfig("download folder cannot be empty".to_string()));
        }
        Ok(())
    }
}

/// One async mutex per download folder.
#[derive(Clone, Default)]
pub struct RootGuards {
    slots: Arc<Mutex<HashMap<PathBuf, Arc<tokio::sync::Mutex<()>>>>>,
}

impl RootGuards {
    fn slot(&self, root: &Path) -> Arc<tokio::sync::Mutex<()>> {
        let mut slots = self.slots.lock().unwrap_or_else(|p| p.into_inner());
        slots.entry(root.to_path_buf()).or_default().clone()
    }

    pub fn try_acquire(&self, root: &Path) -> Option<OwnedMutexGuard<()>> {
        self.slot(root).try_lock_owned().ok()
    }

    pub async fn acquire(&self, root: &Path) -> OwnedMutexGuard<()> {
        self.slot(root).lock_owned().await
    }

    pub fn is_busy(&self, root: &Path) -> bool {
        let slot = self.slot(root);
        let busy = slot.try_lock().is_err();
        busy
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    /// Timer tick: honours the change probe and skips when busy.
    Tick,
    /// Explicit request: always reconciles and waits for a running cycle.
    Manual,
}

#[derive(Debug)]
pub enum CycleOutcome {
    Skipped,
    Unchanged,
    Synced(ReconcileReport),
    Failed(SyncError),
}

struct Inner {
    api: Arc<dyn RemoteApi>,
    config: Arc<ConfigStore>,
    engine: SyncEngine,
    bus: EventBus,
    guards: RootGuards,
}

impl Inner {
    async fn run_cycle(&self, session: &SyncSession, trigger: Trigger) -> CycleOutcome {
        let _guard = match trigger {
            Trigger::Tick => match self.guards.try_acquire(&session.download_root) {
                Some(guard) => guard,
                None => {
                    debug!(root = %session.download_root.display(), "cycle already running, skipping tick");
                    return CycleOutcome::Skipped;
                }
            },
            Trigger::Manual => self.guards.acquire(&session.download_root).await,
        };

        let since = self.config.watermark();
        let probe = match self.api.probe_changed(&session.user_id, since).await {
            Ok(probe) => probe,
            Err(e) => return self.fail(e),
        };

        if !probe.changed && trigger == Trigger::Tick {
            debug!(user = %session.user_id, watermark = since, "no remote changes");
            return CycleOutcome::Unchanged;
        }

        let manifest = match self.api.fetch_manifest(&session.user_id).await {
            Ok(manifest) => manifest,
            Err(e) => return self.fail(e),
        };
        info!(user = %session.user_id, entries = manifest.len(), "reconciling");

        let report = self.engine.reconcile_all(session, &manifest).await;

        if probe.changed && report.is_clean() {
            match self.config.advance_watermark(session, probe.new_watermark) {
                Ok(true) => debug!(watermark = probe.new_watermark, "watermark advanced"),
                Ok(false) => debug!(user = %session.user_id, "target changed during cycle, watermark kept"),
                Err(e) => warn!("Could not persist watermark: {}", e),
            }
        } else if !report.is_clean() {
            warn!(
                errors = report.errors.len(),
                "cycle finished with errors, watermark kept for retry"
            );
        }

        self.bus.emit(SyncNotification::CycleCompleted {
            summary: report.summary(),
        });
        CycleOutcome::Synced(report)
    }

    fn fail(&self, error: SyncError) -> CycleOutcome {
        warn!("Sync cycle failed, will retry: {}", error);
        self.bus.emit(SyncNotification::CycleFailed {
            code: error.code().to_string(),
            message: error.to_string(),
        });
        CycleOutcome::Failed(error)
    }

    async fn poll_loop(self: Arc<Self>, session: SyncSession, period: Duration, token: CancellationToken) {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    debug!(user = %session.user_id, "sync loop stopped");
                    break;
                }
                _ = ticker.tick() => {
                    self.run_cycle(&session, Trigger::Tick).await;
                }
            }
        }
    }
}

struct LoopHandle {
    session: SyncSession,
    token: CancellationToken,
    task: JoinHandle<()>,
}

fn cancel_loop(active: &mut Option<LoopHandle>) {
    if let Some(handle) = active.take() {
        handle.token.cancel();
        info!(user = %handle.session.user_id, "sync loop stopping");
    }
}

pub struct SyncScheduler {
    inner: Arc<Inner>,
    interval: Duration,
    active: Mutex<Option<LoopHandle>>,
}

impl SyncScheduler {
    pub fn new(api: Arc<dyn RemoteApi>, config: Arc<ConfigStore>, bus: EventBus) -> Self {
        let settings = config.snapshot();
        let engine = SyncEngine::new(api.clone(), bus.clone(), settings.history_limit);
        Self {
            inner: Arc::new(Inner {
                api,
                config,
                engine,
                bus,
                guards: RootGuards::default(),
            }),
            interval: settings.poll_interval().max(Duration::from_secs(1)),
            active: Mutex::new(None),
        }
    }

    pub fn bus(&self) -> &EventBus {
        &self.inner.bus
    }

    pub fn config(&self) -> &ConfigStore {
        &self.inner.config
    }

    pub fn guards(&self) -> &RootGuards {
        &self.inner.guards
    }

    fn active(&self) -> MutexGuard<'_, Option<LoopHandle>> {
        self.active.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Persist the target and (re)start the polling loop; the first cycle runs immediately.
    pub fn start(&self, session: SyncSession) -> Result<()> {
        session.validate()?;

        // The persisted target and the loop handle change under one lock.
        let mut active = self.active();
        if let Err(e) = self.inner.config.set_target(&session) {
            warn!("Could not persist sync target: {}", e);
        }
        cancel_loop(&mut active);

        let token = CancellationToken::new();
        let task = tokio::spawn(Inner::poll_loop(
            self.inner.clone(),
            session.clone(),
            self.interval,
            token.clone(),
        ));

        info!(
            user = %session.user_id,
            root = %session.download_root.display(),
            interval_secs = self.interval.as_secs(),
            "sync loop started"
        );
        *active = Some(LoopHandle { session, token, task });
        Ok(())
    }

    /// Cancel the polling loop. A cycle already in flight runs to completion.
    pub fn stop(&self) {
        cancel_loop(&mut self.active());
    }

    pub fn is_running(&self) -> bool {
        self.active()
            .as_ref()
            .map(|h| !h.task.is_finished())
            .unwrap_or(false)
    }

    pub fn active_session(&self) -> Option<SyncSession> {
        self.active().as_ref().map(|h| h.session.clone())
    }

    /// Running session, else the one persisted in config.
    fn current_session(&self) -> Option<SyncSession> {
        self.active_session()
            .or_else(|| self.inner.config.snapshot().session())
    }

    /// Restart from the persisted target; `false` when none is stored.
    pub fn resume(&self) -> Result<bool> {
        match self.inner.config.snapshot().session() {
            Some(session) => {
                self.start(session)?;
                Ok(true)
            }
            None => {
                debug!("no persisted sync target to resume");
                Ok(false)
            }
        }
    }

    pub fn logout(&self) -> Result<()> {
        let mut active = self.active();
        cancel_loop(&mut active);
        self.inner.config.clear_target()
    }

    pub async fn run_cycle(&self, session: &SyncSession, trigger: Trigger) -> CycleOutcome {
        self.inner.run_cycle(session, trigger).await
    }

    /// Forced full cycle for the current session.
    pub async fn sync_now(&self) -> Result<CycleOutcome> {
        let session = self.current_session().ok_or(SyncError::NotConfigured)?;
        Ok(self.inner.run_cycle(&session, Trigger::Manual).await)
    }

    /// Forced cycle, only when `user_id` is the current user.
    pub async fn sync_now_for(&self, user_id: &str) -> Result<CycleOutcome> {
        let session = self.current_session().ok_or(SyncError::NotConfigured)?;
        if session.user_id != user_id {
            info!(requested = user_id, active = %session.user_id, "ignoring sync request for another user");
            return Ok(CycleOutcome::Skipped);
        }
        Ok(self.inner.run_cycle(&session, Trigger::Manual).await)
    }

    /// Fetch and apply one entry. No cleanup, watermark untouched.
    pub async fn sync_single_entry(
        &self,
        user_id: &str,
        post_id: &RemoteId,
        download_root: &Path,
    ) -> Result<ReconcileReport> {
        let session = SyncSession::new(user_id, download_root);
        session.validate()?;

        let _guard = self.inner.guards.acquire(download_root).await;
        let entry = match self.inner.api.fetch_single(user_id, post_id).await {
            Ok(entry) => entry,
            Err(e) => {
                warn!("Could not fetch post {}: {}", post_id, e);
                self.inner.bus.emit(SyncNotification::CycleFailed {
                    code: e.code().to_string(),
                    message: e.to_string(),
                });
                return Err(e);
            }
        };

        let report = match entry {
            Some(entry) => self.inner.engine.sync_entry(&session, &entry).await,
            None => {
                info!(user = user_id, post = %post_id, "post not in the user's collections");
                ReconcileReport::default()
            }
        };
        self.inner.bus.emit(SyncNotification::CycleCompleted {
            summary: report.summary(),
        });
        Ok(report)
    }

    /// What a forced cycle would change, without touching the folder.
    pub async fn plan(&self, session: &SyncSession) -> Result<SyncPlan> {
        let manifest = self.inner.api.fetch_manifest(&session.user_id).await?;
        Ok(self.inner.engine.plan(session, &manifest))
    }

    pub fn get_history(&self) -> Vec<SyncEvent> {
        match self.current_session() {
            Some(session) => self.inner.engine.history(&session.download_root).read(),
            None => Vec::new(),
        }
    }
}

impl Drop for SyncScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}
