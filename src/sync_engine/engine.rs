use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::error::{Result, SyncError};
use crate::events::{EventBus, SyncNotification};
use crate::history::{now_timestamp, SyncEvent, SyncEventType, SyncHistory};
use crate::manifest::RemoteApi;
use crate::scheduler::SyncSession;
use crate::sync_engine::layout::{EntryPaths, SyncLayout};
use crate::sync_engine::types::{
    AudioAction, EntryError, EntryErrorKind, PlannedEntry, ReconcileReport, RemoteAudioEntry, SyncPlan,
};
use crate::system_integration::try_mark_hidden;

/// Brings a download folder in line with a manifest snapshot.
pub struct SyncEngine {
    api: Arc<dyn RemoteApi>,
    bus: EventBus,
    history_limit: usize,
}

struct ImageRef<'a> {
    url: &'a str,
    path: PathBuf,
}

struct Resolved<'a> {
    entry: &'a RemoteAudioEntry,
    paths: EntryPaths,
    image: Option<ImageRef<'a>>,
}

fn decide_audio(paths: &EntryPaths) -> AudioAction {
    if paths.target().exists() {
        AudioAction::Keep
    } else if paths.counterpart().exists() {
        AudioAction::Relocate {
            from: paths.counterpart().to_path_buf(),
        }
    } else {
        AudioAction::Download
    }
}

impl SyncEngine {
    pub fn new(api: Arc<dyn RemoteApi>, bus: EventBus, history_limit: usize) -> Self {
        Self {
            api,
            bus,
            history_limit,
        }
    }

    pub fn history(&self, root: &Path) -> SyncHistory {
        SyncHistory::for_root(root, self.history_limit).with_notifier(self.bus.clone())
    }

    fn resolve_all<'a>(
        &self,
        layout: &SyncLayout,
        manifest: &'a [RemoteAudioEntry],
    ) -> (Vec<Resolved<'a>>, Vec<EntryError>) {
        let mut resolved = Vec::with_capacity(manifest.len());
        let mut invalid = Vec::new();

        for entry in manifest {
            let paths = match layout.resolve(entry) {
                Ok(paths) => paths,
                Err(reason) => {
                    invalid.push(EntryError::new(
                        EntryErrorKind::InvalidEntry,
                        None,
                        format!("{}/{}: {}", entry.collection, entry.audio_filename, reason),
                    ));
                    continue;
                }
            };

            let image = match entry.image.as_deref().map(str::trim).filter(|u| !u.is_empty()) {
                Some(url) => match layout.image_path(url) {
                    Ok(path) => Some(ImageRef { url, path }),
                    Err(reason) => {
                        invalid.push(EntryError::new(
                            EntryErrorKind::InvalidEntry,
                            None,
                            format!("image of {}/{}: {}", entry.collection, entry.audio_filename, reason),
                        ));
                        None
                    }
                },
                None => None,
            };

            resolved.push(Resolved { entry, paths, image });
        }

        (resolved, invalid)
    }

    /// Compare the manifest with the folder without changing anything.
    pub fn plan(&self, session: &SyncSession, manifest: &[RemoteAudioEntry]) -> SyncPlan {
        let layout = SyncLayout::new(&session.download_root);
        if manifest.is_empty() {
            return SyncPlan {
                teardown: layout.has_synced_content(),
                ..Default::default()
            };
        }

        let (resolved, invalid) = self.resolve_all(&layout, manifest);

        let mut expected_files = HashSet::new();
        let mut expected_images = HashSet::new();
        let mut planned_images = HashSet::new();
        let mut entries = Vec::with_capacity(resolved.len());

        for item in &resolved {
            let audio = decide_audio(&item.paths);
            expected_files.insert(item.paths.target().to_path_buf());
            // Keep the file that is about to be moved.
            if let AudioAction::Relocate { from } = &audio {
                expected_files.insert(from.clone());
            }

            let image_missing = match &item.image {
                Some(image) => {
                    expected_images.insert(image.path.clone());
                    !image.path.exists() && planned_images.insert(image.path.clone())
                }
                None => false,
            };

            entries.push(PlannedEntry {
                target: item.paths.target().to_path_buf(),
                audio,
                image: item.image.as_ref().map(|i| i.path.clone()),
                image_missing,
            });
        }

        SyncPlan {
            teardown: false,
            stale_files: scan_stale_files(&layout, &expected_files),
            stale_images: scan_stale_images(&layout, &expected_images),
            entries,
            invalid,
        }
    }

    /// Full reconciliation: prepare, clean up, then download and relocate.
    pub async fn reconcile_all(&self, session: &SyncSession, manifest: &[RemoteAudioEntry]) -> ReconcileReport {
        let layout = SyncLayout::new(&session.download_root);
        let history = self.history(layout.root());
        let mut report = ReconcileReport::default();

        if manifest.is_empty() {
            self.teardown(session, &layout, &history, &mut report).await;
            return report;
        }

        if let Err(e) = self.prepare(&layout, manifest).await {
            warn!("Could not prepare {}: {}", layout.root().display(), e);
            report.errors.push(EntryError::new(
                EntryErrorKind::Other,
                Some(layout.root().to_path_buf()),
                e.to_string(),
            ));
            return report;
        }

        // Cleanup runs before any download so relocation sources survive.
        let plan = self.plan(session, manifest);
        for skipped in &plan.invalid {
            warn!("Skipping manifest entry: {}", skipped.message);
        }
        report.skipped.extend(plan.invalid);

        for path in &plan.stale_files {
            if self.remove_stale(path, EntryErrorKind::DeleteFailed, &mut report).await {
                report.deleted += 1;
                let event = SyncEvent::new(SyncEventType::Delete)
                    .user(&session.user_id)
                    .audio(path, None);
                self.record(&history, &mut report, event);
            }
        }

        for path in &plan.stale_images {
            if self.remove_stale(path, EntryErrorKind::DeleteFailed, &mut report).await {
                report.images_deleted += 1;
                let event = SyncEvent::new(SyncEventType::DeleteImage)
                    .user(&session.user_id)
                    .image(path, None);
                self.record(&history, &mut report, event);
            }
        }

        let (resolved, _) = self.resolve_all(&layout, manifest);
        for item in &resolved {
            self.apply_entry(session, &history, item, &mut report).await;
        }

        info!(
            root = %layout.root().display(),
            downloaded = report.downloaded,
            relocated = report.relocated,
            deleted = report.deleted,
            images_downloaded = report.images_downloaded,
            images_deleted = report.images_deleted,
            errors = report.errors.len(),
            "reconciliation finished"
        );
        report
    }

    /// Apply one entry without cleanup.
    pub async fn sync_entry(&self, session: &SyncSession, entry: &RemoteAudioEntry) -> ReconcileReport {
        let layout = SyncLayout::new(&session.download_root);
        let history = self.history(layout.root());
        let mut report = ReconcileReport::default();
        let manifest = std::slice::from_ref(entry);

        if let Err(e) = self.prepare(&layout, manifest).await {
            report.errors.push(EntryError::new(
                EntryErrorKind::Other,
                Some(layout.root().to_path_buf()),
                e.to_string(),
            ));
            return report;
        }

        let (resolved, invalid) = self.resolve_all(&layout, manifest);
        report.skipped.extend(invalid);
        for item in &resolved {
            self.apply_entry(session, &history, item, &mut report).await;
        }
        report
    }

    async fn prepare(&self, layout: &SyncLayout, manifest: &[RemoteAudioEntry]) -> Result<()> {
        let root = layout.root();
        fs::create_dir_all(root)
            .await
            .map_err(|e| SyncError::fs(root, e))?;

        let image_dir = layout.image_dir();
        if !image_dir.exists() {
            fs::create_dir_all(&image_dir)
                .await
                .map_err(|e| SyncError::fs(&image_dir, e))?;
            try_mark_hidden(&image_dir);
        }

        for entry in manifest {
            if let Ok(paths) = layout.resolve(entry) {
                if let Err(e) = fs::create_dir_all(&paths.collection_dir).await {
                    warn!("Could not create {}: {}", paths.collection_dir.display(), e);
                }
            }
        }
        Ok(())
    }

    async fn teardown(
        &self,
        session: &SyncSession,
        layout: &SyncLayout,
        history: &SyncHistory,
        report: &mut ReconcileReport,
    ) {
        if !layout.has_synced_content() {
            debug!(root = %layout.root().display(), "empty manifest and nothing synced locally");
            return;
        }

        match fs::remove_dir_all(layout.root()).await {
            Ok(()) => {
                info!(root = %layout.root().display(), "manifest is empty, removed download folder");
                report.torn_down = true;
                self.bus.emit(SyncNotification::FilesChanged {
                    audio_path: None,
                    image_path: None,
                });
                let event = SyncEvent::new(SyncEventType::DeleteAll)
                    .user(&session.user_id)
                    .folder(layout.root());
                self.record(history, report, event);
            }
            Err(e) => {
                warn!("Could not remove {}: {}", layout.root().display(), e);
                report.errors.push(EntryError::new(
                    EntryErrorKind::DeleteFailed,
                    Some(layout.root().to_path_buf()),
                    e.to_string(),
                ));
            }
        }
    }

    async fn remove_stale(&self, path: &Path, kind: EntryErrorKind, report: &mut ReconcileReport) -> bool {
        match fs::remove_file(path).await {
            Ok(()) => {
                info!(path = %path.display(), "removed file no longer in manifest");
                true
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => false,
            Err(e) => {
                warn!("Could not remove {}: {}", path.display(), e);
                report
                    .errors
                    .push(EntryError::new(kind, Some(path.to_path_buf()), e.to_string()));
                false
            }
        }
    }

    async fn apply_entry(
        &self,
        session: &SyncSession,
        history: &SyncHistory,
        item: &Resolved<'_>,
        report: &mut ReconcileReport,
    ) {
        let target = item.paths.target().to_path_buf();
        let mut audio_kind = None;
        let mut audio_at = None;
        let mut previous = None;

        match decide_audio(&item.paths) {
            AudioAction::Keep => {}
            AudioAction::Relocate { from } => match relocate(&from, &target).await {
                Ok(()) => {
                    info!(from = %from.display(), to = %target.display(), "relocated");
                    report.relocated += 1;
                    audio_kind = Some(SyncEventType::Relocate);
                    audio_at = Some(now_timestamp());
                    previous = Some(from);
                }
                Err(e) => {
                    warn!("Could not move {} to {}: {}", from.display(), target.display(), e);
                    report.errors.push(EntryError::new(
                        EntryErrorKind::RelocateFailed,
                        Some(target.clone()),
                        e.to_string(),
                    ));
                }
            },
            AudioAction::Download => {
                match item.entry.download_url.as_deref().map(str::trim).filter(|u| !u.is_empty()) {
                    None => report.skipped.push(EntryError::new(
                        EntryErrorKind::InvalidEntry,
                        Some(target.clone()),
                        "entry has no download_url",
                    )),
                    Some(url) => match self.fetch_to(url, &target).await {
                        Ok(bytes) => {
                            info!(path = %target.display(), bytes, "downloaded");
                            report.downloaded += 1;
                            audio_kind = Some(SyncEventType::Download);
                            audio_at = Some(now_timestamp());
                        }
                        Err(e) => {
                            warn!("Could not download {}: {}", target.display(), e);
                            report.errors.push(EntryError::new(
                                EntryErrorKind::DownloadFailed,
                                Some(target.clone()),
                                e.to_string(),
                            ));
                        }
                    },
                }
            }
        }

        let mut image_at = None;
        if let Some(image) = &item.image {
            if !image.path.exists() {
                match self.fetch_to(image.url, &image.path).await {
                    Ok(_) => {
                        debug!(path = %image.path.display(), "image cached");
                        report.images_downloaded += 1;
                        image_at = Some(now_timestamp());
                    }
                    Err(e) => {
                        warn!("Could not download image {}: {}", image.url, e);
                        report.errors.push(EntryError::new(
                            EntryErrorKind::ImageFailed,
                            Some(image.path.clone()),
                            e.to_string(),
                        ));
                    }
                }
            }
        }

        // One row per entry: audio and image changes share it.
        let event_type = match (audio_kind, image_at.is_some()) {
            (Some(kind), _) => kind,
            (None, true) => SyncEventType::ImageDownload,
            (None, false) => return,
        };

        let mut event = SyncEvent::new(event_type)
            .user(&session.user_id)
            .audio(&target, audio_at);
        if let Some(previous) = previous {
            event = event.moved_from(previous);
        }
        let image_path = item.image.as_ref().map(|i| i.path.clone());
        if let Some(path) = &image_path {
            event = event.image(path, image_at);
        }

        self.bus.emit(SyncNotification::FilesChanged {
            audio_path: Some(target),
            image_path,
        });
        self.record(history, report, event);
    }

    async fn fetch_to(&self, url: &str, dest: &Path) -> Result<u64> {
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| SyncError::fs(parent, e))?;
        }
        self.api.download(url, dest).await
    }

    fn record(&self, history: &SyncHistory, report: &mut ReconcileReport, event: SyncEvent) {
        if let Err(e) = history.append(event.clone()) {
            warn!("Could not write sync history: {}", e);
        }
        report.events.push(event);
    }
}

async fn relocate(from: &Path, to: &Path) -> std::io::Result<()> {
    if let Some(parent) = to.parent() {
        fs::create_dir_all(parent).await?;
    }
    fs::rename(from, to).await
}

fn scan_stale_files(layout: &SyncLayout, expected: &HashSet<PathBuf>) -> Vec<PathBuf> {
    if !layout.root().exists() {
        return Vec::new();
    }

    let image_dir = layout.image_dir();
    let mut stale: Vec<PathBuf> = WalkDir::new(layout.root())
        .min_depth(1)
        .into_iter()
        .filter_entry(|e| e.path() != image_dir)
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .filter(|p| !layout.is_history_file(p) && !expected.contains(p))
        .collect();
    stale.sort();
    stale
}

fn scan_stale_images(layout: &SyncLayout, expected: &HashSet<PathBuf>) -> Vec<PathBuf> {
    let Ok(entries) = std::fs::read_dir(layout.image_dir()) else {
        return Vec::new();
    };

    let mut stale: Vec<PathBuf> = entries
        .flatten()
        .filter(|e| e.file_type().map(|t| t.is_file()).unwrap_or(false))
        .map(|e| e.path())
        .filter(|p| !expected.contains(p))
        .collect();
    stale.sort();
    stale
}
