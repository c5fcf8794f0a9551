//! In-memory stand-in for the remote API.

use async_trait::async_trait;
use std::collections::HashSet;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::error::{Result, SyncError};
use crate::manifest::{ChangeProbe, RemoteApi};
use crate::sync_engine::types::{RemoteAudioEntry, RemoteId};

pub fn entry(collection: &str, filename: &str, favorite: bool) -> RemoteAudioEntry {
    RemoteAudioEntry {
        collection: collection.to_string(),
        audio_filename: filename.to_string(),
        download_url: Some(format!("https://x/{filename}")),
        is_favorite: favorite,
        image: None,
        post_id: None,
    }
}

pub fn with_image(mut entry: RemoteAudioEntry, url: &str) -> RemoteAudioEntry {
    entry.image = Some(url.to_string());
    entry
}

pub fn with_post_id(mut entry: RemoteAudioEntry, id: &str) -> RemoteAudioEntry {
    entry.post_id = Some(RemoteId::new(id));
    entry
}

#[derive(Default)]
pub struct FakeApi {
    manifest: Mutex<Vec<RemoteAudioEntry>>,
    marker: AtomicI64,
    offline: AtomicBool,
    manifest_down: AtomicBool,
    single_down: AtomicBool,
    failing: Mutex<HashSet<String>>,
    pub manifest_calls: AtomicUsize,
    pub single_calls: AtomicUsize,
    pub probe_calls: AtomicUsize,
    pub download_calls: AtomicUsize,
}

impl FakeApi {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_manifest(&self, entries: Vec<RemoteAudioEntry>) {
        *self.manifest.lock().unwrap() = entries;
    }

    /// Server-side modification marker reported by the probe.
    pub fn set_marker(&self, marker: i64) {
        self.marker.store(marker, Ordering::SeqCst);
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Only the full manifest endpoint fails; the probe keeps answering.
    pub fn set_manifest_down(&self, down: bool) {
        self.manifest_down.store(down, Ordering::SeqCst);
    }

    pub fn set_single_down(&self, down: bool) {
        self.single_down.store(down, Ordering::SeqCst);
    }

    pub fn fail_url(&self, url: &str) {
        self.failing.lock().unwrap().insert(url.to_string());
    }

    pub fn heal_url(&self, url: &str) {
        self.failing.lock().unwrap().remove(url);
    }

    pub fn downloads(&self) -> usize {
        self.download_calls.load(Ordering::SeqCst)
    }

    pub fn manifests(&self) -> usize {
        self.manifest_calls.load(Ordering::SeqCst)
    }

    pub fn probes(&self) -> usize {
        self.probe_calls.load(Ordering::SeqCst)
    }

    pub fn singles(&self) -> usize {
        self.single_calls.load(Ordering::SeqCst)
    }

    fn check_online(&self, url: &str) -> Result<()> {
        self.check_endpoint(&self.offline, url)
    }

    fn check_endpoint(&self, down: &AtomicBool, url: &str) -> Result<()> {
        if self.offline.load(Ordering::SeqCst) || down.load(Ordering::SeqCst) {
            return Err(SyncError::Status {
                status: 503,
                url: url.to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteApi for FakeApi {
    async fn fetch_manifest(&self, user_id: &str) -> Result<Vec<RemoteAudioEntry>> {
        self.manifest_calls.fetch_add(1, Ordering::SeqCst);
        self.check_endpoint(&self.manifest_down, &format!("fake://syncpre/{user_id}"))?;
        Ok(self.manifest.lock().unwrap().clone())
    }

    async fn fetch_single(&self, user_id: &str, post_id: &RemoteId) -> Result<Option<RemoteAudioEntry>> {
        self.single_calls.fetch_add(1, Ordering::SeqCst);
        self.check_endpoint(&self.single_down, &format!("fake://syncpre/{user_id}?post_id={post_id}"))?;
        Ok(self
            .manifest
            .lock()
            .unwrap()
            .iter()
            .find(|e| e.post_id.as_ref() == Some(post_id))
            .cloned())
    }

    async fn probe_changed(&self, user_id: &str, since: i64) -> Result<ChangeProbe> {
        self.probe_calls.fetch_add(1, Ordering::SeqCst);
        self.check_online(&format!("fake://syncpre/{user_id}/check"))?;
        Ok(ChangeProbe::from_markers(
            since,
            [Some(self.marker.load(Ordering::SeqCst))],
        ))
    }

    async fn download(&self, url: &str, dest: &Path) -> Result<u64> {
        self.download_calls.fetch_add(1, Ordering::SeqCst);
        self.check_online(url)?;
        if self.failing.lock().unwrap().contains(url) {
            return Err(SyncError::Status {
                status: 500,
                url: url.to_string(),
            });
        }
        let body = format!("body of {url}");
        std::fs::write(dest, &body).map_err(|e| SyncError::fs(dest, e))?;
        Ok(body.len() as u64)
    }
}
