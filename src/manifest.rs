//! Remote collection API.
//!
//! `GET {base}/syncpre/{user}` lists everything the user should have,
//! `?post_id=` narrows it to one entry and `/check?last_sync=` is the cheap
//! change probe polled every cycle.

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, Url};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::{debug, instrument};

use crate::error::{Result, SyncError};
use crate::sync_engine::types::{loose_marker, RemoteAudioEntry, RemoteId};

/// The remote API only answers requests carrying this header.
const APP_HEADER: &str = "x-electron-app";

/// Outcome of the change probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChangeProbe {
    pub changed: bool,
    /// Newest modification marker reported by the server.
    pub new_watermark: i64,
}

impl ChangeProbe {
    pub fn from_markers(since: i64, markers: impl IntoIterator<Item = Option<i64>>) -> Self {
        let newest = markers.into_iter().flatten().max().unwrap_or(0);
        Self {
            changed: newest > since,
            new_watermark: newest,
        }
    }
}

#[derive(Debug, Deserialize)]
struct CheckResponse {
    #[serde(default, rename = "descargas_modificado", deserialize_with = "loose_marker")]
    downloads_modified: Option<i64>,
    #[serde(default, rename = "samplesGuardados_modificado", deserialize_with = "loose_marker")]
    saved_modified: Option<i64>,
}

/// Everything the engine needs from the network.
#[async_trait]
pub trait RemoteApi: Send + Sync {
    async fn fetch_manifest(&self, user_id: &str) -> Result<Vec<RemoteAudioEntry>>;

    async fn fetch_single(&self, user_id: &str, post_id: &RemoteId) -> Result<Option<RemoteAudioEntry>>;

    async fn probe_changed(&self, user_id: &str, since: i64) -> Result<ChangeProbe>;

    /// Fetch `url` into `dest`; `dest` only appears once the body is complete.
    async fn download(&self, url: &str, dest: &Path) -> Result<u64>;
}

/// Sibling file a transfer is written to before being renamed into place.
pub fn partial_path(dest: &Path) -> PathBuf {
    let name = dest
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    dest.with_file_name(format!(".{name}.part"))
}

pub struct HttpApi {
    client: Client,
    base: Url,
}

impl HttpApi {
    pub fn new(api_base: &str, timeout: Duration) -> Result<Self> {
        let base = Url::parse(api_base)
            .map_err(|e| SyncError::InvalidConfig(format!("api_base '{api_base}': {e}")))?;
        if base.cannot_be_a_base() {
            return Err(SyncError::InvalidConfig(format!("api_base '{api_base}' cannot be a base URL")));
        }

        let mut headers = HeaderMap::new();
        headers.insert(HeaderName::from_static(APP_HEADER), HeaderValue::from_static("true"));

        let client = Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self { client, base })
    }

    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: Url) -> Result<T> {
        debug!(%url, "GET");
        let response = self.client.get(url.clone()).send().await?;
        if !response.status().is_success() {
            return Err(SyncError::Status {
                status: response.status().as_u16(),
                url: url.to_string(),
            });
        }
        Ok(response.json::<T>().await?)
    }
}

#[async_trait]
impl RemoteApi for HttpApi {
    #[instrument(skip(self))]
    async fn fetch_manifest(&self, user_id: &str) -> Result<Vec<RemoteAudioEntry>> {
        let url = self.endpoint(&["syncpre", user_id]);
        let entries: Option<Vec<RemoteAudioEntry>> = self.get_json(url).await?;
        Ok(entries.unwrap_or_default())
    }

    #[instrument(skip(self))]
    async fn fetch_single(&self, user_id: &str, post_id: &RemoteId) -> Result<Option<RemoteAudioEntry>> {
        let mut url = self.endpoint(&["syncpre", user_id]);
        url.query_pairs_mut().append_pair("post_id", post_id.as_str());
        let entries: Option<Vec<RemoteAudioEntry>> = self.get_json(url).await?;
        Ok(entries.unwrap_or_default().into_iter().next())
    }

    #[instrument(skip(self))]
    async fn probe_changed(&self, user_id: &str, since: i64) -> Result<ChangeProbe> {
        let mut url = self.endpoint(&["syncpre", user_id, "check"]);
        url.query_pairs_mut().append_pair("last_sync", &since.to_string());
        let check: CheckResponse = self.get_json(url).await?;
        Ok(ChangeProbe::from_markers(
            since,
            [check.downloads_modified, check.saved_modified],
        ))
    }

    async fn download(&self, url: &str, dest: &Path) -> Result<u64> {
        let mut response = self.client.get(url).send().await?;
        if !response.status().is_success() {
            return Err(SyncError::Status {
                status: response.status().as_u16(),
                url: url.to_string(),
            });
        }

        let part = partial_path(dest);
        let mut file = tokio::fs::File::create(&part)
            .await
            .map_err(|e| SyncError::fs(&part, e))?;

        let mut written = 0u64;
        let transfer: Result<()> = async {
            while let Some(chunk) = response.chunk().await? {
                file.write_all(&chunk).await.map_err(|e| SyncError::fs(&part, e))?;
                written += chunk.len() as u64;
            }
            file.flush().await.map_err(|e| SyncError::fs(&part, e))?;
            Ok::<(), SyncError>(())
        }
        .await;
        drop(file);

        if let Err(e) = transfer {
            let _ = tokio::fs::remove_file(&part).await;
            return Err(e);
        }

        tokio::fs::rename(&part, dest)
            .await
            .map_err(|e| SyncError::fs(dest, e))?;
        debug!(url, dest = %dest.display(), bytes = written, "downloaded");
        Ok(written)
    }
}
