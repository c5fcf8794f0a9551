//! Local HTTP endpoint the web app calls after a user downloads or saves a sample.
//!
//! `POST /webhook` `{ "userId": 355, "action": "descarga", "postId": 8389? }`
//! `GET  /history`

use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{Result, SyncError};
use crate::history::SyncEvent;
use crate::scheduler::SyncScheduler;
use crate::sync_engine::RemoteId;

/// Actions that change what the user should have locally.
const SYNC_ACTIONS: &[&str] = &["descarga", "download", "samples_guardados", "save"];

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookPayload {
    pub user_id: RemoteId,
    pub action: String,
    #[serde(default)]
    pub post_id: Option<RemoteId>,
}

impl WebhookPayload {
    pub fn should_trigger(&self) -> bool {
        SYNC_ACTIONS.contains(&self.action.trim())
    }
}

pub fn router(scheduler: Arc<SyncScheduler>) -> Router {
    Router::new()
        .route("/webhook", post(handle_webhook))
        .route("/history", get(handle_history))
        .with_state(scheduler)
}

async fn handle_webhook(
    State(scheduler): State<Arc<SyncScheduler>>,
    Json(payload): Json<WebhookPayload>,
) -> Json<Value> {
    if !payload.should_trigger() {
        debug!(action = %payload.action, "webhook action ignored");
        return Json(json!({ "success": true }));
    }

    info!(user = %payload.user_id, action = %payload.action, "webhook sync requested");
    tokio::spawn(async move {
        let user_id = payload.user_id.to_string();
        let result = match (&payload.post_id, scheduler.active_session()) {
            (Some(post_id), Some(session)) if session.user_id == user_id => scheduler
                .sync_single_entry(&user_id, post_id, &session.download_root)
                .await
                .map(|_| ()),
            _ => scheduler.sync_now_for(&user_id).await.map(|_| ()),
        };
        if let Err(e) = result {
            warn!("Webhook sync failed: {}", e);
        }
    });

    Json(json!({ "success": true }))
}

async fn handle_history(State(scheduler): State<Arc<SyncScheduler>>) -> Json<Vec<SyncEvent>> {
    Json(scheduler.get_history())
}

/// Serve on `listener` until `shutdown` is cancelled.
pub async fn serve_on(listener: TcpListener, scheduler: Arc<SyncScheduler>, shutdown: CancellationToken) -> Result<()> {
    let addr = listener.local_addr().map_err(|e| SyncError::fs("webhook listener", e))?;
    info!(%addr, "webhook listening");

    axum::serve(listener, router(scheduler))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .map_err(|e| SyncError::fs("webhook listener", e))?;
    Ok(())
}

/// Bind on the loopback interface only.
pub async fn serve(port: u16, scheduler: Arc<SyncScheduler>, shutdown: CancellationToken) -> Result<()> {
    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| SyncError::InvalidConfig(format!("cannot bind webhook port {port}: {e}")))?;
    serve_on(listener, scheduler, shutdown).await
}
