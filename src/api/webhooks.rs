//! Media-Server webhook ingress. Events turn into queued tasks or direct
//! service calls; "user updated" events triggered by our own writes are
//! recognized via the self-update markers and dropped.

use axum::extract::State;
use axum::Json;
use serde::Deserialize;
use tracing::{debug, info, warn};

use super::{ApiResponse, AppState};
use crate::tasks::{TaskArgs, TaskKey};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct WebhookPayload {
    pub event: String,
    #[serde(default)]
    pub item: Option<WebhookItem>,
    #[serde(default)]
    pub user: Option<WebhookUser>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct WebhookItem {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(rename = "Type", default)]
    pub item_type: String,
    #[serde(default)]
    pub series_id: Option<String>,
    #[serde(default)]
    pub provider_ids: Option<crate::clients::emby::ProviderIds>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct WebhookUser {
    pub id: String,
}

pub async fn emby(
    State(state): State<AppState>,
    Json(payload): Json<WebhookPayload>,
) -> Json<ApiResponse<&'static str>> {
    debug!(event = %payload.event, "webhook received");

    match payload.event.as_str() {
        "library.new" => handle_library_new(&state, payload.item),
        "user.updated" | "user.policyupdated" => handle_user_updated(&state, payload.user),
        other => debug!(event = other, "webhook event ignored"),
    }

    Json(ApiResponse::ok("accepted"))
}

fn handle_library_new(state: &AppState, item: Option<WebhookItem>) {
    let Some(item) = item else {
        return;
    };

    match item.item_type.as_str() {
        "Series" => {
            let Some(tmdb_id) = item
                .provider_ids
                .as_ref()
                .and_then(|ids| ids.tmdb.clone())
            else {
                debug!(item = %item.id, "new series without tmdb id, skipped");
                return;
            };
            let name = item.name.clone().unwrap_or_else(|| item.id.clone());
            let shared = state.shared.clone();
            let item_id = item.id.clone();
            info!(series = %name, "new series webhook, evaluating watchlist auto-add");
            tokio::spawn(async move {
                if let Err(e) = shared
                    .watchlist
                    .auto_add_series(&item_id, &name, &tmdb_id)
                    .await
                {
                    warn!(series = %name, "watchlist auto-add failed: {e:#}");
                }
            });
        }
        "Episode" => {
            let Some(series_id) = item.series_id.clone() else {
                return;
            };
            let args = TaskArgs {
                series_id: Some(series_id),
                episode_ids: vec![item.id.clone()],
                ..TaskArgs::default()
            };
            if let Err(e) = state
                .shared
                .task_manager
                .submit(TaskKey::EpisodeTopUp, args)
            {
                warn!("episode top-up not queued: {e}");
            }
        }
        _ => {}
    }
}

fn handle_user_updated(state: &AppState, user: Option<WebhookUser>) {
    let Some(user) = user else {
        return;
    };
    if state.shared.markers.should_suppress(&user.id) {
        debug!(user = %user.id, "self-triggered user webhook suppressed");
        return;
    }
    if let Err(e) = state
        .shared
        .task_manager
        .submit(TaskKey::SyncAllUserData, TaskArgs::default())
    {
        debug!("user sync not queued: {e}");
    }
}
