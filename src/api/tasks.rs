use axum::extract::{Path, State};
use axum::Json;
use serde::Deserialize;

use super::{ApiError, ApiResponse, AppState};
use crate::tasks::{QueueError, TaskArgs, TaskKey, TaskStatus};

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct RunRequest {
    pub item_id: Option<String>,
    pub collection_id: Option<i32>,
    pub series_id: Option<String>,
    pub episode_ids: Vec<String>,
    pub force_full_update: bool,
    pub task_sequence: Vec<String>,
}

pub async fn status(State(state): State<AppState>) -> Json<ApiResponse<TaskStatus>> {
    Json(ApiResponse::ok(state.shared.task_manager.status()))
}

pub async fn run(
    State(state): State<AppState>,
    Path(key): Path<String>,
    body: Option<Json<RunRequest>>,
) -> Result<Json<ApiResponse<&'static str>>, ApiError> {
    let task_key = TaskKey::parse(&key)
        .ok_or_else(|| ApiError::NotFound(format!("unknown task key: {key}")))?;

    let request = body.map(|Json(request)| request).unwrap_or_default();
    let args = TaskArgs {
        item_id: request.item_id,
        collection_id: request.collection_id,
        series_id: request.series_id,
        episode_ids: request.episode_ids,
        force_full_update: request.force_full_update,
        task_sequence: request
            .task_sequence
            .iter()
            .filter_map(|name| TaskKey::parse(name))
            .collect(),
    };

    match state.shared.task_manager.submit(task_key, args) {
        Ok(()) => Ok(Json(ApiResponse::ok("submitted"))),
        Err(e @ QueueError::Busy { .. }) => Err(ApiError::Busy(e.to_string())),
        Err(e) => Err(ApiError::ValidationError(e.to_string())),
    }
}

pub async fn cancel(State(state): State<AppState>) -> Json<ApiResponse<&'static str>> {
    state.shared.task_manager.cancel();
    Json(ApiResponse::ok("stop signal sent"))
}

/// Re-seed the autoincrement counters after a bulk import or restore so new
/// inserts cannot collide with restored rows.
pub async fn resync_sequences(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<&'static str>>, ApiError> {
    state.shared.store.resync_primary_key_sequences().await?;
    Ok(Json(ApiResponse::ok("sequences resynced")))
}
