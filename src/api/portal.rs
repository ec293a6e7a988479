use axum::extract::{Path, State};
use axum::Json;
use serde::{Deserialize, Serialize};

use super::{ApiError, ApiResponse, AppState};
use crate::models::media::ItemType;
use crate::services::subscriptions::RequestOutcome;

#[derive(Debug, Deserialize)]
pub struct SubscribeRequest {
    pub emby_user_id: String,
    pub tmdb_id: String,
    pub item_type: ItemType,
    pub item_name: String,
}

#[derive(Debug, Serialize)]
pub struct SubscribeResponse {
    pub status: String,
    pub message: String,
}

pub async fn subscribe(
    State(state): State<AppState>,
    Json(request): Json<SubscribeRequest>,
) -> Result<Json<ApiResponse<SubscribeResponse>>, ApiError> {
    if request.tmdb_id.is_empty() || request.item_name.is_empty() {
        return Err(ApiError::ValidationError(
            "tmdb_id and item_name are required".to_string(),
        ));
    }

    let outcome = state
        .shared
        .subscriptions
        .request_subscription(
            &request.emby_user_id,
            &request.tmdb_id,
            request.item_type,
            &request.item_name,
        )
        .await?;

    let response = match outcome {
        RequestOutcome::Pending => SubscribeResponse {
            status: "pending".to_string(),
            message: "“想看”请求已提交，请等待管理员审核。".to_string(),
        },
        RequestOutcome::Approved { .. } => SubscribeResponse {
            status: "approved".to_string(),
            message: "订阅成功，已自动提交。".to_string(),
        },
        RequestOutcome::AlreadyExists { status } => {
            let message = if status == "pending" {
                "该项目正在等待审核，无需重复提交。"
            } else {
                "该项目已在订阅队列中，无需重复提交。"
            };
            SubscribeResponse {
                status,
                message: message.to_string(),
            }
        }
        RequestOutcome::QuotaExhausted => {
            return Err(ApiError::Busy("今日订阅配额已用尽，请明天再试。".to_string()));
        }
    };

    Ok(Json(ApiResponse::ok(response)))
}

#[derive(Debug, Serialize)]
pub struct RequestHistoryEntry {
    pub tmdb_id: String,
    pub item_type: String,
    pub item_name: String,
    pub status: String,
    pub created_at: String,
}

pub async fn subscription_history(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Json<ApiResponse<Vec<RequestHistoryEntry>>>, ApiError> {
    let rows = state.shared.store.requests_for_user(&user_id).await?;
    let history = rows
        .into_iter()
        .map(|row| RequestHistoryEntry {
            tmdb_id: row.tmdb_id,
            item_type: row.item_type,
            item_name: row.item_name,
            status: row.status,
            created_at: row.created_at,
        })
        .collect();
    Ok(Json(ApiResponse::ok(history)))
}
