//! Smoke tests for the web ingress: task queue surface and the portal
//! subscribe flow (non-VIP path, no external services touched).

use std::sync::Arc;

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use http_body_util::BodyExt;
use tower::ServiceExt;

use trackarr::api::{self, AppState};
use trackarr::config::Config;
use trackarr::state::SharedState;

async fn spawn_app() -> (Arc<SharedState>, Router) {
    let db_path = std::env::temp_dir().join(format!("trackarr-api-test-{}.db", uuid::Uuid::new_v4()));

    let mut config = Config::default();
    config.general.database_path = format!("sqlite:{}", db_path.display());
    config.emby.url = "http://localhost:18096".to_string();
    config.emby.api_key = "test-key".to_string();
    config.emby.user_id = "admin".to_string();
    config.tmdb.api_key = "test-tmdb".to_string();
    config.moviepilot.enabled = false;
    config.telegram.enabled = false;
    config.scheduler.enabled = false;
    config.server.enabled = false;

    let shared = Arc::new(
        SharedState::new(config)
            .await
            .expect("failed to create app state"),
    );
    let router = api::router(AppState {
        shared: Arc::clone(&shared),
        prometheus_handle: None,
    });
    (shared, router)
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn healthz_and_task_status_respond() {
    let (_, app) = spawn_app().await;

    let response = app
        .clone()
        .oneshot(Request::builder().uri("/healthz").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/tasks/status")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["success"], true);
    assert!(json["data"]["running_task_key"].is_null());
}

#[tokio::test]
async fn unknown_task_key_is_not_found() {
    let (_, app) = spawn_app().await;

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/tasks/run/full-scan")
                .header("Content-Type", "application/json")
                .body(Body::from("{}"))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn cancel_without_running_task_is_a_noop() {
    let (_, app) = spawn_app().await;

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/tasks/cancel")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn portal_subscribe_queues_and_rejects_duplicates() {
    let (shared, app) = spawn_app().await;

    let request_body = serde_json::json!({
        "emby_user_id": "u-guest",
        "tmdb_id": "603",
        "item_type": "Movie",
        "item_name": "The Matrix"
    });

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/portal/subscribe")
                .header("Content-Type", "application/json")
                .body(Body::from(request_body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["data"]["status"], "pending");

    // Same tmdb id again: the existing status comes back, no second row.
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/portal/subscribe")
                .header("Content-Type", "application/json")
                .body(Body::from(request_body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["data"]["status"], "pending");

    let rows = shared.store.requests_for_user("u-guest").await.unwrap();
    assert_eq!(rows.len(), 1);

    // The history endpoint shows the row.
    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/portal/subscription-history/u-guest")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["data"].as_array().unwrap().len(), 1);
    assert_eq!(json["data"][0]["item_name"], "The Matrix");
}

#[tokio::test]
async fn portal_subscribe_validates_input() {
    let (_, app) = spawn_app().await;

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/portal/subscribe")
                .header("Content-Type", "application/json")
                .body(Body::from(
                    serde_json::json!({
                        "emby_user_id": "u1",
                        "tmdb_id": "",
                        "item_type": "Movie",
                        "item_name": ""
                    })
                    .to_string(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn webhook_ignores_self_triggered_user_updates() {
    let (shared, app) = spawn_app().await;
    shared.markers.mark("u-self");

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/webhooks/emby")
                .header("Content-Type", "application/json")
                .body(Body::from(
                    serde_json::json!({
                        "Event": "user.updated",
                        "User": { "Id": "u-self" }
                    })
                    .to_string(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    // Suppressed: nothing entered the queue.
    assert!(shared.task_manager.status().running_task_key.is_none());
}
