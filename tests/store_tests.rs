//! Store-level invariants exercised against a real sqlite database.

use trackarr::db::{MediaUpsert, NewRequest, Store, UserCacheEntry, UserUpsert, WatchlistRefresh};
use trackarr::models::collection::CollectionType;
use trackarr::models::media::{decode_id_list, ItemType, SubscriptionSource, SubscriptionStatus};
use trackarr::models::watchlist::WatchStatus;
use trackarr::services::limits::QuotaService;

async fn test_store() -> Store {
    let db_path = std::env::temp_dir().join(format!("trackarr-test-{}.db", uuid::Uuid::new_v4()));
    Store::new(&format!("sqlite:{}", db_path.display()))
        .await
        .expect("failed to create test store")
}

fn movie(tmdb_id: &str, emby_ids: &[&str]) -> MediaUpsert {
    MediaUpsert {
        tmdb_id: tmdb_id.to_string(),
        item_type: ItemType::Movie,
        title: Some(format!("Movie {tmdb_id}")),
        in_library: Some(true),
        emby_item_ids: emby_ids.iter().map(ToString::to_string).collect(),
        subscription_status_on_insert: Some(SubscriptionStatus::None),
        ..Default::default()
    }
}

#[tokio::test]
async fn media_upsert_is_unique_per_composite_key_and_unions_ids() {
    let store = test_store().await;

    store.upsert_media(&movie("603", &["e1", "e2"])).await.unwrap();
    store.upsert_media(&movie("603", &["e2", "e3"])).await.unwrap();

    // One row per (tmdb_id, item_type); emby ids are a deduplicated union.
    let row = store.get_media("603", ItemType::Movie).await.unwrap().unwrap();
    let ids = decode_id_list(row.emby_item_ids_json.as_deref());
    assert_eq!(ids, vec!["e1", "e2", "e3"]);

    let keys = store.in_library_keys().await.unwrap();
    assert_eq!(keys.len(), 1);
}

#[tokio::test]
async fn same_tmdb_id_with_different_types_are_distinct_rows() {
    let store = test_store().await;

    store.upsert_media(&movie("100", &["m1"])).await.unwrap();
    store
        .upsert_media(&MediaUpsert {
            tmdb_id: "100".to_string(),
            item_type: ItemType::Series,
            title: Some("Series 100".to_string()),
            in_library: Some(true),
            emby_item_ids: vec!["s1".to_string()],
            ..Default::default()
        })
        .await
        .unwrap();

    assert!(store.get_media("100", ItemType::Movie).await.unwrap().is_some());
    assert!(store.get_media("100", ItemType::Series).await.unwrap().is_some());
    assert_eq!(store.in_library_keys().await.unwrap().len(), 2);
}

#[tokio::test]
async fn retiring_a_series_clears_descendants_too() {
    let store = test_store().await;

    store
        .upsert_media(&MediaUpsert {
            tmdb_id: "1399".to_string(),
            item_type: ItemType::Series,
            in_library: Some(true),
            emby_item_ids: vec!["s1".to_string()],
            ..Default::default()
        })
        .await
        .unwrap();
    store
        .upsert_media(&MediaUpsert {
            tmdb_id: "3624".to_string(),
            item_type: ItemType::Season,
            parent_series_tmdb_id: Some("1399".to_string()),
            season_number: Some(1),
            in_library: Some(true),
            emby_item_ids: vec!["se1".to_string()],
            ..Default::default()
        })
        .await
        .unwrap();

    store.retire_media(&["1399".to_string()]).await.unwrap();

    let series = store.get_media("1399", ItemType::Series).await.unwrap().unwrap();
    let season = store.get_media("3624", ItemType::Season).await.unwrap().unwrap();
    assert!(!series.in_library);
    assert!(!season.in_library);
    assert!(decode_id_list(series.emby_item_ids_json.as_deref()).is_empty());
    assert!(decode_id_list(season.emby_item_ids_json.as_deref()).is_empty());
}

#[tokio::test]
async fn second_sync_pass_sees_no_new_keys() {
    let store = test_store().await;
    store.upsert_media(&movie("603", &["e1"])).await.unwrap();

    // The diff a sync computes: server keys minus in-library keys.
    let server_keys: std::collections::HashSet<(String, String)> =
        [("603".to_string(), "Movie".to_string())].into_iter().collect();
    let db_keys = store.in_library_keys().await.unwrap();
    let to_process: Vec<_> = server_keys.difference(&db_keys).collect();
    let to_retire: Vec<_> = db_keys.difference(&server_keys).collect();
    assert!(to_process.is_empty());
    assert!(to_retire.is_empty());
}

#[tokio::test]
async fn subscription_sources_accumulate_and_clean_up() {
    let store = test_store().await;
    let record = MediaUpsert {
        tmdb_id: "777".to_string(),
        item_type: ItemType::Movie,
        title: Some("Missing Movie".to_string()),
        release_date: Some("2020-01-01".to_string()),
        ..Default::default()
    };
    let source = SubscriptionSource::collection(1, "热门电影");

    store
        .set_subscription_status(&record, SubscriptionStatus::Wanted, Some(&source))
        .await
        .unwrap();
    // Same source twice stays deduplicated.
    store
        .set_subscription_status(&record, SubscriptionStatus::Wanted, Some(&source))
        .await
        .unwrap();

    let row = store.get_media("777", ItemType::Movie).await.unwrap().unwrap();
    assert_eq!(row.subscription_status.as_deref(), Some("WANTED"));
    let sources: Vec<SubscriptionSource> =
        serde_json::from_str(row.subscription_sources_json.as_deref().unwrap()).unwrap();
    assert_eq!(sources.len(), 1);

    // Removing the last source falls back to NONE.
    store
        .remove_subscription_source("777", ItemType::Movie, &source)
        .await
        .unwrap();
    let row = store.get_media("777", ItemType::Movie).await.unwrap().unwrap();
    assert_eq!(row.subscription_status.as_deref(), Some("NONE"));
}

#[tokio::test]
async fn batch_upserts_survive_a_bad_row() {
    let store = test_store().await;
    let batch = vec![
        movie("1", &["a"]),
        // Duplicate key inside one batch: the second write updates the first.
        movie("1", &["b"]),
        movie("2", &["c"]),
    ];
    let written = store.upsert_media_batch(&batch).await.unwrap();
    assert_eq!(written, 3);

    let row = store.get_media("1", ItemType::Movie).await.unwrap().unwrap();
    assert_eq!(decode_id_list(row.emby_item_ids_json.as_deref()), vec!["a", "b"]);
}

#[tokio::test]
async fn watchlist_paused_state_and_paused_until_travel_together() {
    let store = test_store().await;
    store
        .watchlist_add_if_absent("item1", "1399", "权力的游戏", WatchStatus::Watching, None)
        .await
        .unwrap();

    let paused_until = chrono::NaiveDate::from_ymd_opt(2030, 5, 1).unwrap();
    store
        .watchlist_apply_refresh(
            "item1",
            &WatchlistRefresh {
                status: WatchStatus::Paused,
                paused_until: Some(paused_until),
                tmdb_status: Some("Returning Series".to_string()),
                next_episode_to_air_json: None,
                last_episode_to_air_json: None,
                missing_info_json: None,
                is_airing: true,
            },
        )
        .await
        .unwrap();

    let row = store.watchlist_get("item1").await.unwrap().unwrap();
    assert_eq!(row.status, "Paused");
    assert_eq!(row.paused_until.as_deref(), Some("2030-05-01"));

    // Back to Watching clears paused_until.
    store
        .watchlist_set_status("item1", WatchStatus::Watching, None, None, false)
        .await
        .unwrap();
    let row = store.watchlist_get("item1").await.unwrap().unwrap();
    assert_eq!(row.status, "Watching");
    assert!(row.paused_until.is_none());
}

#[tokio::test]
async fn watchlist_add_is_idempotent_and_resubscribe_ledger_accumulates() {
    let store = test_store().await;
    assert!(store
        .watchlist_add_if_absent("item1", "1399", "剧集", WatchStatus::Completed, Some("Ended"))
        .await
        .unwrap());
    assert!(!store
        .watchlist_add_if_absent("item1", "1399", "剧集", WatchStatus::Watching, None)
        .await
        .unwrap());

    store
        .watchlist_stamp_resubscribe("item1", 2, "2026-01-01T00:00:00Z")
        .await
        .unwrap();
    store
        .watchlist_stamp_resubscribe("item1", 3, "2026-01-02T00:00:00Z")
        .await
        .unwrap();

    let row = store.watchlist_get("item1").await.unwrap().unwrap();
    let ledger: std::collections::HashMap<String, String> =
        serde_json::from_str(row.resubscribe_info_json.as_deref().unwrap()).unwrap();
    assert_eq!(ledger.len(), 2);
    assert_eq!(ledger["2"], "2026-01-01T00:00:00Z");
}

#[tokio::test]
async fn user_collection_cache_upserts_on_the_pair() {
    let store = test_store().await;
    let collection_id = store
        .collection_insert("热门", CollectionType::List, r#"{"url": "tmdb://popular"}"#)
        .await
        .unwrap();

    let entry = |ids: &str, count: i32| UserCacheEntry {
        user_id: "u2".to_string(),
        collection_id,
        visible_emby_ids_json: ids.to_string(),
        total_count: count,
    };

    store
        .collection_upsert_user_cache(&[entry(r#"["e2","e4"]"#, 2)])
        .await
        .unwrap();
    store
        .collection_upsert_user_cache(&[entry(r#"["e2"]"#, 1)])
        .await
        .unwrap();

    let row = store
        .collection_user_cache("u2", collection_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(row.visible_emby_ids_json, r#"["e2"]"#);
    assert_eq!(row.total_count, 1);
}

#[tokio::test]
async fn duplicate_requests_are_visible_through_global_status() {
    let store = test_store().await;
    assert!(store.request_global_status("603").await.unwrap().is_none());

    store
        .request_create(&NewRequest {
            emby_user_id: "u1".to_string(),
            tmdb_id: "603".to_string(),
            item_type: "Movie".to_string(),
            item_name: "The Matrix".to_string(),
            status: "pending".to_string(),
            processed_by: None,
            parent_tmdb_id: None,
            parsed_series_name: None,
            parsed_season_number: None,
        })
        .await
        .unwrap();

    assert_eq!(
        store.request_global_status("603").await.unwrap().as_deref(),
        Some("pending")
    );
}

#[tokio::test]
async fn quota_resets_daily_and_never_goes_negative() {
    let store = test_store().await;
    let quota = QuotaService::new(store.clone(), 2);

    assert_eq!(quota.get_quota().await.unwrap(), 2);
    assert_eq!(quota.decrement().await.unwrap(), 1);
    assert_eq!(quota.decrement().await.unwrap(), 0);
    // Decrementing zero is a no-op.
    assert_eq!(quota.decrement().await.unwrap(), 0);
    assert_eq!(quota.get_quota().await.unwrap(), 0);

    // A stale stored date resets the counter.
    store
        .setting_set(
            "subscription_quota",
            &serde_json::json!({ "date": "2000-01-01", "count": 0 }),
        )
        .await
        .unwrap();
    assert_eq!(quota.get_quota().await.unwrap(), 2);
}

#[tokio::test]
async fn user_mirror_sync_removes_stale_rows() {
    let store = test_store().await;
    let users = vec![
        UserUpsert {
            id: "u1".to_string(),
            name: "admin".to_string(),
            is_administrator: true,
        },
        UserUpsert {
            id: "u2".to_string(),
            name: "guest".to_string(),
            is_administrator: false,
        },
    ];
    store.users_sync_from_server(&users).await.unwrap();
    assert_eq!(store.users_all().await.unwrap().len(), 2);

    store.user_set_vip("u2", true).await.unwrap();
    assert!(store.user_is_vip("u2").await.unwrap());

    // u2 disappeared upstream.
    store
        .users_sync_from_server(&users[..1].to_vec())
        .await
        .unwrap();
    let remaining = store.users_all().await.unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].id, "u1");
}

#[tokio::test]
async fn sequence_repair_runs_after_manual_inserts() {
    let store = test_store().await;
    store
        .collection_insert("a", CollectionType::Filter, "{}")
        .await
        .unwrap();
    store.resync_primary_key_sequences().await.unwrap();

    // Inserting after the repair still yields a fresh id.
    let id = store
        .collection_insert("b", CollectionType::Filter, "{}")
        .await
        .unwrap();
    assert!(id >= 2);
}
