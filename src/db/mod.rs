use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::time::Duration;

use anyhow::Result;
use chrono::NaiveDate;
use sea_orm::{ConnectOptions, ConnectionTrait, Database, DatabaseConnection, Statement};
use tracing::info;

use crate::entities::{custom_collections, emby_users, media_metadata, subscription_requests, user_collection_cache, watchlist};
use crate::models::collection::CollectionType;
use crate::models::media::{ItemType, SubscriptionSource, SubscriptionStatus};
use crate::models::watchlist::WatchStatus;

pub mod migrator;
pub mod repositories;

pub use repositories::collection::{CollectionSyncResults, UserCacheEntry};
pub use repositories::media::MediaUpsert;
pub use repositories::request::NewRequest;
pub use repositories::user::UserUpsert;
pub use repositories::watchlist::WatchlistRefresh;

#[derive(Clone)]
pub struct Store {
    pub conn: DatabaseConnection,
}

impl Store {
    pub async fn new(db_url: &str) -> Result<Self> {
        Self::with_pool_options(db_url, 5, 1).await
    }

    pub async fn with_pool_options(
        db_url: &str,
        max_connections: u32,
        min_connections: u32,
    ) -> Result<Self> {
        use sea_orm_migration::MigratorTrait;

        if !db_url.contains(":memory:") {
            let path_str = db_url.trim_start_matches("sqlite:");
            if let Some(parent) = Path::new(path_str).parent() {
                tokio::fs::create_dir_all(parent).await.ok();
            }
            if !Path::new(path_str).exists() {
                std::fs::File::create(path_str)?;
            }
        }

        let mut opt = ConnectOptions::new(db_url.to_string());
        opt.max_connections(max_connections)
            .min_connections(min_connections)
            .connect_timeout(Duration::from_secs(10))
            .acquire_timeout(Duration::from_secs(10))
            .idle_timeout(Duration::from_secs(300))
            .max_lifetime(Duration::from_secs(600))
            .sqlx_logging(false);

        let conn = Database::connect(opt).await?;

        migrator::Migrator::up(&conn, None).await?;

        info!(
            "Database connected & migrations applied (pool: {}-{})",
            min_connections, max_connections
        );

        Ok(Self { conn })
    }

    fn media_repo(&self) -> repositories::media::MediaRepository {
        repositories::media::MediaRepository::new(self.conn.clone())
    }

    fn watchlist_repo(&self) -> repositories::watchlist::WatchlistRepository {
        repositories::watchlist::WatchlistRepository::new(self.conn.clone())
    }

    fn collection_repo(&self) -> repositories::collection::CollectionRepository {
        repositories::collection::CollectionRepository::new(self.conn.clone())
    }

    fn request_repo(&self) -> repositories::request::RequestRepository {
        repositories::request::RequestRepository::new(self.conn.clone())
    }

    fn settings_repo(&self) -> repositories::settings::SettingsRepository {
        repositories::settings::SettingsRepository::new(self.conn.clone())
    }

    fn user_repo(&self) -> repositories::user::UserRepository {
        repositories::user::UserRepository::new(self.conn.clone())
    }

    // ========================================================================
    // Catalog (media_metadata)
    // ========================================================================

    pub async fn get_media(
        &self,
        tmdb_id: &str,
        item_type: ItemType,
    ) -> Result<Option<media_metadata::Model>> {
        self.media_repo().get(tmdb_id, item_type).await
    }

    pub async fn in_library_keys(&self) -> Result<HashSet<(String, String)>> {
        self.media_repo().in_library_keys().await
    }

    pub async fn tmdb_to_emby_map(&self) -> Result<HashMap<String, String>> {
        self.media_repo().tmdb_to_emby_map().await
    }

    pub async fn in_library_season_set(&self) -> Result<HashSet<(String, i32)>> {
        self.media_repo().in_library_season_set().await
    }

    pub async fn retire_media(&self, tmdb_ids: &[String]) -> Result<u64> {
        self.media_repo().retire(tmdb_ids).await
    }

    pub async fn upsert_media(&self, record: &MediaUpsert) -> Result<()> {
        self.media_repo().upsert(record).await
    }

    pub async fn upsert_media_batch(&self, batch: &[MediaUpsert]) -> Result<usize> {
        self.media_repo().upsert_batch(batch).await
    }

    pub async fn ensure_media_exist(&self, records: &[MediaUpsert]) -> Result<()> {
        self.media_repo().ensure_exist(records).await
    }

    pub async fn set_subscription_status(
        &self,
        record: &MediaUpsert,
        status: SubscriptionStatus,
        source: Option<&SubscriptionSource>,
    ) -> Result<()> {
        self.media_repo()
            .set_subscription_status(record, status, source)
            .await
    }

    pub async fn remove_subscription_source(
        &self,
        tmdb_id: &str,
        item_type: ItemType,
        source: &SubscriptionSource,
    ) -> Result<()> {
        self.media_repo()
            .remove_subscription_source(tmdb_id, item_type, source)
            .await
    }

    pub async fn list_by_subscription_status(
        &self,
        status: SubscriptionStatus,
    ) -> Result<Vec<media_metadata::Model>> {
        self.media_repo().list_by_subscription_status(status).await
    }

    pub async fn update_children_details(
        &self,
        series_tmdb_id: &str,
        children_json: &str,
    ) -> Result<bool> {
        self.media_repo()
            .update_children_details(series_tmdb_id, children_json)
            .await
    }

    pub async fn touch_series(&self, series_tmdb_id: &str) -> Result<()> {
        self.media_repo().touch_series(series_tmdb_id).await
    }

    pub async fn list_in_library(&self, types: &[ItemType]) -> Result<Vec<media_metadata::Model>> {
        self.media_repo().list_in_library(types).await
    }

    // ========================================================================
    // Watchlist
    // ========================================================================

    pub async fn watchlist_add_if_absent(
        &self,
        item_id: &str,
        tmdb_id: &str,
        item_name: &str,
        status: WatchStatus,
        tmdb_status: Option<&str>,
    ) -> Result<bool> {
        self.watchlist_repo()
            .add_if_absent(item_id, tmdb_id, item_name, status, tmdb_status)
            .await
    }

    pub async fn watchlist_get(&self, item_id: &str) -> Result<Option<watchlist::Model>> {
        self.watchlist_repo().get(item_id).await
    }

    pub async fn watchlist_all(&self) -> Result<Vec<watchlist::Model>> {
        self.watchlist_repo().list_all().await
    }

    pub async fn watchlist_by_status(&self, status: WatchStatus) -> Result<Vec<watchlist::Model>> {
        self.watchlist_repo().list_by_status(status).await
    }

    pub async fn watchlist_due_for_refresh(
        &self,
        today: NaiveDate,
    ) -> Result<Vec<watchlist::Model>> {
        self.watchlist_repo().due_for_refresh(today).await
    }

    pub async fn watchlist_all_unpinned(&self) -> Result<Vec<watchlist::Model>> {
        self.watchlist_repo().all_unpinned().await
    }

    pub async fn watchlist_remove(&self, item_id: &str) -> Result<bool> {
        self.watchlist_repo().remove(item_id).await
    }

    pub async fn watchlist_apply_refresh(
        &self,
        item_id: &str,
        refresh: &WatchlistRefresh,
    ) -> Result<()> {
        self.watchlist_repo().apply_refresh(item_id, refresh).await
    }

    pub async fn watchlist_set_status(
        &self,
        item_id: &str,
        status: WatchStatus,
        paused_until: Option<NaiveDate>,
        tmdb_status: Option<&str>,
        clear_force_ended: bool,
    ) -> Result<()> {
        self.watchlist_repo()
            .set_status(item_id, status, paused_until, tmdb_status, clear_force_ended)
            .await
    }

    pub async fn watchlist_set_force_ended(&self, item_id: &str, force_ended: bool) -> Result<()> {
        self.watchlist_repo().set_force_ended(item_id, force_ended).await
    }

    pub async fn watchlist_stamp_resubscribe(
        &self,
        item_id: &str,
        season_number: i32,
        timestamp: &str,
    ) -> Result<()> {
        self.watchlist_repo()
            .stamp_resubscribe(item_id, season_number, timestamp)
            .await
    }

    // ========================================================================
    // Collections
    // ========================================================================

    pub async fn collection_insert(
        &self,
        name: &str,
        collection_type: CollectionType,
        definition_json: &str,
    ) -> Result<i32> {
        self.collection_repo()
            .insert(name, collection_type, definition_json)
            .await
    }

    pub async fn collection_get(&self, id: i32) -> Result<Option<custom_collections::Model>> {
        self.collection_repo().get(id).await
    }

    pub async fn collections_enabled(&self) -> Result<Vec<custom_collections::Model>> {
        self.collection_repo().list_enabled().await
    }

    pub async fn collection_update_sync_results(
        &self,
        id: i32,
        results: &CollectionSyncResults,
    ) -> Result<()> {
        self.collection_repo().update_sync_results(id, results).await
    }

    pub async fn collection_upsert_user_cache(&self, entries: &[UserCacheEntry]) -> Result<()> {
        self.collection_repo().upsert_user_cache(entries).await
    }

    pub async fn collection_user_cache(
        &self,
        user_id: &str,
        collection_id: i32,
    ) -> Result<Option<user_collection_cache::Model>> {
        self.collection_repo().get_user_cache(user_id, collection_id).await
    }

    // ========================================================================
    // Subscription requests
    // ========================================================================

    pub async fn request_global_status(&self, tmdb_id: &str) -> Result<Option<String>> {
        self.request_repo().global_status(tmdb_id).await
    }

    pub async fn request_create(&self, request: &NewRequest) -> Result<i32> {
        self.request_repo().create(request).await
    }

    pub async fn requests_for_user(
        &self,
        user_id: &str,
    ) -> Result<Vec<subscription_requests::Model>> {
        self.request_repo().list_for_user(user_id).await
    }

    pub async fn request_set_status(
        &self,
        id: i32,
        status: &str,
        processed_by: Option<&str>,
    ) -> Result<()> {
        self.request_repo().set_status(id, status, processed_by).await
    }

    // ========================================================================
    // Settings & users
    // ========================================================================

    pub async fn setting_get(&self, key: &str) -> Result<Option<serde_json::Value>> {
        self.settings_repo().get(key).await
    }

    pub async fn setting_set(&self, key: &str, value: &serde_json::Value) -> Result<()> {
        self.settings_repo().set(key, value).await
    }

    pub async fn users_all(&self) -> Result<Vec<emby_users::Model>> {
        self.user_repo().list_all().await
    }

    pub async fn user_get(&self, id: &str) -> Result<Option<emby_users::Model>> {
        self.user_repo().get(id).await
    }

    pub async fn user_is_vip(&self, id: &str) -> Result<bool> {
        self.user_repo().is_vip(id).await
    }

    pub async fn user_telegram_chat_id(&self, id: &str) -> Result<Option<String>> {
        self.user_repo().telegram_chat_id(id).await
    }

    pub async fn users_sync_from_server(&self, users: &[UserUpsert]) -> Result<usize> {
        self.user_repo().sync_from_server(users).await
    }

    pub async fn user_set_vip(&self, id: &str, vip: bool) -> Result<()> {
        self.user_repo().set_vip(id, vip).await
    }

    pub async fn user_set_telegram_chat_id(&self, id: &str, chat_id: Option<&str>) -> Result<()> {
        self.user_repo().set_telegram_chat_id(id, chat_id).await
    }

    // ========================================================================
    // Maintenance
    // ========================================================================

    /// Re-seed the sqlite autoincrement counters to `max(pk)` for every
    /// owned table with a generated key. Run after bulk imports/restores so
    /// future inserts cannot collide with restored rows.
    pub async fn resync_primary_key_sequences(&self) -> Result<()> {
        for table in ["custom_collections", "subscription_requests"] {
            let sql = format!(
                "UPDATE sqlite_sequence SET seq = (SELECT COALESCE(MAX(id), 0) FROM {table}) \
                 WHERE name = '{table}'"
            );
            self.conn
                .execute(Statement::from_string(self.conn.get_database_backend(), sql))
                .await?;
        }
        Ok(())
    }
}
