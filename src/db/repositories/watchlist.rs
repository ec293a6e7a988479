use anyhow::Result;
use chrono::NaiveDate;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, Set,
};
use tracing::info;

use crate::entities::{prelude::*, watchlist};
use crate::models::watchlist::WatchStatus;

/// Everything one per-series refresh writes back in a single shot.
#[derive(Debug, Clone)]
pub struct WatchlistRefresh {
    pub status: WatchStatus,
    pub paused_until: Option<NaiveDate>,
    pub tmdb_status: Option<String>,
    pub next_episode_to_air_json: Option<String>,
    pub last_episode_to_air_json: Option<String>,
    pub missing_info_json: Option<String>,
    pub is_airing: bool,
}

pub struct WatchlistRepository {
    conn: DatabaseConnection,
}

impl WatchlistRepository {
    #[must_use]
    pub const fn new(conn: DatabaseConnection) -> Self {
        Self { conn }
    }

    /// Insert a new entry, leaving an existing one untouched. Returns true
    /// when a row was actually created.
    pub async fn add_if_absent(
        &self,
        item_id: &str,
        tmdb_id: &str,
        item_name: &str,
        status: WatchStatus,
        tmdb_status: Option<&str>,
    ) -> Result<bool> {
        if self.get(item_id).await?.is_some() {
            return Ok(false);
        }
        let active = watchlist::ActiveModel {
            item_id: Set(item_id.to_string()),
            tmdb_id: Set(tmdb_id.to_string()),
            item_name: Set(item_name.to_string()),
            item_type: Set("Series".to_string()),
            status: Set(status.as_str().to_string()),
            paused_until: Set(None),
            tmdb_status: Set(tmdb_status.map(String::from)),
            next_episode_to_air_json: Set(None),
            last_episode_to_air_json: Set(None),
            missing_info_json: Set(None),
            is_airing: Set(status == WatchStatus::Watching),
            force_ended: Set(false),
            resubscribe_info_json: Set(None),
            last_checked_at: Set(Some(chrono::Utc::now().to_rfc3339())),
        };
        Watchlist::insert(active).exec(&self.conn).await?;
        info!(item_name, status = status.as_str(), "series added to watchlist");
        Ok(true)
    }

    pub async fn get(&self, item_id: &str) -> Result<Option<watchlist::Model>> {
        Ok(Watchlist::find_by_id(item_id.to_string())
            .one(&self.conn)
            .await?)
    }

    pub async fn list_all(&self) -> Result<Vec<watchlist::Model>> {
        Ok(Watchlist::find().all(&self.conn).await?)
    }

    pub async fn list_by_status(&self, status: WatchStatus) -> Result<Vec<watchlist::Model>> {
        Ok(Watchlist::find()
            .filter(watchlist::Column::Status.eq(status.as_str()))
            .all(&self.conn)
            .await?)
    }

    /// Quick-mode selection: everything Watching, plus Paused entries whose
    /// pause has expired.
    pub async fn due_for_refresh(&self, today: NaiveDate) -> Result<Vec<watchlist::Model>> {
        let today_str = today.format("%Y-%m-%d").to_string();
        Ok(Watchlist::find()
            .filter(
                watchlist::Column::Status.eq(WatchStatus::Watching.as_str()).or(
                    watchlist::Column::Status
                        .eq(WatchStatus::Paused.as_str())
                        .and(watchlist::Column::PausedUntil.lte(today_str)),
                ),
            )
            .all(&self.conn)
            .await?)
    }

    /// Deep-mode selection: everything except entries the user pinned.
    pub async fn all_unpinned(&self) -> Result<Vec<watchlist::Model>> {
        Ok(Watchlist::find()
            .filter(watchlist::Column::ForceEnded.eq(false))
            .all(&self.conn)
            .await?)
    }

    pub async fn remove(&self, item_id: &str) -> Result<bool> {
        let result = Watchlist::delete_by_id(item_id.to_string())
            .exec(&self.conn)
            .await?;
        Ok(result.rows_affected > 0)
    }

    pub async fn apply_refresh(&self, item_id: &str, refresh: &WatchlistRefresh) -> Result<()> {
        let Some(row) = self.get(item_id).await? else {
            return Ok(());
        };
        let mut active: watchlist::ActiveModel = row.into();
        active.status = Set(refresh.status.as_str().to_string());
        active.paused_until = Set(refresh
            .paused_until
            .map(|d| d.format("%Y-%m-%d").to_string()));
        active.tmdb_status = Set(refresh.tmdb_status.clone());
        active.next_episode_to_air_json = Set(refresh.next_episode_to_air_json.clone());
        active.last_episode_to_air_json = Set(refresh.last_episode_to_air_json.clone());
        active.missing_info_json = Set(refresh.missing_info_json.clone());
        active.is_airing = Set(refresh.is_airing);
        active.last_checked_at = Set(Some(chrono::Utc::now().to_rfc3339()));
        active.update(&self.conn).await?;
        Ok(())
    }

    /// Status change outside a full refresh (revival, post-resubscribe reset).
    pub async fn set_status(
        &self,
        item_id: &str,
        status: WatchStatus,
        paused_until: Option<NaiveDate>,
        tmdb_status: Option<&str>,
        clear_force_ended: bool,
    ) -> Result<()> {
        let Some(row) = self.get(item_id).await? else {
            return Ok(());
        };
        let mut active: watchlist::ActiveModel = row.into();
        active.status = Set(status.as_str().to_string());
        active.paused_until = Set(paused_until.map(|d| d.format("%Y-%m-%d").to_string()));
        if let Some(s) = tmdb_status {
            active.tmdb_status = Set(Some(s.to_string()));
        }
        if clear_force_ended {
            active.force_ended = Set(false);
        }
        active.last_checked_at = Set(Some(chrono::Utc::now().to_rfc3339()));
        active.update(&self.conn).await?;
        Ok(())
    }

    pub async fn set_force_ended(&self, item_id: &str, force_ended: bool) -> Result<()> {
        let Some(row) = self.get(item_id).await? else {
            return Ok(());
        };
        let mut active: watchlist::ActiveModel = row.into();
        active.force_ended = Set(force_ended);
        active.update(&self.conn).await?;
        Ok(())
    }

    /// Stamp the cooldown ledger for one season after a resubscribe dispatch.
    pub async fn stamp_resubscribe(
        &self,
        item_id: &str,
        season_number: i32,
        timestamp: &str,
    ) -> Result<()> {
        let Some(row) = self.get(item_id).await? else {
            return Ok(());
        };
        let mut ledger: std::collections::HashMap<String, String> = row
            .resubscribe_info_json
            .as_deref()
            .and_then(|raw| serde_json::from_str(raw).ok())
            .unwrap_or_default();
        ledger.insert(season_number.to_string(), timestamp.to_string());

        let mut active: watchlist::ActiveModel = row.into();
        active.resubscribe_info_json = Set(Some(serde_json::to_string(&ledger)?));
        active.update(&self.conn).await?;
        Ok(())
    }
}
