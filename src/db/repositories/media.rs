use std::collections::{HashMap, HashSet};

use anyhow::Result;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, DatabaseTransaction, EntityTrait,
    QueryFilter, QuerySelect, Set, TransactionTrait,
};
use tracing::{debug, warn};

use crate::entities::{media_metadata, prelude::*};
use crate::models::media::{decode_id_list, ItemType, SubscriptionSource, SubscriptionStatus};

/// One write against the catalog. `None` fields leave the stored value
/// untouched on update; `emby_item_ids` are unioned into the existing set.
#[derive(Debug, Clone, Default)]
pub struct MediaUpsert {
    pub tmdb_id: String,
    pub item_type: ItemType,
    pub title: Option<String>,
    pub original_title: Option<String>,
    pub release_year: Option<i32>,
    pub release_date: Option<String>,
    pub rating: Option<f32>,
    pub official_rating: Option<String>,
    pub unified_rating: Option<String>,
    pub overview: Option<String>,
    pub poster_path: Option<String>,
    pub original_language: Option<String>,
    pub genres_json: Option<String>,
    pub directors_json: Option<String>,
    pub studios_json: Option<String>,
    pub countries_json: Option<String>,
    pub keywords_json: Option<String>,
    pub in_library: Option<bool>,
    pub emby_item_ids: Vec<String>,
    pub asset_details_json: Option<String>,
    pub subscription_status_on_insert: Option<SubscriptionStatus>,
    pub parent_series_tmdb_id: Option<String>,
    pub season_number: Option<i32>,
    pub episode_number: Option<i32>,
}

pub struct MediaRepository {
    conn: DatabaseConnection,
}

impl MediaRepository {
    #[must_use]
    pub const fn new(conn: DatabaseConnection) -> Self {
        Self { conn }
    }

    pub async fn get(&self, tmdb_id: &str, item_type: ItemType) -> Result<Option<media_metadata::Model>> {
        let row = MediaMetadata::find_by_id((tmdb_id.to_string(), item_type.as_str().to_string()))
            .one(&self.conn)
            .await?;
        Ok(row)
    }

    /// Composite keys `(tmdb_id, item_type)` of top-level rows still marked
    /// in-library.
    pub async fn in_library_keys(&self) -> Result<HashSet<(String, String)>> {
        let rows: Vec<(String, String)> = MediaMetadata::find()
            .select_only()
            .column(media_metadata::Column::TmdbId)
            .column(media_metadata::Column::ItemType)
            .filter(media_metadata::Column::InLibrary.eq(true))
            .filter(
                media_metadata::Column::ItemType
                    .is_in([ItemType::Movie.as_str(), ItemType::Series.as_str()]),
            )
            .into_tuple()
            .all(&self.conn)
            .await?;
        Ok(rows.into_iter().collect())
    }

    /// Composite key `"{tmdb_id}_{item_type}"` → first Media-Server id, for
    /// every in-library top-level row. Used to join list collections to
    /// local ids.
    pub async fn tmdb_to_emby_map(&self) -> Result<HashMap<String, String>> {
        let rows = MediaMetadata::find()
            .filter(media_metadata::Column::InLibrary.eq(true))
            .filter(
                media_metadata::Column::ItemType
                    .is_in([ItemType::Movie.as_str(), ItemType::Series.as_str()]),
            )
            .all(&self.conn)
            .await?;

        let mut map = HashMap::new();
        for row in rows {
            let ids = decode_id_list(row.emby_item_ids_json.as_deref());
            if let Some(first) = ids.into_iter().next() {
                map.insert(format!("{}_{}", row.tmdb_id, row.item_type), first);
            }
        }
        Ok(map)
    }

    /// `(parent_series_tmdb_id, season_number)` pairs known to be in library.
    pub async fn in_library_season_set(&self) -> Result<HashSet<(String, i32)>> {
        let rows: Vec<(Option<String>, Option<i32>)> = MediaMetadata::find()
            .select_only()
            .column(media_metadata::Column::ParentSeriesTmdbId)
            .column(media_metadata::Column::SeasonNumber)
            .filter(media_metadata::Column::ItemType.eq(ItemType::Season.as_str()))
            .filter(media_metadata::Column::InLibrary.eq(true))
            .into_tuple()
            .all(&self.conn)
            .await?;

        Ok(rows
            .into_iter()
            .filter_map(|(series, season)| Some((series?, season?)))
            .collect())
    }

    /// Mark the given top-level ids (and every descendant row) as gone from
    /// the library. Rows are kept; only `in_library` and the Media-Server
    /// ids are cleared.
    pub async fn retire(&self, tmdb_ids: &[String]) -> Result<u64> {
        if tmdb_ids.is_empty() {
            return Ok(0);
        }
        let result = MediaMetadata::update_many()
            .col_expr(media_metadata::Column::InLibrary, Expr::value(false))
            .col_expr(media_metadata::Column::EmbyItemIdsJson, Expr::value("[]"))
            .filter(
                media_metadata::Column::TmdbId
                    .is_in(tmdb_ids.iter().cloned())
                    .or(media_metadata::Column::ParentSeriesTmdbId.is_in(tmdb_ids.iter().cloned())),
            )
            .exec(&self.conn)
            .await?;
        Ok(result.rows_affected)
    }

    /// Apply a batch of catalog writes in one transaction, one savepoint per
    /// row so a single bad row does not abort the batch. Returns the number
    /// of rows written.
    pub async fn upsert_batch(&self, batch: &[MediaUpsert]) -> Result<usize> {
        let txn = self.conn.begin().await?;
        let mut written = 0;
        for record in batch {
            let savepoint = txn.begin().await?;
            match Self::upsert_in(&savepoint, record).await {
                Ok(()) => {
                    savepoint.commit().await?;
                    written += 1;
                }
                Err(e) => {
                    warn!(
                        tmdb_id = %record.tmdb_id,
                        item_type = %record.item_type,
                        "catalog upsert failed, skipping row: {e}"
                    );
                    savepoint.rollback().await?;
                }
            }
        }
        txn.commit().await?;
        Ok(written)
    }

    pub async fn upsert(&self, record: &MediaUpsert) -> Result<()> {
        let txn = self.conn.begin().await?;
        Self::upsert_in(&txn, record).await?;
        txn.commit().await?;
        Ok(())
    }

    async fn upsert_in(txn: &DatabaseTransaction, record: &MediaUpsert) -> Result<()> {
        let existing = MediaMetadata::find_by_id((
            record.tmdb_id.clone(),
            record.item_type.as_str().to_string(),
        ))
        .one(txn)
        .await?;

        let now = chrono::Utc::now().to_rfc3339();

        if let Some(current) = existing {
            let merged_ids = union_ids(current.emby_item_ids_json.as_deref(), &record.emby_item_ids);
            let mut active: media_metadata::ActiveModel = current.into();
            if let Some(v) = &record.title {
                active.title = Set(Some(v.clone()));
            }
            if let Some(v) = &record.original_title {
                active.original_title = Set(Some(v.clone()));
            }
            if let Some(v) = record.release_year {
                active.release_year = Set(Some(v));
            }
            if let Some(v) = &record.release_date {
                active.release_date = Set(Some(v.clone()));
            }
            if let Some(v) = record.rating {
                active.rating = Set(Some(v));
            }
            if let Some(v) = &record.official_rating {
                active.official_rating = Set(Some(v.clone()));
            }
            if let Some(v) = &record.unified_rating {
                active.unified_rating = Set(Some(v.clone()));
            }
            if let Some(v) = &record.overview {
                active.overview = Set(Some(v.clone()));
            }
            if let Some(v) = &record.poster_path {
                active.poster_path = Set(Some(v.clone()));
            }
            if let Some(v) = &record.original_language {
                active.original_language = Set(Some(v.clone()));
            }
            if let Some(v) = &record.genres_json {
                active.genres_json = Set(Some(v.clone()));
            }
            if let Some(v) = &record.directors_json {
                active.directors_json = Set(Some(v.clone()));
            }
            if let Some(v) = &record.studios_json {
                active.studios_json = Set(Some(v.clone()));
            }
            if let Some(v) = &record.countries_json {
                active.countries_json = Set(Some(v.clone()));
            }
            if let Some(v) = &record.keywords_json {
                active.keywords_json = Set(Some(v.clone()));
            }
            if let Some(v) = record.in_library {
                active.in_library = Set(v);
            }
            if let Some(v) = &record.asset_details_json {
                active.asset_details_json = Set(Some(v.clone()));
            }
            if let Some(v) = &record.parent_series_tmdb_id {
                active.parent_series_tmdb_id = Set(Some(v.clone()));
            }
            if let Some(v) = record.season_number {
                active.season_number = Set(Some(v));
            }
            if let Some(v) = record.episode_number {
                active.episode_number = Set(Some(v));
            }
            active.emby_item_ids_json = Set(Some(serde_json::to_string(&merged_ids)?));
            active.ignore_reason = Set(None);
            active.last_synced_at = Set(Some(now));
            active.update(txn).await?;
        } else {
            let ids = union_ids(None, &record.emby_item_ids);
            let active = media_metadata::ActiveModel {
                tmdb_id: Set(record.tmdb_id.clone()),
                item_type: Set(record.item_type.as_str().to_string()),
                title: Set(record.title.clone()),
                original_title: Set(record.original_title.clone()),
                release_year: Set(record.release_year),
                release_date: Set(record.release_date.clone()),
                rating: Set(record.rating),
                official_rating: Set(record.official_rating.clone()),
                unified_rating: Set(record.unified_rating.clone()),
                overview: Set(record.overview.clone()),
                poster_path: Set(record.poster_path.clone()),
                original_language: Set(record.original_language.clone()),
                genres_json: Set(record.genres_json.clone()),
                directors_json: Set(record.directors_json.clone()),
                studios_json: Set(record.studios_json.clone()),
                countries_json: Set(record.countries_json.clone()),
                keywords_json: Set(record.keywords_json.clone()),
                in_library: Set(record.in_library.unwrap_or(false)),
                emby_item_ids_json: Set(Some(serde_json::to_string(&ids)?)),
                emby_children_details_json: Set(None),
                asset_details_json: Set(record.asset_details_json.clone()),
                subscription_status: Set(record
                    .subscription_status_on_insert
                    .map(|s| s.as_str().to_string())),
                subscription_sources_json: Set(None),
                parent_series_tmdb_id: Set(record.parent_series_tmdb_id.clone()),
                season_number: Set(record.season_number),
                episode_number: Set(record.episode_number),
                ignore_reason: Set(None),
                last_synced_at: Set(Some(now)),
            };
            MediaMetadata::insert(active).exec(txn).await?;
        }
        Ok(())
    }

    /// Insert placeholder rows (status NONE) for items the catalog has never
    /// seen, leaving existing rows untouched.
    pub async fn ensure_exist(&self, records: &[MediaUpsert]) -> Result<()> {
        for record in records {
            if self.get(&record.tmdb_id, record.item_type).await?.is_none() {
                let mut placeholder = record.clone();
                placeholder.subscription_status_on_insert =
                    Some(placeholder.subscription_status_on_insert.unwrap_or(SubscriptionStatus::None));
                self.upsert(&placeholder).await?;
            }
        }
        Ok(())
    }

    /// Set the denormalized subscription status, appending `source` to the
    /// row's source list (deduplicated).
    pub async fn set_subscription_status(
        &self,
        record: &MediaUpsert,
        status: SubscriptionStatus,
        source: Option<&SubscriptionSource>,
    ) -> Result<()> {
        self.upsert(record).await?;
        let Some(row) = self.get(&record.tmdb_id, record.item_type).await? else {
            return Ok(());
        };

        let mut sources: Vec<SubscriptionSource> = row
            .subscription_sources_json
            .as_deref()
            .and_then(|raw| serde_json::from_str(raw).ok())
            .unwrap_or_default();
        if let Some(src) = source {
            if !sources.iter().any(|s| s.kind == src.kind && s.id == src.id) {
                sources.push(src.clone());
            }
        }

        let mut active: media_metadata::ActiveModel = row.into();
        active.subscription_status = Set(Some(status.as_str().to_string()));
        active.subscription_sources_json = Set(Some(serde_json::to_string(&sources)?));
        active.update(&self.conn).await?;
        Ok(())
    }

    /// Drop one source from a row. When the last WANTED/PENDING_RELEASE
    /// source disappears the status falls back to NONE.
    pub async fn remove_subscription_source(
        &self,
        tmdb_id: &str,
        item_type: ItemType,
        source: &SubscriptionSource,
    ) -> Result<()> {
        let Some(row) = self.get(tmdb_id, item_type).await? else {
            return Ok(());
        };

        let mut sources: Vec<SubscriptionSource> = row
            .subscription_sources_json
            .as_deref()
            .and_then(|raw| serde_json::from_str(raw).ok())
            .unwrap_or_default();
        sources.retain(|s| !(s.kind == source.kind && s.id == source.id));

        let status = row.subscription_status.clone();
        let mut active: media_metadata::ActiveModel = row.into();
        if sources.is_empty()
            && matches!(
                status.as_deref(),
                Some("WANTED") | Some("PENDING_RELEASE")
            )
        {
            active.subscription_status = Set(Some(SubscriptionStatus::None.as_str().to_string()));
            debug!(tmdb_id, "last subscription source removed, status reset");
        }
        active.subscription_sources_json = Set(Some(serde_json::to_string(&sources)?));
        active.update(&self.conn).await?;
        Ok(())
    }

    pub async fn list_by_subscription_status(
        &self,
        status: SubscriptionStatus,
    ) -> Result<Vec<media_metadata::Model>> {
        let rows = MediaMetadata::find()
            .filter(media_metadata::Column::SubscriptionStatus.eq(status.as_str()))
            .all(&self.conn)
            .await?;
        Ok(rows)
    }

    /// Replace the cached flat children list on a series row. Returns false
    /// when the series is not in the catalog yet.
    pub async fn update_children_details(
        &self,
        series_tmdb_id: &str,
        children_json: &str,
    ) -> Result<bool> {
        let result = MediaMetadata::update_many()
            .col_expr(
                media_metadata::Column::EmbyChildrenDetailsJson,
                Expr::value(children_json),
            )
            .col_expr(
                media_metadata::Column::LastSyncedAt,
                Expr::value(chrono::Utc::now().to_rfc3339()),
            )
            .filter(media_metadata::Column::TmdbId.eq(series_tmdb_id))
            .filter(media_metadata::Column::ItemType.eq(ItemType::Series.as_str()))
            .exec(&self.conn)
            .await?;
        Ok(result.rows_affected > 0)
    }

    pub async fn touch_series(&self, series_tmdb_id: &str) -> Result<()> {
        MediaMetadata::update_many()
            .col_expr(
                media_metadata::Column::LastSyncedAt,
                Expr::value(chrono::Utc::now().to_rfc3339()),
            )
            .filter(media_metadata::Column::TmdbId.eq(series_tmdb_id))
            .filter(media_metadata::Column::ItemType.eq(ItemType::Series.as_str()))
            .exec(&self.conn)
            .await?;
        Ok(())
    }

    /// All in-library rows, for the filter engine.
    pub async fn list_in_library(&self, types: &[ItemType]) -> Result<Vec<media_metadata::Model>> {
        let rows = MediaMetadata::find()
            .filter(media_metadata::Column::InLibrary.eq(true))
            .filter(
                media_metadata::Column::ItemType
                    .is_in(types.iter().map(|t| t.as_str()).collect::<Vec<_>>()),
            )
            .all(&self.conn)
            .await?;
        Ok(rows)
    }
}

fn union_ids(existing_json: Option<&str>, incoming: &[String]) -> Vec<String> {
    let mut merged = decode_id_list(existing_json);
    let mut seen: HashSet<String> = merged.iter().cloned().collect();
    for id in incoming {
        if !id.is_empty() && id != "null" && seen.insert(id.clone()) {
            merged.push(id.clone());
        }
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn union_preserves_order_and_dedupes() {
        let merged = union_ids(Some(r#"["a", "b"]"#), &["b".into(), "c".into(), "".into()]);
        assert_eq!(merged, vec!["a", "b", "c"]);
    }

    #[test]
    fn union_from_empty_starts_fresh() {
        let merged = union_ids(None, &["x".into(), "x".into()]);
        assert_eq!(merged, vec!["x"]);
    }
}
