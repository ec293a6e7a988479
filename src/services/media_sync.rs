//! Batched diff mirror of the Media Server inventory into the catalog:
//! one row per `(tmdb_id, item_type)`, all file versions aggregated onto it,
//! retired rows marked offline instead of deleted.

use std::collections::HashMap;

use anyhow::{bail, Result};
use futures::StreamExt;
use tracing::{debug, info, warn};

use crate::clients::emby::{EmbyClient, EmbyItem};
use crate::clients::telegram::TelegramClient;
use crate::clients::tmdb::{MovieDetails, TmdbClient, TvDetails};
use crate::constants::{pools, translate_country};
use crate::db::{MediaUpsert, Store};
use crate::models::media::{ItemType, SubscriptionStatus};
use crate::parser::asset::parse_asset_details;
use crate::tasks::TaskContext;

const SWEEP_FIELDS: &str = "ProviderIds,Type,DateCreated,Name,OriginalTitle,PremiereDate,\
CommunityRating,Genres,Studios,OfficialRating,ProductionYear,Path,Overview,MediaStreams,\
Container,Size,SeriesId,ParentIndexNumber,IndexNumber,ParentId";

/// Simplified age tier derived from the official rating, one value across
/// the MPAA/TV vocabularies.
#[must_use]
pub fn unified_rating(official: &str) -> Option<&'static str> {
    match official.trim().to_uppercase().as_str() {
        "G" | "TV-G" | "TV-Y" | "TV-Y7" | "APPROVED" => Some("G"),
        "PG" | "TV-PG" => Some("PG"),
        "PG-13" | "TV-14" => Some("PG-13"),
        "R" | "TV-MA" | "M" => Some("R"),
        "NC-17" | "X" => Some("NC-17"),
        _ => None,
    }
}

enum UpstreamDetails {
    Movie(Box<MovieDetails>),
    Tv(Box<TvDetails>),
}

struct SweepBuckets {
    top_level: Vec<((String, ItemType), Vec<EmbyItem>)>,
    seasons_by_series: HashMap<String, Vec<EmbyItem>>,
    episodes_by_series: HashMap<String, Vec<EmbyItem>>,
}

fn bucket_sweep(items: Vec<EmbyItem>) -> SweepBuckets {
    let mut top_level: HashMap<(String, ItemType), Vec<EmbyItem>> = HashMap::new();
    let mut seasons_by_series: HashMap<String, Vec<EmbyItem>> = HashMap::new();
    let mut episodes_by_series: HashMap<String, Vec<EmbyItem>> = HashMap::new();

    for item in items {
        match item.item_type.as_str() {
            "Movie" | "Series" => {
                let Some(tmdb_id) = item.tmdb_id().map(String::from) else {
                    continue;
                };
                let item_type = if item.item_type == "Movie" {
                    ItemType::Movie
                } else {
                    ItemType::Series
                };
                top_level.entry((tmdb_id, item_type)).or_default().push(item);
            }
            "Season" => {
                if let Some(series_id) = item.series_id.clone() {
                    seasons_by_series.entry(series_id).or_default().push(item);
                }
            }
            "Episode" => {
                if let Some(series_id) = item.series_id.clone() {
                    episodes_by_series.entry(series_id).or_default().push(item);
                }
            }
            _ => {}
        }
    }

    let mut top_level: Vec<_> = top_level.into_iter().collect();
    top_level.sort_by(|a, b| a.0.cmp(&b.0));
    SweepBuckets {
        top_level,
        seasons_by_series,
        episodes_by_series,
    }
}

pub struct MediaSyncService {
    store: Store,
    emby: EmbyClient,
    tmdb: TmdbClient,
    telegram: Option<TelegramClient>,
    library_ids: Vec<String>,
}

impl MediaSyncService {
    #[must_use]
    pub fn new(
        store: Store,
        emby: EmbyClient,
        tmdb: TmdbClient,
        telegram: Option<TelegramClient>,
        library_ids: Vec<String>,
    ) -> Self {
        Self {
            store,
            emby,
            tmdb,
            telegram,
            library_ids,
        }
    }

    /// The full sync task. Quick mode only processes top-level items the
    /// catalog has never seen; deep mode reprocesses the whole sweep.
    pub async fn populate(&self, ctx: &TaskContext, force_full_update: bool) -> Result<()> {
        if self.library_ids.is_empty() {
            bail!("no libraries configured for metadata sync");
        }
        let mode = if force_full_update { "深度同步" } else { "快速同步" };
        ctx.progress
            .update(0, format!("阶段1/2: 计算媒体库差异 ({mode})..."));

        let sweep = self
            .emby
            .list_items(&self.library_ids, "Movie,Series,Season,Episode", SWEEP_FIELDS)
            .await?;
        let buckets = bucket_sweep(sweep);
        info!(
            top_level = buckets.top_level.len(),
            "media server sweep bucketed"
        );

        let emby_keys: std::collections::HashSet<(String, String)> = buckets
            .top_level
            .iter()
            .map(|((tmdb_id, item_type), _)| (tmdb_id.clone(), item_type.as_str().to_string()))
            .collect();
        let db_keys = self.store.in_library_keys().await?;

        if ctx.stop.is_set() {
            ctx.progress.update(100, "任务已停止。");
            return Ok(());
        }

        let to_retire: Vec<String> = db_keys
            .difference(&emby_keys)
            .map(|(tmdb_id, _)| tmdb_id.clone())
            .collect();
        if !to_retire.is_empty() {
            let retired = self.store.retire_media(&to_retire).await?;
            info!(rows = retired, "items gone from the library marked offline");
        }

        let groups: Vec<&((String, ItemType), Vec<EmbyItem>)> = buckets
            .top_level
            .iter()
            .filter(|((tmdb_id, item_type), _)| {
                force_full_update
                    || !db_keys.contains(&(tmdb_id.clone(), item_type.as_str().to_string()))
            })
            .collect();

        let total = groups.len();
        if total == 0 {
            ctx.progress.update(
                100,
                format!("数据库已是最新，无需同步。标记离线 {} 项。", to_retire.len()),
            );
            return Ok(());
        }
        info!(
            to_process = total,
            to_retire = to_retire.len(),
            "sync plan computed"
        );

        let mut processed = 0usize;
        for chunk in groups.chunks(pools::SYNC_BATCH_SIZE) {
            if ctx.stop.is_set() {
                break;
            }
            #[allow(clippy::cast_possible_truncation)]
            let progress = 10 + ((processed * 90) / total) as i32;
            ctx.progress
                .update(progress, format!("处理中: {processed}/{total}"));

            let details_map = self.fetch_details(chunk).await;
            let mut batch: Vec<MediaUpsert> = Vec::new();

            for ((tmdb_id, item_type), versions) in chunk.iter().map(|g| (&g.0, &g.1)) {
                if ctx.stop.is_set() {
                    break;
                }
                let (tmdb_id, item_type) = (tmdb_id.clone(), *item_type);
                let details = details_map.get(&tmdb_id);
                batch.push(self.compose_top_level(&tmdb_id, item_type, versions, details));

                if item_type == ItemType::Series {
                    if let Some(UpstreamDetails::Tv(tv)) = details {
                        self.compose_series_children(
                            &tmdb_id,
                            versions,
                            tv,
                            &buckets.seasons_by_series,
                            &buckets.episodes_by_series,
                            &mut batch,
                        )
                        .await;
                    }
                }
            }

            let written = self.store.upsert_media_batch(&batch).await?;
            debug!(written, batch = batch.len(), "catalog batch committed");
            processed += chunk.len();
        }

        let message = if ctx.stop.is_set() {
            "任务已中止。".to_string()
        } else {
            format!(
                "同步完成！本次处理 {processed}/{total} 项, 标记离线 {} 项。",
                to_retire.len()
            )
        };
        ctx.progress.update(100, message);
        Ok(())
    }

    async fn fetch_one_detail(
        &self,
        tmdb_id: String,
        item_type: ItemType,
    ) -> Option<(String, UpstreamDetails)> {
        let details = match item_type {
            ItemType::Movie => self
                .tmdb
                .get_movie_details(&tmdb_id)
                .await
                .map(|d| UpstreamDetails::Movie(Box::new(d))),
            _ => self
                .tmdb
                .get_tv_details(&tmdb_id)
                .await
                .map(|d| UpstreamDetails::Tv(Box::new(d))),
        };
        match details {
            Ok(details) => Some((tmdb_id, details)),
            Err(e) => {
                debug!(tmdb_id, "detail fetch failed, using server-side fields: {e}");
                None
            }
        }
    }

    async fn fetch_details(
        &self,
        chunk: &[&((String, ItemType), Vec<EmbyItem>)],
    ) -> HashMap<String, UpstreamDetails> {
        let mut remaining = chunk.iter();
        let mut pending = futures::stream::FuturesUnordered::new();
        let mut fetches = Vec::new();

        for ((tmdb_id, item_type), _) in remaining.by_ref().take(pools::METADATA_FETCH) {
            pending.push(self.fetch_one_detail(tmdb_id.clone(), *item_type));
        }

        while let Some(result) = pending.next().await {
            fetches.push(result);
            if let Some(((tmdb_id, item_type), _)) = remaining.next() {
                pending.push(self.fetch_one_detail(tmdb_id.clone(), *item_type));
            }
        }

        fetches.into_iter().flatten().collect()
    }

    fn compose_top_level(
        &self,
        tmdb_id: &str,
        item_type: ItemType,
        versions: &[EmbyItem],
        details: Option<&UpstreamDetails>,
    ) -> MediaUpsert {
        let representative = &versions[0];
        let emby_item_ids: Vec<String> = versions.iter().map(|v| v.id.clone()).collect();

        let mut record = MediaUpsert {
            tmdb_id: tmdb_id.to_string(),
            item_type,
            title: representative.name.clone(),
            original_title: representative.original_title.clone(),
            release_year: representative.production_year,
            release_date: representative
                .premiere_date
                .as_deref()
                .map(|d| d.split('T').next().unwrap_or(d).to_string()),
            rating: representative.community_rating,
            official_rating: representative.official_rating.clone(),
            unified_rating: representative
                .official_rating
                .as_deref()
                .and_then(unified_rating)
                .map(String::from),
            overview: representative.overview.clone(),
            genres_json: serde_json::to_string(&representative.genres).ok(),
            in_library: Some(true),
            emby_item_ids,
            subscription_status_on_insert: if item_type == ItemType::Movie {
                Some(SubscriptionStatus::None)
            } else {
                None
            },
            ..Default::default()
        };

        if item_type == ItemType::Movie {
            let assets: Vec<_> = versions.iter().map(|v| parse_asset_details(v)).collect();
            record.asset_details_json = serde_json::to_string(&assets).ok();
        }

        match details {
            Some(UpstreamDetails::Movie(movie)) => {
                if movie.overview.as_deref().is_some_and(|o| !o.is_empty()) {
                    record.overview = movie.overview.clone();
                }
                record.poster_path = movie.poster_path.clone();
                record.original_language = movie.original_language.clone();
                record.studios_json = serde_json::to_string(
                    &movie
                        .production_companies
                        .iter()
                        .map(|c| c.name.clone())
                        .collect::<Vec<_>>(),
                )
                .ok();
                let directors: Vec<serde_json::Value> = movie
                    .credits
                    .as_ref()
                    .map(|credits| {
                        credits
                            .crew
                            .iter()
                            .filter(|member| member.job == "Director")
                            .map(|member| {
                                serde_json::json!({ "id": member.id, "name": member.name })
                            })
                            .collect()
                    })
                    .unwrap_or_default();
                record.directors_json = serde_json::to_string(&directors).ok();
                let countries: Vec<&str> = movie
                    .production_countries
                    .iter()
                    .map(|c| translate_country(&c.iso_3166_1))
                    .collect();
                record.countries_json = serde_json::to_string(&countries).ok();
                let keywords: Vec<&str> = movie
                    .keywords
                    .as_ref()
                    .map(|k| k.keywords.iter().map(|k| k.name.as_str()).collect())
                    .unwrap_or_default();
                record.keywords_json = serde_json::to_string(&keywords).ok();
            }
            Some(UpstreamDetails::Tv(tv)) => {
                if tv.overview.as_deref().is_some_and(|o| !o.is_empty()) {
                    record.overview = tv.overview.clone();
                }
                record.poster_path = tv.poster_path.clone();
                record.original_language = tv.languages.first().cloned();
                record.studios_json = serde_json::to_string(
                    &tv.production_companies
                        .iter()
                        .map(|c| c.name.clone())
                        .collect::<Vec<_>>(),
                )
                .ok();
                let directors: Vec<serde_json::Value> = tv
                    .created_by
                    .iter()
                    .map(|creator| serde_json::json!({ "id": creator.id, "name": creator.name }))
                    .collect();
                record.directors_json = serde_json::to_string(&directors).ok();
                let countries: Vec<&str> = tv
                    .origin_country
                    .iter()
                    .map(|code| translate_country(code))
                    .collect();
                record.countries_json = serde_json::to_string(&countries).ok();
                let keywords: Vec<&str> = tv
                    .keywords
                    .as_ref()
                    .map(|k| k.results.iter().map(|k| k.name.as_str()).collect())
                    .unwrap_or_default();
                record.keywords_json = serde_json::to_string(&keywords).ok();
            }
            None => {
                // Stable defaults when upstream is unavailable.
                record.studios_json = serde_json::to_string(
                    &representative
                        .studios
                        .iter()
                        .map(|s| s.name.clone())
                        .collect::<Vec<_>>(),
                )
                .ok();
                record.directors_json = Some("[]".to_string());
                record.countries_json = Some("[]".to_string());
                record.keywords_json = Some("[]".to_string());
            }
        }

        record
    }

    /// Season and episode rows for one series, aggregated across all series
    /// versions. Episode identity is `(series, season, episode)`; every
    /// version of the same episode lands on the same row.
    async fn compose_series_children(
        &self,
        series_tmdb_id: &str,
        series_versions: &[EmbyItem],
        tv: &TvDetails,
        seasons_by_series: &HashMap<String, Vec<EmbyItem>>,
        episodes_by_series: &HashMap<String, Vec<EmbyItem>>,
        batch: &mut Vec<MediaUpsert>,
    ) {
        let series_emby_ids: Vec<&str> =
            series_versions.iter().map(|v| v.id.as_str()).collect();

        let mut season_items: Vec<&EmbyItem> = Vec::new();
        let mut episode_items: Vec<&EmbyItem> = Vec::new();
        for series_emby_id in &series_emby_ids {
            if let Some(seasons) = seasons_by_series.get(*series_emby_id) {
                season_items.extend(seasons.iter());
            }
            if let Some(episodes) = episodes_by_series.get(*series_emby_id) {
                episode_items.extend(episodes.iter());
            }
        }

        let mut seasons_by_number: HashMap<i32, Vec<&EmbyItem>> = HashMap::new();
        for season in &season_items {
            if let Some(number) = season.index_number {
                seasons_by_number.entry(number).or_default().push(*season);
            }
        }

        // Upstream episode lookup filled while walking the seasons.
        let mut upstream_episodes: HashMap<(i32, i32), crate::models::watchlist::EpisodeSummary> =
            HashMap::new();

        for season_summary in &tv.seasons {
            let season_number = season_summary.season_number;
            if season_number == 0 {
                continue;
            }
            let Some(season_tmdb_id) = season_summary.id else {
                continue;
            };

            let season_emby_ids: Vec<String> = seasons_by_number
                .get(&season_number)
                .map(|seasons| seasons.iter().map(|s| s.id.clone()).collect())
                .unwrap_or_default();

            batch.push(MediaUpsert {
                tmdb_id: season_tmdb_id.to_string(),
                item_type: ItemType::Season,
                parent_series_tmdb_id: Some(series_tmdb_id.to_string()),
                season_number: Some(season_number),
                title: season_summary.name.clone(),
                overview: season_summary.overview.clone(),
                release_date: season_summary
                    .air_date
                    .map(|d| d.format("%Y-%m-%d").to_string()),
                poster_path: season_summary.poster_path.clone(),
                in_library: Some(!season_emby_ids.is_empty()),
                emby_item_ids: season_emby_ids,
                ..Default::default()
            });

            match self
                .tmdb
                .get_tv_season_details(series_tmdb_id, season_number)
                .await
            {
                Ok(season_details) => {
                    for episode in season_details.episodes {
                        upstream_episodes
                            .insert((episode.season_number, episode.episode_number), episode);
                    }
                }
                Err(e) => {
                    debug!(
                        series = series_tmdb_id,
                        season = season_number,
                        "season detail fetch failed: {e}"
                    );
                }
            }
        }

        let mut episodes_by_number: HashMap<(i32, i32), Vec<&EmbyItem>> = HashMap::new();
        for episode in &episode_items {
            if let (Some(season), Some(number)) =
                (episode.parent_index_number, episode.index_number)
            {
                episodes_by_number
                    .entry((season, number))
                    .or_default()
                    .push(*episode);
            }
        }

        let mut keys: Vec<(i32, i32)> = episodes_by_number.keys().copied().collect();
        keys.sort_unstable();
        for key in keys {
            let versions = &episodes_by_number[&key];
            let (season_number, episode_number) = key;
            let representative = versions[0];
            let emby_item_ids: Vec<String> = versions.iter().map(|v| v.id.clone()).collect();
            let assets: Vec<_> = versions.iter().map(|v| parse_asset_details(v)).collect();

            let mut record = MediaUpsert {
                item_type: ItemType::Episode,
                parent_series_tmdb_id: Some(series_tmdb_id.to_string()),
                season_number: Some(season_number),
                episode_number: Some(episode_number),
                in_library: Some(true),
                emby_item_ids,
                asset_details_json: serde_json::to_string(&assets).ok(),
                ..Default::default()
            };

            if let Some(upstream) = upstream_episodes.get(&key) {
                record.tmdb_id = upstream
                    .id
                    .map_or_else(
                        || format!("{series_tmdb_id}-S{season_number}E{episode_number}"),
                        |id| id.to_string(),
                    );
                record.title = upstream.name.clone().or_else(|| representative.name.clone());
                record.overview = upstream
                    .overview
                    .clone()
                    .or_else(|| representative.overview.clone());
                record.release_date = upstream.air_date.map(|d| d.format("%Y-%m-%d").to_string());
            } else {
                record.tmdb_id = format!("{series_tmdb_id}-S{season_number}E{episode_number}");
                record.title = representative.name.clone();
                record.overview = representative.overview.clone();
            }

            batch.push(record);
        }
    }

    /// Webhook top-up: sync just the reported new episodes of one series,
    /// refresh the series row's timestamp, and notify.
    pub async fn episode_top_up(
        &self,
        ctx: &TaskContext,
        series_id: &str,
        episode_ids: &[String],
    ) -> Result<()> {
        if episode_ids.is_empty() {
            ctx.progress.update(100, "没有需要追加的分集。");
            return Ok(());
        }

        ctx.progress.update(10, "正在获取新增分集详情...");
        let series = self
            .emby
            .get_item(series_id, "Name,ProviderIds")
            .await?
            .ok_or_else(|| anyhow::anyhow!("series {series_id} not found on the media server"))?;
        let series_tmdb_id = series
            .tmdb_id()
            .ok_or_else(|| anyhow::anyhow!("series {series_id} has no tmdb id"))?
            .to_string();
        let series_name = series.name.clone().unwrap_or_else(|| series_id.to_string());

        let episodes = self.emby.get_items_by_ids(episode_ids, SWEEP_FIELDS).await?;

        let mut grouped: HashMap<(i32, i32), Vec<&EmbyItem>> = HashMap::new();
        for episode in &episodes {
            if let (Some(season), Some(number)) =
                (episode.parent_index_number, episode.index_number)
            {
                grouped.entry((season, number)).or_default().push(episode);
            }
        }

        ctx.progress.update(50, format!("正在写入 {} 个分集...", grouped.len()));
        let mut batch = Vec::new();
        for ((season_number, episode_number), versions) in &grouped {
            let representative = versions[0];
            let assets: Vec<_> = versions.iter().map(|v| parse_asset_details(v)).collect();
            batch.push(MediaUpsert {
                tmdb_id: format!("{series_tmdb_id}-S{season_number}E{episode_number}"),
                item_type: ItemType::Episode,
                parent_series_tmdb_id: Some(series_tmdb_id.clone()),
                season_number: Some(*season_number),
                episode_number: Some(*episode_number),
                title: representative.name.clone(),
                overview: representative.overview.clone(),
                in_library: Some(true),
                emby_item_ids: versions.iter().map(|v| v.id.clone()).collect(),
                asset_details_json: serde_json::to_string(&assets).ok(),
                ..Default::default()
            });
        }
        self.store.upsert_media_batch(&batch).await?;
        self.store.touch_series(&series_tmdb_id).await?;

        if let Err(e) = self.emby.refresh_item_metadata(series_id, true).await {
            warn!(series = %series_name, "post top-up metadata refresh failed: {e}");
        }

        if let Some(telegram) = &self.telegram {
            if let Some(chat_id) = telegram.default_chat_id() {
                let text = format!(
                    "📺 剧集更新\n\n《{series_name}》新增 {} 个分集。",
                    episode_ids.len()
                );
                if let Err(e) = telegram.send_message(chat_id, &text).await {
                    warn!("episode top-up notification failed: {e}");
                }
            }
        }

        ctx.progress.update(
            100,
            format!("《{series_name}》追更完成，新增 {} 个分集。", episode_ids.len()),
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn emby_item(id: &str, item_type: &str, tmdb: Option<&str>, series_id: Option<&str>) -> EmbyItem {
        EmbyItem {
            id: id.to_string(),
            item_type: item_type.to_string(),
            provider_ids: tmdb.map(|t| crate::clients::emby::ProviderIds {
                tmdb: Some(t.to_string()),
                imdb: None,
                tvdb: None,
            }),
            series_id: series_id.map(String::from),
            ..EmbyItem::default()
        }
    }

    #[test]
    fn bucketing_groups_versions_under_one_composite_key() {
        let sweep = vec![
            emby_item("m1", "Movie", Some("603"), None),
            emby_item("m2", "Movie", Some("603"), None),
            emby_item("s1", "Series", Some("1399"), None),
            emby_item("se1", "Season", None, Some("s1")),
            emby_item("e1", "Episode", None, Some("s1")),
            emby_item("x1", "Movie", None, None),
        ];
        let buckets = bucket_sweep(sweep);

        assert_eq!(buckets.top_level.len(), 2);
        let movie_group = buckets
            .top_level
            .iter()
            .find(|((tmdb_id, _), _)| tmdb_id == "603")
            .unwrap();
        assert_eq!(movie_group.1.len(), 2);
        assert_eq!(buckets.seasons_by_series["s1"].len(), 1);
        assert_eq!(buckets.episodes_by_series["s1"].len(), 1);
    }

    #[test]
    fn unified_rating_covers_both_vocabularies() {
        assert_eq!(unified_rating("PG-13"), Some("PG-13"));
        assert_eq!(unified_rating("TV-14"), Some("PG-13"));
        assert_eq!(unified_rating("tv-ma"), Some("R"));
        assert_eq!(unified_rating("Unrated"), None);
    }
}
