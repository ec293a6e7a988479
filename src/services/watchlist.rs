//! Per-series watchlist engine: the Watching / Paused / Completed state
//! machine, missing-info computation, revival detection, and the metadata
//! push-back to the Media Server.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{Days, NaiveDate, Utc};
use futures::StreamExt;
use tracing::{debug, info, warn};

use crate::clients::emby::{EmbyClient, EmbyItem, ItemUpdate};
use crate::constants::{pools, windows, ACTIVE_TMDB_STATUSES, ENDED_TMDB_STATUSES};
use crate::db::{Store, WatchlistRefresh};
use crate::entities::watchlist;
use crate::models::media::ChildDetail;
use crate::models::watchlist::{EpisodeSummary, MissingInfo, SeasonSummary, WatchStatus};
use crate::tasks::TaskContext;

const CHILD_FIELDS: &str = "Id,Name,ParentIndexNumber,IndexNumber,Type,Overview";

/// Episode numbers present locally, keyed by season.
pub type LocalInventory = HashMap<i32, BTreeSet<i32>>;

/// Everything the deterministic state transition looks at.
#[derive(Debug, Clone, Copy)]
pub struct StateInputs {
    pub has_missing_media: bool,
    pub metadata_complete: bool,
    pub tmdb_status_ended: bool,
    pub is_season_finale: bool,
    pub next_air_date: Option<NaiveDate>,
    pub force_ended: bool,
    pub today: NaiveDate,
}

/// The state machine itself. Completion requires both complete local media
/// and complete upstream metadata; a known next air date more than three
/// days out pauses until the day before; no airing information at all is a
/// seven-day hiatus pause. `force_ended` pins Completed over everything.
#[must_use]
pub fn decide_state(inputs: &StateInputs) -> (WatchStatus, Option<NaiveDate>) {
    let can_be_completed = !inputs.has_missing_media && inputs.metadata_complete;

    let (status, paused_until) = if can_be_completed
        && (inputs.tmdb_status_ended || inputs.is_season_finale)
    {
        (WatchStatus::Completed, None)
    } else if let Some(air_date) = inputs.next_air_date {
        let days_until = (air_date - inputs.today).num_days();
        if days_until > 3 {
            (
                WatchStatus::Paused,
                air_date.checked_sub_days(Days::new(1)),
            )
        } else {
            (WatchStatus::Watching, None)
        }
    } else {
        (
            WatchStatus::Paused,
            inputs.today.checked_add_days(Days::new(7)),
        )
    };

    if inputs.force_ended && status != WatchStatus::Completed {
        return (WatchStatus::Completed, None);
    }
    (status, paused_until)
}

/// Build the season → episode-number inventory from a flat children list.
#[must_use]
pub fn local_inventory(children: &[EmbyItem]) -> LocalInventory {
    let mut inventory: LocalInventory = HashMap::new();
    for child in children.iter().filter(|c| c.item_type == "Episode") {
        if let (Some(season), Some(episode)) = (child.parent_index_number, child.index_number) {
            inventory.entry(season).or_default().insert(episode);
        }
    }
    inventory
}

/// The first upstream `(season, episode)` not present locally, in strict
/// `(s, e)` order and ignoring season 0. Air dates play no part here.
#[must_use]
pub fn real_next_episode<'a>(
    all_episodes: &'a [EpisodeSummary],
    local: &LocalInventory,
) -> Option<&'a EpisodeSummary> {
    let mut sorted: Vec<&EpisodeSummary> = all_episodes
        .iter()
        .filter(|ep| ep.season_number != 0)
        .collect();
    sorted.sort_by_key(|ep| (ep.season_number, ep.episode_number));

    sorted.into_iter().find(|ep| {
        local
            .get(&ep.season_number)
            .is_none_or(|episodes| !episodes.contains(&ep.episode_number))
    })
}

/// Whole seasons absent locally, plus individual episodes absent from
/// seasons that are present.
#[must_use]
pub fn compute_missing_info(
    seasons: &[SeasonSummary],
    all_episodes: &[EpisodeSummary],
    local: &LocalInventory,
) -> MissingInfo {
    let mut missing = MissingInfo::default();

    for season in seasons.iter().filter(|s| s.season_number != 0) {
        if local.contains_key(&season.season_number) {
            for episode in all_episodes
                .iter()
                .filter(|ep| ep.season_number == season.season_number)
            {
                let present = local
                    .get(&episode.season_number)
                    .is_some_and(|eps| eps.contains(&episode.episode_number));
                if !present {
                    missing.missing_episodes.push(episode.clone());
                }
            }
        } else {
            missing.missing_seasons.push(season.clone());
        }
    }
    missing
}

/// True iff every non-special upstream episode carries an overview.
#[must_use]
pub fn metadata_complete(all_episodes: &[EpisodeSummary]) -> bool {
    all_episodes
        .iter()
        .filter(|ep| ep.season_number != 0)
        .all(|ep| ep.overview.as_deref().is_some_and(|o| !o.trim().is_empty()))
}

/// A completed series counts as revived only when its upstream status left
/// Ended/Canceled *and* a season beyond the last recorded one exists. A
/// status change alone is a blip and is ignored.
#[must_use]
pub fn revival_confirmed(
    tmdb_status: &str,
    number_of_seasons: i32,
    last_recorded_season: i32,
) -> bool {
    !ENDED_TMDB_STATUSES.contains(&tmdb_status) && number_of_seasons > last_recorded_season
}

/// "Season finale" means the last episode has aired and upstream names no
/// next episode.
#[must_use]
pub fn is_season_finale(
    last_episode: Option<&EpisodeSummary>,
    next_episode: Option<&EpisodeSummary>,
    today: NaiveDate,
) -> bool {
    next_episode.is_none()
        && last_episode
            .and_then(|ep| ep.air_date)
            .is_some_and(|aired| aired <= today)
}

pub struct WatchlistService {
    store: Store,
    emby: EmbyClient,
    tmdb: crate::clients::tmdb::TmdbClient,
}

impl WatchlistService {
    #[must_use]
    pub const fn new(store: Store, emby: EmbyClient, tmdb: crate::clients::tmdb::TmdbClient) -> Self {
        Self { store, emby, tmdb }
    }

    /// Phase one of the watchlist task: refresh the selected series with a
    /// bounded worker pool. Quick mode takes only active entries; deep mode
    /// takes everything not pinned by the user; a single id overrides both.
    pub async fn refresh(
        &self,
        ctx: &TaskContext,
        item_id: Option<&str>,
        deep: bool,
    ) -> Result<()> {
        ctx.progress.update(0, "准备检查待更新剧集...");
        let today = Utc::now().date_naive();

        let rows = if let Some(id) = item_id {
            self.store.watchlist_get(id).await?.into_iter().collect()
        } else if deep {
            self.store.watchlist_all_unpinned().await?
        } else {
            self.store.watchlist_due_for_refresh(today).await?
        };

        if rows.is_empty() {
            ctx.progress.update(100, "没有需要立即处理的活跃剧集。");
            return Ok(());
        }

        let total = rows.len();
        ctx.progress
            .update(5, format!("开始并发处理 {total} 部活跃剧集..."));
        let done = AtomicUsize::new(0);

        futures::stream::iter(rows)
            .map(|row| {
                let done = &done;
                async move {
                    if ctx.stop.is_set() {
                        return;
                    }
                    let name = row.item_name.clone();
                    if let Err(e) = self.process_one_series(&row).await {
                        warn!(series = %name, "watchlist refresh failed for series: {e:#}");
                    }
                    let finished = done.fetch_add(1, Ordering::SeqCst) + 1;
                    #[allow(clippy::cast_possible_truncation)]
                    let progress = 5 + ((finished * 95) / total) as i32;
                    ctx.progress
                        .update(progress, format!("活跃剧集: {finished}/{total} - {name}"));
                }
            })
            .buffer_unordered(pools::WATCHLIST_REFRESH)
            .collect::<Vec<_>>()
            .await;

        if ctx.stop.is_set() {
            ctx.progress.update(100, "任务已停止。");
        } else {
            ctx.progress.update(100, "追剧刷新完成。");
        }
        Ok(())
    }

    async fn process_one_series(&self, row: &watchlist::Model) -> Result<()> {
        let item_id = row.item_id.trim();
        info!(series = %row.item_name, tmdb_id = %row.tmdb_id, "refreshing watchlist entry");

        // Gone from the Media Server → the entry goes too.
        if self.emby.get_item(item_id, "Id,Name").await?.is_none() {
            warn!(series = %row.item_name, "series no longer on the media server, removing entry");
            self.store.watchlist_remove(item_id).await?;
            return Ok(());
        }

        let details = self
            .tmdb
            .get_tv_details(&row.tmdb_id)
            .await
            .with_context(|| format!("fetching series details for {}", row.item_name))?;

        let mut all_episodes = Vec::new();
        for season in &details.seasons {
            if season.season_number == 0 {
                continue;
            }
            match self
                .tmdb
                .get_tv_season_details(&row.tmdb_id, season.season_number)
                .await
            {
                Ok(season_details) => all_episodes.extend(season_details.episodes),
                Err(e) => {
                    debug!(
                        series = %row.item_name,
                        season = season.season_number,
                        "season fetch failed: {e}"
                    );
                }
            }
            tokio::time::sleep(windows::SEASON_FETCH_SPACING).await;
        }

        let mut children = self
            .emby
            .get_series_children(item_id, CHILD_FIELDS)
            .await?;
        let local = local_inventory(&children);

        let today = Utc::now().date_naive();
        let tmdb_status = details.status.clone().unwrap_or_default();
        let next_episode = real_next_episode(&all_episodes, &local).cloned();
        let missing = compute_missing_info(&details.seasons, &all_episodes, &local);
        let has_missing = !missing.is_empty();
        let is_airing = next_episode.is_some() || has_missing;

        let inputs = StateInputs {
            has_missing_media: has_missing,
            metadata_complete: metadata_complete(&all_episodes),
            tmdb_status_ended: ENDED_TMDB_STATUSES.contains(&tmdb_status.as_str()),
            is_season_finale: is_season_finale(
                details.last_episode_to_air.as_ref(),
                details.next_episode_to_air.as_ref(),
                today,
            ),
            next_air_date: next_episode.as_ref().and_then(|ep| ep.air_date),
            force_ended: row.force_ended,
            today,
        };
        let (status, paused_until) = decide_state(&inputs);
        info!(
            series = %row.item_name,
            status = status.as_str(),
            tmdb_status = crate::constants::translate_tmdb_status(&tmdb_status),
            is_airing,
            "state decided"
        );

        self.store
            .watchlist_apply_refresh(
                item_id,
                &WatchlistRefresh {
                    status,
                    paused_until,
                    tmdb_status: details.status.clone(),
                    next_episode_to_air_json: next_episode
                        .as_ref()
                        .map(serde_json::to_string)
                        .transpose()?,
                    last_episode_to_air_json: details
                        .last_episode_to_air
                        .as_ref()
                        .map(serde_json::to_string)
                        .transpose()?,
                    missing_info_json: Some(serde_json::to_string(&missing)?),
                    is_airing,
                },
            )
            .await?;

        self.push_back_overviews(&mut children, &all_episodes).await;
        self.cache_children_details(&row.tmdb_id, &children).await?;
        Ok(())
    }

    /// Fill blank local episode overviews from upstream, keeping the
    /// in-memory children list in sync so the cached details below see the
    /// update.
    async fn push_back_overviews(
        &self,
        children: &mut [EmbyItem],
        all_episodes: &[EpisodeSummary],
    ) {
        let upstream: HashMap<(i32, i32), &EpisodeSummary> = all_episodes
            .iter()
            .map(|ep| ((ep.season_number, ep.episode_number), ep))
            .collect();

        for child in children
            .iter_mut()
            .filter(|c| c.item_type == "Episode")
            .filter(|c| c.overview.as_deref().unwrap_or("").trim().is_empty())
        {
            let (Some(season), Some(episode)) = (child.parent_index_number, child.index_number)
            else {
                continue;
            };
            let Some(upstream_episode) = upstream.get(&(season, episode)) else {
                continue;
            };
            let Some(overview) = upstream_episode
                .overview
                .as_deref()
                .filter(|o| !o.trim().is_empty())
            else {
                continue;
            };

            let update = ItemUpdate {
                name: upstream_episode.name.clone(),
                overview: Some(overview.to_string()),
            };
            match self.emby.update_item_details(&child.id, &update).await {
                Ok(()) => {
                    debug!(episode = %child.id, season, episode_number = episode, "overview injected");
                    child.overview = Some(overview.to_string());
                    if update.name.is_some() {
                        child.name = update.name;
                    }
                }
                Err(e) => warn!(episode = %child.id, "overview push-back failed: {e}"),
            }
        }
    }

    async fn cache_children_details(
        &self,
        series_tmdb_id: &str,
        children: &[EmbyItem],
    ) -> Result<()> {
        let details: Vec<ChildDetail> = children
            .iter()
            .map(|child| {
                let is_episode = child.item_type == "Episode";
                ChildDetail {
                    id: child.id.clone(),
                    child_type: child.item_type.clone(),
                    name: child.name.clone(),
                    season_number: if is_episode {
                        child.parent_index_number
                    } else {
                        child.index_number
                    },
                    episode_number: if is_episode { child.index_number } else { None },
                    overview: if is_episode { child.overview.clone() } else { None },
                }
            })
            .collect();

        let updated = self
            .store
            .update_children_details(series_tmdb_id, &serde_json::to_string(&details)?)
            .await?;
        if !updated {
            debug!(series_tmdb_id, "series not in catalog yet, children cache skipped");
        }
        Ok(())
    }

    /// Low-frequency pass over Completed entries looking for revivals: the
    /// upstream status left Ended/Canceled *and* a season beyond the last
    /// recorded one exists. Status blips without a new season are ignored.
    pub async fn revival_check(&self, ctx: &TaskContext) -> Result<()> {
        ctx.progress.update(0, "准备开始复活检查...");
        let completed = self.store.watchlist_by_status(WatchStatus::Completed).await?;
        if completed.is_empty() {
            ctx.progress.update(100, "没有已完结的剧集需要检查。");
            return Ok(());
        }

        let total = completed.len();
        let mut revived = 0usize;
        for (index, row) in completed.iter().enumerate() {
            if ctx.stop.is_set() {
                break;
            }
            #[allow(clippy::cast_possible_truncation)]
            let progress = 10 + (((index + 1) * 90) / total) as i32;
            ctx.progress.update(
                progress,
                format!("检查中: {} ({}/{total})", row.item_name, index + 1),
            );

            let Ok(details) = self.tmdb.get_tv_details(&row.tmdb_id).await else {
                continue;
            };
            let new_status = details.status.clone().unwrap_or_default();
            let last_recorded_season = row
                .last_episode_to_air_json
                .as_deref()
                .and_then(|raw| serde_json::from_str::<EpisodeSummary>(raw).ok())
                .map_or(0, |ep| ep.season_number);

            if revival_confirmed(&new_status, details.number_of_seasons, last_recorded_season) {
                warn!(
                    series = %row.item_name,
                    new_status,
                    seasons = details.number_of_seasons,
                    last_recorded_season,
                    "completed series revived"
                );
                revived += 1;
                self.store
                    .watchlist_set_status(
                        &row.item_id,
                        WatchStatus::Watching,
                        None,
                        Some(&new_status),
                        true,
                    )
                    .await?;
            } else {
                debug!(series = %row.item_name, "no revival conditions met");
            }

            tokio::time::sleep(Duration::from_secs(2)).await;
        }

        ctx.progress
            .update(100, format!("复活检查完成。共发现 {revived} 部剧集回归。"));
        Ok(())
    }

    /// Webhook entry: a new series appeared in the library. Still-airing
    /// upstream statuses start as Watching; everything else is imported as
    /// already Completed.
    pub async fn auto_add_series(
        &self,
        item_id: &str,
        item_name: &str,
        tmdb_id: &str,
    ) -> Result<()> {
        let details = self.tmdb.get_tv_details(tmdb_id).await?;
        let Some(tmdb_status) = details.status.as_deref().filter(|s| !s.is_empty()) else {
            warn!(series = item_name, "no upstream status, skipping auto-add");
            return Ok(());
        };

        let status = if ACTIVE_TMDB_STATUSES.contains(&tmdb_status) {
            WatchStatus::Watching
        } else {
            WatchStatus::Completed
        };
        self.store
            .watchlist_add_if_absent(item_id, tmdb_id, item_name, status, Some(tmdb_status))
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn episode(season: i32, number: i32, air: Option<&str>, overview: &str) -> EpisodeSummary {
        EpisodeSummary {
            id: None,
            season_number: season,
            episode_number: number,
            name: None,
            overview: if overview.is_empty() {
                None
            } else {
                Some(overview.to_string())
            },
            air_date: air.and_then(|a| NaiveDate::parse_from_str(a, "%Y-%m-%d").ok()),
        }
    }

    fn season(number: i32) -> SeasonSummary {
        SeasonSummary {
            id: None,
            season_number: number,
            name: None,
            overview: None,
            air_date: None,
            episode_count: None,
            poster_path: None,
        }
    }

    fn day(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn base_inputs(today: &str) -> StateInputs {
        StateInputs {
            has_missing_media: false,
            metadata_complete: true,
            tmdb_status_ended: false,
            is_season_finale: false,
            next_air_date: None,
            force_ended: false,
            today: day(today),
        }
    }

    #[test]
    fn complete_and_ended_means_completed() {
        let mut inputs = base_inputs("2024-06-01");
        inputs.tmdb_status_ended = true;
        assert_eq!(decide_state(&inputs), (WatchStatus::Completed, None));
    }

    #[test]
    fn season_finale_completes_even_without_ended_status() {
        let mut inputs = base_inputs("2024-06-01");
        inputs.is_season_finale = true;
        assert_eq!(decide_state(&inputs), (WatchStatus::Completed, None));
    }

    #[test]
    fn missing_media_blocks_completion() {
        let mut inputs = base_inputs("2024-06-01");
        inputs.tmdb_status_ended = true;
        inputs.has_missing_media = true;
        // No airing info either → season hiatus pause.
        assert_eq!(
            decide_state(&inputs),
            (WatchStatus::Paused, Some(day("2024-06-08")))
        );
    }

    #[test]
    fn incomplete_metadata_blocks_completion() {
        let mut inputs = base_inputs("2024-06-01");
        inputs.tmdb_status_ended = true;
        inputs.metadata_complete = false;
        assert_eq!(
            decide_state(&inputs),
            (WatchStatus::Paused, Some(day("2024-06-08")))
        );
    }

    #[test]
    fn far_future_episode_pauses_until_the_day_before() {
        let mut inputs = base_inputs("2024-06-01");
        inputs.next_air_date = Some(day("2024-06-10"));
        assert_eq!(
            decide_state(&inputs),
            (WatchStatus::Paused, Some(day("2024-06-09")))
        );
    }

    #[test]
    fn imminent_episode_keeps_watching() {
        let mut inputs = base_inputs("2024-06-01");
        inputs.next_air_date = Some(day("2024-06-03"));
        assert_eq!(decide_state(&inputs), (WatchStatus::Watching, None));
    }

    #[test]
    fn returning_series_with_no_next_episode_pauses_for_seven_days() {
        // B1: upstream says Returning Series, local inventory complete,
        // next_episode_to_air stays null → seven-day pause.
        let inputs = base_inputs("2024-06-01");
        assert_eq!(
            decide_state(&inputs),
            (WatchStatus::Paused, Some(day("2024-06-08")))
        );
    }

    #[test]
    fn force_ended_overrides_everything() {
        let mut inputs = base_inputs("2024-06-01");
        inputs.has_missing_media = true;
        inputs.next_air_date = Some(day("2024-06-02"));
        inputs.force_ended = true;
        assert_eq!(decide_state(&inputs), (WatchStatus::Completed, None));
    }

    #[test]
    fn real_next_episode_ignores_air_dates_and_specials() {
        let episodes = vec![
            episode(0, 1, Some("2020-01-01"), "special"),
            episode(1, 1, Some("2024-01-01"), "a"),
            episode(1, 2, None, "b"),
            episode(2, 1, Some("2030-01-01"), "c"),
        ];
        let mut local: LocalInventory = HashMap::new();
        local.insert(1, BTreeSet::from([1]));

        let next = real_next_episode(&episodes, &local).unwrap();
        assert_eq!((next.season_number, next.episode_number), (1, 2));

        local.get_mut(&1).unwrap().insert(2);
        let next = real_next_episode(&episodes, &local).unwrap();
        assert_eq!((next.season_number, next.episode_number), (2, 1));

        local.insert(2, BTreeSet::from([1]));
        assert!(real_next_episode(&episodes, &local).is_none());
    }

    #[test]
    fn missing_info_splits_whole_seasons_from_episode_gaps() {
        let seasons = vec![season(1), season(2)];
        let episodes = vec![
            episode(1, 1, None, "a"),
            episode(1, 2, None, "b"),
            episode(2, 1, None, "c"),
        ];
        let mut local: LocalInventory = HashMap::new();
        local.insert(1, BTreeSet::from([1]));

        let missing = compute_missing_info(&seasons, &episodes, &local);
        assert_eq!(missing.missing_seasons.len(), 1);
        assert_eq!(missing.missing_seasons[0].season_number, 2);
        assert_eq!(missing.missing_episodes.len(), 1);
        assert_eq!(missing.missing_episodes[0].episode_number, 2);
    }

    #[test]
    fn metadata_completeness_ignores_specials() {
        let episodes = vec![episode(0, 1, None, ""), episode(1, 1, None, "fine")];
        assert!(metadata_complete(&episodes));
        let episodes = vec![episode(1, 1, None, ""), episode(1, 2, None, "fine")];
        assert!(!metadata_complete(&episodes));
    }

    #[test]
    fn revival_needs_both_a_live_status_and_a_new_season() {
        assert!(revival_confirmed("Returning Series", 6, 5));
        // Same season count is a mere status blip.
        assert!(!revival_confirmed("Returning Series", 5, 5));
        assert!(!revival_confirmed("Ended", 6, 5));
        assert!(!revival_confirmed("Canceled", 6, 5));
    }

    #[test]
    fn finale_requires_aired_last_and_no_next() {
        let today = day("2024-06-01");
        let last = episode(1, 10, Some("2024-05-30"), "x");
        assert!(is_season_finale(Some(&last), None, today));

        let next = episode(2, 1, Some("2024-09-01"), "y");
        assert!(!is_season_finale(Some(&last), Some(&next), today));

        let unaired = episode(1, 10, Some("2024-06-05"), "x");
        assert!(!is_season_finale(Some(&unaired), None, today));
        assert!(!is_season_finale(None, None, today));
    }
}
