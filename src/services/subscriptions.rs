//! Subscription controller: human request flow, the quota-gated automatic
//! dispatch of wanted items, and the best-version resubscribe pass for true
//! interior gaps.

use std::collections::BTreeSet;
use std::sync::Arc;

use anyhow::{bail, Result};
use chrono::{DateTime, Duration as ChronoDuration, NaiveDate, Utc};
use tracing::{debug, info, warn};

use crate::clients::emby::EmbyClient;
use crate::clients::moviepilot::{MoviePilotClient, SubscribePayload};
use crate::clients::telegram::TelegramClient;
use crate::clients::tmdb::TmdbClient;
use crate::constants::windows;
use crate::db::{NewRequest, Store};
use crate::entities::watchlist;
use crate::models::media::{ItemType, SubscriptionStatus};
use crate::models::watchlist::{EpisodeSummary, MissingInfo, WatchStatus};
use crate::parser::title::parse_series_title;
use crate::services::limits::{QuotaService, RateLimiter};
use crate::services::watchlist::{local_inventory, LocalInventory};
use crate::tasks::TaskContext;

/// Outcome of one request, reported back to the caller verbatim when the
/// same id is submitted again.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestOutcome {
    Pending,
    Approved { seasons: usize },
    AlreadyExists { status: String },
    QuotaExhausted,
}

/// Seasons containing at least one *interior* gap: a missing episode with a
/// local episode of the same season carrying a higher number. Seasons with
/// no local episodes at all are full-season-missing and are plain
/// subscription's job, not resubscribe's.
#[must_use]
pub fn find_interior_gap_seasons(
    missing_episodes: &[EpisodeSummary],
    local: &LocalInventory,
) -> BTreeSet<i32> {
    let mut gap_seasons = BTreeSet::new();
    for episode in missing_episodes {
        if gap_seasons.contains(&episode.season_number) {
            continue;
        }
        let Some(local_episodes) = local.get(&episode.season_number) else {
            continue;
        };
        if local_episodes.is_empty() {
            continue;
        }
        if local_episodes
            .iter()
            .any(|&number| number > episode.episode_number)
        {
            gap_seasons.insert(episode.season_number);
        }
    }
    gap_seasons
}

/// Cooldown gate: true when the season's last attempt is younger than the
/// window. Unparseable stamps count as "no cooldown".
#[must_use]
pub fn in_cooldown(ledger_json: Option<&str>, season_number: i32, now: DateTime<Utc>) -> bool {
    let Some(raw) = ledger_json else {
        return false;
    };
    let ledger: std::collections::HashMap<String, String> =
        serde_json::from_str(raw).unwrap_or_default();
    let Some(stamp) = ledger.get(&season_number.to_string()) else {
        return false;
    };
    DateTime::parse_from_rfc3339(stamp)
        .map(|at| now < at.with_timezone(&Utc) + ChronoDuration::hours(windows::RESUBSCRIBE_COOLDOWN_HOURS))
        .unwrap_or(false)
}

pub struct SubscriptionService {
    store: Store,
    emby: EmbyClient,
    tmdb: TmdbClient,
    downloader: Option<MoviePilotClient>,
    telegram: Option<TelegramClient>,
    quota: Arc<QuotaService>,
    rate_limiter: Arc<RateLimiter>,
    resubscribe_enabled: bool,
}

impl SubscriptionService {
    #[allow(clippy::too_many_arguments)]
    #[must_use]
    pub fn new(
        store: Store,
        emby: EmbyClient,
        tmdb: TmdbClient,
        downloader: Option<MoviePilotClient>,
        telegram: Option<TelegramClient>,
        quota: Arc<QuotaService>,
        rate_limiter: Arc<RateLimiter>,
        resubscribe_enabled: bool,
    ) -> Self {
        Self {
            store,
            emby,
            tmdb,
            downloader,
            telegram,
            quota,
            rate_limiter,
            resubscribe_enabled,
        }
    }

    fn downloader(&self) -> Result<&MoviePilotClient> {
        self.downloader
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("downloader is not configured"))
    }

    /// All downloader traffic funnels through the rate limiter.
    async fn submit(&self, payload: &SubscribePayload) -> Result<()> {
        self.rate_limiter.acquire("moviepilot").await?;
        self.downloader()?.subscribe(payload).await
    }

    // ========================================================================
    // Human request flow
    // ========================================================================

    /// Handle one "I want this" request. Duplicate ids return the existing
    /// status and never create a second row. Non-VIP users queue for
    /// review; VIP requests dispatch immediately, movie whole and series
    /// smart-parsed per season, each season costing one quota point.
    pub async fn request_subscription(
        &self,
        emby_user_id: &str,
        tmdb_id: &str,
        item_type: ItemType,
        item_name: &str,
    ) -> Result<RequestOutcome> {
        if let Some(existing) = self.store.request_global_status(tmdb_id).await? {
            debug!(tmdb_id, existing, "duplicate subscription request");
            return Ok(RequestOutcome::AlreadyExists { status: existing });
        }

        let is_vip = self.store.user_is_vip(emby_user_id).await?;
        let outcome = if is_vip {
            self.auto_subscribe_request(emby_user_id, tmdb_id, item_type, item_name)
                .await?
        } else {
            self.store
                .request_create(&NewRequest {
                    emby_user_id: emby_user_id.to_string(),
                    tmdb_id: tmdb_id.to_string(),
                    item_type: item_type.as_str().to_string(),
                    item_name: item_name.to_string(),
                    status: "pending".to_string(),
                    processed_by: None,
                    parent_tmdb_id: None,
                    parsed_series_name: None,
                    parsed_season_number: None,
                })
                .await?;
            RequestOutcome::Pending
        };

        self.notify_requester(emby_user_id, item_name, &outcome).await;
        Ok(outcome)
    }

    async fn auto_subscribe_request(
        &self,
        emby_user_id: &str,
        tmdb_id: &str,
        item_type: ItemType,
        item_name: &str,
    ) -> Result<RequestOutcome> {
        if self.quota.get_quota().await? <= 0 {
            warn!(user = emby_user_id, "VIP auto-subscribe blocked: quota exhausted");
            return Ok(RequestOutcome::QuotaExhausted);
        }

        match item_type {
            ItemType::Movie => {
                let tmdb_numeric: i64 = tmdb_id.parse()?;
                self.submit(&SubscribePayload::movie(item_name, tmdb_numeric))
                    .await?;
                self.quota.decrement().await?;
                self.store
                    .request_create(&NewRequest {
                        emby_user_id: emby_user_id.to_string(),
                        tmdb_id: tmdb_id.to_string(),
                        item_type: item_type.as_str().to_string(),
                        item_name: item_name.to_string(),
                        status: "approved".to_string(),
                        processed_by: Some("auto".to_string()),
                        parent_tmdb_id: None,
                        parsed_series_name: None,
                        parsed_season_number: None,
                    })
                    .await?;
                Ok(RequestOutcome::Approved { seasons: 1 })
            }
            ItemType::Series => {
                self.smart_subscribe_series(emby_user_id, tmdb_id, item_name)
                    .await
            }
            other => bail!("subscription requests for {other} items are not supported"),
        }
    }

    /// Series path: parse the locale-aware title; with a season, search the
    /// metadata provider for the parent series and subscribe just that
    /// season, otherwise subscribe the whole series.
    async fn smart_subscribe_series(
        &self,
        emby_user_id: &str,
        tmdb_id: &str,
        item_name: &str,
    ) -> Result<RequestOutcome> {
        let (base_name, parsed_season) = parse_series_title(item_name);
        let tmdb_numeric: i64 = tmdb_id.parse()?;

        let mut parsed_parent: Option<(i64, String)> = None;
        let payload = if let Some(season) = parsed_season {
            let results = self.tmdb.search_tv(&base_name).await.unwrap_or_default();
            if let Some(parent) = results.first() {
                let parent_name = parent.name.clone().unwrap_or_else(|| base_name.clone());
                parsed_parent = Some((parent.id, parent_name.clone()));
                SubscribePayload::series(&parent_name, parent.id, Some(season))
            } else {
                // Parent lookup failed, fall back to the raw title.
                SubscribePayload::series(item_name, tmdb_numeric, None)
            }
        } else {
            SubscribePayload::series(item_name, tmdb_numeric, None)
        };

        self.submit(&payload).await?;

        if self.quota.get_quota().await? > 0 {
            self.quota.decrement().await?;
        }

        let (record_tmdb_id, record_name, parent_tmdb_id, parsed_name, season_number) =
            match (&parsed_parent, parsed_season) {
                (Some((parent_id, parent_name)), Some(season)) => (
                    parent_id.to_string(),
                    format!("{parent_name} - 第 {season} 季"),
                    Some(parent_id.to_string()),
                    Some(parent_name.clone()),
                    Some(season),
                ),
                _ => (tmdb_id.to_string(), item_name.to_string(), None, None, None),
            };

        self.store
            .request_create(&NewRequest {
                emby_user_id: emby_user_id.to_string(),
                tmdb_id: record_tmdb_id,
                item_type: ItemType::Series.as_str().to_string(),
                item_name: record_name,
                status: "approved".to_string(),
                processed_by: Some("auto".to_string()),
                parent_tmdb_id,
                parsed_series_name: parsed_name,
                parsed_season_number: season_number,
            })
            .await?;

        Ok(RequestOutcome::Approved { seasons: 1 })
    }

    async fn notify_requester(&self, emby_user_id: &str, item_name: &str, outcome: &RequestOutcome) {
        let Some(telegram) = &self.telegram else {
            return;
        };
        let chat_id = match self.store.user_telegram_chat_id(emby_user_id).await {
            Ok(Some(chat_id)) => chat_id,
            _ => return,
        };
        let text = match outcome {
            RequestOutcome::Approved { .. } => {
                format!("✅ 您的订阅已自动处理\n\n您订阅的 {item_name} 已成功提交。")
            }
            RequestOutcome::Pending => {
                format!("🔔 您的订阅请求已提交\n\n您想看的 {item_name} 已进入待审队列。")
            }
            _ => return,
        };
        if let Err(e) = telegram.send_message(&chat_id, &text).await {
            warn!("request notification failed: {e}");
        }
    }

    // ========================================================================
    // Automatic dispatch of wanted items
    // ========================================================================

    /// Promote PENDING_RELEASE rows whose release date has arrived, then
    /// dispatch WANTED rows while the daily quota lasts. Reports the number
    /// of successes even when the quota halts the run early.
    pub async fn auto_subscribe(&self, ctx: &TaskContext) -> Result<()> {
        ctx.progress.update(0, "正在检查待发布的项目...");
        let today = Utc::now().date_naive();

        let pending = self
            .store
            .list_by_subscription_status(SubscriptionStatus::PendingRelease)
            .await?;
        for row in &pending {
            let released = row
                .release_date
                .as_deref()
                .and_then(|raw| NaiveDate::parse_from_str(raw, "%Y-%m-%d").ok())
                .is_some_and(|date| date <= today);
            if released {
                let item_type: ItemType = row.item_type.parse()?;
                let record = crate::db::MediaUpsert {
                    tmdb_id: row.tmdb_id.clone(),
                    item_type,
                    ..Default::default()
                };
                self.store
                    .set_subscription_status(&record, SubscriptionStatus::Wanted, None)
                    .await?;
                info!(tmdb_id = %row.tmdb_id, "released, promoted to WANTED");
            }
        }

        let wanted = self
            .store
            .list_by_subscription_status(SubscriptionStatus::Wanted)
            .await?;
        if wanted.is_empty() {
            ctx.progress.update(100, "没有缺失项目需要订阅。");
            return Ok(());
        }

        let total = wanted.len();
        let mut dispatched = 0usize;
        for (index, row) in wanted.iter().enumerate() {
            if ctx.stop.is_set() {
                ctx.progress.update(100, "任务已停止。");
                return Ok(());
            }
            if self.quota.get_quota().await? <= 0 {
                warn!(dispatched, "daily quota exhausted, halting dispatch");
                ctx.progress.update(
                    100,
                    format!("配额已用尽，本次成功订阅 {dispatched} 个项目。"),
                );
                return Ok(());
            }
            #[allow(clippy::cast_possible_truncation)]
            let progress = (((index + 1) * 100) / total) as i32;
            let title = row.title.clone().unwrap_or_else(|| row.tmdb_id.clone());
            ctx.progress.update(progress, format!("正在订阅: {title}"));

            match self.dispatch_wanted(row).await {
                Ok(()) => {
                    self.quota.decrement().await?;
                    dispatched += 1;
                    let item_type: ItemType = row.item_type.parse()?;
                    let record = crate::db::MediaUpsert {
                        tmdb_id: row.tmdb_id.clone(),
                        item_type,
                        ..Default::default()
                    };
                    self.store
                        .set_subscription_status(&record, SubscriptionStatus::Subscribed, None)
                        .await?;
                }
                Err(e) => warn!(tmdb_id = %row.tmdb_id, "dispatch failed, skipping: {e}"),
            }
        }

        ctx.progress
            .update(100, format!("智能订阅完成，共提交 {dispatched} 个项目。"));
        Ok(())
    }

    async fn dispatch_wanted(&self, row: &crate::entities::media_metadata::Model) -> Result<()> {
        let title = row.title.clone().unwrap_or_else(|| row.tmdb_id.clone());
        let item_type: ItemType = row.item_type.parse()?;
        let payload = match item_type {
            ItemType::Movie => SubscribePayload::movie(&title, row.tmdb_id.parse()?),
            ItemType::Series => SubscribePayload::series(&title, row.tmdb_id.parse()?, None),
            ItemType::Season => {
                let parent_id: i64 = row
                    .parent_series_tmdb_id
                    .as_deref()
                    .ok_or_else(|| anyhow::anyhow!("season row without parent series id"))?
                    .parse()?;
                SubscribePayload::series(&title, parent_id, row.season_number)
            }
            ItemType::Episode => bail!("episodes are not subscribed individually"),
        };
        self.submit(&payload).await
    }

    // ========================================================================
    // Best-version resubscribe for interior gaps
    // ========================================================================

    /// Phase two of the watchlist task (and the standalone resubscribe
    /// task). Only true interior gaps trigger a best-version subscription;
    /// full-season holes stay with the plain subscription path.
    pub async fn resubscribe_gaps(&self, ctx: &TaskContext, item_id: Option<&str>) -> Result<()> {
        if !self.resubscribe_enabled {
            ctx.progress.update(100, "所有流程已完成（洗版功能未启用）。");
            return Ok(());
        }

        ctx.progress.update(0, "正在查找需要洗版的剧集...");
        let candidates = self.collect_candidates(item_id).await?;
        if candidates.is_empty() {
            ctx.progress.update(100, "所有流程已完成，未发现需洗版的剧集。");
            return Ok(());
        }

        let today = Utc::now().date_naive();
        let total = candidates.len();
        info!(total, "resubscribe candidates found");
        let mut seasons_subscribed = 0usize;

        'series: for (index, row) in candidates.iter().enumerate() {
            if ctx.stop.is_set() {
                break;
            }
            #[allow(clippy::cast_possible_truncation)]
            let progress = (((index + 1) * 100) / total) as i32;
            ctx.progress
                .update(progress, format!("洗版分析: {}", row.item_name));

            // A finale younger than the grace window is left alone.
            if row
                .tmdb_status
                .as_deref()
                .is_some_and(|s| crate::constants::ENDED_TMDB_STATUSES.contains(&s))
            {
                let finale_age = row
                    .last_episode_to_air_json
                    .as_deref()
                    .and_then(|raw| serde_json::from_str::<EpisodeSummary>(raw).ok())
                    .and_then(|ep| ep.air_date)
                    .map(|aired| (today - aired).num_days());
                if finale_age.is_some_and(|days| days < windows::FINALE_GRACE_DAYS) {
                    debug!(series = %row.item_name, "finale within grace window, skipping");
                    continue;
                }
            }

            let missing = MissingInfo::from_json(row.missing_info_json.as_deref());
            if missing.missing_episodes.is_empty() {
                continue;
            }

            let children = self
                .emby
                .get_series_children(&row.item_id, "Id,ParentIndexNumber,IndexNumber,Type")
                .await
                .unwrap_or_default();
            let local = local_inventory(&children);
            let gap_seasons = find_interior_gap_seasons(&missing.missing_episodes, &local);
            if gap_seasons.is_empty() {
                debug!(series = %row.item_name, "no interior gaps");
                continue;
            }
            info!(
                series = %row.item_name,
                seasons = ?gap_seasons,
                "interior gaps confirmed, submitting best-version subscriptions"
            );

            for season in gap_seasons {
                if ctx.stop.is_set() {
                    break 'series;
                }
                let now = Utc::now();
                if in_cooldown(row.resubscribe_info_json.as_deref(), season, now) {
                    info!(series = %row.item_name, season, "season in cooldown, skipping");
                    continue;
                }
                if self.quota.get_quota().await? <= 0 {
                    warn!("daily quota exhausted, stopping resubscribe run");
                    break 'series;
                }

                let payload =
                    SubscribePayload::series(&row.item_name, row.tmdb_id.parse()?, Some(season))
                        .best_version();
                if let Err(e) = self.submit(&payload).await {
                    warn!(series = %row.item_name, season, "resubscribe failed: {e}");
                    continue;
                }

                self.quota.decrement().await?;
                seasons_subscribed += 1;
                self.store
                    .watchlist_stamp_resubscribe(&row.item_id, season, &now.to_rfc3339())
                    .await?;
                // Back to Watching so the next regular pass recalibrates.
                self.store
                    .watchlist_set_status(&row.item_id, WatchStatus::Watching, None, None, false)
                    .await?;
            }
        }

        ctx.progress.update(
            100,
            format!("所有流程已完成！共为 {seasons_subscribed} 个中间缺失的季提交了洗版订阅。"),
        );
        Ok(())
    }

    /// Candidate set: stuck (ended but missing), zombies (nominally airing
    /// but silent for a year), and completed-with-missing. A single id
    /// overrides the selection.
    async fn collect_candidates(&self, item_id: Option<&str>) -> Result<Vec<watchlist::Model>> {
        if let Some(id) = item_id {
            return Ok(self.store.watchlist_get(id).await?.into_iter().collect());
        }

        let today = Utc::now().date_naive();
        let mut by_id: std::collections::HashMap<String, watchlist::Model> =
            std::collections::HashMap::new();

        for row in self.store.watchlist_all().await? {
            let status = WatchStatus::parse(&row.status);
            let missing = MissingInfo::from_json(row.missing_info_json.as_deref());
            let ended = row
                .tmdb_status
                .as_deref()
                .is_some_and(|s| crate::constants::ENDED_TMDB_STATUSES.contains(&s));

            let active = matches!(status, Some(WatchStatus::Watching | WatchStatus::Paused));
            let stuck = active && ended && !missing.is_empty();

            let zombie = active && !ended && {
                row.last_episode_to_air_json
                    .as_deref()
                    .and_then(|raw| serde_json::from_str::<EpisodeSummary>(raw).ok())
                    .and_then(|ep| ep.air_date)
                    .is_some_and(|aired| {
                        (today - aired).num_days() > windows::ZOMBIE_THRESHOLD_DAYS
                    })
            };

            let completed_missing =
                status == Some(WatchStatus::Completed) && !missing.is_empty();

            if stuck || zombie || completed_missing {
                by_id.insert(row.item_id.clone(), row);
            }
        }

        let mut candidates: Vec<watchlist::Model> = by_id.into_values().collect();
        candidates.sort_by(|a, b| a.item_id.cmp(&b.item_id));
        Ok(candidates)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    fn missing_episode(season: i32, number: i32) -> EpisodeSummary {
        EpisodeSummary {
            id: None,
            season_number: season,
            episode_number: number,
            name: None,
            overview: None,
            air_date: None,
        }
    }

    #[test]
    fn interior_gap_needs_a_later_local_episode() {
        // Local S2 = {1,2,3,5,6}, upstream missing E4 → E5 exists → gap.
        let mut local: LocalInventory = std::collections::HashMap::new();
        local.insert(2, BTreeSet::from([1, 2, 3, 5, 6]));

        let gaps = find_interior_gap_seasons(&[missing_episode(2, 4)], &local);
        assert_eq!(gaps, BTreeSet::from([2]));
    }

    #[test]
    fn tail_missing_is_not_an_interior_gap() {
        // Local S2 = {1,2,3}, missing {4,5,6} → nothing later locally.
        let mut local: LocalInventory = std::collections::HashMap::new();
        local.insert(2, BTreeSet::from([1, 2, 3]));

        let gaps = find_interior_gap_seasons(
            &[missing_episode(2, 4), missing_episode(2, 5), missing_episode(2, 6)],
            &local,
        );
        assert!(gaps.is_empty());
    }

    #[test]
    fn fully_absent_season_is_ignored() {
        let local: LocalInventory = std::collections::HashMap::new();
        let gaps = find_interior_gap_seasons(&[missing_episode(3, 1)], &local);
        assert!(gaps.is_empty());
    }

    #[test]
    fn cooldown_blocks_within_window_and_tolerates_garbage() {
        let now = Utc::now();
        let fresh = serde_json::json!({ "2": (now - ChronoDuration::hours(1)).to_rfc3339() });
        assert!(in_cooldown(Some(&fresh.to_string()), 2, now));

        let stale = serde_json::json!({ "2": (now - ChronoDuration::hours(30)).to_rfc3339() });
        assert!(!in_cooldown(Some(&stale.to_string()), 2, now));

        let garbage = serde_json::json!({ "2": "yesterday-ish" });
        assert!(!in_cooldown(Some(&garbage.to_string()), 2, now));

        assert!(!in_cooldown(None, 2, now));
        assert!(!in_cooldown(Some("{}"), 2, now));
    }
}
