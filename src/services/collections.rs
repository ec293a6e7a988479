//! Custom collection builder: list/filter evaluation, Media-Server
//! reconciliation, health analysis, and the per-user visibility caches.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use futures::StreamExt;
use tracing::{debug, info, warn};

use crate::clients::emby::{EmbyClient, EmbyUser};
use crate::clients::tmdb::TmdbClient;
use crate::constants::pools;
use crate::db::{CollectionSyncResults, MediaUpsert, Store, UserCacheEntry};
use crate::entities::custom_collections;
use crate::models::collection::{
    CollectionType, Correction, FilterDefinition, GeneratedItem, ListDefinition,
};
use crate::models::media::{ItemType, SubscriptionSource, SubscriptionStatus};
use crate::services::covers::{ContainerInfo, CoverBadge, CoverRenderer};
use crate::services::lists::{FilterEngine, ListImporter};
use crate::tasks::TaskContext;

/// Badge contract: list collections show a source label derived from the
/// URL scheme, everything else shows the in-library count. New list sources
/// must be registered here explicitly.
#[must_use]
pub fn badge_text(
    collection_type: CollectionType,
    definition_url: &str,
    in_library_count: i32,
) -> CoverBadge {
    if collection_type != CollectionType::List {
        return CoverBadge::Count(in_library_count);
    }
    if definition_url.starts_with("maoyan://") {
        CoverBadge::Text("猫眼".to_string())
    } else if definition_url.contains("douban.com/doulist") {
        CoverBadge::Text("豆列".to_string())
    } else if definition_url.contains("themoviedb.org/discover/") {
        CoverBadge::Text("探索".to_string())
    } else {
        CoverBadge::Text("榜单".to_string())
    }
}

/// Apply the definition's id corrections in place, returning the reverse
/// map (new id → original id) for later health accounting. Applying the
/// same corrections twice is a no-op.
#[must_use]
pub fn apply_corrections(
    items: &mut [GeneratedItem],
    corrections: &HashMap<String, Correction>,
) -> HashMap<String, String> {
    let mut reverse = HashMap::new();
    if corrections.is_empty() {
        return reverse;
    }
    for item in items.iter_mut() {
        let Some(correction) = corrections.get(&item.tmdb_id) else {
            continue;
        };
        let original = item.tmdb_id.clone();
        match correction {
            Correction::Id(new_id) => item.tmdb_id = new_id.clone(),
            Correction::SeasonOf { tmdb_id, season } => {
                item.tmdb_id = tmdb_id.clone();
                item.season = Some(*season);
            }
        }
        reverse.insert(item.tmdb_id.clone(), original);
    }
    reverse
}

/// The user's visible subset of the global ordered id list, order preserved.
#[must_use]
pub fn visible_intersection(global_ordered: &[String], allowed: &HashSet<String>) -> Vec<String> {
    global_ordered
        .iter()
        .filter(|id| allowed.contains(*id))
        .cloned()
        .collect()
}

struct HealthOutcome {
    health_status: String,
    missing_count: i32,
}

pub struct CollectionService {
    store: Store,
    emby: EmbyClient,
    tmdb: TmdbClient,
    cover: Arc<dyn CoverRenderer>,
}

impl CollectionService {
    #[must_use]
    pub fn new(
        store: Store,
        emby: EmbyClient,
        tmdb: TmdbClient,
        cover: Arc<dyn CoverRenderer>,
    ) -> Self {
        Self {
            store,
            emby,
            tmdb,
            cover,
        }
    }

    /// Rebuild every enabled collection.
    pub async fn process_all(&self, ctx: &TaskContext) -> Result<()> {
        ctx.progress.update(0, "正在获取所有Emby用户...");
        let users = self.fetch_users().await?;

        ctx.progress.update(10, "正在获取所有启用的合集定义...");
        let collections = self.store.collections_enabled().await?;
        if collections.is_empty() {
            ctx.progress.update(100, "没有已启用的合集。");
            return Ok(());
        }

        ctx.progress.update(15, "正在从本地数据库加载全量媒体映射...");
        let tmdb_to_emby = self.store.tmdb_to_emby_map().await?;
        let season_set = self.store.in_library_season_set().await?;

        let total = collections.len();
        for (index, collection) in collections.iter().enumerate() {
            if ctx.stop.is_set() {
                ctx.progress.update(100, "任务已中止。");
                return Ok(());
            }
            #[allow(clippy::cast_possible_truncation)]
            let progress = 20 + ((index * 75) / total) as i32;
            ctx.progress.update(
                progress,
                format!("({}/{total}) 正在计算: {}", index + 1, collection.name),
            );

            if let Err(e) = self
                .process_collection(collection, &users, &tmdb_to_emby, &season_set)
                .await
            {
                warn!(collection = %collection.name, "collection build failed: {e:#}");
            }
        }

        ctx.progress.update(100, "所有自建合集均已处理完毕！");
        Ok(())
    }

    /// Rebuild one collection by id.
    pub async fn process_single(&self, ctx: &TaskContext, collection_id: i32) -> Result<()> {
        ctx.progress.update(0, "正在获取所有Emby用户...");
        let users = self.fetch_users().await?;

        ctx.progress.update(10, "正在读取合集定义...");
        let collection = self
            .store
            .collection_get(collection_id)
            .await?
            .with_context(|| format!("custom collection {collection_id} not found"))?;

        let tmdb_to_emby = self.store.tmdb_to_emby_map().await?;
        let season_set = self.store.in_library_season_set().await?;

        ctx.progress
            .update(20, format!("正在为《{}》计算媒体列表...", collection.name));
        self.process_collection(&collection, &users, &tmdb_to_emby, &season_set)
            .await?;
        ctx.progress.update(100, "单个自定义合集同步完成！");
        Ok(())
    }

    async fn fetch_users(&self) -> Result<Vec<EmbyUser>> {
        let local = self.store.users_all().await?;
        if local.is_empty() {
            debug!("no local user mirror, falling back to the media server");
            return self.emby.get_all_users().await;
        }
        Ok(local
            .into_iter()
            .map(|user| EmbyUser {
                id: user.id,
                name: user.name,
                policy: Some(crate::clients::emby::UserPolicy {
                    is_administrator: user.is_administrator,
                    is_disabled: false,
                    enable_all_folders: user.is_administrator,
                }),
            })
            .collect())
    }

    async fn process_collection(
        &self,
        collection: &custom_collections::Model,
        users: &[EmbyUser],
        tmdb_to_emby: &HashMap<String, String>,
        season_set: &HashSet<(String, i32)>,
    ) -> Result<()> {
        let collection_type = CollectionType::parse(&collection.collection_type)
            .with_context(|| format!("unknown collection type: {}", collection.collection_type))?;

        // Membership from the definition.
        let (mut items, list_definition) = match collection_type {
            CollectionType::List => {
                let definition: ListDefinition =
                    serde_json::from_str(&collection.definition_json)
                        .context("malformed list definition")?;
                let imported = ListImporter::new(&self.tmdb).import(&definition).await?;
                (imported, Some(definition))
            }
            CollectionType::Filter => {
                let definition: FilterDefinition =
                    serde_json::from_str(&collection.definition_json)
                        .context("malformed filter definition")?;
                let rows = self.store.list_in_library(&definition.item_types).await?;
                (FilterEngine::execute(&definition, &rows), None)
            }
        };

        let reverse_corrections = list_definition
            .as_ref()
            .map(|definition| apply_corrections(&mut items, &definition.corrections))
            .unwrap_or_default();

        if items.is_empty() {
            warn!(collection = %collection.name, "definition produced no items");
            self.store
                .collection_update_sync_results(
                    collection.id,
                    &CollectionSyncResults {
                        emby_collection_id: None,
                        item_type_json: None,
                        in_library_count: 0,
                        health_status: "ok".to_string(),
                        missing_count: 0,
                        generated_media_info_json: Some("[]".to_string()),
                    },
                )
                .await?;
            return Ok(());
        }

        // Join to local ids; the filter engine already provided them.
        let global_ordered: Vec<String> = items
            .iter()
            .filter_map(|item| {
                item.emby_id
                    .clone()
                    .or_else(|| tmdb_to_emby.get(&item.composite_key()).cloned())
            })
            .collect();

        // Reconcile the container on the Media Server.
        let emby_collection_id = self
            .emby
            .create_or_update_collection(&collection.name, &global_ordered)
            .await
            .context("collection reconciliation failed")?;

        // Per-user visibility cache.
        self.update_user_caches(collection.id, &global_ordered, users)
            .await?;

        // Health analysis and persisted results.
        let item_types: Vec<ItemType> = list_definition
            .as_ref()
            .map_or_else(|| vec![ItemType::Movie], |d| d.item_types.clone());

        let mut results = CollectionSyncResults {
            emby_collection_id: Some(emby_collection_id.clone()),
            item_type_json: Some(serde_json::to_string(&item_types)?),
            #[allow(clippy::cast_possible_truncation)]
            in_library_count: global_ordered.len() as i32,
            health_status: "ok".to_string(),
            missing_count: 0,
            generated_media_info_json: Some(serde_json::to_string(&items)?),
        };

        if collection_type == CollectionType::List {
            let outcome = self
                .health_check(collection, &items, tmdb_to_emby, season_set, &reverse_corrections)
                .await?;
            results.health_status = outcome.health_status;
            results.missing_count = outcome.missing_count;
        }

        self.store
            .collection_update_sync_results(collection.id, &results)
            .await?;

        // Cover generation is delegated; failures only log.
        let badge = badge_text(
            collection_type,
            list_definition.as_ref().map_or("", |d| d.url.as_str()),
            results.in_library_count,
        );
        let container = ContainerInfo {
            emby_collection_id,
            name: collection.name.clone(),
        };
        if let Err(e) = self
            .cover
            .generate_for_library(&container, &badge, &item_types)
            .await
        {
            warn!(collection = %collection.name, "cover generation failed: {e}");
        }

        info!(
            collection = %collection.name,
            in_library = results.in_library_count,
            missing = results.missing_count,
            "collection rebuilt"
        );
        Ok(())
    }

    async fn check_user_visibility(
        &self,
        user: &EmbyUser,
        global_ordered: &[String],
    ) -> (String, HashSet<String>) {
        let allowed = self
            .emby
            .get_user_accessible_items(&user.id, global_ordered)
            .await
            .unwrap_or_else(|e| {
                warn!(user = %user.name, "visibility check failed, assuming none: {e}");
                Vec::new()
            });
        (user.id.clone(), allowed.into_iter().collect())
    }

    /// Administrators see the whole list without a round-trip; everyone else
    /// is checked against the Media Server in a bounded pool. The ordered
    /// intersection is the only read path for collection visibility.
    async fn update_user_caches(
        &self,
        collection_id: i32,
        global_ordered: &[String],
        users: &[EmbyUser],
    ) -> Result<()> {
        let mut entries: Vec<UserCacheEntry> = Vec::with_capacity(users.len());

        if global_ordered.is_empty() {
            for user in users {
                entries.push(UserCacheEntry {
                    user_id: user.id.clone(),
                    collection_id,
                    visible_emby_ids_json: "[]".to_string(),
                    total_count: 0,
                });
            }
            return self.store.collection_upsert_user_cache(&entries).await;
        }

        let (admins, restricted): (Vec<&EmbyUser>, Vec<&EmbyUser>) = users.iter().partition(|u| {
            u.policy
                .as_ref()
                .is_some_and(|policy| policy.is_administrator)
        });

        for admin in admins {
            entries.push(UserCacheEntry {
                user_id: admin.id.clone(),
                collection_id,
                visible_emby_ids_json: serde_json::to_string(global_ordered)?,
                #[allow(clippy::cast_possible_truncation)]
                total_count: global_ordered.len() as i32,
            });
        }

        let mut remaining = restricted.into_iter();
        let mut pending = futures::stream::FuturesUnordered::new();
        let mut checked: Vec<(String, HashSet<String>)> = Vec::new();

        for user in remaining.by_ref().take(pools::USER_VISIBILITY) {
            pending.push(self.check_user_visibility(user, global_ordered));
        }

        while let Some(result) = pending.next().await {
            checked.push(result);
            if let Some(user) = remaining.next() {
                pending.push(self.check_user_visibility(user, global_ordered));
            }
        }

        for (user_id, allowed) in checked {
            let visible = visible_intersection(global_ordered, &allowed);
            entries.push(UserCacheEntry {
                user_id,
                collection_id,
                visible_emby_ids_json: serde_json::to_string(&visible)?,
                #[allow(clippy::cast_possible_truncation)]
                total_count: visible.len() as i32,
            });
        }

        self.store.collection_upsert_user_cache(&entries).await
    }

    /// Classify every requested item as in-library / missing-released /
    /// missing-unreleased, write the subscription statuses, and drop this
    /// collection as a source from items that fell off the list.
    async fn health_check(
        &self,
        collection: &custom_collections::Model,
        items: &[GeneratedItem],
        tmdb_to_emby: &HashMap<String, String>,
        season_set: &HashSet<(String, i32)>,
        reverse_corrections: &HashMap<String, String>,
    ) -> Result<HealthOutcome> {
        let today = Utc::now().date_naive().format("%Y-%m-%d").to_string();
        let source = SubscriptionSource::collection(collection.id, &collection.name);

        let mut missing_released: Vec<MediaUpsert> = Vec::new();
        let mut missing_unreleased: Vec<MediaUpsert> = Vec::new();
        let mut parent_placeholders: Vec<MediaUpsert> = Vec::new();

        for item in items {
            let in_library = if item.emby_id.is_some() {
                true
            } else if let (ItemType::Series, Some(season)) = (item.media_type, item.season) {
                season_set.contains(&(item.tmdb_id.clone(), season))
            } else {
                tmdb_to_emby.contains_key(&item.composite_key())
                    || reverse_corrections
                        .get(&item.tmdb_id)
                        .is_some_and(|original| {
                            tmdb_to_emby
                                .contains_key(&format!("{original}_{}", item.media_type))
                        })
            };
            if in_library {
                continue;
            }

            match self.describe_missing(item, &mut parent_placeholders).await {
                Ok(Some(record)) => {
                    let released = record
                        .release_date
                        .as_deref()
                        .is_none_or(|date| date <= today.as_str());
                    if released {
                        missing_released.push(record);
                    } else {
                        missing_unreleased.push(record);
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(tmdb_id = %item.tmdb_id, "missing-item lookup failed: {e}");
                }
            }
        }

        // Parent series placeholders first, so season rows can resolve.
        if !parent_placeholders.is_empty() {
            let mut unique: HashMap<String, MediaUpsert> = HashMap::new();
            for parent in parent_placeholders {
                unique.entry(parent.tmdb_id.clone()).or_insert(parent);
            }
            let parents: Vec<MediaUpsert> = unique.into_values().collect();
            info!(count = parents.len(), "creating parent series placeholders");
            self.store.ensure_media_exist(&parents).await?;
        }

        for record in &missing_released {
            self.store
                .set_subscription_status(record, SubscriptionStatus::Wanted, Some(&source))
                .await?;
        }
        for record in &missing_unreleased {
            self.store
                .set_subscription_status(record, SubscriptionStatus::PendingRelease, Some(&source))
                .await?;
        }

        self.cleanup_removed_sources(collection, items, &source).await;

        #[allow(clippy::cast_possible_truncation)]
        let missing_count = (missing_released.len() + missing_unreleased.len()) as i32;
        Ok(HealthOutcome {
            health_status: if missing_count > 0 {
                "has_missing".to_string()
            } else {
                "ok".to_string()
            },
            missing_count,
        })
    }

    /// Fetch upstream details for one missing item and shape its catalog
    /// record. Missing seasons also register their parent series.
    async fn describe_missing(
        &self,
        item: &GeneratedItem,
        parent_placeholders: &mut Vec<MediaUpsert>,
    ) -> Result<Option<MediaUpsert>> {
        match (item.media_type, item.season) {
            (ItemType::Series, Some(season)) => {
                let season_details = self
                    .tmdb
                    .get_tv_season_details(&item.tmdb_id, season)
                    .await?;
                let parent = self.tmdb.get_tv_details(&item.tmdb_id).await?;

                parent_placeholders.push(MediaUpsert {
                    tmdb_id: item.tmdb_id.clone(),
                    item_type: ItemType::Series,
                    title: parent.name.clone(),
                    original_title: parent.original_name.clone(),
                    release_date: parent.first_air_date.clone(),
                    release_year: parent
                        .first_air_date
                        .as_deref()
                        .and_then(|d| d.get(..4))
                        .and_then(|y| y.parse().ok()),
                    poster_path: parent.poster_path.clone(),
                    ..Default::default()
                });

                let Some(season_tmdb_id) = season_details.id else {
                    return Ok(None);
                };
                Ok(Some(MediaUpsert {
                    tmdb_id: season_tmdb_id.to_string(),
                    item_type: ItemType::Season,
                    title: season_details
                        .name
                        .clone()
                        .or_else(|| Some(format!("第 {season} 季"))),
                    release_date: season_details.air_date.clone(),
                    poster_path: season_details.poster_path.or(parent.poster_path),
                    parent_series_tmdb_id: Some(item.tmdb_id.clone()),
                    season_number: season_details.season_number.or(Some(season)),
                    ..Default::default()
                }))
            }
            (ItemType::Movie, _) => {
                let details = self.tmdb.get_movie_details(&item.tmdb_id).await?;
                Ok(Some(MediaUpsert {
                    tmdb_id: item.tmdb_id.clone(),
                    item_type: ItemType::Movie,
                    title: details.title,
                    original_title: details.original_title,
                    release_date: details.release_date,
                    poster_path: details.poster_path,
                    ..Default::default()
                }))
            }
            (ItemType::Series, None) => {
                let details = self.tmdb.get_tv_details(&item.tmdb_id).await?;
                Ok(Some(MediaUpsert {
                    tmdb_id: item.tmdb_id.clone(),
                    item_type: ItemType::Series,
                    title: details.name,
                    original_title: details.original_name,
                    release_date: details.first_air_date,
                    poster_path: details.poster_path,
                    ..Default::default()
                }))
            }
            _ => Ok(None),
        }
    }

    /// Items that dropped off the list lose this collection from their
    /// subscription sources.
    async fn cleanup_removed_sources(
        &self,
        collection: &custom_collections::Model,
        items: &[GeneratedItem],
        source: &SubscriptionSource,
    ) {
        let previous: Vec<GeneratedItem> = collection
            .generated_media_info_json
            .as_deref()
            .and_then(|raw| serde_json::from_str(raw).ok())
            .unwrap_or_default();
        if previous.is_empty() {
            return;
        }

        let current_ids: HashSet<&str> = items.iter().map(|i| i.tmdb_id.as_str()).collect();
        for old in previous
            .iter()
            .filter(|old| !current_ids.contains(old.tmdb_id.as_str()))
        {
            debug!(
                collection = %collection.name,
                tmdb_id = %old.tmdb_id,
                "item left the list, removing subscription source"
            );
            if let Err(e) = self
                .store
                .remove_subscription_source(&old.tmdb_id, old.media_type, source)
                .await
            {
                warn!(tmdb_id = %old.tmdb_id, "source cleanup failed: {e}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(tmdb_id: &str) -> GeneratedItem {
        GeneratedItem {
            tmdb_id: tmdb_id.to_string(),
            media_type: ItemType::Movie,
            season: None,
            emby_id: None,
        }
    }

    #[test]
    fn badge_text_closed_mapping() {
        let list = CollectionType::List;
        assert_eq!(
            badge_text(list, "maoyan://hot", 9),
            CoverBadge::Text("猫眼".to_string())
        );
        assert_eq!(
            badge_text(list, "https://www.douban.com/doulist/123/", 9),
            CoverBadge::Text("豆列".to_string())
        );
        assert_eq!(
            badge_text(list, "https://www.themoviedb.org/discover/movie?x=1", 9),
            CoverBadge::Text("探索".to_string())
        );
        assert_eq!(
            badge_text(list, "tmdb://popular", 9),
            CoverBadge::Text("榜单".to_string())
        );
        assert_eq!(
            badge_text(CollectionType::Filter, "", 42),
            CoverBadge::Count(42)
        );
    }

    #[test]
    fn corrections_replace_ids_and_record_reverse_map() {
        let mut items = vec![item("100"), item("200")];
        let mut corrections = HashMap::new();
        corrections.insert("100".to_string(), Correction::Id("111".to_string()));
        corrections.insert(
            "200".to_string(),
            Correction::SeasonOf {
                tmdb_id: "222".to_string(),
                season: 3,
            },
        );

        let reverse = apply_corrections(&mut items, &corrections);
        assert_eq!(items[0].tmdb_id, "111");
        assert_eq!(items[1].tmdb_id, "222");
        assert_eq!(items[1].season, Some(3));
        assert_eq!(reverse.get("111").map(String::as_str), Some("100"));
        assert_eq!(reverse.get("222").map(String::as_str), Some("200"));
    }

    #[test]
    fn corrections_are_idempotent() {
        let mut items = vec![item("100")];
        let mut corrections = HashMap::new();
        corrections.insert("100".to_string(), Correction::Id("111".to_string()));

        apply_corrections(&mut items, &corrections);
        let after_once = items.clone();
        let reverse_twice = apply_corrections(&mut items, &corrections);

        assert_eq!(items, after_once);
        // The corrected id has no rule of its own, so the second pass is empty.
        assert!(reverse_twice.is_empty());
    }

    #[test]
    fn visibility_intersection_preserves_global_order() {
        let global = vec![
            "e1".to_string(),
            "e2".to_string(),
            "e3".to_string(),
            "e4".to_string(),
        ];
        let allowed: HashSet<String> = ["e4", "e2"].iter().map(ToString::to_string).collect();
        assert_eq!(visible_intersection(&global, &allowed), vec!["e2", "e4"]);
        assert!(visible_intersection(&global, &HashSet::new()).is_empty());
    }
}
