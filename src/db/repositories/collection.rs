use anyhow::Result;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, Set,
};

use crate::entities::{custom_collections, prelude::*, user_collection_cache};
use crate::models::collection::CollectionType;

/// Fields rewritten at the end of every collection build.
#[derive(Debug, Clone, Default)]
pub struct CollectionSyncResults {
    pub emby_collection_id: Option<String>,
    pub item_type_json: Option<String>,
    pub in_library_count: i32,
    pub health_status: String,
    pub missing_count: i32,
    pub generated_media_info_json: Option<String>,
}

#[derive(Debug, Clone)]
pub struct UserCacheEntry {
    pub user_id: String,
    pub collection_id: i32,
    pub visible_emby_ids_json: String,
    pub total_count: i32,
}

pub struct CollectionRepository {
    conn: DatabaseConnection,
}

impl CollectionRepository {
    #[must_use]
    pub const fn new(conn: DatabaseConnection) -> Self {
        Self { conn }
    }

    pub async fn insert(
        &self,
        name: &str,
        collection_type: CollectionType,
        definition_json: &str,
    ) -> Result<i32> {
        let active = custom_collections::ActiveModel {
            name: Set(name.to_string()),
            collection_type: Set(collection_type.as_str().to_string()),
            definition_json: Set(definition_json.to_string()),
            enabled: Set(true),
            emby_collection_id: Set(None),
            item_type: Set(None),
            last_synced_at: Set(None),
            in_library_count: Set(0),
            missing_count: Set(0),
            health_status: Set("ok".to_string()),
            generated_media_info_json: Set(None),
            ..Default::default()
        };
        let result = CustomCollections::insert(active).exec(&self.conn).await?;
        Ok(result.last_insert_id)
    }

    pub async fn get(&self, id: i32) -> Result<Option<custom_collections::Model>> {
        Ok(CustomCollections::find_by_id(id).one(&self.conn).await?)
    }

    pub async fn list_enabled(&self) -> Result<Vec<custom_collections::Model>> {
        Ok(CustomCollections::find()
            .filter(custom_collections::Column::Enabled.eq(true))
            .order_by_asc(custom_collections::Column::Id)
            .all(&self.conn)
            .await?)
    }

    pub async fn update_sync_results(
        &self,
        id: i32,
        results: &CollectionSyncResults,
    ) -> Result<()> {
        let Some(row) = self.get(id).await? else {
            return Ok(());
        };
        let mut active: custom_collections::ActiveModel = row.into();
        active.emby_collection_id = Set(results.emby_collection_id.clone());
        if let Some(types) = &results.item_type_json {
            active.item_type = Set(Some(types.clone()));
        }
        active.in_library_count = Set(results.in_library_count);
        active.health_status = Set(results.health_status.clone());
        active.missing_count = Set(results.missing_count);
        if let Some(generated) = &results.generated_media_info_json {
            active.generated_media_info_json = Set(Some(generated.clone()));
        }
        active.last_synced_at = Set(Some(chrono::Utc::now().to_rfc3339()));
        active.update(&self.conn).await?;
        Ok(())
    }

    /// Upsert the per-user visibility rows for one collection. The cache is
    /// the only supported read path for "what does this user see here".
    pub async fn upsert_user_cache(&self, entries: &[UserCacheEntry]) -> Result<()> {
        let now = chrono::Utc::now().to_rfc3339();
        for entry in entries {
            let active = user_collection_cache::ActiveModel {
                user_id: Set(entry.user_id.clone()),
                collection_id: Set(entry.collection_id),
                visible_emby_ids_json: Set(entry.visible_emby_ids_json.clone()),
                total_count: Set(entry.total_count),
                last_updated_at: Set(now.clone()),
            };
            UserCollectionCache::insert(active)
                .on_conflict(
                    sea_orm::sea_query::OnConflict::columns([
                        user_collection_cache::Column::UserId,
                        user_collection_cache::Column::CollectionId,
                    ])
                    .update_columns([
                        user_collection_cache::Column::VisibleEmbyIdsJson,
                        user_collection_cache::Column::TotalCount,
                        user_collection_cache::Column::LastUpdatedAt,
                    ])
                    .to_owned(),
                )
                .exec(&self.conn)
                .await?;
        }
        Ok(())
    }

    pub async fn get_user_cache(
        &self,
        user_id: &str,
        collection_id: i32,
    ) -> Result<Option<user_collection_cache::Model>> {
        Ok(UserCollectionCache::find_by_id((user_id.to_string(), collection_id))
            .one(&self.conn)
            .await?)
    }
}
