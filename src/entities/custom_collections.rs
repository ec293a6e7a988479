use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "custom_collections")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub name: String,
    /// "list" or "filter".
    pub collection_type: String,
    pub definition_json: String,
    pub enabled: bool,
    pub emby_collection_id: Option<String>,
    pub item_type: Option<String>,
    pub last_synced_at: Option<String>,
    pub in_library_count: i32,
    pub missing_count: i32,
    /// "ok" or "has_missing".
    pub health_status: String,
    pub generated_media_info_json: Option<String>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::user_collection_cache::Entity")]
    UserCollectionCache,
}

impl Related<super::user_collection_cache::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::UserCollectionCache.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
