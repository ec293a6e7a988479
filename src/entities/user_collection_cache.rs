use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "user_collection_cache")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub user_id: String,
    #[sea_orm(primary_key, auto_increment = false)]
    pub collection_id: i32,
    /// Ordered subset of the collection's global id list visible to this user.
    pub visible_emby_ids_json: String,
    pub total_count: i32,
    pub last_updated_at: String,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::custom_collections::Entity",
        from = "Column::CollectionId",
        to = "super::custom_collections::Column::Id",
        on_update = "NoAction",
        on_delete = "Cascade"
    )]
    CustomCollections,
}

impl Related<super::custom_collections::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::CustomCollections.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
