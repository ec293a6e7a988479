use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "subscription_requests")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub emby_user_id: String,
    pub tmdb_id: String,
    pub item_type: String,
    pub item_name: String,
    /// "pending", "approved" or "rejected".
    pub status: String,
    pub processed_by: Option<String>,
    pub parent_tmdb_id: Option<String>,
    pub parsed_series_name: Option<String>,
    pub parsed_season_number: Option<i32>,
    pub created_at: String,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
