use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "media_metadata")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub tmdb_id: String,
    #[sea_orm(primary_key, auto_increment = false)]
    pub item_type: String,
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
    pub in_library: bool,
    /// JSON array of all Media-Server item ids backing this row. Updated by
    /// set-union, never replaced.
    pub emby_item_ids_json: Option<String>,
    pub emby_children_details_json: Option<String>,
    pub asset_details_json: Option<String>,
    pub subscription_status: Option<String>,
    pub subscription_sources_json: Option<String>,
    pub parent_series_tmdb_id: Option<String>,
    pub season_number: Option<i32>,
    pub episode_number: Option<i32>,
    pub ignore_reason: Option<String>,
    pub last_synced_at: Option<String>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
