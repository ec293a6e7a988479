use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "watchlist")]
pub struct Model {
    /// Media-Server item id of the tracked series.
    #[sea_orm(primary_key, auto_increment = false)]
    pub item_id: String,
    pub tmdb_id: String,
    pub item_name: String,
    pub item_type: String,
    pub status: String,
    /// Set iff status is Paused.
    pub paused_until: Option<String>,
    pub tmdb_status: Option<String>,
    pub next_episode_to_air_json: Option<String>,
    pub last_episode_to_air_json: Option<String>,
    pub missing_info_json: Option<String>,
    pub is_airing: bool,
    /// User override pinning the entry to Completed.
    pub force_ended: bool,
    /// Season number → last resubscribe attempt (UTC RFC 3339).
    pub resubscribe_info_json: Option<String>,
    pub last_checked_at: Option<String>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
