use anyhow::Result;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, Set,
};

use crate::entities::{prelude::*, subscription_requests};

/// A new row in the review queue. `status` is "pending" for ordinary users
/// and "approved" for auto-processed VIP requests.
#[derive(Debug, Clone)]
pub struct NewRequest {
    pub emby_user_id: String,
    pub tmdb_id: String,
    pub item_type: String,
    pub item_name: String,
    pub status: String,
    pub processed_by: Option<String>,
    pub parent_tmdb_id: Option<String>,
    pub parsed_series_name: Option<String>,
    pub parsed_season_number: Option<i32>,
}

pub struct RequestRepository {
    conn: DatabaseConnection,
}

impl RequestRepository {
    #[must_use]
    pub const fn new(conn: DatabaseConnection) -> Self {
        Self { conn }
    }

    /// The global pending/approved status for a tmdb id, if any. Used to
    /// reject duplicate requests with the existing status.
    pub async fn global_status(&self, tmdb_id: &str) -> Result<Option<String>> {
        let row = SubscriptionRequests::find()
            .filter(subscription_requests::Column::TmdbId.eq(tmdb_id))
            .filter(
                subscription_requests::Column::Status
                    .is_in(["pending", "approved"]),
            )
            .order_by_asc(subscription_requests::Column::Id)
            .one(&self.conn)
            .await?;
        Ok(row.map(|r| r.status))
    }

    pub async fn create(&self, request: &NewRequest) -> Result<i32> {
        let active = subscription_requests::ActiveModel {
            emby_user_id: Set(request.emby_user_id.clone()),
            tmdb_id: Set(request.tmdb_id.clone()),
            item_type: Set(request.item_type.clone()),
            item_name: Set(request.item_name.clone()),
            status: Set(request.status.clone()),
            processed_by: Set(request.processed_by.clone()),
            parent_tmdb_id: Set(request.parent_tmdb_id.clone()),
            parsed_series_name: Set(request.parsed_series_name.clone()),
            parsed_season_number: Set(request.parsed_season_number),
            created_at: Set(chrono::Utc::now().to_rfc3339()),
            ..Default::default()
        };
        let result = SubscriptionRequests::insert(active).exec(&self.conn).await?;
        Ok(result.last_insert_id)
    }

    pub async fn list_for_user(&self, user_id: &str) -> Result<Vec<subscription_requests::Model>> {
        Ok(SubscriptionRequests::find()
            .filter(subscription_requests::Column::EmbyUserId.eq(user_id))
            .order_by_desc(subscription_requests::Column::Id)
            .all(&self.conn)
            .await?)
    }

    pub async fn set_status(
        &self,
        id: i32,
        status: &str,
        processed_by: Option<&str>,
    ) -> Result<()> {
        let Some(row) = SubscriptionRequests::find_by_id(id).one(&self.conn).await? else {
            return Ok(());
        };
        let mut active: subscription_requests::ActiveModel = row.into();
        active.status = Set(status.to_string());
        if let Some(who) = processed_by {
            active.processed_by = Set(Some(who.to_string()));
        }
        active.update(&self.conn).await?;
        Ok(())
    }
}
