use anyhow::Result;
use sea_orm::{ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, Set};
use tracing::warn;

use crate::entities::{emby_users, prelude::*};

/// One Media-Server user as mirrored locally.
#[derive(Debug, Clone)]
pub struct UserUpsert {
    pub id: String,
    pub name: String,
    pub is_administrator: bool,
}

pub struct UserRepository {
    conn: DatabaseConnection,
}

impl UserRepository {
    #[must_use]
    pub const fn new(conn: DatabaseConnection) -> Self {
        Self { conn }
    }

    pub async fn list_all(&self) -> Result<Vec<emby_users::Model>> {
        Ok(EmbyUsers::find().all(&self.conn).await?)
    }

    pub async fn get(&self, id: &str) -> Result<Option<emby_users::Model>> {
        Ok(EmbyUsers::find_by_id(id.to_string()).one(&self.conn).await?)
    }

    pub async fn is_vip(&self, id: &str) -> Result<bool> {
        Ok(self
            .get(id)
            .await?
            .is_some_and(|u| u.allow_unrestricted_subscriptions))
    }

    pub async fn telegram_chat_id(&self, id: &str) -> Result<Option<String>> {
        Ok(self.get(id).await?.and_then(|u| u.telegram_chat_id))
    }

    /// Mirror the upstream user list: upsert everything present, then delete
    /// local rows for users the Media Server no longer knows.
    pub async fn sync_from_server(&self, users: &[UserUpsert]) -> Result<usize> {
        let now = chrono::Utc::now().to_rfc3339();
        for user in users {
            let existing = self.get(&user.id).await?;
            if let Some(row) = existing {
                let mut active: emby_users::ActiveModel = row.into();
                active.name = Set(user.name.clone());
                active.is_administrator = Set(user.is_administrator);
                active.last_synced_at = Set(now.clone());
                active.update(&self.conn).await?;
            } else {
                let active = emby_users::ActiveModel {
                    id: Set(user.id.clone()),
                    name: Set(user.name.clone()),
                    is_administrator: Set(user.is_administrator),
                    allow_unrestricted_subscriptions: Set(false),
                    telegram_chat_id: Set(None),
                    last_synced_at: Set(now.clone()),
                };
                EmbyUsers::insert(active).exec(&self.conn).await?;
            }
        }

        let keep: Vec<String> = users.iter().map(|u| u.id.clone()).collect();
        let stale = EmbyUsers::delete_many()
            .filter(emby_users::Column::Id.is_not_in(keep))
            .exec(&self.conn)
            .await?;
        if stale.rows_affected > 0 {
            warn!(
                removed = stale.rows_affected,
                "local users no longer on the media server were removed"
            );
        }
        Ok(users.len())
    }

    pub async fn set_vip(&self, id: &str, vip: bool) -> Result<()> {
        let Some(row) = self.get(id).await? else {
            return Ok(());
        };
        let mut active: emby_users::ActiveModel = row.into();
        active.allow_unrestricted_subscriptions = Set(vip);
        active.update(&self.conn).await?;
        Ok(())
    }

    pub async fn set_telegram_chat_id(&self, id: &str, chat_id: Option<&str>) -> Result<()> {
        let Some(row) = self.get(id).await? else {
            return Ok(());
        };
        let mut active: emby_users::ActiveModel = row.into();
        active.telegram_chat_id = Set(chat_id.map(String::from));
        active.update(&self.conn).await?;
        Ok(())
    }
}
