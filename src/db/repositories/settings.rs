use anyhow::Result;
use sea_orm::{DatabaseConnection, EntityTrait, Set};

use crate::entities::{app_settings, prelude::*};

pub struct SettingsRepository {
    conn: DatabaseConnection,
}

impl SettingsRepository {
    #[must_use]
    pub const fn new(conn: DatabaseConnection) -> Self {
        Self { conn }
    }

    pub async fn get(&self, key: &str) -> Result<Option<serde_json::Value>> {
        let row = AppSettings::find_by_id(key.to_string()).one(&self.conn).await?;
        Ok(row.and_then(|r| serde_json::from_str(&r.value_json).ok()))
    }

    pub async fn set(&self, key: &str, value: &serde_json::Value) -> Result<()> {
        let active = app_settings::ActiveModel {
            key: Set(key.to_string()),
            value_json: Set(value.to_string()),
        };
        AppSettings::insert(active)
            .on_conflict(
                sea_orm::sea_query::OnConflict::column(app_settings::Column::Key)
                    .update_column(app_settings::Column::ValueJson)
                    .to_owned(),
            )
            .exec(&self.conn)
            .await?;
        Ok(())
    }
}
