//! Local mirror of Media-Server users, plus the self-update markers that
//! keep our own policy writes from bouncing back through webhooks.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Instant;

use anyhow::Result;
use tracing::info;

use crate::clients::emby::EmbyClient;
use crate::constants::windows::SELF_UPDATE_SUPPRESSION;
use crate::db::{Store, UserUpsert};
use crate::tasks::TaskContext;

/// Short-lived `(user_id → write time)` map. Recorded before every policy
/// write; webhook handlers drop "user updated" events younger than the
/// suppression window.
#[derive(Default)]
pub struct SelfUpdateMarkers {
    map: Mutex<HashMap<String, Instant>>,
}

impl SelfUpdateMarkers {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark(&self, user_id: &str) {
        if let Ok(mut map) = self.map.lock() {
            map.insert(user_id.to_string(), Instant::now());
        }
    }

    /// True when the given user was written by us within the suppression
    /// window. Expired markers are dropped on the way out.
    pub fn should_suppress(&self, user_id: &str) -> bool {
        let Ok(mut map) = self.map.lock() else {
            return false;
        };
        map.retain(|_, at| at.elapsed() < SELF_UPDATE_SUPPRESSION);
        map.contains_key(user_id)
    }
}

pub struct UserService {
    store: Store,
    emby: EmbyClient,
    markers: std::sync::Arc<SelfUpdateMarkers>,
}

impl UserService {
    #[must_use]
    pub fn new(store: Store, emby: EmbyClient, markers: std::sync::Arc<SelfUpdateMarkers>) -> Self {
        Self {
            store,
            emby,
            markers,
        }
    }

    /// Mirror the upstream user list: upsert present users, delete local
    /// rows for users the Media Server no longer knows.
    pub async fn sync_all(&self, ctx: &TaskContext) -> Result<()> {
        ctx.progress.update(0, "正在获取所有Emby用户...");
        let users = self.emby.get_all_users().await?;

        if ctx.stop.is_set() {
            ctx.progress.update(100, "任务已停止。");
            return Ok(());
        }

        let upserts: Vec<UserUpsert> = users
            .iter()
            .map(|user| UserUpsert {
                id: user.id.clone(),
                name: user.name.clone(),
                is_administrator: user
                    .policy
                    .as_ref()
                    .is_some_and(|policy| policy.is_administrator),
            })
            .collect();

        ctx.progress.update(50, format!("正在同步 {} 个用户...", upserts.len()));
        let synced = self.store.users_sync_from_server(&upserts).await?;
        info!(synced, "user mirror refreshed");
        ctx.progress.update(100, format!("用户同步完成，共 {synced} 个。"));
        Ok(())
    }

    /// Write a policy change upstream, recording the marker first so the
    /// resulting webhook is recognized as our own.
    pub async fn set_user_policy(&self, user_id: &str, policy: &serde_json::Value) -> Result<()> {
        self.markers.mark(user_id);
        self.emby.set_user_policy(user_id, policy).await
    }

    pub async fn set_user_disabled(&self, user_id: &str, disabled: bool) -> Result<()> {
        self.markers.mark(user_id);
        self.emby.set_user_disabled(user_id, disabled).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn marker_suppresses_until_window_passes() {
        let markers = SelfUpdateMarkers::new();
        assert!(!markers.should_suppress("u1"));
        markers.mark("u1");
        assert!(markers.should_suppress("u1"));
        assert!(!markers.should_suppress("u2"));
    }
}
