use std::sync::Arc;

use anyhow::{Context, Result};

use super::{chain, TaskArgs, TaskContext, TaskKey};
use crate::services::{
    CollectionService, MediaSyncService, SubscriptionService, UserService, WatchlistService,
};

/// Owns the service instances and maps every [`TaskKey`] to its
/// implementation. The queue and the chain both dispatch through here.
pub struct TaskRunner {
    pub media_sync: Arc<MediaSyncService>,
    pub watchlist: Arc<WatchlistService>,
    pub collections: Arc<CollectionService>,
    pub subscriptions: Arc<SubscriptionService>,
    pub users: Arc<UserService>,
    pub chain_max_runtime_minutes: u64,
}

impl TaskRunner {
    pub async fn run(&self, key: TaskKey, args: TaskArgs, ctx: TaskContext) -> Result<()> {
        if key == TaskKey::TaskChain {
            return chain::run(self, &ctx, &args.task_sequence, self.chain_max_runtime_minutes)
                .await;
        }
        self.run_single(key, args, ctx).await
    }

    /// Every task except the chain itself.
    pub(super) async fn run_single(
        &self,
        key: TaskKey,
        args: TaskArgs,
        ctx: TaskContext,
    ) -> Result<()> {
        match key {
            TaskKey::TaskChain => unreachable!("chains do not nest"),
            TaskKey::MetadataPopulate => {
                self.media_sync.populate(&ctx, args.force_full_update).await
            }
            TaskKey::ProcessWatchlist => {
                // Two phases: refresh the active entries, then run the
                // interior-gap resubscribe pass regardless of phase one.
                let refresh_ctx = TaskContext {
                    stop: ctx.stop.clone(),
                    progress: ctx.progress.scaled(0, 50),
                };
                self.watchlist
                    .refresh(&refresh_ctx, args.item_id.as_deref(), args.force_full_update)
                    .await?;

                if ctx.stop.is_set() {
                    ctx.progress.update(100, "任务已停止。");
                    return Ok(());
                }

                let resubscribe_ctx = TaskContext {
                    stop: ctx.stop.clone(),
                    progress: ctx.progress.scaled(50, 100),
                };
                self.subscriptions
                    .resubscribe_gaps(&resubscribe_ctx, args.item_id.as_deref())
                    .await
            }
            TaskKey::RevivalCheck => self.watchlist.revival_check(&ctx).await,
            TaskKey::CustomCollections => self.collections.process_all(&ctx).await,
            TaskKey::ProcessSingleCustomCollection => {
                let collection_id = args
                    .collection_id
                    .context("process-single-custom-collection requires a collection id")?;
                self.collections.process_single(&ctx, collection_id).await
            }
            TaskKey::AutoSubscribe => self.subscriptions.auto_subscribe(&ctx).await,
            TaskKey::ResubscribeLibrary => self.subscriptions.resubscribe_gaps(&ctx, None).await,
            TaskKey::SyncAllUserData => self.users.sync_all(&ctx).await,
            TaskKey::EpisodeTopUp => {
                let series_id = args
                    .series_id
                    .context("episode-top-up requires a series id")?;
                self.media_sync
                    .episode_top_up(&ctx, &series_id, &args.episode_ids)
                    .await
            }
        }
    }
}
