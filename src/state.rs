//! Shared application state wiring: one place builds the store, the
//! upstream clients, the services, and the task queue from configuration.

use std::sync::Arc;

use anyhow::Result;

use crate::clients::emby::{EmbyClient, EmbyConfig};
use crate::clients::moviepilot::{MoviePilotClient, MoviePilotConfig};
use crate::clients::telegram::{TelegramClient, TelegramConfig};
use crate::clients::tmdb::TmdbClient;
use crate::config::Config;
use crate::db::Store;
use crate::services::{
    CollectionService, MediaSyncService, NoopCoverRenderer, QuotaService, RateLimiter,
    SelfUpdateMarkers, SubscriptionService, UserService, WatchlistService,
};
use crate::tasks::{TaskManager, TaskRunner};

/// Shared application state. Wrapped in `Arc` and handed to the API, the
/// scheduler, and the webhook handlers.
pub struct SharedState {
    pub config: Config,

    pub store: Store,

    pub emby: EmbyClient,

    pub tmdb: TmdbClient,

    pub telegram: Option<TelegramClient>,

    pub markers: Arc<SelfUpdateMarkers>,

    pub quota: Arc<QuotaService>,

    pub media_sync: Arc<MediaSyncService>,

    pub watchlist: Arc<WatchlistService>,

    pub collections: Arc<CollectionService>,

    pub subscriptions: Arc<SubscriptionService>,

    pub users: Arc<UserService>,

    pub task_manager: Arc<TaskManager>,
}

impl SharedState {
    pub async fn new(config: Config) -> Result<Self> {
        let proxy = config.proxy_url();
        let store = Store::new(&config.general.database_path).await?;

        let emby = EmbyClient::new(
            EmbyConfig {
                base_url: config.emby.url.clone(),
                api_key: config.emby.api_key.clone(),
                user_id: config.emby.user_id.clone(),
            },
            proxy,
        )?;
        let tmdb = TmdbClient::new(&config.tmdb.api_key, proxy)?;

        let moviepilot = if config.moviepilot.enabled {
            Some(MoviePilotClient::new(
                MoviePilotConfig {
                    base_url: config.moviepilot.url.clone(),
                    username: config.moviepilot.username.clone(),
                    password: config.moviepilot.password.clone(),
                },
                proxy,
            )?)
        } else {
            None
        };

        let telegram = if config.telegram.enabled {
            Some(TelegramClient::new(
                TelegramConfig {
                    bot_token: config.telegram.bot_token.clone(),
                    default_chat_id: Some(config.telegram.chat_id.clone())
                        .filter(|c| !c.is_empty()),
                },
                proxy,
            )?)
        } else {
            None
        };

        let markers = Arc::new(SelfUpdateMarkers::new());
        let quota = Arc::new(QuotaService::new(
            store.clone(),
            config.subscriptions.daily_quota,
        ));
        let rate_limiter = Arc::new(RateLimiter::new(store.clone(), config.provider_limits()));

        let media_sync = Arc::new(MediaSyncService::new(
            store.clone(),
            emby.clone(),
            tmdb.clone(),
            telegram.clone(),
            config.emby.libraries.clone(),
        ));
        let watchlist = Arc::new(WatchlistService::new(
            store.clone(),
            emby.clone(),
            tmdb.clone(),
        ));
        let collections = Arc::new(CollectionService::new(
            store.clone(),
            emby.clone(),
            tmdb.clone(),
            Arc::new(NoopCoverRenderer),
        ));
        let subscriptions = Arc::new(SubscriptionService::new(
            store.clone(),
            emby.clone(),
            tmdb.clone(),
            moviepilot,
            telegram.clone(),
            Arc::clone(&quota),
            Arc::clone(&rate_limiter),
            config.subscriptions.resubscribe_enabled,
        ));
        let users = Arc::new(UserService::new(
            store.clone(),
            emby.clone(),
            Arc::clone(&markers),
        ));

        let runner = Arc::new(TaskRunner {
            media_sync: Arc::clone(&media_sync),
            watchlist: Arc::clone(&watchlist),
            collections: Arc::clone(&collections),
            subscriptions: Arc::clone(&subscriptions),
            users: Arc::clone(&users),
            chain_max_runtime_minutes: config.scheduler.chain_max_runtime_minutes,
        });
        let task_manager = Arc::new(TaskManager::new(runner));

        Ok(Self {
            config,
            store,
            emby,
            tmdb,
            telegram,
            markers,
            quota,
            media_sync,
            watchlist,
            collections,
            subscriptions,
            users,
            task_manager,
        })
    }
}
