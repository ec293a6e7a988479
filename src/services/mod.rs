pub mod collections;
pub mod covers;
pub mod limits;
pub mod lists;
pub mod media_sync;
pub mod subscriptions;
pub mod users;
pub mod watchlist;

pub use collections::CollectionService;
pub use covers::{CoverRenderer, NoopCoverRenderer};
pub use limits::{QuotaService, RateLimiter};
pub use media_sync::MediaSyncService;
pub use subscriptions::SubscriptionService;
pub use users::{SelfUpdateMarkers, UserService};
pub use watchlist::WatchlistService;
