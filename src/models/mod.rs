pub mod collection;
pub mod media;
pub mod watchlist;

pub use collection::{
    CollectionType, Correction, FilterDefinition, FilterNode, GeneratedItem, ListDefinition,
};
pub use media::{AssetDetails, ChildDetail, ItemType, SubscriptionSource, SubscriptionStatus};
pub use watchlist::{EpisodeSummary, MissingInfo, SeasonSummary, WatchStatus};
