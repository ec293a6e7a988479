pub use super::app_settings::Entity as AppSettings;
pub use super::custom_collections::Entity as CustomCollections;
pub use super::emby_users::Entity as EmbyUsers;
pub use super::media_metadata::Entity as MediaMetadata;
pub use super::subscription_requests::Entity as SubscriptionRequests;
pub use super::user_collection_cache::Entity as UserCollectionCache;
pub use super::watchlist::Entity as Watchlist;
