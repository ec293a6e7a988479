//! Poster rendering is an external collaborator; only the call boundary
//! lives here.

use anyhow::Result;
use async_trait::async_trait;
use tracing::debug;

use crate::models::media::ItemType;

/// The badge shown on a generated cover: a short source label for list
/// collections, the item count for everything else.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoverBadge {
    Text(String),
    Count(i32),
}

/// Everything the renderer needs about the target container.
#[derive(Debug, Clone)]
pub struct ContainerInfo {
    pub emby_collection_id: String,
    pub name: String,
}

#[async_trait]
pub trait CoverRenderer: Send + Sync {
    async fn generate_for_library(
        &self,
        container: &ContainerInfo,
        badge: &CoverBadge,
        content_types: &[ItemType],
    ) -> Result<()>;
}

/// Default renderer when no external generator is wired in: records the
/// request and does nothing.
pub struct NoopCoverRenderer;

#[async_trait]
impl CoverRenderer for NoopCoverRenderer {
    async fn generate_for_library(
        &self,
        container: &ContainerInfo,
        badge: &CoverBadge,
        _content_types: &[ItemType],
    ) -> Result<()> {
        debug!(collection = %container.name, ?badge, "cover generation skipped (no renderer)");
        Ok(())
    }
}
