pub mod chain;
pub mod manager;
pub mod runner;

pub use manager::{ProgressHandle, QueueError, StopFlag, TaskContext, TaskManager, TaskStatus};
pub use runner::TaskRunner;

use serde::{Deserialize, Serialize};

/// Which long-lived processor a task runs on. There is one cooperative stop
/// flag per kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProcessorKind {
    Media,
    Watchlist,
    Actor,
}

/// Every task the queue knows how to run. Dispatch is an exhaustive match
/// in [`runner::TaskRunner`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskKey {
    TaskChain,
    MetadataPopulate,
    ProcessWatchlist,
    RevivalCheck,
    CustomCollections,
    ProcessSingleCustomCollection,
    AutoSubscribe,
    ResubscribeLibrary,
    SyncAllUserData,
    EpisodeTopUp,
}

#[derive(Debug, Clone, Copy)]
pub struct TaskDescriptor {
    pub description: &'static str,
    pub kind: ProcessorKind,
    /// Single-target tasks that need an id argument are excluded from
    /// chains.
    pub chainable: bool,
}

impl TaskKey {
    pub const ALL: &'static [Self] = &[
        Self::TaskChain,
        Self::MetadataPopulate,
        Self::ProcessWatchlist,
        Self::RevivalCheck,
        Self::CustomCollections,
        Self::ProcessSingleCustomCollection,
        Self::AutoSubscribe,
        Self::ResubscribeLibrary,
        Self::SyncAllUserData,
        Self::EpisodeTopUp,
    ];

    #[must_use]
    pub const fn descriptor(self) -> TaskDescriptor {
        match self {
            Self::TaskChain => TaskDescriptor {
                description: "自动化任务链",
                kind: ProcessorKind::Media,
                chainable: false,
            },
            Self::MetadataPopulate => TaskDescriptor {
                description: "同步媒体数据",
                kind: ProcessorKind::Media,
                chainable: true,
            },
            Self::ProcessWatchlist => TaskDescriptor {
                description: "刷新智能追剧",
                kind: ProcessorKind::Watchlist,
                chainable: true,
            },
            Self::RevivalCheck => TaskDescriptor {
                description: "检查剧集复活",
                kind: ProcessorKind::Watchlist,
                chainable: false,
            },
            Self::CustomCollections => TaskDescriptor {
                description: "刷新自建合集",
                kind: ProcessorKind::Media,
                chainable: true,
            },
            Self::ProcessSingleCustomCollection => TaskDescriptor {
                description: "生成单个自建合集",
                kind: ProcessorKind::Media,
                chainable: false,
            },
            Self::AutoSubscribe => TaskDescriptor {
                description: "智能订阅缺失",
                kind: ProcessorKind::Media,
                chainable: true,
            },
            Self::ResubscribeLibrary => TaskDescriptor {
                description: "媒体洗版订阅",
                kind: ProcessorKind::Media,
                chainable: true,
            },
            Self::SyncAllUserData => TaskDescriptor {
                description: "同步用户数据",
                kind: ProcessorKind::Media,
                chainable: true,
            },
            Self::EpisodeTopUp => TaskDescriptor {
                description: "精准分集追加",
                kind: ProcessorKind::Media,
                chainable: false,
            },
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::TaskChain => "task-chain",
            Self::MetadataPopulate => "metadata-populate",
            Self::ProcessWatchlist => "process-watchlist",
            Self::RevivalCheck => "revival-check",
            Self::CustomCollections => "custom-collections",
            Self::ProcessSingleCustomCollection => "process-single-custom-collection",
            Self::AutoSubscribe => "auto-subscribe",
            Self::ResubscribeLibrary => "resubscribe-library",
            Self::SyncAllUserData => "sync-all-user-data",
            Self::EpisodeTopUp => "episode-top-up",
        }
    }

    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|key| key.as_str() == s)
    }
}

/// Arguments a task may need. Periodic tasks ignore all of this; single-
/// target tasks require their id fields.
#[derive(Debug, Clone, Default)]
pub struct TaskArgs {
    pub item_id: Option<String>,
    pub collection_id: Option<i32>,
    pub series_id: Option<String>,
    pub episode_ids: Vec<String>,
    pub force_full_update: bool,
    pub task_sequence: Vec<TaskKey>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_round_trip_through_strings() {
        for key in TaskKey::ALL {
            assert_eq!(TaskKey::parse(key.as_str()), Some(*key));
        }
        assert_eq!(TaskKey::parse("full-scan"), None);
    }

    #[test]
    fn single_target_tasks_are_not_chainable() {
        assert!(!TaskKey::ProcessSingleCustomCollection.descriptor().chainable);
        assert!(!TaskKey::EpisodeTopUp.descriptor().chainable);
        assert!(!TaskKey::TaskChain.descriptor().chainable);
        assert!(TaskKey::ProcessWatchlist.descriptor().chainable);
    }
}
