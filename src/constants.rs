//! Application-wide constants
//!
//! Centralizes magic values that are used across multiple modules.

/// TMDb series statuses that mean "still going" when a new series appears
/// in the library; anything else is imported as already finished.
pub const ACTIVE_TMDB_STATUSES: &[&str] = &["Returning Series", "In Production", "Planned"];

/// TMDb series statuses that mean the show is over.
pub const ENDED_TMDB_STATUSES: &[&str] = &["Ended", "Canceled"];

/// Display translations for upstream TMDb series statuses.
pub const TMDB_STATUS_TRANSLATION: &[(&str, &str)] = &[
    ("Ended", "已完结"),
    ("Canceled", "已取消"),
    ("Returning Series", "连载中"),
    ("In Production", "制作中"),
    ("Planned", "计划中"),
];

/// Display translations for the internal watchlist states.
pub const WATCH_STATUS_TRANSLATION: &[(&str, &str)] = &[
    ("Watching", "追剧中"),
    ("Paused", "已暂停"),
    ("Completed", "已完结"),
];

/// ISO 3166-1 country codes to display names, used when merging
/// origin-country lists from the metadata provider.
pub const COUNTRY_TRANSLATION: &[(&str, &str)] = &[
    ("CN", "中国大陆"),
    ("HK", "中国香港"),
    ("TW", "中国台湾"),
    ("US", "美国"),
    ("GB", "英国"),
    ("JP", "日本"),
    ("KR", "韩国"),
    ("FR", "法国"),
    ("DE", "德国"),
    ("IT", "意大利"),
    ("ES", "西班牙"),
    ("IN", "印度"),
    ("TH", "泰国"),
    ("RU", "俄罗斯"),
    ("CA", "加拿大"),
    ("AU", "澳大利亚"),
];

/// Chinese numerals one through twenty, indexed so that
/// `CHINESE_NUMERALS[n - 1]` is the numeral for season `n`.
pub const CHINESE_NUMERALS: &[&str] = &[
    "一", "二", "三", "四", "五", "六", "七", "八", "九", "十", "十一", "十二", "十三", "十四",
    "十五", "十六", "十七", "十八", "十九", "二十",
];

pub fn translate_tmdb_status(status: &str) -> &str {
    TMDB_STATUS_TRANSLATION
        .iter()
        .find(|(k, _)| *k == status)
        .map_or(status, |(_, v)| v)
}

pub fn translate_country(code: &str) -> &str {
    COUNTRY_TRANSLATION
        .iter()
        .find(|(k, _)| *k == code)
        .map_or(code, |(_, v)| v)
}

/// Worker-pool widths and batch sizes, in one place so the services and
/// their tests agree on them.
pub mod pools {
    /// Concurrent upstream detail fetches during metadata sync.
    pub const METADATA_FETCH: usize = 5;

    /// Concurrent series processed by one watchlist refresh.
    pub const WATCHLIST_REFRESH: usize = 5;

    /// Concurrent per-user visibility checks during collection builds.
    pub const USER_VISIBILITY: usize = 10;

    /// Rows per catalog upsert batch.
    pub const SYNC_BATCH_SIZE: usize = 50;
}

/// Pacing and grace windows.
pub mod windows {
    use std::time::Duration;

    /// Delay between per-season episode list fetches for one series.
    pub const SEASON_FETCH_SPACING: Duration = Duration::from_millis(100);

    /// Per-(series, season) resubscribe cooldown.
    pub const RESUBSCRIBE_COOLDOWN_HOURS: i64 = 24;

    /// A finale younger than this is left alone by the resubscribe pass.
    pub const FINALE_GRACE_DAYS: i64 = 7;

    /// A series whose last episode aired longer ago than this while still
    /// nominally airing is treated as a stalled candidate.
    pub const ZOMBIE_THRESHOLD_DAYS: i64 = 365;

    /// Webhook events for a user are ignored this long after the system
    /// itself wrote to that user.
    pub const SELF_UPDATE_SUPPRESSION: Duration = Duration::from_secs(30);
}

/// Media Server request limits.
pub mod limits {
    /// Maximum ids per accessible-items page when checking user visibility.
    pub const VISIBILITY_CHUNK: usize = 150;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chinese_numerals_cover_one_to_twenty() {
        assert_eq!(CHINESE_NUMERALS.len(), 20);
        assert_eq!(CHINESE_NUMERALS[0], "一");
        assert_eq!(CHINESE_NUMERALS[9], "十");
        assert_eq!(CHINESE_NUMERALS[19], "二十");
    }

    #[test]
    fn translates_known_statuses_and_passes_through_unknown() {
        assert_eq!(translate_tmdb_status("Ended"), "已完结");
        assert_eq!(translate_tmdb_status("Pilot"), "Pilot");
        assert_eq!(translate_country("US"), "美国");
        assert_eq!(translate_country("ZZ"), "ZZ");
    }
}
