use chrono::NaiveDate;
use serde::{Deserialize, Deserializer, Serialize};

/// Internal per-series tracking state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WatchStatus {
    Watching,
    Paused,
    Completed,
}

impl WatchStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Watching => "Watching",
            Self::Paused => "Paused",
            Self::Completed => "Completed",
        }
    }

    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "Watching" => Some(Self::Watching),
            "Paused" => Some(Self::Paused),
            "Completed" => Some(Self::Completed),
            _ => None,
        }
    }
}

/// Accepts null, "", and malformed dates as `None`; the metadata provider
/// emits all three for episodes without a confirmed air date.
fn lenient_date<'de, D>(deserializer: D) -> Result<Option<NaiveDate>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    Ok(raw.and_then(|s| NaiveDate::parse_from_str(&s, "%Y-%m-%d").ok()))
}

/// One upstream episode as the watchlist engine sees it. Mirrors the
/// metadata provider's season-details payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpisodeSummary {
    #[serde(default)]
    pub id: Option<i64>,
    pub season_number: i32,
    pub episode_number: i32,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub overview: Option<String>,
    #[serde(default, deserialize_with = "lenient_date")]
    pub air_date: Option<NaiveDate>,
}

/// One upstream season summary from the series-details payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeasonSummary {
    #[serde(default)]
    pub id: Option<i64>,
    pub season_number: i32,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub overview: Option<String>,
    #[serde(default, deserialize_with = "lenient_date")]
    pub air_date: Option<NaiveDate>,
    #[serde(default)]
    pub episode_count: Option<i32>,
    #[serde(default)]
    pub poster_path: Option<String>,
}

/// Seasons absent from the library plus individual episodes absent from
/// seasons that are otherwise present. Stored as `missing_info_json`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MissingInfo {
    #[serde(default)]
    pub missing_seasons: Vec<SeasonSummary>,
    #[serde(default)]
    pub missing_episodes: Vec<EpisodeSummary>,
}

impl MissingInfo {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.missing_seasons.is_empty() && self.missing_episodes.is_empty()
    }

    #[must_use]
    pub fn from_json(json: Option<&str>) -> Self {
        json.and_then(|raw| serde_json::from_str(raw).ok())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn watch_status_round_trips() {
        for s in [
            WatchStatus::Watching,
            WatchStatus::Paused,
            WatchStatus::Completed,
        ] {
            assert_eq!(WatchStatus::parse(s.as_str()), Some(s));
        }
        assert_eq!(WatchStatus::parse("Dropped"), None);
    }

    #[test]
    fn episode_summary_tolerates_bad_air_dates() {
        let ep: EpisodeSummary = serde_json::from_str(
            r#"{"season_number": 1, "episode_number": 2, "air_date": ""}"#,
        )
        .unwrap();
        assert_eq!(ep.air_date, None);

        let ep: EpisodeSummary = serde_json::from_str(
            r#"{"season_number": 1, "episode_number": 3, "air_date": "2024-05-01"}"#,
        )
        .unwrap();
        assert_eq!(ep.air_date, NaiveDate::from_ymd_opt(2024, 5, 1));
    }

    #[test]
    fn missing_info_from_json_defaults_on_garbage() {
        assert!(MissingInfo::from_json(None).is_empty());
        assert!(MissingInfo::from_json(Some("{}")).is_empty());
        assert!(MissingInfo::from_json(Some("oops")).is_empty());
    }
}
