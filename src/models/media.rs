use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Discriminator for everything stored in the catalog. Seasons and episodes
/// carry their parent series id in their own columns; there is no in-memory
/// parent/child graph.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ItemType {
    #[default]
    Movie,
    Series,
    Season,
    Episode,
}

impl ItemType {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Movie => "Movie",
            Self::Series => "Series",
            Self::Season => "Season",
            Self::Episode => "Episode",
        }
    }
}

impl fmt::Display for ItemType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ItemType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Movie" => Ok(Self::Movie),
            "Series" => Ok(Self::Series),
            "Season" => Ok(Self::Season),
            "Episode" => Ok(Self::Episode),
            other => Err(anyhow::anyhow!("unknown item type: {other}")),
        }
    }
}

/// Denormalized subscription state kept on a catalog row, together with the
/// JSON list of sources that caused it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SubscriptionStatus {
    None,
    Wanted,
    PendingRelease,
    Subscribed,
    Ignored,
}

impl SubscriptionStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::None => "NONE",
            Self::Wanted => "WANTED",
            Self::PendingRelease => "PENDING_RELEASE",
            Self::Subscribed => "SUBSCRIBED",
            Self::Ignored => "IGNORED",
        }
    }

    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "NONE" => Some(Self::None),
            "WANTED" => Some(Self::Wanted),
            "PENDING_RELEASE" => Some(Self::PendingRelease),
            "SUBSCRIBED" => Some(Self::Subscribed),
            "IGNORED" => Some(Self::Ignored),
            _ => None,
        }
    }
}

/// Why a catalog row is wanted / pending. Stored as a JSON list on the row
/// so several collections or scans can claim the same item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscriptionSource {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl SubscriptionSource {
    #[must_use]
    pub fn collection(id: i32, name: &str) -> Self {
        Self {
            kind: "collection".to_string(),
            id: Some(id),
            name: Some(name.to_string()),
        }
    }
}

/// One audio stream of one physical file version.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AudioTrack {
    pub language: Option<String>,
    pub codec: Option<String>,
    pub channels: Option<i32>,
    pub display_title: Option<String>,
    #[serde(default)]
    pub is_default: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SubtitleTrack {
    pub language: Option<String>,
    pub display_title: Option<String>,
    #[serde(default)]
    pub is_forced: bool,
    pub format: Option<String>,
}

/// Full description of one physical file version of a movie or episode,
/// as stored in `asset_details_json`. Display tags come from the pure
/// extractors in [`crate::parser::asset`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AssetDetails {
    pub emby_item_id: Option<String>,
    pub path: String,
    pub size_bytes: Option<i64>,
    pub container: Option<String>,
    pub video_codec: Option<String>,
    pub video_bitrate_mbps: Option<f64>,
    pub bit_depth: Option<i32>,
    pub frame_rate: Option<f64>,
    pub width: Option<i32>,
    pub height: Option<i32>,
    #[serde(default)]
    pub audio_tracks: Vec<AudioTrack>,
    #[serde(default)]
    pub subtitles: Vec<SubtitleTrack>,
    pub resolution_display: String,
    pub quality_display: String,
    pub effect_display: String,
    pub codec_display: String,
    pub audio_display: String,
    pub subtitle_display: String,
    #[serde(default)]
    pub audio_languages: Vec<String>,
    #[serde(default)]
    pub subtitle_languages: Vec<String>,
    #[serde(default)]
    pub release_group: Vec<String>,
    pub runtime_minutes: Option<i64>,
    pub date_added: Option<String>,
}

/// Flat child entry cached on a series' catalog row
/// (`emby_children_details_json`), field names matching the Media Server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChildDetail {
    #[serde(rename = "Id")]
    pub id: String,
    #[serde(rename = "Type")]
    pub child_type: String,
    #[serde(rename = "Name")]
    pub name: Option<String>,
    #[serde(rename = "SeasonNumber", skip_serializing_if = "Option::is_none")]
    pub season_number: Option<i32>,
    #[serde(rename = "EpisodeNumber", skip_serializing_if = "Option::is_none")]
    pub episode_number: Option<i32>,
    #[serde(rename = "Overview", skip_serializing_if = "Option::is_none")]
    pub overview: Option<String>,
}

/// Decode a JSON array column into unique non-empty strings, preserving
/// first-seen order.
#[must_use]
pub fn decode_id_list(json: Option<&str>) -> Vec<String> {
    let Some(raw) = json else {
        return Vec::new();
    };
    let parsed: Vec<String> = serde_json::from_str(raw).unwrap_or_default();
    let mut seen = std::collections::HashSet::new();
    parsed
        .into_iter()
        .filter(|id| !id.is_empty() && id != "null" && seen.insert(id.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn item_type_round_trips() {
        for t in [
            ItemType::Movie,
            ItemType::Series,
            ItemType::Season,
            ItemType::Episode,
        ] {
            assert_eq!(t.as_str().parse::<ItemType>().unwrap(), t);
        }
        assert!("Album".parse::<ItemType>().is_err());
    }

    #[test]
    fn subscription_status_serializes_screaming() {
        let json = serde_json::to_string(&SubscriptionStatus::PendingRelease).unwrap();
        assert_eq!(json, "\"PENDING_RELEASE\"");
        assert_eq!(
            SubscriptionStatus::parse("PENDING_RELEASE"),
            Some(SubscriptionStatus::PendingRelease)
        );
    }

    #[test]
    fn decode_id_list_dedupes_and_drops_nulls() {
        let ids = decode_id_list(Some(r#"["a", "b", "a", "", "null", "c"]"#));
        assert_eq!(ids, vec!["a", "b", "c"]);
        assert!(decode_id_list(None).is_empty());
        assert!(decode_id_list(Some("not json")).is_empty());
    }
}
