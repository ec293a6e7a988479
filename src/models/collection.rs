use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::media::ItemType;

/// How a custom collection computes its membership.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CollectionType {
    List,
    Filter,
}

impl CollectionType {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::List => "list",
            Self::Filter => "filter",
        }
    }

    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "list" => Some(Self::List),
            "filter" => Some(Self::Filter),
            _ => None,
        }
    }
}

/// A manual fix for one source id: either replace it outright, or replace
/// it and narrow to a single season of the replacement series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Correction {
    Id(String),
    SeasonOf { tmdb_id: String, season: i32 },
}

/// `definition_json` of a list-type collection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListDefinition {
    pub url: String,
    #[serde(default = "default_item_types")]
    pub item_types: Vec<ItemType>,
    #[serde(default)]
    pub limit: Option<usize>,
    /// Inline items for `manual://` lists.
    #[serde(default)]
    pub items: Vec<GeneratedItem>,
    /// Source id (as a string) to replacement, applied after import.
    #[serde(default)]
    pub corrections: HashMap<String, Correction>,
}

fn default_item_types() -> Vec<ItemType> {
    vec![ItemType::Movie]
}

/// `definition_json` of a filter-type collection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterDefinition {
    #[serde(default = "default_item_types")]
    pub item_types: Vec<ItemType>,
    pub rules: FilterNode,
}

/// Predicate tree evaluated against catalog rows.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum FilterNode {
    All { rules: Vec<FilterNode> },
    Any { rules: Vec<FilterNode> },
    Condition { field: String, op: FilterOp, value: serde_json::Value },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterOp {
    Eq,
    Contains,
    Gte,
    Lte,
}

/// One membership entry of a built collection, persisted as
/// `generated_media_info_json` so the next build can diff against it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratedItem {
    pub tmdb_id: String,
    pub media_type: ItemType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub season: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub emby_id: Option<String>,
}

impl GeneratedItem {
    #[must_use]
    pub fn composite_key(&self) -> String {
        format!("{}_{}", self.tmdb_id, self.media_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn correction_deserializes_both_shapes() {
        let plain: Correction = serde_json::from_str("\"603\"").unwrap();
        assert_eq!(plain, Correction::Id("603".to_string()));

        let seasoned: Correction =
            serde_json::from_str(r#"{"tmdb_id": "1399", "season": 2}"#).unwrap();
        assert_eq!(
            seasoned,
            Correction::SeasonOf {
                tmdb_id: "1399".to_string(),
                season: 2
            }
        );
    }

    #[test]
    fn filter_definition_parses_nested_tree() {
        let raw = r#"{
            "item_types": ["Movie"],
            "rules": {
                "kind": "all",
                "rules": [
                    {"kind": "condition", "field": "genres", "op": "contains", "value": "科幻"},
                    {"kind": "condition", "field": "release_year", "op": "gte", "value": 2020}
                ]
            }
        }"#;
        let def: FilterDefinition = serde_json::from_str(raw).unwrap();
        match def.rules {
            FilterNode::All { rules } => assert_eq!(rules.len(), 2),
            _ => panic!("expected all-node"),
        }
    }

    #[test]
    fn composite_key_joins_id_and_type() {
        let item = GeneratedItem {
            tmdb_id: "603".to_string(),
            media_type: ItemType::Movie,
            season: None,
            emby_id: None,
        };
        assert_eq!(item.composite_key(), "603_Movie");
    }
}
