//! Membership sources for custom collections: the remote list importer and
//! the local filter engine.

use anyhow::{bail, Result};
use tracing::{debug, warn};
use url::Url;

use crate::clients::tmdb::TmdbClient;
use crate::entities::media_metadata;
use crate::models::collection::{FilterDefinition, FilterNode, FilterOp, GeneratedItem, ListDefinition};
use crate::models::media::{decode_id_list, ItemType};

const DEFAULT_LIST_LIMIT: usize = 50;

/// Resolves a list definition into an ordered membership list.
pub struct ListImporter<'a> {
    tmdb: &'a TmdbClient,
}

impl<'a> ListImporter<'a> {
    #[must_use]
    pub const fn new(tmdb: &'a TmdbClient) -> Self {
        Self { tmdb }
    }

    pub async fn import(&self, definition: &ListDefinition) -> Result<Vec<GeneratedItem>> {
        let limit = definition.limit.unwrap_or(DEFAULT_LIST_LIMIT);
        let url = definition.url.as_str();

        if url.starts_with("manual://") {
            return Ok(definition.items.iter().take(limit).cloned().collect());
        }
        if url.starts_with("tmdb://popular") {
            return self.import_popular(limit).await;
        }
        if url.contains("themoviedb.org/discover/") {
            return self.import_discover(url, limit).await;
        }

        bail!("unsupported list source: {url}")
    }

    async fn import_popular(&self, limit: usize) -> Result<Vec<GeneratedItem>> {
        let mut items = Vec::new();
        let mut page = 1;
        while items.len() < limit {
            let result = self.tmdb.get_popular_movies(page).await?;
            if result.results.is_empty() {
                break;
            }
            for entry in result.results {
                if items.len() >= limit {
                    break;
                }
                items.push(GeneratedItem {
                    tmdb_id: entry.id.to_string(),
                    media_type: ItemType::Movie,
                    season: None,
                    emby_id: None,
                });
            }
            if result.page >= result.total_pages {
                break;
            }
            page += 1;
        }
        debug!(count = items.len(), "popular list imported");
        Ok(items)
    }

    async fn import_discover(&self, raw_url: &str, limit: usize) -> Result<Vec<GeneratedItem>> {
        let parsed = Url::parse(raw_url)?;
        let kind = if parsed.path().contains("/tv") { "tv" } else { "movie" };
        let media_type = if kind == "tv" { ItemType::Series } else { ItemType::Movie };
        let params: Vec<(String, String)> = parsed
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();

        let mut items = Vec::new();
        let mut page = 1;
        while items.len() < limit {
            let result = self.tmdb.discover(kind, &params, page).await?;
            if result.results.is_empty() {
                break;
            }
            for entry in result.results {
                if items.len() >= limit {
                    break;
                }
                items.push(GeneratedItem {
                    tmdb_id: entry.id.to_string(),
                    media_type,
                    season: None,
                    emby_id: None,
                });
            }
            if result.page >= result.total_pages {
                break;
            }
            page += 1;
        }
        debug!(kind, count = items.len(), "discover list imported");
        Ok(items)
    }
}

/// Evaluates a predicate tree against in-library catalog rows. Matches
/// already carry their local id, so the join step is skipped for them.
pub struct FilterEngine;

impl FilterEngine {
    #[must_use]
    pub fn execute(
        definition: &FilterDefinition,
        rows: &[media_metadata::Model],
    ) -> Vec<GeneratedItem> {
        let wanted_types: Vec<&str> = definition.item_types.iter().map(|t| t.as_str()).collect();
        rows.iter()
            .filter(|row| wanted_types.contains(&row.item_type.as_str()))
            .filter(|row| Self::evaluate(&definition.rules, row))
            .filter_map(|row| {
                let emby_id = decode_id_list(row.emby_item_ids_json.as_deref())
                    .into_iter()
                    .next()?;
                let media_type = row.item_type.parse().ok()?;
                Some(GeneratedItem {
                    tmdb_id: row.tmdb_id.clone(),
                    media_type,
                    season: None,
                    emby_id: Some(emby_id),
                })
            })
            .collect()
    }

    fn evaluate(node: &FilterNode, row: &media_metadata::Model) -> bool {
        match node {
            FilterNode::All { rules } => rules.iter().all(|rule| Self::evaluate(rule, row)),
            FilterNode::Any { rules } => rules.iter().any(|rule| Self::evaluate(rule, row)),
            FilterNode::Condition { field, op, value } => Self::condition(row, field, *op, value),
        }
    }

    fn condition(
        row: &media_metadata::Model,
        field: &str,
        op: FilterOp,
        value: &serde_json::Value,
    ) -> bool {
        match field {
            "genres" | "countries" | "studios" | "keywords" => {
                let json = match field {
                    "genres" => row.genres_json.as_deref(),
                    "countries" => row.countries_json.as_deref(),
                    "studios" => row.studios_json.as_deref(),
                    _ => row.keywords_json.as_deref(),
                };
                let list: Vec<String> = json
                    .and_then(|raw| serde_json::from_str(raw).ok())
                    .unwrap_or_default();
                let needle = value.as_str().unwrap_or_default();
                match op {
                    FilterOp::Contains | FilterOp::Eq => list.iter().any(|item| item == needle),
                    FilterOp::Gte | FilterOp::Lte => false,
                }
            }
            "title" => {
                let title = row.title.as_deref().unwrap_or_default();
                let needle = value.as_str().unwrap_or_default();
                match op {
                    FilterOp::Eq => title == needle,
                    FilterOp::Contains => title.contains(needle),
                    FilterOp::Gte | FilterOp::Lte => false,
                }
            }
            "original_language" => {
                row.original_language.as_deref() == value.as_str() && op == FilterOp::Eq
            }
            "unified_rating" => {
                row.unified_rating.as_deref() == value.as_str() && op == FilterOp::Eq
            }
            "release_year" => Self::numeric(row.release_year.map(f64::from), op, value),
            "rating" => Self::numeric(row.rating.map(f64::from), op, value),
            other => {
                warn!(field = other, "unknown filter field, condition treated as false");
                false
            }
        }
    }

    fn numeric(actual: Option<f64>, op: FilterOp, value: &serde_json::Value) -> bool {
        let (Some(actual), Some(expected)) = (actual, value.as_f64()) else {
            return false;
        };
        match op {
            FilterOp::Eq => (actual - expected).abs() < f64::EPSILON,
            FilterOp::Gte => actual >= expected,
            FilterOp::Lte => actual <= expected,
            FilterOp::Contains => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn movie_row(tmdb_id: &str, year: i32, genres: &[&str], emby_id: &str) -> media_metadata::Model {
        media_metadata::Model {
            tmdb_id: tmdb_id.to_string(),
            item_type: "Movie".to_string(),
            title: Some(format!("Movie {tmdb_id}")),
            original_title: None,
            release_year: Some(year),
            release_date: None,
            rating: Some(7.5),
            official_rating: None,
            unified_rating: None,
            overview: None,
            poster_path: None,
            original_language: Some("en".to_string()),
            genres_json: Some(serde_json::to_string(genres).unwrap()),
            directors_json: None,
            studios_json: None,
            countries_json: None,
            keywords_json: None,
            in_library: true,
            emby_item_ids_json: Some(format!("[\"{emby_id}\"]")),
            emby_children_details_json: None,
            asset_details_json: None,
            subscription_status: None,
            subscription_sources_json: None,
            parent_series_tmdb_id: None,
            season_number: None,
            episode_number: None,
            ignore_reason: None,
            last_synced_at: None,
        }
    }

    #[test]
    fn filter_engine_matches_tree_and_carries_emby_id() {
        let rows = vec![
            movie_row("1", 2022, &["科幻"], "e1"),
            movie_row("2", 2015, &["科幻"], "e2"),
            movie_row("3", 2023, &["喜剧"], "e3"),
        ];
        let definition: FilterDefinition = serde_json::from_str(
            r#"{
                "item_types": ["Movie"],
                "rules": {
                    "kind": "all",
                    "rules": [
                        {"kind": "condition", "field": "genres", "op": "contains", "value": "科幻"},
                        {"kind": "condition", "field": "release_year", "op": "gte", "value": 2020}
                    ]
                }
            }"#,
        )
        .unwrap();

        let matched = FilterEngine::execute(&definition, &rows);
        assert_eq!(matched.len(), 1);
        assert_eq!(matched[0].tmdb_id, "1");
        assert_eq!(matched[0].emby_id.as_deref(), Some("e1"));
    }

    #[test]
    fn any_node_is_a_union() {
        let rows = vec![
            movie_row("1", 2022, &["科幻"], "e1"),
            movie_row("2", 2015, &["喜剧"], "e2"),
        ];
        let definition: FilterDefinition = serde_json::from_str(
            r#"{
                "item_types": ["Movie"],
                "rules": {
                    "kind": "any",
                    "rules": [
                        {"kind": "condition", "field": "genres", "op": "contains", "value": "科幻"},
                        {"kind": "condition", "field": "genres", "op": "contains", "value": "喜剧"}
                    ]
                }
            }"#,
        )
        .unwrap();
        assert_eq!(FilterEngine::execute(&definition, &rows).len(), 2);
    }
}
