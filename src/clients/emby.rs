//! Media Server client. Field names mirror the server's JSON (PascalCase),
//! so the structs double as the wire contract.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, warn};

use crate::constants::limits::VISIBILITY_CHUNK;

#[derive(Debug, Clone)]
pub struct EmbyConfig {
    pub base_url: String,
    pub api_key: String,
    /// Administrative user id the server-wide queries run as.
    pub user_id: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct MediaStream {
    #[serde(rename = "Type", default)]
    pub stream_type: String,
    pub codec: Option<String>,
    pub language: Option<String>,
    pub title: Option<String>,
    pub display_title: Option<String>,
    pub profile: Option<String>,
    pub video_range: Option<String>,
    pub width: Option<i32>,
    pub height: Option<i32>,
    pub bit_rate: Option<i64>,
    pub bit_depth: Option<i32>,
    pub average_frame_rate: Option<f64>,
    pub real_frame_rate: Option<f64>,
    pub channels: Option<i32>,
    pub is_default: Option<bool>,
    pub is_forced: Option<bool>,
    pub is_external: Option<bool>,
}

impl MediaStream {
    /// Lowercased concatenation of the descriptive stream fields, used by
    /// the effect-tag fallback when the filename says nothing.
    #[must_use]
    pub fn combined_info(&self) -> String {
        [
            self.codec.as_deref(),
            self.profile.as_deref(),
            self.video_range.as_deref(),
            self.title.as_deref(),
            self.display_title.as_deref(),
        ]
        .iter()
        .flatten()
        .map(|s| s.to_lowercase())
        .collect::<Vec<_>>()
        .join(" ")
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ProviderIds {
    pub tmdb: Option<String>,
    pub imdb: Option<String>,
    pub tvdb: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct EmbyItem {
    pub id: String,
    pub name: Option<String>,
    #[serde(rename = "Type", default)]
    pub item_type: String,
    #[serde(default)]
    pub provider_ids: Option<ProviderIds>,
    pub original_title: Option<String>,
    pub overview: Option<String>,
    pub path: Option<String>,
    pub container: Option<String>,
    pub size: Option<i64>,
    pub production_year: Option<i32>,
    pub premiere_date: Option<String>,
    pub community_rating: Option<f32>,
    pub official_rating: Option<String>,
    #[serde(default)]
    pub genres: Vec<String>,
    #[serde(default)]
    pub studios: Vec<NamedRef>,
    pub date_created: Option<String>,
    pub series_id: Option<String>,
    pub parent_id: Option<String>,
    /// Season number for episodes.
    pub parent_index_number: Option<i32>,
    /// Episode number for episodes, season number for seasons.
    pub index_number: Option<i32>,
    pub run_time_ticks: Option<i64>,
    pub media_streams: Option<Vec<MediaStream>>,
}

impl EmbyItem {
    #[must_use]
    pub fn tmdb_id(&self) -> Option<&str> {
        self.provider_ids.as_ref()?.tmdb.as_deref()
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct NamedRef {
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct UserPolicy {
    #[serde(default)]
    pub is_administrator: bool,
    #[serde(default)]
    pub is_disabled: bool,
    #[serde(default)]
    pub enable_all_folders: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct EmbyUser {
    pub id: String,
    pub name: String,
    pub policy: Option<UserPolicy>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ItemsPage {
    #[serde(default)]
    items: Vec<EmbyItem>,
    #[serde(default)]
    total_record_count: Option<i64>,
}

/// Payload for `update_item_details`; only set fields are sent.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct ItemUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub overview: Option<String>,
}

#[derive(Clone)]
pub struct EmbyClient {
    client: Client,
    config: EmbyConfig,
}

impl EmbyClient {
    pub fn new(config: EmbyConfig, proxy_url: Option<&str>) -> Result<Self> {
        let client = super::build_http_client(Duration::from_secs(30), proxy_url)?;
        Ok(Self { client, config })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    /// One sweep over the configured libraries. The server pages internally;
    /// we pull everything because the sync diffs against the full universe.
    pub async fn list_items(
        &self,
        library_ids: &[String],
        type_filter: &str,
        fields: &str,
    ) -> Result<Vec<EmbyItem>> {
        let mut all = Vec::new();
        for library_id in library_ids {
            let page: ItemsPage = super::with_retries(super::LIST_FETCH_ATTEMPTS, || async {
                let page = self
                    .client
                    .get(self.url(&format!("/Users/{}/Items", self.config.user_id)))
                    .query(&[
                        ("ParentId", library_id.as_str()),
                        ("IncludeItemTypes", type_filter),
                        ("Fields", fields),
                        ("Recursive", "true"),
                    ])
                    .header("X-Emby-Token", &self.config.api_key)
                    .send()
                    .await
                    .with_context(|| format!("listing items of library {library_id}"))?
                    .error_for_status()?
                    .json()
                    .await?;
                Ok(page)
            })
            .await?;
            debug!(
                library_id,
                count = page.items.len(),
                total = page.total_record_count,
                "library sweep page"
            );
            all.extend(page.items);
        }
        Ok(all)
    }

    pub async fn get_item(&self, item_id: &str, fields: &str) -> Result<Option<EmbyItem>> {
        let response = self
            .client
            .get(self.url(&format!("/Users/{}/Items/{item_id}", self.config.user_id)))
            .query(&[("Fields", fields)])
            .header("X-Emby-Token", &self.config.api_key)
            .send()
            .await?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let item = response.error_for_status()?.json().await?;
        Ok(Some(item))
    }

    pub async fn get_items_by_ids(&self, ids: &[String], fields: &str) -> Result<Vec<EmbyItem>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let page: ItemsPage = self
            .client
            .get(self.url(&format!("/Users/{}/Items", self.config.user_id)))
            .query(&[("Ids", ids.join(",").as_str()), ("Fields", fields)])
            .header("X-Emby-Token", &self.config.api_key)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(page.items)
    }

    /// All seasons and episodes under a series, flat.
    pub async fn get_series_children(
        &self,
        series_id: &str,
        fields: &str,
    ) -> Result<Vec<EmbyItem>> {
        let page: ItemsPage = super::with_retries(super::LIST_FETCH_ATTEMPTS, || async {
            let page = self
                .client
                .get(self.url(&format!("/Users/{}/Items", self.config.user_id)))
                .query(&[
                    ("ParentId", series_id),
                    ("IncludeItemTypes", "Season,Episode"),
                    ("Fields", fields),
                    ("Recursive", "true"),
                ])
                .header("X-Emby-Token", &self.config.api_key)
                .send()
                .await?
                .error_for_status()?
                .json()
                .await?;
            Ok(page)
        })
        .await?;
        Ok(page.items)
    }

    pub async fn get_all_users(&self) -> Result<Vec<EmbyUser>> {
        let users: Vec<EmbyUser> = self
            .client
            .get(self.url("/Users"))
            .header("X-Emby-Token", &self.config.api_key)
            .send()
            .await
            .context("fetching user list")?
            .error_for_status()?
            .json()
            .await?;
        Ok(users)
    }

    /// The subset of `ids` this user may see, queried in pages of at most
    /// 150 ids so the URL stays within server limits.
    pub async fn get_user_accessible_items(
        &self,
        user_id: &str,
        ids: &[String],
    ) -> Result<Vec<String>> {
        let mut accessible = Vec::new();
        for chunk in ids.chunks(VISIBILITY_CHUNK) {
            let page: ItemsPage = self
                .client
                .get(self.url(&format!("/Users/{user_id}/Items")))
                .query(&[
                    ("Ids", chunk.join(",").as_str()),
                    ("Fields", "Id"),
                    ("Recursive", "true"),
                ])
                .header("X-Emby-Token", &self.config.api_key)
                .send()
                .await?
                .error_for_status()?
                .json()
                .await?;
            accessible.extend(page.items.into_iter().map(|item| item.id));
        }
        Ok(accessible)
    }

    pub async fn update_item_details(&self, item_id: &str, update: &ItemUpdate) -> Result<()> {
        // The item-update endpoint replaces the whole document, so merge the
        // patch into the current state first.
        let current: serde_json::Value = self
            .client
            .get(self.url(&format!("/Users/{}/Items/{item_id}", self.config.user_id)))
            .header("X-Emby-Token", &self.config.api_key)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let mut merged = current;
        if let Some(name) = &update.name {
            merged["Name"] = json!(name);
        }
        if let Some(overview) = &update.overview {
            merged["Overview"] = json!(overview);
        }

        let response = self
            .client
            .post(self.url(&format!("/Items/{item_id}")))
            .header("X-Emby-Token", &self.config.api_key)
            .json(&merged)
            .send()
            .await?;
        if !response.status().is_success() {
            bail!("item update rejected: {}", response.status());
        }
        Ok(())
    }

    pub async fn set_user_policy(&self, user_id: &str, policy: &serde_json::Value) -> Result<()> {
        let response = self
            .client
            .post(self.url(&format!("/Users/{user_id}/Policy")))
            .header("X-Emby-Token", &self.config.api_key)
            .json(policy)
            .send()
            .await?;
        if !response.status().is_success() {
            bail!("policy update rejected: {}", response.status());
        }
        Ok(())
    }

    pub async fn set_user_disabled(&self, user_id: &str, disabled: bool) -> Result<()> {
        self.set_user_policy(user_id, &json!({ "IsDisabled": disabled }))
            .await
    }

    /// Upsert a collection container by name and make its children exactly
    /// `ordered_ids`. Returns the container id.
    pub async fn create_or_update_collection(
        &self,
        name: &str,
        ordered_ids: &[String],
    ) -> Result<String> {
        let existing: ItemsPage = self
            .client
            .get(self.url(&format!("/Users/{}/Items", self.config.user_id)))
            .query(&[
                ("IncludeItemTypes", "BoxSet"),
                ("Recursive", "true"),
                ("SearchTerm", name),
            ])
            .header("X-Emby-Token", &self.config.api_key)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let collection_id = match existing
            .items
            .iter()
            .find(|item| item.name.as_deref() == Some(name))
        {
            Some(found) => found.id.clone(),
            None => {
                #[derive(Deserialize)]
                #[serde(rename_all = "PascalCase")]
                struct Created {
                    id: String,
                }
                let created: Created = self
                    .client
                    .post(self.url("/Collections"))
                    .query(&[("Name", name), ("Ids", "")])
                    .header("X-Emby-Token", &self.config.api_key)
                    .send()
                    .await?
                    .error_for_status()?
                    .json()
                    .await?;
                created.id
            }
        };

        let current_children: ItemsPage = self
            .client
            .get(self.url(&format!("/Users/{}/Items", self.config.user_id)))
            .query(&[("ParentId", collection_id.as_str()), ("Fields", "Id")])
            .header("X-Emby-Token", &self.config.api_key)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let current: Vec<String> = current_children.items.into_iter().map(|i| i.id).collect();
        let to_remove: Vec<String> = current
            .iter()
            .filter(|id| !ordered_ids.contains(id))
            .cloned()
            .collect();
        let to_add: Vec<String> = ordered_ids
            .iter()
            .filter(|id| !current.contains(id))
            .cloned()
            .collect();

        if !to_remove.is_empty() {
            let response = self
                .client
                .delete(self.url(&format!("/Collections/{collection_id}/Items")))
                .query(&[("Ids", to_remove.join(","))])
                .header("X-Emby-Token", &self.config.api_key)
                .send()
                .await?;
            if !response.status().is_success() {
                warn!(collection = name, "failed to remove stale collection members");
            }
        }
        if !to_add.is_empty() {
            let response = self
                .client
                .post(self.url(&format!("/Collections/{collection_id}/Items")))
                .query(&[("Ids", to_add.join(","))])
                .header("X-Emby-Token", &self.config.api_key)
                .send()
                .await?;
            if !response.status().is_success() {
                bail!("failed to add collection members: {}", response.status());
            }
        }

        Ok(collection_id)
    }

    pub async fn refresh_item_metadata(&self, item_id: &str, replace_all: bool) -> Result<()> {
        let replace = if replace_all { "true" } else { "false" };
        let response = self
            .client
            .post(self.url(&format!("/Items/{item_id}/Refresh")))
            .query(&[
                ("MetadataRefreshMode", "FullRefresh"),
                ("ReplaceAllMetadata", replace),
                ("ReplaceAllImages", "false"),
            ])
            .header("X-Emby-Token", &self.config.api_key)
            .send()
            .await?;
        if !response.status().is_success() {
            bail!("metadata refresh rejected: {}", response.status());
        }
        Ok(())
    }
}
