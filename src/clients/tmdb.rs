//! Metadata Provider client (TMDb-shaped).

use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

use crate::models::watchlist::{EpisodeSummary, SeasonSummary};

const API_ROOT: &str = "https://api.themoviedb.org/3";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NamedEntry {
    pub id: Option<i64>,
    pub name: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct KeywordList {
    #[serde(default)]
    pub keywords: Vec<NamedEntry>,
    #[serde(default)]
    pub results: Vec<NamedEntry>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProductionCountry {
    pub iso_3166_1: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Credits {
    #[serde(default)]
    pub crew: Vec<CrewMember>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CrewMember {
    pub id: Option<i64>,
    pub name: String,
    #[serde(default)]
    pub job: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MovieDetails {
    pub id: i64,
    pub title: Option<String>,
    pub original_title: Option<String>,
    pub overview: Option<String>,
    pub poster_path: Option<String>,
    pub release_date: Option<String>,
    pub original_language: Option<String>,
    #[serde(default)]
    pub production_companies: Vec<NamedEntry>,
    #[serde(default)]
    pub production_countries: Vec<ProductionCountry>,
    #[serde(default)]
    pub credits: Option<Credits>,
    #[serde(default)]
    pub keywords: Option<KeywordList>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TvDetails {
    pub id: i64,
    pub name: Option<String>,
    pub original_name: Option<String>,
    pub overview: Option<String>,
    pub poster_path: Option<String>,
    pub first_air_date: Option<String>,
    pub status: Option<String>,
    #[serde(default)]
    pub number_of_seasons: i32,
    #[serde(default)]
    pub languages: Vec<String>,
    #[serde(default)]
    pub origin_country: Vec<String>,
    #[serde(default)]
    pub seasons: Vec<SeasonSummary>,
    pub last_episode_to_air: Option<EpisodeSummary>,
    pub next_episode_to_air: Option<EpisodeSummary>,
    #[serde(default)]
    pub production_companies: Vec<NamedEntry>,
    #[serde(default)]
    pub created_by: Vec<NamedEntry>,
    #[serde(default)]
    pub keywords: Option<KeywordList>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SeasonDetails {
    pub id: Option<i64>,
    pub season_number: Option<i32>,
    pub name: Option<String>,
    pub overview: Option<String>,
    pub air_date: Option<String>,
    pub poster_path: Option<String>,
    #[serde(default)]
    pub episodes: Vec<EpisodeSummary>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SearchResult {
    pub id: i64,
    pub name: Option<String>,
    pub title: Option<String>,
    pub first_air_date: Option<String>,
    pub release_date: Option<String>,
    pub poster_path: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SearchPage {
    #[serde(default)]
    results: Vec<SearchResult>,
}

#[derive(Debug, Deserialize)]
pub struct DiscoverPage {
    #[serde(default)]
    pub page: i32,
    #[serde(default)]
    pub total_pages: i32,
    #[serde(default)]
    pub results: Vec<SearchResult>,
}

#[derive(Clone)]
pub struct TmdbClient {
    client: Client,
    api_key: String,
}

impl TmdbClient {
    pub fn new(api_key: &str, proxy_url: Option<&str>) -> Result<Self> {
        let client = super::build_http_client(Duration::from_secs(15), proxy_url)?;
        Ok(Self {
            client,
            api_key: api_key.to_string(),
        })
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        extra: &[(&str, &str)],
    ) -> Result<T> {
        let mut query = vec![("api_key", self.api_key.as_str()), ("language", "zh-CN")];
        query.extend_from_slice(extra);
        super::with_retries(super::LIST_FETCH_ATTEMPTS, || async {
            let value = self
                .client
                .get(format!("{API_ROOT}{path}"))
                .query(&query)
                .send()
                .await
                .with_context(|| format!("requesting {path}"))?
                .error_for_status()?
                .json()
                .await?;
            Ok(value)
        })
        .await
    }

    pub async fn get_movie_details(&self, tmdb_id: &str) -> Result<MovieDetails> {
        self.get_json(
            &format!("/movie/{tmdb_id}"),
            &[("append_to_response", "credits,keywords")],
        )
        .await
    }

    pub async fn get_tv_details(&self, tmdb_id: &str) -> Result<TvDetails> {
        self.get_json(
            &format!("/tv/{tmdb_id}"),
            &[("append_to_response", "keywords")],
        )
        .await
    }

    pub async fn get_tv_season_details(
        &self,
        tmdb_id: &str,
        season_number: i32,
    ) -> Result<SeasonDetails> {
        self.get_json(&format!("/tv/{tmdb_id}/season/{season_number}"), &[])
            .await
    }

    pub async fn search_tv(&self, name: &str) -> Result<Vec<SearchResult>> {
        let page: SearchPage = self.get_json("/search/tv", &[("query", name)]).await?;
        debug!(name, hits = page.results.len(), "tv search");
        Ok(page.results)
    }

    pub async fn search_movie(&self, name: &str) -> Result<Vec<SearchResult>> {
        let page: SearchPage = self.get_json("/search/movie", &[("query", name)]).await?;
        Ok(page.results)
    }

    pub async fn get_popular_movies(&self, page: i32) -> Result<DiscoverPage> {
        self.get_json("/movie/popular", &[("page", &page.to_string())])
            .await
    }

    /// Discover endpoint driven by raw query pairs lifted from a
    /// themoviedb.org/discover URL.
    pub async fn discover(
        &self,
        kind: &str,
        params: &[(String, String)],
        page: i32,
    ) -> Result<DiscoverPage> {
        let page_str = page.to_string();
        let mut extra: Vec<(&str, &str)> = params
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();
        extra.push(("page", page_str.as_str()));
        self.get_json(&format!("/discover/{kind}"), &extra).await
    }
}
