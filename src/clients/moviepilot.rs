//! Downloader client (MoviePilot-shaped). Login is a form POST returning a
//! bearer token; subscriptions are accepted on 200/201/204.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct MoviePilotConfig {
    pub base_url: String,
    pub username: String,
    pub password: String,
}

/// The downloader speaks Chinese media types on the wire.
pub const MEDIA_TYPE_MOVIE: &str = "电影";
pub const MEDIA_TYPE_SERIES: &str = "电视剧";

#[derive(Debug, Clone, Serialize)]
pub struct SubscribePayload {
    pub name: String,
    pub tmdbid: i64,
    #[serde(rename = "type")]
    pub media_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub season: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub best_version: Option<i32>,
}

impl SubscribePayload {
    #[must_use]
    pub fn movie(name: &str, tmdb_id: i64) -> Self {
        Self {
            name: name.to_string(),
            tmdbid: tmdb_id,
            media_type: MEDIA_TYPE_MOVIE.to_string(),
            season: None,
            best_version: None,
        }
    }

    #[must_use]
    pub fn series(name: &str, tmdb_id: i64, season: Option<i32>) -> Self {
        Self {
            name: name.to_string(),
            tmdbid: tmdb_id,
            media_type: MEDIA_TYPE_SERIES.to_string(),
            season,
            best_version: None,
        }
    }

    #[must_use]
    pub const fn best_version(mut self) -> Self {
        self.best_version = Some(1);
        self
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
}

#[derive(Clone)]
pub struct MoviePilotClient {
    client: Client,
    config: MoviePilotConfig,
}

impl MoviePilotClient {
    pub fn new(config: MoviePilotConfig, proxy_url: Option<&str>) -> Result<Self> {
        let client = super::build_http_client(Duration::from_secs(15), proxy_url)?;
        Ok(Self { client, config })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    async fn login(&self) -> Result<String> {
        let response: TokenResponse = self
            .client
            .post(self.url("/api/v1/login/access-token"))
            .timeout(Duration::from_secs(10))
            .form(&[
                ("username", self.config.username.as_str()),
                ("password", self.config.password.as_str()),
            ])
            .send()
            .await
            .context("downloader login failed")?
            .error_for_status()?
            .json()
            .await?;

        response
            .access_token
            .filter(|token| !token.is_empty())
            .context("downloader login returned no token")
    }

    /// Submit one subscription. Returns Ok(()) only when the downloader
    /// accepted the request.
    pub async fn subscribe(&self, payload: &SubscribePayload) -> Result<()> {
        let token = self.login().await?;
        let response = self
            .client
            .post(self.url("/api/v1/subscribe/"))
            .bearer_auth(token)
            .json(payload)
            .send()
            .await?;

        match response.status().as_u16() {
            200 | 201 | 204 => {
                info!(
                    name = %payload.name,
                    tmdb_id = payload.tmdbid,
                    season = ?payload.season,
                    best_version = ?payload.best_version,
                    "downloader accepted subscription"
                );
                Ok(())
            }
            status => {
                let body = response.text().await.unwrap_or_default();
                warn!(status, body, "downloader rejected subscription");
                bail!("downloader rejected subscription with status {status}")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn movie_payload_serializes_wire_shape() {
        let payload = SubscribePayload::movie("The Matrix", 603);
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"name": "The Matrix", "tmdbid": 603, "type": "电影"})
        );
    }

    #[test]
    fn best_version_flag_rides_along() {
        let payload = SubscribePayload::series("三体", 70593, Some(2)).best_version();
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["type"], "电视剧");
        assert_eq!(json["season"], 2);
        assert_eq!(json["best_version"], 1);
    }
}
