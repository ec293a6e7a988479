use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::services::limits::ProviderLimit;
use crate::tasks::TaskKey;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub general: GeneralConfig,

    pub emby: EmbyConfig,

    pub tmdb: TmdbConfig,

    pub moviepilot: MoviePilotConfig,

    pub telegram: TelegramConfig,

    pub scheduler: SchedulerConfig,

    pub subscriptions: SubscriptionsConfig,

    pub server: ServerConfig,

    pub observability: ObservabilityConfig,

    pub network: NetworkConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    pub database_path: String,

    pub log_level: String,

    /// 0 lets tokio pick.
    pub worker_threads: usize,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            database_path: "sqlite:data/trackarr.db".to_string(),
            log_level: "info".to_string(),
            worker_threads: 0,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbyConfig {
    pub url: String,

    pub api_key: String,

    /// Administrative user id server-wide queries run as.
    pub user_id: String,

    /// Library id allowlist for the metadata sync.
    pub libraries: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TmdbConfig {
    pub api_key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MoviePilotConfig {
    pub enabled: bool,

    pub url: String,

    pub username: String,

    pub password: String,
}

impl Default for MoviePilotConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            url: "http://localhost:3000".to_string(),
            username: String::new(),
            password: String::new(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TelegramConfig {
    pub enabled: bool,

    pub bot_token: String,

    /// Channel or chat that receives library notifications.
    pub chat_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub enabled: bool,

    /// Six-field cron for the main chain; interval mode is the fallback.
    pub cron_expression: Option<String>,

    pub check_interval_minutes: u32,

    /// Hours between revival checks.
    pub revival_check_hours: u32,

    /// The chain run on every tick, in order.
    pub chain_sequence: Vec<String>,

    /// Wall-clock budget for one chain run; 0 disables the watcher.
    pub chain_max_runtime_minutes: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            cron_expression: None,
            check_interval_minutes: 360,
            revival_check_hours: 24,
            chain_sequence: vec![
                "metadata-populate".to_string(),
                "process-watchlist".to_string(),
                "custom-collections".to_string(),
                "auto-subscribe".to_string(),
                "sync-all-user-data".to_string(),
            ],
            chain_max_runtime_minutes: 120,
        }
    }
}

impl SchedulerConfig {
    /// The configured chain, unknown keys dropped with a log line.
    #[must_use]
    pub fn chain_keys(&self) -> Vec<TaskKey> {
        self.chain_sequence
            .iter()
            .filter_map(|name| {
                let key = TaskKey::parse(name);
                if key.is_none() {
                    tracing::warn!(task = %name, "unknown task key in chain_sequence, skipped");
                }
                key
            })
            .collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SubscriptionsConfig {
    /// Shared daily dispatch quota.
    pub daily_quota: i64,

    pub resubscribe_enabled: bool,

    /// Milliseconds between downloader requests.
    pub moviepilot_interval_ms: u64,

    pub moviepilot_daily_cap: Option<u32>,

    /// Milliseconds between metadata-provider requests.
    pub tmdb_interval_ms: u64,
}

impl Default for SubscriptionsConfig {
    fn default() -> Self {
        Self {
            daily_quota: 20,
            resubscribe_enabled: false,
            moviepilot_interval_ms: 1000,
            moviepilot_daily_cap: None,
            tmdb_interval_ms: 100,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub enabled: bool,

    pub port: u16,

    pub cors_allowed_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: 6791,
            cors_allowed_origins: vec!["*".to_string()],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    pub metrics_enabled: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            metrics_enabled: true,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Proxy for all outbound clients; empty means direct.
    pub proxy_url: String,
}

impl Config {
    pub fn load() -> Result<Self> {
        let paths = Self::config_paths();

        for path in &paths {
            if path.exists() {
                info!("Loading config from: {}", path.display());
                return Self::load_from_path(path);
            }
        }

        info!("No config file found, using defaults");
        Ok(Self::default())
    }

    pub fn load_from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    fn config_paths() -> Vec<PathBuf> {
        let mut paths = vec![PathBuf::from("trackarr.toml")];
        if let Some(config_dir) = dirs::config_dir() {
            paths.push(config_dir.join("trackarr").join("config.toml"));
        }
        if let Some(home) = dirs::home_dir() {
            paths.push(home.join(".trackarr.toml"));
        }
        paths
    }

    fn default_config_path() -> PathBuf {
        PathBuf::from("trackarr.toml")
    }

    pub fn create_default_if_missing() -> Result<bool> {
        let path = Self::default_config_path();
        if path.exists() {
            return Ok(false);
        }
        let content = toml::to_string_pretty(&Self::default())?;
        std::fs::write(&path, content)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(true)
    }

    /// Logical-input validation: a daemon without these fails outright
    /// instead of doing partial work.
    pub fn validate(&self) -> Result<()> {
        if self.emby.url.is_empty() || self.emby.api_key.is_empty() {
            bail!("emby.url and emby.api_key must be configured");
        }
        if self.emby.user_id.is_empty() {
            bail!("emby.user_id must be configured");
        }
        if self.tmdb.api_key.is_empty() {
            bail!("tmdb.api_key must be configured");
        }
        if self.moviepilot.enabled
            && (self.moviepilot.username.is_empty() || self.moviepilot.password.is_empty())
        {
            bail!("moviepilot credentials must be configured when moviepilot.enabled = true");
        }
        Ok(())
    }

    #[must_use]
    pub fn proxy_url(&self) -> Option<&str> {
        let proxy = self.network.proxy_url.trim();
        if proxy.is_empty() {
            None
        } else {
            Some(proxy)
        }
    }

    /// Per-provider pacing for the rate limiter.
    #[must_use]
    pub fn provider_limits(&self) -> HashMap<String, ProviderLimit> {
        let mut limits = HashMap::new();
        limits.insert(
            "moviepilot".to_string(),
            ProviderLimit {
                min_interval: Duration::from_millis(self.subscriptions.moviepilot_interval_ms),
                daily_cap: self.subscriptions.moviepilot_daily_cap,
            },
        );
        limits.insert(
            "tmdb".to_string(),
            ProviderLimit {
                min_interval: Duration::from_millis(self.subscriptions.tmdb_interval_ms),
                daily_cap: None,
            },
        );
        limits
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates_only_with_required_keys() {
        let mut config = Config::default();
        assert!(config.validate().is_err());

        config.emby.url = "http://emby:8096".to_string();
        config.emby.api_key = "key".to_string();
        config.emby.user_id = "admin".to_string();
        config.tmdb.api_key = "tmdb".to_string();
        assert!(config.validate().is_ok());

        config.moviepilot.enabled = true;
        assert!(config.validate().is_err());
    }

    #[test]
    fn default_chain_sequence_parses() {
        let config = SchedulerConfig::default();
        let keys = config.chain_keys();
        assert_eq!(keys.len(), 5);
        assert_eq!(keys[0], TaskKey::MetadataPopulate);
    }
}
