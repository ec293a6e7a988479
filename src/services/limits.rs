//! The two process-wide counters: outbound request pacing and the shared
//! daily subscription quota. Each sits behind its own mutex; the locks are
//! held only for the bookkeeping decision, never across a sleep or an HTTP
//! call.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use anyhow::{bail, Result};
use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::db::Store;

const QUOTA_KEY: &str = "subscription_quota";
const RATE_COUNTERS_KEY: &str = "rate_limit_counters";

#[derive(Debug, Clone, Copy)]
pub struct ProviderLimit {
    pub min_interval: Duration,
    pub daily_cap: Option<u32>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct PersistedCounter {
    date: String,
    count: u32,
}

struct ProviderState {
    last_request: Option<Instant>,
    count: u32,
    date: NaiveDate,
}

/// Minimum inter-request spacing plus a daily cap, per upstream provider.
pub struct RateLimiter {
    store: Store,
    limits: HashMap<String, ProviderLimit>,
    state: Mutex<HashMap<String, ProviderState>>,
}

impl RateLimiter {
    #[must_use]
    pub fn new(store: Store, limits: HashMap<String, ProviderLimit>) -> Self {
        Self {
            store,
            limits,
            state: Mutex::new(HashMap::new()),
        }
    }

    /// Wait until the next request to `provider` is allowed, then count it.
    /// Fails without sleeping when the provider's daily cap is exhausted.
    pub async fn acquire(&self, provider: &str) -> Result<()> {
        let Some(limit) = self.limits.get(provider) else {
            return Ok(());
        };
        let today = Utc::now().date_naive();

        let wait = {
            let mut state = self.state.lock().await;
            let entry = state.entry(provider.to_string()).or_insert_with(|| {
                ProviderState {
                    last_request: None,
                    count: 0,
                    date: today,
                }
            });

            if entry.date != today {
                entry.date = today;
                entry.count = 0;
            }

            if let Some(cap) = limit.daily_cap {
                if entry.count >= cap {
                    warn!(provider, cap, "daily request cap exhausted");
                    bail!("daily request cap for '{provider}' exhausted");
                }
            }

            let wait = entry
                .last_request
                .map(|last| limit.min_interval.saturating_sub(last.elapsed()))
                .unwrap_or(Duration::ZERO);

            entry.last_request = Some(Instant::now() + wait);
            entry.count += 1;
            wait
        };

        if !wait.is_zero() {
            tokio::time::sleep(wait).await;
        }
        self.persist_counter(provider, today).await;
        Ok(())
    }

    async fn persist_counter(&self, provider: &str, date: NaiveDate) {
        let count = {
            let state = self.state.lock().await;
            state.get(provider).map_or(0, |s| s.count)
        };
        let mut counters: HashMap<String, PersistedCounter> = self
            .store
            .setting_get(RATE_COUNTERS_KEY)
            .await
            .ok()
            .flatten()
            .and_then(|v| serde_json::from_value(v).ok())
            .unwrap_or_default();
        counters.insert(
            provider.to_string(),
            PersistedCounter {
                date: date.format("%Y-%m-%d").to_string(),
                count,
            },
        );
        if let Ok(value) = serde_json::to_value(&counters) {
            if let Err(e) = self.store.setting_set(RATE_COUNTERS_KEY, &value).await {
                warn!("failed to persist rate-limit counters: {e}");
            }
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct PersistedQuota {
    date: String,
    count: i64,
}

/// One shared daily integer gating all subscription dispatches. Resets on
/// date rollover; decrementing zero is a no-op, so callers check
/// `get_quota()` before dispatching.
pub struct QuotaService {
    store: Store,
    daily_quota: i64,
    lock: Mutex<()>,
}

impl QuotaService {
    #[must_use]
    pub fn new(store: Store, daily_quota: i64) -> Self {
        Self {
            store,
            daily_quota,
            lock: Mutex::new(()),
        }
    }

    pub async fn get_quota(&self) -> Result<i64> {
        let _guard = self.lock.lock().await;
        self.current().await
    }

    pub async fn decrement(&self) -> Result<i64> {
        let _guard = self.lock.lock().await;
        let current = self.current().await?;
        if current <= 0 {
            return Ok(0);
        }
        let next = current - 1;
        self.write(next).await?;
        Ok(next)
    }

    async fn current(&self) -> Result<i64> {
        let today = Utc::now().date_naive().format("%Y-%m-%d").to_string();
        let stored: Option<PersistedQuota> = self
            .store
            .setting_get(QUOTA_KEY)
            .await?
            .and_then(|v| serde_json::from_value(v).ok());

        match stored {
            Some(quota) if quota.date == today => Ok(quota.count),
            _ => {
                info!(quota = self.daily_quota, "daily subscription quota reset");
                self.write(self.daily_quota).await?;
                Ok(self.daily_quota)
            }
        }
    }

    async fn write(&self, count: i64) -> Result<()> {
        let value = serde_json::to_value(PersistedQuota {
            date: Utc::now().date_naive().format("%Y-%m-%d").to_string(),
            count,
        })?;
        self.store.setting_set(QUOTA_KEY, &value).await
    }
}
