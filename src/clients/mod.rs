pub mod emby;
pub mod moviepilot;
pub mod telegram;
pub mod tmdb;

use std::future::Future;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::debug;

/// Retry attempts for read-only list fetches. Mutations are never retried.
pub const LIST_FETCH_ATTEMPTS: u32 = 3;

/// Build a reqwest client with the given timeout, honoring the configured
/// proxy when one is set.
pub fn build_http_client(timeout: Duration, proxy_url: Option<&str>) -> Result<reqwest::Client> {
    let mut builder = reqwest::Client::builder().timeout(timeout);
    if let Some(proxy) = proxy_url.filter(|p| !p.is_empty()) {
        builder = builder.proxy(reqwest::Proxy::all(proxy).context("Invalid proxy URL")?);
    }
    builder.build().context("Failed to build HTTP client")
}

/// Run a fallible fetch up to `attempts` times with a growing backoff.
/// Timeouts and 5xx responses surface as errors from the closure; whatever
/// the last attempt returned is what the caller sees.
pub async fn with_retries<T, F, Fut>(attempts: u32, operation: F) -> Result<T>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut last_error = None;
    for attempt in 1..=attempts.max(1) {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(e) => {
                debug!(attempt, "fetch attempt failed: {e}");
                last_error = Some(e);
                if attempt < attempts {
                    tokio::time::sleep(Duration::from_millis(500 * u64::from(attempt))).await;
                }
            }
        }
    }
    Err(last_error.unwrap_or_else(|| anyhow::anyhow!("no attempts were made")))
}
