//! GitHub API rate-limit tracking.
//!
//! Reads `X-RateLimit-Remaining` / `X-RateLimit-Reset` (or the standardised
//! `RateLimit-Remaining` / `RateLimit-Reset`) from every API response and
//! decides whether the next page request should wait for the window to reset.
//! Waiting is the only reaction; requests are never re-issued.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use super::ResolveError;

/// Rate-limit state shared by every request of a run.
#[derive(Debug, Clone)]
pub struct RateLimitState {
    /// Remaining API calls before the rate limit resets.
    remaining: Arc<AtomicU64>,
    /// Unix timestamp at which the rate limit window resets.
    reset_at: Arc<AtomicU64>,
}

impl Default for RateLimitState {
    fn default() -> Self {
        Self::new()
    }
}

impl RateLimitState {
    pub fn new() -> Self {
        Self {
            remaining: Arc::new(AtomicU64::new(u64::MAX)),
            reset_at: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Remaining calls, or `None` before any response carried the header.
    pub fn remaining(&self) -> Option<u64> {
        match self.remaining.load(Ordering::Relaxed) {
            u64::MAX => None,
            r => Some(r),
        }
    }

    pub fn reset_at(&self) -> u64 {
        self.reset_at.load(Ordering::Relaxed)
    }

    /// Update state from HTTP response headers.
    pub fn update_from_headers(&self, headers: &reqwest::header::HeaderMap) {
        let remaining = header_u64(headers, "X-RateLimit-Remaining", "RateLimit-Remaining");
        let reset = header_u64(headers, "X-RateLimit-Reset", "RateLimit-Reset");

        if let Some(r) = remaining {
            self.remaining.store(r, Ordering::Relaxed);
        }
        if let Some(r) = reset {
            self.reset_at.store(r, Ordering::Relaxed);
        }
    }

    /// How long to wait before the next request so that at least `buffer`
    /// calls stay in reserve.  `None` means go ahead.
    pub fn delay_needed(&self, buffer: u32, now: u64) -> Option<Duration> {
        let remaining = self.remaining()?;
        let reset = self.reset_at();
        (remaining < u64::from(buffer) && reset > now).then(|| Duration::from_secs(reset - now))
    }

    /// If the remaining calls are below `buffer`, sleep until the rate-limit
    /// window resets.  Returns `Ok(true)` if the caller had to wait.
    ///
    /// A reset further away than `max_wait` is not waited for: the request
    /// fails with [`ResolveError::Remote`] so one exhausted quota cannot
    /// stall the run.
    pub async fn wait_if_needed(&self, buffer: u32, max_wait: Duration) -> Result<bool, ResolveError> {
        let now = u64::try_from(chrono::Utc::now().timestamp()).unwrap_or(0);
        match self.delay_needed(buffer, now) {
            Some(wait) if wait > max_wait => {
                warn!(
                    remaining = self.remaining(),
                    reset_in_secs = wait.as_secs(),
                    max_wait_secs = max_wait.as_secs(),
                    "rate limit exhausted; not waiting for reset"
                );
                Err(ResolveError::Remote(format!(
                    "rate limit exhausted, resets in {}s",
                    wait.as_secs()
                )))
            }
            Some(wait) => {
                info!(
                    remaining = self.remaining(),
                    reset_in_secs = wait.as_secs(),
                    buffer,
                    "self-throttling: rate limit approaching"
                );
                tokio::time::sleep(wait).await;
                Ok(true)
            }
            None => {
                debug!(remaining = self.remaining(), buffer, "rate limit OK");
                Ok(false)
            }
        }
    }
}

fn header_u64(headers: &reqwest::header::HeaderMap, name: &str, fallback: &str) -> Option<u64> {
    headers
        .get(name)
        .or_else(|| headers.get(fallback))
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
}
