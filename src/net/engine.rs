//! Fetch engine: cache, rate limit, proxy rotation and bounded retries around
//! a [`Transport`].
//!
//! # Retry Strategy
//!
//! - At most `max_tries` attempts per task, counting the first
//! - Exponential backoff from `base_delay`, capped at `max_delay`
//! - Random jitter (0-250ms) added to prevent thundering herd
//! - `429` waits at least the server's `Retry-After` (default 60s)
//! - Any other non-2xx status is final and costs no further attempts

use crate::models::{FetchOutcome, FetchTask, Source};
use crate::net::cache::{CachedPage, Lookup, ResponseCache};
use crate::net::proxy::ProxyRotator;
use crate::net::rate_limiter::RateLimiter;
use crate::net::transport::Transport;
use crate::utils::truncate_for_log;
use rand::{Rng, rng};
use std::collections::BTreeSet;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::{Instant, sleep, timeout};
use tracing::{debug, error, info, instrument, warn};

/// Knobs for [`FetchEngine`]'s retry loop.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts per task, including the first.
    pub max_tries: u32,
    /// Initial delay between retries (doubles with each attempt).
    pub base_delay: Duration,
    /// Maximum delay cap to prevent excessive waiting.
    pub max_delay: Duration,
    /// Wait used for a `429` without a usable `Retry-After`.
    pub default_retry_after: Duration,
    /// Per-request timeout.
    pub request_timeout: Duration,
    /// Upper bound of the random jitter added to each backoff.
    pub max_jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_tries: 3,
            base_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(30),
            default_retry_after: Duration::from_secs(60),
            request_timeout: Duration::from_secs(30),
            max_jitter: Duration::from_millis(250),
        }
    }
}

impl RetryPolicy {
    /// Delay before the attempt after attempt number `attempt` (1-based):
    /// `min(base * 2^(attempt-1), max_delay) + jitter`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(31);
        let delay = self.base_delay.saturating_mul(1 << exp).min(self.max_delay);
        let jitter_cap = self.max_jitter.as_millis() as u64;
        let jitter_ms = if jitter_cap == 0 { 0 } else { rng().random_range(0..=jitter_cap) };
        delay + Duration::from_millis(jitter_ms)
    }
}

/// URLs whose task ended in a permanent failure, in sorted order.
#[derive(Debug, Default)]
pub struct FailedUrls {
    urls: Mutex<BTreeSet<String>>,
}

impl FailedUrls {
    pub fn record(&self, url: &str) {
        self.urls
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .insert(url.to_string());
    }

    pub fn contains(&self, url: &str) -> bool {
        self.urls.lock().unwrap_or_else(|p| p.into_inner()).contains(url)
    }

    pub fn snapshot(&self) -> Vec<String> {
        self.urls
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .iter()
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.urls.lock().unwrap_or_else(|p| p.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Issues fetches with cache, rate-limit, proxy and retry handling.
///
/// All shared state lives here for the lifetime of one run; create a fresh
/// engine per run.
#[derive(Debug)]
pub struct FetchEngine<T> {
    transport: T,
    limiter: RateLimiter,
    proxies: ProxyRotator,
    cache: ResponseCache,
    failed: FailedUrls,
    policy: RetryPolicy,
}

impl<T: Transport> FetchEngine<T> {
    pub fn new(transport: T, limiter: RateLimiter, proxies: ProxyRotator, policy: RetryPolicy) -> Self {
        Self {
            transport,
            limiter,
            proxies,
            cache: ResponseCache::new(),
            failed: FailedUrls::default(),
            policy,
        }
    }

    pub fn failed_urls(&self) -> &FailedUrls {
        &self.failed
    }

    pub fn cache(&self) -> &ResponseCache {
        &self.cache
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Fetch `task.url` to a terminal outcome.
    ///
    /// Returns `Success` (possibly from cache) or `PermanentFailure`; the
    /// latter is also recorded in [`FetchEngine::failed_urls`].
    #[instrument(level = "info", skip_all, fields(url = %task.url, source = %task.source))]
    pub async fn fetch(&self, task: &mut FetchTask) -> FetchOutcome {
        let url = task.url.clone();
        let t0 = Instant::now();
        let in_flight = &mut *task;
        let result = self
            .cache
            .get_or_try_fetch(&url, move || {
                let in_flight = in_flight;
                self.fetch_with_retries(in_flight)
            })
            .await;

        match result {
            Ok((page, lookup)) => {
                match lookup {
                    Lookup::Hit => debug!("Served from cache"),
                    Lookup::Fetched => info!(
                        attempts = task.attempts,
                        status = page.status,
                        bytes = page.payload.len(),
                        elapsed_ms = t0.elapsed().as_millis() as u64,
                        "Fetched page"
                    ),
                }
                FetchOutcome::Success {
                    payload: page.payload,
                    status: page.status,
                }
            }
            Err(cause) => {
                self.failed.record(&url);
                error!(attempts = task.attempts, %cause, "Fetch failed permanently");
                FetchOutcome::PermanentFailure { cause }
            }
        }
    }

    /// Convenience wrapper for one-off pages such as listing indexes.
    pub async fn fetch_page(&self, source: Source, url: &str) -> Result<String, String> {
        let mut task = FetchTask::new(source, url);
        match self.fetch(&mut task).await {
            FetchOutcome::Success { payload, .. } => Ok(payload),
            FetchOutcome::PermanentFailure { cause }
            | FetchOutcome::TransientFailure { cause } => Err(cause),
            FetchOutcome::RateLimited { retry_after } => Err(format!("rate limited for {retry_after:?}")),
        }
    }

    async fn fetch_with_retries(&self, task: &mut FetchTask) -> Result<CachedPage, String> {
        loop {
            task.attempts += 1;
            let (wait, cause) = match self.attempt(task).await {
                FetchOutcome::Success { payload, status } => {
                    return Ok(CachedPage { payload, status });
                }
                FetchOutcome::PermanentFailure { cause } => return Err(cause),
                FetchOutcome::RateLimited { retry_after } => (
                    retry_after.max(self.policy.backoff(task.attempts)),
                    format!("rate limited (retry after {}s)", retry_after.as_secs()),
                ),
                FetchOutcome::TransientFailure { cause } => (self.policy.backoff(task.attempts), cause),
            };

            if task.attempts >= self.policy.max_tries {
                return Err(format!("gave up after {} attempts: {cause}", task.attempts));
            }
            warn!(
                attempt = task.attempts,
                max = self.policy.max_tries,
                ?wait,
                %cause,
                "Attempt failed; backing off"
            );
            sleep(wait).await;
        }
    }

    /// One attempt: rate-limit slot, proxy pick, request, classification.
    async fn attempt(&self, task: &mut FetchTask) -> FetchOutcome {
        self.limiter.acquire(task.source).await;
        task.proxy = self.proxies.next().map(str::to_owned);

        let request = self.transport.get(&task.url, task.proxy.as_deref());
        let response = match timeout(self.policy.request_timeout, request).await {
            Err(_) => {
                return FetchOutcome::TransientFailure {
                    cause: format!("timed out after {:?}", self.policy.request_timeout),
                };
            }
            Ok(Err(e)) if e.is_transient() => {
                return FetchOutcome::TransientFailure { cause: e.to_string() };
            }
            Ok(Err(e)) => return FetchOutcome::PermanentFailure { cause: e.to_string() },
            Ok(Ok(response)) => response,
        };

        debug!(status = response.status, proxy = ?task.proxy, attempt = task.attempts, "Classifying response");
        match response.status {
            200..=299 => FetchOutcome::Success {
                payload: response.body,
                status: response.status,
            },
            429 => FetchOutcome::RateLimited {
                retry_after: response.retry_after.unwrap_or(self.policy.default_retry_after),
            },
            status => {
                debug!(status, body = %truncate_for_log(&response.body, 200), "Non-retryable status");
                FetchOutcome::PermanentFailure {
                    cause: format!("HTTP {status}"),
                }
            }
        }
    }
}
