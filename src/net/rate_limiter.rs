//! Per-source sliding-window rate limiting.
//!
//! Each source keeps a log of the instants at which its recent calls started.
//! A caller may start a call only while fewer than `max_calls` entries fall
//! inside the trailing `period`; otherwise it sleeps until the oldest entry
//! ages out. The log makes the bound hold for *every* window of length
//! `period`, not just aligned ones.

use crate::config::RateLimit;
use crate::models::Source;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use tokio::time::{Instant, sleep_until};
use tracing::{debug, instrument};

#[derive(Debug)]
struct Window {
    limit: RateLimit,
    starts: VecDeque<Instant>,
}

impl Window {
    fn new(limit: RateLimit) -> Self {
        Self {
            limit,
            starts: VecDeque::with_capacity(limit.max_calls as usize),
        }
    }

    /// Reserve a slot at `now`, or report when the next one frees up.
    fn try_reserve(&mut self, now: Instant) -> Result<(), Instant> {
        while let Some(&oldest) = self.starts.front() {
            if now.duration_since(oldest) >= self.limit.period {
                self.starts.pop_front();
            } else {
                break;
            }
        }
        if (self.starts.len() as u32) < self.limit.max_calls {
            self.starts.push_back(now);
            Ok(())
        } else {
            // Non-empty: max_calls is at least 1.
            Err(self.starts[0] + self.limit.period)
        }
    }
}

/// Shared limiter for every source in a run.
#[derive(Debug)]
pub struct RateLimiter {
    windows: Mutex<HashMap<Source, Window>>,
    limits: HashMap<Source, RateLimit>,
    fallback: RateLimit,
}

impl RateLimiter {
    /// `limits` need not cover every source; the rest get
    /// [`RateLimit::PERMISSIVE`].
    pub fn new(limits: HashMap<Source, RateLimit>) -> Self {
        Self {
            windows: Mutex::new(HashMap::new()),
            limits,
            fallback: RateLimit::PERMISSIVE,
        }
    }

    pub fn limit_for(&self, source: Source) -> RateLimit {
        let limit = self.limits.get(&source).copied().unwrap_or(self.fallback);
        RateLimit {
            max_calls: limit.max_calls.max(1),
            period: limit.period,
        }
    }

    /// Wait until one more call for `source` fits in its window, then claim it.
    ///
    /// Only the calling task sleeps; the internal lock is released before
    /// every suspension.
    #[instrument(level = "debug", skip(self))]
    pub async fn acquire(&self, source: Source) {
        loop {
            let next_free = {
                let mut windows = self.windows.lock().unwrap_or_else(|p| p.into_inner());
                let window = windows
                    .entry(source)
                    .or_insert_with(|| Window::new(self.limit_for(source)));
                match window.try_reserve(Instant::now()) {
                    Ok(()) => return,
                    Err(at) => at,
                }
            };
            debug!(%source, wait_ms = next_free.saturating_duration_since(Instant::now()).as_millis() as u64, "Rate limit reached; waiting");
            sleep_until(next_free).await;
        }
    }
}
