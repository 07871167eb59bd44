//! Sliding-window rate limiting per key.
//!
//! Every admitted attempt is remembered individually, so the window slides with each call
//! instead of resetting on fixed bucket boundaries. A key's deque is only ever touched under the
//! shard lock of its map entry, which makes per-key decisions linearizable.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use metrics::counter;
use time::{OffsetDateTime, PrimitiveDateTime};
use tokio::time::Instant;
use tracing::debug;

use super::error::CacheError;

const COMPONENT: &str = "SlidingWindowRateLimiter";
const METRIC_RATE_LIMITED_TOTAL: &str = "rendercache_rate_limited_total";

/// Outcome of one [`SlidingWindowRateLimiter::is_allowed`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateDecision {
    pub allowed: bool,
    /// Attempts still available in the current window after this call.
    pub remaining: u32,
    /// When the window admits a new attempt again.
    pub reset_at: OffsetDateTime,
}

#[derive(Debug)]
struct RateWindow {
    hits: VecDeque<Instant>,
    window: Duration,
}

impl RateWindow {
    fn new(window: Duration) -> Self {
        Self {
            hits: VecDeque::new(),
            window,
        }
    }

    /// Drop attempts at or before `now - window`; `now` itself is inside the window.
    fn trim(&mut self, now: Instant) {
        while let Some(oldest) = self.hits.front() {
            if now.saturating_duration_since(*oldest) >= self.window {
                self.hits.pop_front();
            } else {
                break;
            }
        }
    }

    fn is_idle(&self, now: Instant) -> bool {
        self.hits
            .back()
            .is_none_or(|newest| now.saturating_duration_since(*newest) >= self.window)
    }
}

#[derive(Debug, Clone, Default)]
pub struct SlidingWindowRateLimiter {
    windows: Arc<DashMap<String, RateWindow>>,
    disposed: Arc<AtomicBool>,
}

impl SlidingWindowRateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decide whether one more attempt for `key` fits into `max_attempts` per `window_seconds`.
    pub fn is_allowed(
        &self,
        key: &str,
        max_attempts: u32,
        window_seconds: u64,
    ) -> Result<RateDecision, CacheError> {
        self.ensure_live()?;
        if key.is_empty() {
            return Err(CacheError::invalid_argument("key", "must not be empty"));
        }
        if max_attempts == 0 {
            return Err(CacheError::invalid_argument(
                "max_attempts",
                "must be greater than zero",
            ));
        }
        if window_seconds == 0 {
            return Err(CacheError::invalid_argument(
                "window_seconds",
                "must be greater than zero",
            ));
        }

        let window = Duration::from_secs(window_seconds);
        let now = Instant::now();
        let wall_now = OffsetDateTime::now_utc();
        let limit = max_attempts as usize;

        let (allowed, remaining, reset_in) = {
            let mut entry = self
                .windows
                .entry(key.to_string())
                .or_insert_with(|| RateWindow::new(window));
            let state = entry.value_mut();
            state.window = window;
            state.trim(now);

            let count = state.hits.len();
            let (allowed, remaining) = if count < limit {
                state.hits.push_back(now);
                (true, (limit - count - 1) as u32)
            } else {
                (false, 0)
            };

            let reset_in = state
                .hits
                .front()
                .map(|oldest| window.saturating_sub(now.saturating_duration_since(*oldest)))
                .unwrap_or(window);
            (allowed, remaining, reset_in)
        };

        if !allowed {
            debug!(key, max_attempts, window_seconds, "rate limit exceeded");
            counter!(METRIC_RATE_LIMITED_TOTAL).increment(1);
        }

        Ok(RateDecision {
            allowed,
            remaining,
            reset_at: reset_at(wall_now, reset_in),
        })
    }

    /// Forget the history of one key.
    pub fn reset(&self, key: &str) -> Result<(), CacheError> {
        self.ensure_live()?;
        self.windows.remove(key);
        Ok(())
    }

    /// Forget the history of every key.
    pub fn clear(&self) -> Result<(), CacheError> {
        self.ensure_live()?;
        self.windows.clear();
        Ok(())
    }

    /// Drop keys whose whole window has elapsed. Returns the number of keys removed.
    pub fn purge_idle(&self) -> Result<usize, CacheError> {
        self.ensure_live()?;
        let now = Instant::now();
        let before = self.windows.len();
        self.windows.retain(|_, state| !state.is_idle(now));
        Ok(before.saturating_sub(self.windows.len()))
    }

    /// Number of keys with retained history.
    pub fn tracked_keys(&self) -> usize {
        self.windows.len()
    }

    /// Tear the limiter down; every later call fails with `ObjectDisposed`.
    pub fn dispose(&self) {
        if !self.disposed.swap(true, Ordering::AcqRel) {
            self.windows.clear();
        }
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    fn ensure_live(&self) -> Result<(), CacheError> {
        if self.is_disposed() {
            return Err(CacheError::ObjectDisposed {
                component: COMPONENT,
            });
        }
        Ok(())
    }
}

/// `now + reset_in`, clamped to the latest representable timestamp.
fn reset_at(now: OffsetDateTime, reset_in: Duration) -> OffsetDateTime {
    time::Duration::try_from(reset_in)
        .ok()
        .and_then(|delta| now.checked_add(delta))
        .unwrap_or(PrimitiveDateTime::MAX.assume_utc())
}
