//! Cache configuration.
//!
//! Tunes storage bounds, pattern guards, lock waits, regeneration limits and statistics resets.
//! Built from resolved [`Settings`](crate::config::Settings) or used directly with `Default`.

use std::num::NonZeroUsize;
use std::time::Duration;

use serde::{Deserialize, Serialize};

// Default values for cache configuration
const DEFAULT_MAX_ENTRY_COUNT: usize = 1000;
const DEFAULT_MAX_ENTRY_BYTES: usize = 1024 * 1024;
const DEFAULT_TTL_MS: u64 = 60_000;
const DEFAULT_MAX_PATTERN_LENGTH: usize = 256;
const DEFAULT_MAX_PATTERN_WILDCARDS: usize = 10;
const DEFAULT_PATTERN_MATCH_TIMEOUT_MS: u64 = 100;
const DEFAULT_PATTERN_MAX_REMOVALS: usize = 1000;
const DEFAULT_LOCK_TIMEOUT_MS: u64 = 30_000;
const DEFAULT_REGENERATION_MAX_ATTEMPTS: u32 = 60;
const DEFAULT_REGENERATION_WINDOW_SECS: u64 = 60;
const DEFAULT_MAINTENANCE_INTERVAL_MS: u64 = 30_000;

/// Cache configuration.
///
/// Zero disables the optional bounds (`max_entry_count`, `max_entry_bytes`, `default_ttl_ms`,
/// `stats_reset_threshold`, `stats_reset_interval_secs`).
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Maximum resident entries before LRU eviction kicks in.
    pub max_entry_count: usize,
    /// Largest accepted value in bytes.
    pub max_entry_bytes: usize,
    /// Absolute TTL applied when a population does not set its own expiry.
    pub default_ttl_ms: u64,
    /// Longest accepted invalidation pattern.
    pub max_pattern_length: usize,
    /// Most `*` wildcards accepted in one pattern.
    pub max_pattern_wildcards: usize,
    /// Evaluation budget per candidate key for general wildcard patterns.
    pub pattern_match_timeout_ms: u64,
    /// Default cap on removals per pattern invalidation.
    pub pattern_max_removals: usize,
    /// Default wait for the per-key population lock.
    pub lock_timeout_ms: u64,
    /// Regenerations allowed per key within the regeneration window.
    pub regeneration_max_attempts: u32,
    /// Length of the regeneration sliding window in seconds.
    pub regeneration_window_secs: u64,
    /// Reset statistics once the hit counter reaches this value.
    pub stats_reset_threshold: u64,
    /// Reset statistics on this cadence.
    pub stats_reset_interval_secs: u64,
    /// Cadence of the background maintenance sweep.
    pub maintenance_interval_ms: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entry_count: DEFAULT_MAX_ENTRY_COUNT,
            max_entry_bytes: DEFAULT_MAX_ENTRY_BYTES,
            default_ttl_ms: DEFAULT_TTL_MS,
            max_pattern_length: DEFAULT_MAX_PATTERN_LENGTH,
            max_pattern_wildcards: DEFAULT_MAX_PATTERN_WILDCARDS,
            pattern_match_timeout_ms: DEFAULT_PATTERN_MATCH_TIMEOUT_MS,
            pattern_max_removals: DEFAULT_PATTERN_MAX_REMOVALS,
            lock_timeout_ms: DEFAULT_LOCK_TIMEOUT_MS,
            regeneration_max_attempts: DEFAULT_REGENERATION_MAX_ATTEMPTS,
            regeneration_window_secs: DEFAULT_REGENERATION_WINDOW_SECS,
            stats_reset_threshold: 0,
            stats_reset_interval_secs: 0,
            maintenance_interval_ms: DEFAULT_MAINTENANCE_INTERVAL_MS,
        }
    }
}

impl From<&crate::config::Settings> for CacheConfig {
    fn from(settings: &crate::config::Settings) -> Self {
        Self {
            max_entry_count: settings.cache.max_entry_count,
            max_entry_bytes: settings.cache.max_entry_bytes,
            default_ttl_ms: settings.cache.default_ttl.as_millis() as u64,
            max_pattern_length: settings.cache.max_pattern_length.get(),
            max_pattern_wildcards: settings.cache.max_pattern_wildcards,
            pattern_match_timeout_ms: settings.cache.pattern_match_timeout.as_millis() as u64,
            pattern_max_removals: settings.cache.pattern_max_removals.get(),
            lock_timeout_ms: settings.lock.timeout.as_millis() as u64,
            regeneration_max_attempts: settings.rate_limit.max_attempts.get(),
            regeneration_window_secs: u64::from(settings.rate_limit.window_seconds.get()),
            stats_reset_threshold: settings.stats.reset_threshold,
            stats_reset_interval_secs: settings.stats.reset_interval.as_secs(),
            maintenance_interval_ms: settings.cache.maintenance_interval.as_millis() as u64,
        }
    }
}

impl CacheConfig {
    /// Count limit for LRU eviction; `None` when unbounded.
    pub fn max_entry_count_non_zero(&self) -> Option<NonZeroUsize> {
        NonZeroUsize::new(self.max_entry_count)
    }

    /// Size limit per value; `None` when unbounded.
    pub fn max_entry_bytes_non_zero(&self) -> Option<NonZeroUsize> {
        NonZeroUsize::new(self.max_entry_bytes)
    }

    pub fn default_ttl(&self) -> Option<Duration> {
        (self.default_ttl_ms > 0).then(|| Duration::from_millis(self.default_ttl_ms))
    }

    pub fn pattern_match_timeout(&self) -> Duration {
        Duration::from_millis(self.pattern_match_timeout_ms.max(1))
    }

    /// Returns the pattern removal cap, clamping to 1 if zero.
    pub fn pattern_max_removals_non_zero(&self) -> NonZeroUsize {
        NonZeroUsize::new(self.pattern_max_removals).unwrap_or(NonZeroUsize::MIN)
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    pub fn stats_reset_threshold(&self) -> Option<u64> {
        (self.stats_reset_threshold > 0).then_some(self.stats_reset_threshold)
    }

    pub fn stats_reset_interval(&self) -> Option<Duration> {
        (self.stats_reset_interval_secs > 0)
            .then(|| Duration::from_secs(self.stats_reset_interval_secs))
    }

    /// Returns the maintenance cadence, clamping to one millisecond if zero.
    pub fn maintenance_interval(&self) -> Duration {
        Duration::from_millis(self.maintenance_interval_ms.max(1))
    }
}
