//! Cache statistics.
//!
//! Plain atomic counters, independent of every cache lock. Counters wrap on overflow; each wrap is
//! logged and counted. Every increment is mirrored to the `metrics` facade, which keeps its own
//! monotonic totals across resets.

use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use metrics::counter;
use serde::Serialize;
use time::OffsetDateTime;
use tokio::time::Instant;
use tracing::{info, warn};

use super::lock::mutex_lock;

pub(crate) const METRIC_HIT_TOTAL: &str = "rendercache_cache_hit_total";
pub(crate) const METRIC_MISS_TOTAL: &str = "rendercache_cache_miss_total";
pub(crate) const METRIC_EVICT_TOTAL: &str = "rendercache_cache_evict_total";
pub(crate) const METRIC_EXPIRED_TOTAL: &str = "rendercache_cache_expired_total";
pub(crate) const METRIC_INVALIDATED_TOTAL: &str = "rendercache_cache_invalidated_total";

const SOURCE: &str = "cache::stats";

/// Selector family of one invalidation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InvalidationKind {
    Route,
    Tag,
    Pattern,
    Key,
    Clear,
}

impl InvalidationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Route => "route",
            Self::Tag => "tag",
            Self::Pattern => "pattern",
            Self::Key => "key",
            Self::Clear => "clear",
        }
    }
}

#[derive(Debug)]
struct Resets {
    started_at: OffsetDateTime,
    started_instant: Instant,
    last_invalidation: Option<OffsetDateTime>,
}

/// Live counters owned by a cache service.
#[derive(Debug)]
pub struct CacheStatistics {
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    expirations: AtomicU64,
    route_invalidations: AtomicU64,
    tag_invalidations: AtomicU64,
    pattern_invalidations: AtomicU64,
    key_invalidations: AtomicU64,
    clears: AtomicU64,
    invalidated_entries: AtomicU64,
    overflows: AtomicU64,
    reset_threshold: Option<u64>,
    reset_interval: Option<Duration>,
    resets: Mutex<Resets>,
}

/// Point-in-time copy of [`CacheStatistics`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatisticsSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub hit_ratio: f64,
    pub evictions: u64,
    pub expirations: u64,
    pub route_invalidations: u64,
    pub tag_invalidations: u64,
    pub pattern_invalidations: u64,
    pub key_invalidations: u64,
    pub clears: u64,
    pub invalidated_entries: u64,
    pub overflows: u64,
    pub entries: usize,
    pub total_bytes: usize,
    #[serde(with = "time::serde::rfc3339")]
    pub started_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_invalidation: Option<OffsetDateTime>,
}

impl StatisticsSnapshot {
    pub fn invalidations(&self) -> u64 {
        self.route_invalidations
            .wrapping_add(self.tag_invalidations)
            .wrapping_add(self.pattern_invalidations)
            .wrapping_add(self.key_invalidations)
            .wrapping_add(self.clears)
    }
}

impl Default for CacheStatistics {
    fn default() -> Self {
        Self::new(None, None)
    }
}

impl CacheStatistics {
    /// `reset_threshold` resets once hits reach it; `reset_interval` is applied by
    /// [`CacheStatistics::reset_if_due`].
    pub fn new(reset_threshold: Option<u64>, reset_interval: Option<Duration>) -> Self {
        Self {
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            expirations: AtomicU64::new(0),
            route_invalidations: AtomicU64::new(0),
            tag_invalidations: AtomicU64::new(0),
            pattern_invalidations: AtomicU64::new(0),
            key_invalidations: AtomicU64::new(0),
            clears: AtomicU64::new(0),
            invalidated_entries: AtomicU64::new(0),
            overflows: AtomicU64::new(0),
            reset_threshold,
            reset_interval,
            resets: Mutex::new(Resets {
                started_at: OffsetDateTime::now_utc(),
                started_instant: Instant::now(),
                last_invalidation: None,
            }),
        }
    }

    pub fn record_hit(&self) {
        let hits = self.bump(&self.hits, "hits", 1);
        counter!(METRIC_HIT_TOTAL).increment(1);
        if let Some(threshold) = self.reset_threshold
            && hits >= threshold
        {
            info!(hits, threshold, "statistics reset threshold reached");
            self.reset();
        }
    }

    pub fn record_miss(&self) {
        self.bump(&self.misses, "misses", 1);
        counter!(METRIC_MISS_TOTAL).increment(1);
    }

    pub fn record_eviction(&self) {
        self.bump(&self.evictions, "evictions", 1);
        counter!(METRIC_EVICT_TOTAL).increment(1);
    }

    pub fn record_expiration(&self) {
        self.bump(&self.expirations, "expirations", 1);
        counter!(METRIC_EXPIRED_TOTAL).increment(1);
    }

    /// One invalidation of `kind` that removed `entries` values.
    pub fn record_invalidation(&self, kind: InvalidationKind, entries: usize) {
        let counter = match kind {
            InvalidationKind::Route => &self.route_invalidations,
            InvalidationKind::Tag => &self.tag_invalidations,
            InvalidationKind::Pattern => &self.pattern_invalidations,
            InvalidationKind::Key => &self.key_invalidations,
            InvalidationKind::Clear => &self.clears,
        };
        self.bump(counter, kind.as_str(), 1);
        self.bump(&self.invalidated_entries, "invalidated_entries", entries as u64);
        counter!(METRIC_INVALIDATED_TOTAL, "kind" => kind.as_str()).increment(entries as u64);
        mutex_lock(&self.resets, SOURCE, "record_invalidation").last_invalidation =
            Some(OffsetDateTime::now_utc());
    }

    /// Zero every counter and restart the collection period.
    pub fn reset(&self) {
        let mut resets = mutex_lock(&self.resets, SOURCE, "reset");
        for counter in [
            &self.hits,
            &self.misses,
            &self.evictions,
            &self.expirations,
            &self.route_invalidations,
            &self.tag_invalidations,
            &self.pattern_invalidations,
            &self.key_invalidations,
            &self.clears,
            &self.invalidated_entries,
            &self.overflows,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
        resets.started_at = OffsetDateTime::now_utc();
        resets.started_instant = Instant::now();
        resets.last_invalidation = None;
    }

    /// Apply the interval reset when the current period has run its course.
    pub fn reset_if_due(&self) -> bool {
        let Some(interval) = self.reset_interval else {
            return false;
        };
        let started = mutex_lock(&self.resets, SOURCE, "reset_if_due").started_instant;
        if started.elapsed() < interval {
            return false;
        }
        info!(interval_secs = interval.as_secs(), "statistics reset interval elapsed");
        self.reset();
        true
    }

    /// Copy the counters; `entries` and `total_bytes` come from the store.
    pub fn snapshot(&self, entries: usize, total_bytes: usize) -> StatisticsSnapshot {
        let (started_at, last_invalidation) = {
            let resets = mutex_lock(&self.resets, SOURCE, "snapshot");
            (resets.started_at, resets.last_invalidation)
        };
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let lookups = hits.saturating_add(misses);
        StatisticsSnapshot {
            hits,
            misses,
            hit_ratio: if lookups == 0 {
                0.0
            } else {
                hits as f64 / lookups as f64
            },
            evictions: self.evictions.load(Ordering::Relaxed),
            expirations: self.expirations.load(Ordering::Relaxed),
            route_invalidations: self.route_invalidations.load(Ordering::Relaxed),
            tag_invalidations: self.tag_invalidations.load(Ordering::Relaxed),
            pattern_invalidations: self.pattern_invalidations.load(Ordering::Relaxed),
            key_invalidations: self.key_invalidations.load(Ordering::Relaxed),
            clears: self.clears.load(Ordering::Relaxed),
            invalidated_entries: self.invalidated_entries.load(Ordering::Relaxed),
            overflows: self.overflows.load(Ordering::Relaxed),
            entries,
            total_bytes,
            started_at,
            last_invalidation,
        }
    }

    /// Wrapping add; returns the new value.
    fn bump(&self, counter: &AtomicU64, name: &'static str, by: u64) -> u64 {
        let previous = counter.fetch_add(by, Ordering::Relaxed);
        let (next, wrapped) = previous.overflowing_add(by);
        if wrapped {
            self.overflows.fetch_add(1, Ordering::Relaxed);
            warn!(counter = name, "statistics counter wrapped around");
        }
        next
    }
}
