//! Cache orchestration.
//!
//! [`CacheService`] wires the keyed lock, the store, the invalidation index, the regeneration
//! limiter and statistics into the read / populate / invalidate surface used by the HTTP layer.
//! Populations register in the index before the value is stored, so every stored value is
//! reachable by route and tag sweeps.

use std::future::Future;
use std::sync::{Arc, Weak};
use std::time::Duration;

use bytes::Bytes;
use metrics::{counter, gauge, histogram};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, instrument, warn};

use super::config::CacheConfig;
use super::error::{CacheError, PopulateError};
use super::keyed_lock::KeyedAsyncLock;
use super::rate_limit::{RateDecision, SlidingWindowRateLimiter};
use super::registry::InvalidationIndex;
use super::stats::{CacheStatistics, InvalidationKind, StatisticsSnapshot};
use super::store::{BoundedCacheStore, EntryOptions, EvictionObserver, EvictionReason};

const METRIC_POPULATE_MS: &str = "rendercache_cache_populate_ms";
const METRIC_LOCK_TIMEOUT_TOTAL: &str = "rendercache_lock_timeout_total";
const METRIC_ENTRIES: &str = "rendercache_cache_entries";

/// A freshly rendered value together with its invalidation metadata.
#[derive(Debug, Clone)]
pub struct Population {
    pub value: Bytes,
    /// Route template the value was rendered for.
    pub route: String,
    pub tags: Vec<String>,
    /// Expiry settings; the configured default TTL applies when neither expiry is set.
    pub options: EntryOptions,
}

impl Population {
    pub fn new(route: impl Into<String>, value: impl Into<Bytes>) -> Self {
        Self {
            value: value.into(),
            route: route.into(),
            tags: Vec::new(),
            options: EntryOptions::default(),
        }
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_options(mut self, options: EntryOptions) -> Self {
        self.options = options;
        self
    }
}

/// Work done by one maintenance pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MaintenanceReport {
    pub expired: usize,
    pub idle_windows: usize,
    pub stats_reset: bool,
}

/// Owns one cache instance and its collaborators.
pub struct CacheService {
    config: CacheConfig,
    store: Arc<BoundedCacheStore>,
    index: Arc<InvalidationIndex>,
    locks: KeyedAsyncLock,
    limiter: SlidingWindowRateLimiter,
    stats: Arc<CacheStatistics>,
}

impl CacheService {
    pub fn new(config: CacheConfig) -> Self {
        let store = Arc::new(BoundedCacheStore::from_config(&config));
        let index = Arc::new(InvalidationIndex::new());
        let stats = Arc::new(CacheStatistics::new(
            config.stats_reset_threshold(),
            config.stats_reset_interval(),
        ));
        store.set_observer(Arc::new(EvictionBookkeeper {
            store: Arc::downgrade(&store),
            index: Arc::downgrade(&index),
            stats: Arc::downgrade(&stats),
        }));

        Self {
            config,
            store,
            index,
            locks: KeyedAsyncLock::new(),
            limiter: SlidingWindowRateLimiter::new(),
            stats,
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn store(&self) -> &BoundedCacheStore {
        &self.store
    }

    pub fn index(&self) -> &InvalidationIndex {
        &self.index
    }

    pub fn locks(&self) -> &KeyedAsyncLock {
        &self.locks
    }

    pub fn limiter(&self) -> &SlidingWindowRateLimiter {
        &self.limiter
    }

    /// Read a cached value, counting the lookup as a hit or a miss.
    pub fn get_cached_value(&self, key: &str) -> Option<Bytes> {
        let value = self.store.get(key);
        if value.is_some() {
            self.stats.record_hit();
        } else {
            self.stats.record_miss();
        }
        value
    }

    /// Populate `key` at most once across concurrent callers.
    ///
    /// The first caller runs `factory`; callers that waited on the lock get the stored value
    /// without rendering again. A [`CacheError::LockTimeout`] means the caller should render
    /// uncached. Cancellation only interrupts the wait. Once the lock is held the factory runs
    /// on its own task, so it completes and stores its value even if this future is dropped.
    #[instrument(skip_all, fields(key = %key))]
    pub async fn populate_once<F, Fut, E>(
        &self,
        key: &str,
        timeout: Duration,
        cancel: &CancellationToken,
        factory: F,
    ) -> Result<Bytes, PopulateError<E>>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<Population, E>> + Send + 'static,
        E: Send + 'static,
    {
        let guard = self
            .locks
            .acquire(key, timeout, cancel)
            .await
            .inspect_err(|err| {
                if matches!(err, CacheError::LockTimeout { .. }) {
                    counter!(METRIC_LOCK_TIMEOUT_TOTAL).increment(1);
                    warn!(timeout_ms = timeout.as_millis() as u64, "population lock timed out");
                }
            })?;

        if let Some(value) = self.store.get(key) {
            debug!(outcome = "coalesced", "value stored by a concurrent population");
            return Ok(value);
        }

        let committer = self.committer();
        let owned_key = key.to_string();
        let population = tokio::spawn(
            async move {
                let _guard = guard;
                let started = Instant::now();
                let population = factory().await.map_err(PopulateError::Factory)?;
                histogram!(METRIC_POPULATE_MS).record(started.elapsed().as_secs_f64() * 1000.0);

                let value = committer.commit(&owned_key, population)?;
                debug!(outcome = "populated", bytes = value.len(), "value stored");
                Ok::<_, PopulateError<E>>(value)
            }
            .in_current_span(),
        );

        match population.await {
            Ok(outcome) => outcome,
            Err(err) if err.is_panic() => std::panic::resume_unwind(err.into_panic()),
            Err(err) => {
                warn!(error = %err, "population task did not finish");
                Err(CacheError::OperationCancelled {
                    key: key.to_string(),
                }
                .into())
            }
        }
    }

    /// Store a rendered value without taking the population lock.
    pub fn put(&self, key: &str, population: Population) -> Result<(), CacheError> {
        self.committer().commit(key, population).map(|_| ())
    }

    /// Apply the configured regeneration limit to `key`.
    pub fn check_rate(&self, key: &str) -> Result<RateDecision, CacheError> {
        self.limiter.is_allowed(
            key,
            self.config.regeneration_max_attempts,
            self.config.regeneration_window_secs,
        )
    }

    pub fn invalidate_route(&self, route: &str) -> usize {
        let sweep = self.index.invalidate_route(route, self.store.as_ref());
        self.stats
            .record_invalidation(InvalidationKind::Route, sweep.removed);
        self.publish_entries();
        info!(route, removed = sweep.removed, deferred = sweep.deferred, "invalidated route");
        sweep.removed
    }

    pub fn invalidate_tag(&self, tag: &str) -> usize {
        let sweep = self.index.invalidate_tag(tag, self.store.as_ref());
        self.stats
            .record_invalidation(InvalidationKind::Tag, sweep.removed);
        self.publish_entries();
        info!(tag, removed = sweep.removed, deferred = sweep.deferred, "invalidated tag");
        sweep.removed
    }

    /// Remove keys matching `pattern`; `max_count` defaults to the configured cap.
    pub fn invalidate_pattern(
        &self,
        pattern: &str,
        max_count: Option<usize>,
    ) -> Result<usize, CacheError> {
        let max_count =
            max_count.unwrap_or_else(|| self.config.pattern_max_removals_non_zero().get());
        let removed = self.store.remove_matching(pattern, max_count)?;
        for key in &removed {
            self.index
                .forget_if_absent(key, |key| self.store.contains(key));
        }
        self.stats
            .record_invalidation(InvalidationKind::Pattern, removed.len());
        self.publish_entries();
        info!(pattern, removed = removed.len(), "invalidated pattern");
        Ok(removed.len())
    }

    pub fn invalidate_key(&self, key: &str) -> bool {
        let removed = self.store.remove(key);
        self.index
            .forget_if_absent(key, |key| self.store.contains(key));
        self.stats
            .record_invalidation(InvalidationKind::Key, usize::from(removed));
        self.publish_entries();
        removed
    }

    /// Drop every cached value and every index row no population is still storing.
    pub fn clear(&self) {
        let entries = self.store.len();
        self.store.clear();
        self.index.clear(|key| self.store.contains(key));
        self.stats
            .record_invalidation(InvalidationKind::Clear, entries);
        self.publish_entries();
        info!(entries, "cache cleared");
    }

    pub fn statistics(&self) -> StatisticsSnapshot {
        self.stats
            .snapshot(self.store.len(), self.store.total_bytes())
    }

    pub fn reset_statistics(&self) {
        self.stats.reset();
    }

    /// One pass of background upkeep.
    pub fn run_maintenance(&self) -> MaintenanceReport {
        let expired = self.store.purge_expired();
        let idle_windows = self.limiter.purge_idle().unwrap_or_else(|err| {
            debug!(error = %err, "skipping rate window purge");
            0
        });
        let stats_reset = self.stats.reset_if_due();
        self.publish_entries();
        let report = MaintenanceReport {
            expired,
            idle_windows,
            stats_reset,
        };
        debug!(?report, "cache maintenance pass");
        report
    }

    /// Run [`run_maintenance`](Self::run_maintenance) on the configured cadence until
    /// `shutdown` fires or the service is dropped.
    pub fn spawn_maintenance(self: &Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
        let service = Arc::downgrade(self);
        let period = self.config.maintenance_interval();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await; // Skip the first immediate tick
            loop {
                tokio::select! {
                    biased;
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                let Some(service) = service.upgrade() else {
                    break;
                };
                service.run_maintenance();
            }
            debug!("cache maintenance stopped");
        })
    }

    /// Tear down the regeneration limiter; later `check_rate` calls fail with `ObjectDisposed`.
    pub fn dispose(&self) {
        self.limiter.dispose();
    }

    fn committer(&self) -> Committer {
        Committer {
            store: Arc::clone(&self.store),
            index: Arc::clone(&self.index),
            default_ttl: self.config.default_ttl(),
        }
    }

    fn publish_entries(&self) {
        publish_entries(&self.store);
    }
}

impl Drop for CacheService {
    fn drop(&mut self) {
        self.limiter.dispose();
    }
}

/// What a population needs to store its value once it outlives the caller's task.
struct Committer {
    store: Arc<BoundedCacheStore>,
    index: Arc<InvalidationIndex>,
    default_ttl: Option<Duration>,
}

impl Committer {
    /// Register `key` in the index, then store it, then settle the registration.
    fn commit(&self, key: &str, population: Population) -> Result<Bytes, CacheError> {
        let Population {
            value,
            route,
            tags,
            mut options,
        } = population;
        options.tags.extend(tags);
        options.tags.sort_unstable();
        options.tags.dedup();
        if options.absolute_expiry.is_none() && options.sliding_expiry.is_none() {
            options.absolute_expiry = self.default_ttl;
        }

        let registration = self.index.register(&route, key, &options.tags)?;
        let stored = self.store.set(key, value.clone(), options);
        drop(registration);

        if let Err(err) = stored {
            self.index
                .forget_if_absent(key, |key| self.store.contains(key));
            return Err(err);
        }
        publish_entries(&self.store);
        Ok(value)
    }
}

fn publish_entries(store: &BoundedCacheStore) {
    gauge!(METRIC_ENTRIES).set(store.len() as f64);
}

/// Counts automatic removals and prunes the index rows they leave behind.
///
/// Explicit removals and replacements are ignored: their callers settle the index themselves,
/// and sweeps call into the store while holding an index row.
struct EvictionBookkeeper {
    store: Weak<BoundedCacheStore>,
    index: Weak<InvalidationIndex>,
    stats: Weak<CacheStatistics>,
}

impl EvictionObserver for EvictionBookkeeper {
    fn on_evicted(&self, key: &str, reason: EvictionReason) {
        match reason {
            EvictionReason::Removed | EvictionReason::Replaced => return,
            EvictionReason::Capacity => {
                if let Some(stats) = self.stats.upgrade() {
                    stats.record_eviction();
                }
            }
            EvictionReason::Expired => {
                if let Some(stats) = self.stats.upgrade() {
                    stats.record_expiration();
                }
            }
            EvictionReason::TokenExpired => {}
        }

        if let (Some(index), Some(store)) = (self.index.upgrade(), self.store.upgrade()) {
            index.forget_if_absent(key, |key| store.contains(key));
        }
    }
}
