//! Bounded response storage.
//!
//! Entries live in a sharded map so unrelated keys never contend. When a count limit is
//! configured, an LRU recency list orders resident keys for eviction. Only inserting a new key
//! waits for the list lock, which keeps "is there room?" and "insert" a single step; reads,
//! in-place replacements and removals update the list only when it is free. Keys removed while
//! the list was busy linger until eviction or maintenance skips them. Lock order is always
//! recency list first, then map shard.

use std::num::NonZeroUsize;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use bytes::Bytes;
use dashmap::DashMap;
use lru::LruCache;
use tokio::time::Instant;
use tracing::{debug, error};

use super::config::CacheConfig;
use super::error::CacheError;
use super::lock::{mutex_lock, mutex_try_lock, rw_read, rw_write};
use super::pattern::{KeyPattern, PatternLimits};

const SOURCE: &str = "cache::store";

/// Why an entry left the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EvictionReason {
    /// Explicit removal, pattern removal or clear.
    Removed,
    /// Overwritten by a newer value for the same key.
    Replaced,
    /// Absolute or sliding expiry elapsed.
    Expired,
    /// Made room for a new key at the count limit.
    Capacity,
    /// An external expiration token fired.
    TokenExpired,
}

impl EvictionReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Removed => "removed",
            Self::Replaced => "replaced",
            Self::Expired => "expired",
            Self::Capacity => "capacity",
            Self::TokenExpired => "token_expired",
        }
    }
}

/// Notified once per removal, after the store's own bookkeeping is consistent.
pub trait EvictionObserver: Send + Sync {
    fn on_evicted(&self, key: &str, reason: EvictionReason);
}

/// Expiry and tagging for one stored value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntryOptions {
    /// Time-to-live measured from insertion.
    pub absolute_expiry: Option<Duration>,
    /// Idle time after which the entry expires; refreshed on every hit.
    pub sliding_expiry: Option<Duration>,
    pub tags: Vec<String>,
}

impl EntryOptions {
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.absolute_expiry = Some(ttl);
        self
    }

    pub fn with_sliding(mut self, idle: Duration) -> Self {
        self.sliding_expiry = Some(idle);
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    fn validate(&self) -> Result<(), CacheError> {
        if self.absolute_expiry.is_some_and(|ttl| ttl.is_zero()) {
            return Err(CacheError::invalid_argument(
                "absolute_expiry",
                "must be greater than zero",
            ));
        }
        if self.sliding_expiry.is_some_and(|idle| idle.is_zero()) {
            return Err(CacheError::invalid_argument(
                "sliding_expiry",
                "must be greater than zero",
            ));
        }
        Ok(())
    }
}

#[derive(Debug)]
struct CacheEntry {
    value: Bytes,
    created_at: Instant,
    expires_at: Option<Instant>,
    sliding: Option<Duration>,
    last_access: Instant,
    tags: Vec<String>,
    seq: u64,
}

impl CacheEntry {
    fn size(&self) -> usize {
        self.value.len()
    }

    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|deadline| now >= deadline)
            || self
                .sliding
                .is_some_and(|idle| now.saturating_duration_since(self.last_access) >= idle)
    }
}

/// Size and pattern bounds for a [`BoundedCacheStore`].
#[derive(Debug, Clone, Copy)]
pub struct StoreLimits {
    pub max_entry_count: Option<NonZeroUsize>,
    pub max_entry_bytes: Option<NonZeroUsize>,
    pub pattern: PatternLimits,
}

impl From<&CacheConfig> for StoreLimits {
    fn from(config: &CacheConfig) -> Self {
        Self {
            max_entry_count: config.max_entry_count_non_zero(),
            max_entry_bytes: config.max_entry_bytes_non_zero(),
            pattern: PatternLimits {
                max_length: config.max_pattern_length,
                max_wildcards: config.max_pattern_wildcards,
                match_timeout: config.pattern_match_timeout(),
            },
        }
    }
}

/// Bounded key/value store with expiry, LRU eviction and pattern removal.
pub struct BoundedCacheStore {
    entries: DashMap<String, CacheEntry>,
    recency: Option<Mutex<LruCache<String, ()>>>,
    limits: StoreLimits,
    next_seq: AtomicU64,
    total_bytes: AtomicUsize,
    observer: RwLock<Option<Arc<dyn EvictionObserver>>>,
}

type Removal = (String, EvictionReason);

impl BoundedCacheStore {
    pub fn new(limits: StoreLimits) -> Self {
        Self {
            entries: DashMap::new(),
            recency: limits
                .max_entry_count
                .map(|_| Mutex::new(LruCache::unbounded())),
            limits,
            next_seq: AtomicU64::new(0),
            total_bytes: AtomicUsize::new(0),
            observer: RwLock::new(None),
        }
    }

    pub fn from_config(config: &CacheConfig) -> Self {
        Self::new(StoreLimits::from(config))
    }

    /// Install the removal observer, replacing any previous one.
    pub fn set_observer(&self, observer: Arc<dyn EvictionObserver>) {
        *rw_write(&self.observer, SOURCE, "set_observer") = Some(observer);
    }

    pub fn limits(&self) -> &StoreLimits {
        &self.limits
    }

    /// Read a value. Expired entries are removed and read as absent.
    pub fn get(&self, key: &str) -> Option<Bytes> {
        let now = Instant::now();
        let hit = {
            let mut entry = self.entries.get_mut(key)?;
            if entry.is_expired(now) {
                None
            } else {
                entry.last_access = now;
                Some(entry.value.clone())
            }
        };

        match hit {
            Some(value) => {
                self.try_promote(key, "get.promote");
                Some(value)
            }
            None => {
                self.remove_where(key, EvictionReason::Expired, |entry| entry.is_expired(now));
                None
            }
        }
    }

    /// Whether a live value is stored for `key`. Does not touch recency.
    pub fn contains(&self, key: &str) -> bool {
        let now = Instant::now();
        self.entries
            .get(key)
            .is_some_and(|entry| !entry.is_expired(now))
    }

    /// Tags recorded with the live value for `key`.
    pub fn tags(&self, key: &str) -> Option<Vec<String>> {
        let now = Instant::now();
        self.entries
            .get(key)
            .filter(|entry| !entry.is_expired(now))
            .map(|entry| entry.tags.clone())
    }

    /// Store `value` under `key`, evicting at most one least-recently-used entry when full.
    pub fn set(&self, key: &str, value: Bytes, options: EntryOptions) -> Result<(), CacheError> {
        if key.is_empty() {
            return Err(CacheError::invalid_argument("key", "must not be empty"));
        }
        if let Some(limit) = self.limits.max_entry_bytes
            && value.len() > limit.get()
        {
            return Err(CacheError::invalid_argument(
                "value",
                format!(
                    "{} bytes exceeds the per-entry limit of {} bytes",
                    value.len(),
                    limit
                ),
            ));
        }
        options.validate()?;

        let now = Instant::now();
        let entry = CacheEntry {
            value,
            created_at: now,
            // Deadlines beyond the clock's range never expire.
            expires_at: options.absolute_expiry.and_then(|ttl| now.checked_add(ttl)),
            sliding: options.sliding_expiry,
            last_access: now,
            tags: options.tags,
            seq: self.next_seq.fetch_add(1, Ordering::Relaxed),
        };
        let mut removals: Vec<Removal> = Vec::with_capacity(2);
        match (&self.recency, self.limits.max_entry_count) {
            (Some(recency), Some(capacity)) => match self.replace_resident(key, entry) {
                Ok(()) => {
                    removals.push((key.to_string(), EvictionReason::Replaced));
                    self.try_promote(key, "set.promote");
                }
                Err(entry) => {
                    let mut recency = mutex_lock(recency, SOURCE, "set");
                    if !self.entries.contains_key(key) {
                        while self.entries.len() >= capacity.get() {
                            let Some((victim, ())) = recency.pop_lru() else {
                                break;
                            };
                            // Keys removed while the list was busy are skipped here.
                            if let Some((victim, evicted)) = self.entries.remove(&victim) {
                                self.total_bytes.fetch_sub(evicted.size(), Ordering::Relaxed);
                                let reason = if evicted.is_expired(now) {
                                    EvictionReason::Expired
                                } else {
                                    EvictionReason::Capacity
                                };
                                debug!(
                                    key = %victim,
                                    reason = reason.as_str(),
                                    "evicting least recently used entry"
                                );
                                removals.push((victim, reason));
                            }
                        }
                    }
                    recency.put(key.to_string(), ());
                    self.insert_entry(key, entry, &mut removals);
                }
            },
            _ => self.insert_entry(key, entry, &mut removals),
        }

        self.notify(removals);
        Ok(())
    }

    /// Delete `key` if present. Idempotent.
    pub fn remove(&self, key: &str) -> bool {
        self.remove_with_reason(key, EvictionReason::Removed)
    }

    /// Delete `key`, reporting `reason` to the observer.
    pub fn remove_with_reason(&self, key: &str, reason: EvictionReason) -> bool {
        self.remove_where(key, reason, |_| true)
    }

    /// Remove up to `max_count` entries whose keys match `pattern`, oldest insertion first.
    pub fn remove_by_pattern(&self, pattern: &str, max_count: usize) -> Result<usize, CacheError> {
        self.remove_matching(pattern, max_count)
            .map(|removed| removed.len())
    }

    /// Like [`remove_by_pattern`](Self::remove_by_pattern) but returns the removed keys.
    pub fn remove_matching(
        &self,
        pattern: &str,
        max_count: usize,
    ) -> Result<Vec<String>, CacheError> {
        let matcher = KeyPattern::parse(pattern, &self.limits.pattern)?;
        if max_count == 0 {
            return Ok(Vec::new());
        }

        let budget = self.limits.pattern.match_timeout;
        let removed: Vec<String> = self
            .keys()
            .into_iter()
            .filter(|key| matcher.matches(key, budget))
            .take(max_count)
            .filter(|key| self.remove(key))
            .collect();

        debug!(
            pattern,
            shape = matcher.kind(),
            removed = removed.len(),
            max_count,
            "removed entries by pattern"
        );
        Ok(removed)
    }

    /// Remove every entry whose expiry has elapsed and prune lingering recency keys. Returns
    /// the number of entries removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let expired: Vec<String> = self
            .entries
            .iter()
            .filter(|entry| entry.is_expired(now))
            .map(|entry| entry.key().clone())
            .collect();

        let purged = expired
            .iter()
            .filter(|key| self.remove_where(key, EvictionReason::Expired, |e| e.is_expired(now)))
            .count();

        if let Some(recency) = &self.recency {
            let mut recency = mutex_lock(recency, SOURCE, "purge.recency");
            let lingering: Vec<String> = recency
                .iter()
                .map(|(key, _)| key)
                .filter(|key| !self.entries.contains_key(key.as_str()))
                .cloned()
                .collect();
            for key in &lingering {
                recency.pop(key);
            }
        }
        purged
    }

    /// Remove everything.
    pub fn clear(&self) {
        let removals: Vec<Removal> = match &self.recency {
            Some(recency) => {
                let mut recency = mutex_lock(recency, SOURCE, "clear");
                let removals = self.drain_entries();
                recency.clear();
                removals
            }
            None => self.drain_entries(),
        };
        self.notify(removals);
    }

    /// Resident keys in insertion order.
    pub fn keys(&self) -> Vec<String> {
        let mut keyed: Vec<(u64, String)> = self
            .entries
            .iter()
            .map(|entry| (entry.seq, entry.key().clone()))
            .collect();
        keyed.sort_unstable_by_key(|(seq, _)| *seq);
        keyed.into_iter().map(|(_, key)| key).collect()
    }

    /// Age of the live entry for `key`.
    pub fn age(&self, key: &str) -> Option<Duration> {
        let now = Instant::now();
        self.entries
            .get(key)
            .filter(|entry| !entry.is_expired(now))
            .map(|entry| now.saturating_duration_since(entry.created_at))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Bytes held by resident values.
    pub fn total_bytes(&self) -> usize {
        self.total_bytes.load(Ordering::Relaxed)
    }

    fn remove_where(
        &self,
        key: &str,
        reason: EvictionReason,
        predicate: impl FnOnce(&CacheEntry) -> bool,
    ) -> bool {
        let removed = self.entries.remove_if(key, |_, entry| predicate(entry));

        match removed {
            Some((key, entry)) => {
                self.total_bytes.fetch_sub(entry.size(), Ordering::Relaxed);
                if let Some(recency) = &self.recency
                    && let Some(mut recency) = mutex_try_lock(recency, SOURCE, "remove")
                    && !self.entries.contains_key(&key)
                {
                    recency.pop(&key);
                }
                self.notify(vec![(key, reason)]);
                true
            }
            None => false,
        }
    }

    /// Swap the value of a resident key in place, handing `entry` back when `key` is absent.
    fn replace_resident(&self, key: &str, entry: CacheEntry) -> Result<(), CacheEntry> {
        let Some(mut slot) = self.entries.get_mut(key) else {
            return Err(entry);
        };
        self.total_bytes.fetch_add(entry.size(), Ordering::Relaxed);
        let previous = std::mem::replace(slot.value_mut(), entry);
        drop(slot);
        self.total_bytes.fetch_sub(previous.size(), Ordering::Relaxed);
        Ok(())
    }

    fn insert_entry(&self, key: &str, entry: CacheEntry, removals: &mut Vec<Removal>) {
        self.total_bytes.fetch_add(entry.size(), Ordering::Relaxed);
        if let Some(previous) = self.entries.insert(key.to_string(), entry) {
            self.total_bytes.fetch_sub(previous.size(), Ordering::Relaxed);
            removals.push((key.to_string(), EvictionReason::Replaced));
        }
    }

    fn try_promote(&self, key: &str, op: &'static str) {
        if let Some(recency) = &self.recency
            && let Some(mut recency) = mutex_try_lock(recency, SOURCE, op)
        {
            recency.promote(key);
        }
    }

    fn drain_entries(&self) -> Vec<Removal> {
        let keys: Vec<String> = self.entries.iter().map(|e| e.key().clone()).collect();
        keys.into_iter()
            .filter_map(|key| self.entries.remove(&key))
            .map(|(key, entry)| {
                self.total_bytes.fetch_sub(entry.size(), Ordering::Relaxed);
                (key, EvictionReason::Removed)
            })
            .collect()
    }

    fn notify(&self, removals: Vec<Removal>) {
        if removals.is_empty() {
            return;
        }
        let Some(observer) = rw_read(&self.observer, SOURCE, "notify").clone() else {
            return;
        };
        for (key, reason) in removals {
            let outcome = catch_unwind(AssertUnwindSafe(|| observer.on_evicted(&key, reason)));
            if outcome.is_err() {
                error!(
                    key = %key,
                    reason = reason.as_str(),
                    "eviction observer panicked; store state is unaffected"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct RecordingObserver {
        seen: Mutex<Vec<(String, EvictionReason)>>,
    }

    impl RecordingObserver {
        fn seen(&self) -> Vec<(String, EvictionReason)> {
            self.seen.lock().expect("observer lock").clone()
        }
    }

    impl EvictionObserver for RecordingObserver {
        fn on_evicted(&self, key: &str, reason: EvictionReason) {
            self.seen
                .lock()
                .expect("observer lock")
                .push((key.to_string(), reason));
        }
    }

    struct PanickingObserver;

    impl EvictionObserver for PanickingObserver {
        fn on_evicted(&self, _key: &str, _reason: EvictionReason) {
            panic!("observer failure");
        }
    }

    fn store_with_capacity(capacity: usize) -> BoundedCacheStore {
        BoundedCacheStore::from_config(&CacheConfig {
            max_entry_count: capacity,
            ..Default::default()
        })
    }

    fn body(text: &'static str) -> Bytes {
        Bytes::from_static(text.as_bytes())
    }

    #[tokio::test(start_paused = true)]
    async fn absolute_expiry_hides_entry() {
        let store = store_with_capacity(0);
        let observer = Arc::new(RecordingObserver::default());
        store.set_observer(observer.clone());

        store
            .set("a", body("v"), EntryOptions::default().with_ttl(Duration::from_secs(5)))
            .expect("stored");
        assert_eq!(store.get("a"), Some(body("v")));

        tokio::time::advance(Duration::from_secs(6)).await;
        assert_eq!(store.get("a"), None);
        assert!(store.is_empty());
        assert_eq!(observer.seen(), vec![("a".to_string(), EvictionReason::Expired)]);
    }

    #[tokio::test(start_paused = true)]
    async fn sliding_expiry_is_refreshed_by_hits() {
        let store = store_with_capacity(0);
        store
            .set(
                "s",
                body("v"),
                EntryOptions::default().with_sliding(Duration::from_secs(10)),
            )
            .expect("stored");

        for _ in 0..3 {
            tokio::time::advance(Duration::from_secs(8)).await;
            assert!(store.get("s").is_some());
        }

        tokio::time::advance(Duration::from_secs(11)).await;
        assert!(store.get("s").is_none());
    }

    #[test]
    fn capacity_evicts_least_recently_used() {
        let store = store_with_capacity(3);
        let observer = Arc::new(RecordingObserver::default());
        store.set_observer(observer.clone());

        for key in ["k1", "k2", "k3"] {
            store.set(key, body("v"), EntryOptions::default()).expect("stored");
        }
        // Touch the oldest so the next-oldest becomes the victim.
        assert!(store.get("k1").is_some());
        store.set("k4", body("v"), EntryOptions::default()).expect("stored");

        assert_eq!(store.len(), 3);
        assert!(store.contains("k1"));
        assert!(!store.contains("k2"));
        assert!(store.contains("k3"));
        assert!(store.contains("k4"));
        assert_eq!(
            observer.seen(),
            vec![("k2".to_string(), EvictionReason::Capacity)]
        );
    }

    #[test]
    fn replacing_at_capacity_does_not_evict() {
        let store = store_with_capacity(2);
        let observer = Arc::new(RecordingObserver::default());
        store.set_observer(observer.clone());

        store.set("a", body("1"), EntryOptions::default()).unwrap();
        store.set("b", body("2"), EntryOptions::default()).unwrap();
        store.set("a", body("3"), EntryOptions::default()).unwrap();

        assert_eq!(store.len(), 2);
        assert_eq!(store.get("a"), Some(body("3")));
        assert_eq!(observer.seen(), vec![("a".to_string(), EvictionReason::Replaced)]);
        assert_eq!(store.total_bytes(), 2);
    }

    #[test]
    fn one_eviction_per_insert_under_concurrency() {
        let store = Arc::new(store_with_capacity(8));
        std::thread::scope(|scope| {
            for worker in 0..8 {
                let store = Arc::clone(&store);
                scope.spawn(move || {
                    for i in 0..200 {
                        store
                            .set(&format!("w{worker}:{i}"), body("x"), EntryOptions::default())
                            .expect("stored");
                        assert!(store.len() <= 8);
                    }
                });
            }
        });
        assert_eq!(store.len(), 8);
        assert_eq!(store.total_bytes(), 8);
    }

    #[test]
    fn pattern_removes_only_matching_keys() {
        let store = store_with_capacity(0);
        for key in ["page:1", "page:2", "user:1"] {
            store.set(key, body("v"), EntryOptions::default()).unwrap();
        }

        let removed = store.remove_by_pattern("page:*", 10).expect("valid pattern");

        assert_eq!(removed, 2);
        assert_eq!(store.keys(), vec!["user:1".to_string()]);
    }

    #[test]
    fn pattern_removal_honours_max_count_in_insertion_order() {
        let store = store_with_capacity(0);
        for key in ["p:3", "p:1", "p:2", "other"] {
            store.set(key, body("v"), EntryOptions::default()).unwrap();
        }

        assert_eq!(store.remove_by_pattern("P:*", 2).unwrap(), 2);
        assert_eq!(store.keys(), vec!["p:2".to_string(), "other".to_string()]);
    }

    #[test]
    fn pattern_without_wildcard_is_exact() {
        let store = store_with_capacity(0);
        store.set("page:1", body("v"), EntryOptions::default()).unwrap();
        store.set("page:10", body("v"), EntryOptions::default()).unwrap();

        assert_eq!(store.remove_by_pattern("PAGE:1", 10).unwrap(), 1);
        assert_eq!(store.keys(), vec!["page:10".to_string()]);
    }

    #[test]
    fn rejected_pattern_removes_nothing() {
        let store = BoundedCacheStore::from_config(&CacheConfig {
            max_pattern_wildcards: 2,
            ..Default::default()
        });
        store.set("a:b:c", body("v"), EntryOptions::default()).unwrap();

        let err = store.remove_by_pattern("*:*:*", 10).expect_err("too many wildcards");
        assert!(matches!(err, CacheError::InvalidPattern { .. }));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn set_rejects_invalid_input() {
        let store = BoundedCacheStore::from_config(&CacheConfig {
            max_entry_bytes: 4,
            ..Default::default()
        });

        let cases = [
            ("", body("v"), EntryOptions::default(), "key"),
            ("k", body("too big"), EntryOptions::default(), "value"),
            (
                "k",
                body("v"),
                EntryOptions::default().with_ttl(Duration::ZERO),
                "absolute_expiry",
            ),
            (
                "k",
                body("v"),
                EntryOptions::default().with_sliding(Duration::ZERO),
                "sliding_expiry",
            ),
        ];
        for (key, value, options, expected) in cases {
            let err = store.set(key, value, options).expect_err("rejected");
            assert!(matches!(err, CacheError::InvalidArgument { name, .. } if name == expected));
        }
        assert!(store.is_empty());
    }

    #[test]
    fn remove_is_idempotent() {
        let store = store_with_capacity(2);
        store.set("k", body("v"), EntryOptions::default()).unwrap();
        assert!(store.remove("k"));
        assert!(!store.remove("k"));
        assert!(store.is_empty());
        // Recency no longer counts the removed key against capacity.
        store.set("a", body("v"), EntryOptions::default()).unwrap();
        store.set("b", body("v"), EntryOptions::default()).unwrap();
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn panicking_observer_leaves_store_consistent() {
        let store = store_with_capacity(1);
        store.set_observer(Arc::new(PanickingObserver));

        store.set("a", body("v"), EntryOptions::default()).unwrap();
        store.set("b", body("v"), EntryOptions::default()).unwrap();

        assert_eq!(store.keys(), vec!["b".to_string()]);
        assert!(store.remove("b"));
        assert!(store.is_empty());
        assert_eq!(store.total_bytes(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn purge_expired_sweeps_only_stale_entries() {
        let store = store_with_capacity(0);
        store
            .set("short", body("v"), EntryOptions::default().with_ttl(Duration::from_secs(1)))
            .unwrap();
        store
            .set("long", body("v"), EntryOptions::default().with_ttl(Duration::from_secs(60)))
            .unwrap();
        store.set("forever", body("v"), EntryOptions::default()).unwrap();

        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(store.purge_expired(), 1);
        assert_eq!(store.keys(), vec!["long".to_string(), "forever".to_string()]);
    }

    #[test]
    fn clear_reports_each_removal() {
        let store = store_with_capacity(4);
        let observer = Arc::new(RecordingObserver::default());
        store.set_observer(observer.clone());
        store
            .set("a", body("v"), EntryOptions::default().with_tags(["posts"]))
            .unwrap();
        store.set("b", body("v"), EntryOptions::default()).unwrap();
        assert_eq!(store.tags("a"), Some(vec!["posts".to_string()]));

        store.clear();

        assert!(store.is_empty());
        assert_eq!(store.total_bytes(), 0);
        let mut seen = observer.seen();
        seen.sort_by(|a, b| a.0.cmp(&b.0));
        assert_eq!(
            seen,
            vec![
                ("a".to_string(), EvictionReason::Removed),
                ("b".to_string(), EvictionReason::Removed),
            ]
        );
    }

    #[test]
    fn reads_and_removals_do_not_wait_for_the_recency_list() {
        let store = store_with_capacity(2);
        let observer = Arc::new(RecordingObserver::default());
        store.set_observer(observer.clone());
        store.set("a", body("1"), EntryOptions::default()).unwrap();
        store.set("b", body("2"), EntryOptions::default()).unwrap();

        {
            let recency = store.recency.as_ref().expect("bounded store");
            let _held = mutex_lock(recency, SOURCE, "test");
            assert_eq!(store.get("b"), Some(body("2")));
            store.set("b", body("3"), EntryOptions::default()).unwrap();
            assert!(store.remove("a"));
        }

        // "a" lingers in the list; eviction skips it and takes "b".
        store.set("c", body("4"), EntryOptions::default()).unwrap();
        store.set("d", body("5"), EntryOptions::default()).unwrap();
        assert_eq!(store.keys(), vec!["c".to_string(), "d".to_string()]);
        assert_eq!(
            observer.seen(),
            vec![
                ("b".to_string(), EvictionReason::Replaced),
                ("a".to_string(), EvictionReason::Removed),
                ("b".to_string(), EvictionReason::Capacity),
            ]
        );
    }

    #[test]
    fn purge_prunes_lingering_recency_keys() {
        let store = store_with_capacity(4);
        store.set("a", body("v"), EntryOptions::default()).unwrap();
        store.set("b", body("v"), EntryOptions::default()).unwrap();
        {
            let recency = store.recency.as_ref().expect("bounded store");
            let _held = mutex_lock(recency, SOURCE, "test");
            assert!(store.remove("a"));
        }
        let recency = store.recency.as_ref().expect("bounded store");
        assert_eq!(mutex_lock(recency, SOURCE, "test").len(), 2);

        assert_eq!(store.purge_expired(), 0);
        assert_eq!(mutex_lock(recency, SOURCE, "test").len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn expired_capacity_victim_is_reported_as_expired() {
        let store = store_with_capacity(1);
        let observer = Arc::new(RecordingObserver::default());
        store.set_observer(observer.clone());
        store
            .set("old", body("v"), EntryOptions::default().with_ttl(Duration::from_secs(1)))
            .unwrap();

        tokio::time::advance(Duration::from_secs(2)).await;
        store.set("new", body("v"), EntryOptions::default()).unwrap();

        assert_eq!(store.keys(), vec!["new".to_string()]);
        assert_eq!(
            observer.seen(),
            vec![("old".to_string(), EvictionReason::Expired)]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn unrepresentable_ttl_never_expires() {
        let store = store_with_capacity(0);
        store
            .set("k", body("v"), EntryOptions::default().with_ttl(Duration::MAX))
            .expect("stored");

        tokio::time::advance(Duration::from_secs(365 * 24 * 60 * 60)).await;
        assert_eq!(store.get("k"), Some(body("v")));
        assert_eq!(store.purge_expired(), 0);
    }

    #[test]
    fn pattern_over_budget_matches_nothing() {
        let store = BoundedCacheStore::new(StoreLimits {
            max_entry_count: None,
            max_entry_bytes: None,
            pattern: PatternLimits {
                max_length: 256,
                max_wildcards: 10,
                match_timeout: Duration::ZERO,
            },
        });
        store.set("page:1:html", body("v"), EntryOptions::default()).unwrap();

        assert_eq!(store.remove_by_pattern("page:*:html", 10), Ok(0));
        assert!(store.contains("page:1:html"));
    }

    #[test]
    fn token_expiry_is_reported_as_such() {
        let store = store_with_capacity(0);
        let observer = Arc::new(RecordingObserver::default());
        store.set_observer(observer.clone());
        store.set("k", body("v"), EntryOptions::default()).unwrap();

        assert!(store.remove_with_reason("k", EvictionReason::TokenExpired));
        assert_eq!(
            observer.seen(),
            vec![("k".to_string(), EvictionReason::TokenExpired)]
        );
    }
}
