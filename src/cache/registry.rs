//! Route and tag invalidation index.
//!
//! Tracks which cached keys belong to which route and which tags, so a whole family of entries
//! can be dropped at once. Each key owns one registration row; every change to a key's links
//! happens while that row's shard lock is held. Lock order is key row, then selector sets, then
//! the store.
//!
//! A registration is *pending* from [`InvalidationIndex::register`] until its
//! [`Registration`] guard drops. Sweeps remove pending keys from the store but keep their rows,
//! so a value stored right after a sweep is still reachable by the next one.

use std::collections::HashSet;
use std::sync::Arc;

use dashmap::DashMap;
use tracing::debug;

use super::error::CacheError;
use super::store::BoundedCacheStore;

/// What the index needs from the store it guards.
pub trait KeyRemover: Send + Sync {
    /// Remove the value for `key`; `true` when something was removed.
    fn remove_key(&self, key: &str) -> bool;
}

impl KeyRemover for BoundedCacheStore {
    fn remove_key(&self, key: &str) -> bool {
        self.remove(key)
    }
}

#[derive(Debug, Default)]
struct KeyRow {
    routes: HashSet<String>,
    tags: HashSet<String>,
    pending: usize,
}

type SelectorMap = DashMap<String, HashSet<String>>;

/// Result of one route or tag sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Sweep {
    /// Keys the selector pointed at when the sweep started.
    pub matched: usize,
    /// Values actually removed from the store.
    pub removed: usize,
    /// Keys kept indexed because a population was still storing them.
    pub deferred: usize,
}

/// Bidirectional route/tag ↔ key index.
#[derive(Default)]
pub struct InvalidationIndex {
    keys: Arc<DashMap<String, KeyRow>>,
    routes: SelectorMap,
    tags: SelectorMap,
}

impl InvalidationIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Link `key` to `route` and `tags` ahead of storing its value.
    ///
    /// The key is pending until the returned guard drops; drop it once the store write is done.
    pub fn register<S>(&self, route: &str, key: &str, tags: &[S]) -> Result<Registration, CacheError>
    where
        S: AsRef<str>,
    {
        if key.is_empty() {
            return Err(CacheError::invalid_argument("key", "must not be empty"));
        }
        if route.is_empty() {
            return Err(CacheError::invalid_argument("route", "must not be empty"));
        }

        let mut row = self.keys.entry(key.to_string()).or_default();
        row.pending += 1;
        if row.routes.insert(route.to_string()) {
            link(&self.routes, route, key);
        }
        for tag in tags.iter().map(AsRef::as_ref).filter(|tag| !tag.is_empty()) {
            if row.tags.insert(tag.to_string()) {
                link(&self.tags, tag, key);
            }
        }
        drop(row);

        Ok(Registration {
            key: key.to_string(),
            keys: Arc::clone(&self.keys),
        })
    }

    /// Remove every entry registered under `route`.
    pub fn invalidate_route(&self, route: &str, store: &dyn KeyRemover) -> Sweep {
        let sweep = self.sweep(&self.routes, route, store);
        debug!(
            route,
            matched = sweep.matched,
            removed = sweep.removed,
            deferred = sweep.deferred,
            "route invalidated"
        );
        sweep
    }

    /// Remove every entry carrying `tag`.
    pub fn invalidate_tag(&self, tag: &str, store: &dyn KeyRemover) -> Sweep {
        let sweep = self.sweep(&self.tags, tag, store);
        debug!(
            tag,
            matched = sweep.matched,
            removed = sweep.removed,
            deferred = sweep.deferred,
            "tag invalidated"
        );
        sweep
    }

    /// Drop the row for `key` when it is not pending and `is_live` reports no stored value.
    pub fn forget_if_absent(&self, key: &str, is_live: impl FnOnce(&str) -> bool) -> bool {
        self.keys
            .remove_if_mut(key, |key, row| {
                if row.pending > 0 || is_live(key) {
                    return false;
                }
                self.unlink(key, row);
                true
            })
            .is_some()
    }

    pub fn keys_for_route(&self, route: &str) -> HashSet<String> {
        self.routes
            .get(route)
            .map(|keys| keys.clone())
            .unwrap_or_default()
    }

    pub fn keys_for_tag(&self, tag: &str) -> HashSet<String> {
        self.tags.get(tag).map(|keys| keys.clone()).unwrap_or_default()
    }

    pub fn routes_for(&self, key: &str) -> HashSet<String> {
        self.keys
            .get(key)
            .map(|row| row.routes.clone())
            .unwrap_or_default()
    }

    pub fn tags_for(&self, key: &str) -> HashSet<String> {
        self.keys
            .get(key)
            .map(|row| row.tags.clone())
            .unwrap_or_default()
    }

    pub fn is_pending(&self, key: &str) -> bool {
        self.keys.get(key).is_some_and(|row| row.pending > 0)
    }

    pub fn route_count(&self) -> usize {
        self.routes.len()
    }

    pub fn tag_count(&self) -> usize {
        self.tags.len()
    }

    pub fn key_count(&self) -> usize {
        self.keys.len()
    }

    /// Drop every row that is neither pending nor backed by a value `is_live` still reports.
    /// Returns the number of rows dropped.
    pub fn clear(&self, is_live: impl Fn(&str) -> bool) -> usize {
        let snapshot: Vec<String> = self.keys.iter().map(|row| row.key().clone()).collect();
        snapshot
            .iter()
            .filter(|key| self.forget_if_absent(key, &is_live))
            .count()
    }

    fn sweep(&self, selectors: &SelectorMap, selector: &str, store: &dyn KeyRemover) -> Sweep {
        // Snapshot and release the selector set before touching key rows.
        let candidates: Vec<String> = selectors
            .get(selector)
            .map(|keys| keys.iter().cloned().collect())
            .unwrap_or_default();

        let mut sweep = Sweep {
            matched: candidates.len(),
            ..Sweep::default()
        };
        for key in candidates {
            let mut visited = false;
            let mut removed = false;
            let unlinked = self.keys.remove_if_mut(&key, |key, row| {
                visited = true;
                removed = store.remove_key(key);
                if row.pending > 0 {
                    return false;
                }
                self.unlink(key, row);
                true
            });

            // A row that survived its visit is pending; a missing row was already unlinked.
            if visited && unlinked.is_none() {
                sweep.deferred += 1;
            }
            if removed {
                sweep.removed += 1;
            }
        }
        sweep
    }

    fn unlink(&self, key: &str, row: &KeyRow) {
        for route in &row.routes {
            unlink(&self.routes, route, key);
        }
        for tag in &row.tags {
            unlink(&self.tags, tag, key);
        }
    }
}

fn link(selectors: &SelectorMap, selector: &str, key: &str) {
    selectors
        .entry(selector.to_string())
        .or_default()
        .insert(key.to_string());
}

fn unlink(selectors: &SelectorMap, selector: &str, key: &str) {
    selectors.remove_if_mut(selector, |_, keys| {
        keys.remove(key);
        keys.is_empty()
    });
}

/// Marks a key as pending-store; dropping it completes the registration.
#[must_use = "drop the registration only after the value is stored"]
pub struct Registration {
    key: String,
    keys: Arc<DashMap<String, KeyRow>>,
}

impl Registration {
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        if let Some(mut row) = self.keys.get_mut(&self.key) {
            row.pending = row.pending.saturating_sub(1);
        }
    }
}

impl std::fmt::Debug for Registration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registration").field("key", &self.key).finish()
    }
}
