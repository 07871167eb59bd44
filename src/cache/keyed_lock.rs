//! Per-key asynchronous mutual exclusion for cache population.
//!
//! Slots are created lazily on first acquisition and removed as soon as the last holder or
//! waiter detaches. Attaching (get-or-create + increment) and detaching (decrement +
//! remove-if-zero) both run under the shard lock of the key's map entry, so a slot is never
//! removed while another task is about to wait on it.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use super::error::CacheError;

struct LockSlot {
    mutex: Arc<Mutex<()>>,
    refs: usize,
    seq: u64,
}

/// Serializes work per key while unrelated keys proceed in parallel.
#[derive(Clone, Default)]
pub struct KeyedAsyncLock {
    slots: Arc<DashMap<String, LockSlot>>,
    next_seq: Arc<AtomicU64>,
}

impl KeyedAsyncLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait until the caller is the sole holder for `key`.
    ///
    /// Fails with [`CacheError::LockTimeout`] once `timeout` elapses and with
    /// [`CacheError::OperationCancelled`] when `cancel` fires first. A failed acquisition leaves
    /// nothing to release.
    pub async fn acquire(
        &self,
        key: &str,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<KeyedLockGuard, CacheError> {
        let (mutex, slot) = self.attach(key);

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(CacheError::OperationCancelled {
                key: key.to_string(),
            }),
            acquired = tokio::time::timeout(timeout, mutex.lock_owned()) => {
                acquired.map_err(|_| CacheError::LockTimeout {
                    key: key.to_string(),
                    timeout,
                })
            }
        };

        match outcome {
            Ok(permit) => {
                trace!(key, "population lock acquired");
                Ok(KeyedLockGuard {
                    _permit: permit,
                    slot,
                })
            }
            Err(err) => {
                debug!(key, error = %err, "population lock not acquired");
                // `slot` drops here and detaches the waiter.
                Err(err)
            }
        }
    }

    /// Take the lock only if nobody holds it right now.
    pub fn try_acquire(&self, key: &str) -> Option<KeyedLockGuard> {
        let (mutex, slot) = self.attach(key);
        mutex
            .try_lock_owned()
            .ok()
            .map(|permit| KeyedLockGuard {
                _permit: permit,
                slot,
            })
    }

    /// Whether some task currently holds the lock for `key`.
    pub fn is_locked(&self, key: &str) -> bool {
        self.slots
            .get(key)
            .is_some_and(|slot| slot.mutex.try_lock().is_err())
    }

    /// Number of live slots (held or waited on).
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    fn attach(&self, key: &str) -> (Arc<Mutex<()>>, SlotRef) {
        let mutex = match self.slots.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                let slot = occupied.get_mut();
                slot.refs += 1;
                trace!(key, refs = slot.refs, slot_seq = slot.seq, "population lock contended");
                Arc::clone(&slot.mutex)
            }
            Entry::Vacant(vacant) => {
                let mutex = Arc::new(Mutex::new(()));
                vacant.insert(LockSlot {
                    mutex: Arc::clone(&mutex),
                    refs: 1,
                    seq: self.next_seq.fetch_add(1, Ordering::Relaxed),
                });
                mutex
            }
        };

        let slot = SlotRef {
            key: key.to_string(),
            slots: Arc::clone(&self.slots),
        };
        (mutex, slot)
    }
}

/// One attachment to a slot; detaches on drop, including when an `acquire` future is abandoned
/// mid-wait.
struct SlotRef {
    key: String,
    slots: Arc<DashMap<String, LockSlot>>,
}

impl Drop for SlotRef {
    fn drop(&mut self) {
        self.slots.remove_if_mut(&self.key, |_, slot| {
            slot.refs -= 1;
            slot.refs == 0
        });
    }
}

/// Exclusive hold on one key; released when dropped.
pub struct KeyedLockGuard {
    // Field order matters: the mutex is released before the slot reference is detached.
    _permit: OwnedMutexGuard<()>,
    slot: SlotRef,
}

impl KeyedLockGuard {
    pub fn key(&self) -> &str {
        &self.slot.key
    }
}

impl std::fmt::Debug for KeyedLockGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyedLockGuard")
            .field("key", &self.slot.key)
            .finish()
    }
}
