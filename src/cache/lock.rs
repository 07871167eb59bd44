//! Poison-tolerant access to the few std locks the cache keeps.
//!
//! A panic inside an eviction observer or a population factory must not take the whole cache
//! down with it, so poisoned guards are recovered and the event is logged.

use std::sync::{
    LockResult, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard, TryLockError,
};

use tracing::warn;

fn recover<G>(
    result: LockResult<G>,
    target: &'static str,
    op: &'static str,
    lock_kind: &'static str,
) -> G {
    result.unwrap_or_else(|poisoned| {
        warn!(
            op,
            target_module = target,
            lock_kind,
            result = "poisoned_recovered",
            hint = "state may be stale after panic in another thread",
            "Recovered from poisoned cache lock"
        );
        poisoned.into_inner()
    })
}

pub(crate) fn rw_read<'a, T>(
    lock: &'a RwLock<T>,
    target: &'static str,
    op: &'static str,
) -> RwLockReadGuard<'a, T> {
    recover(lock.read(), target, op, "rwlock.read")
}

pub(crate) fn rw_write<'a, T>(
    lock: &'a RwLock<T>,
    target: &'static str,
    op: &'static str,
) -> RwLockWriteGuard<'a, T> {
    recover(lock.write(), target, op, "rwlock.write")
}

pub(crate) fn mutex_lock<'a, T>(
    lock: &'a Mutex<T>,
    target: &'static str,
    op: &'static str,
) -> MutexGuard<'a, T> {
    recover(lock.lock(), target, op, "mutex.lock")
}

/// Like [`mutex_lock`] but gives up instead of waiting when the lock is held.
pub(crate) fn mutex_try_lock<'a, T>(
    lock: &'a Mutex<T>,
    target: &'static str,
    op: &'static str,
) -> Option<MutexGuard<'a, T>> {
    match lock.try_lock() {
        Ok(guard) => Some(guard),
        Err(TryLockError::WouldBlock) => None,
        Err(TryLockError::Poisoned(poisoned)) => {
            Some(recover(Err(poisoned), target, op, "mutex.try_lock"))
        }
    }
}

#[cfg(test)]
mod tests {
    use std::panic::{AssertUnwindSafe, catch_unwind};

    use super::*;

    #[test]
    fn mutex_guard_survives_poisoning() {
        let lock = Mutex::new(1_u32);
        let _ = catch_unwind(AssertUnwindSafe(|| {
            let _guard = lock.lock().expect("first lock");
            panic!("poison recency list");
        }));
        assert!(lock.is_poisoned());

        *mutex_lock(&lock, "cache::lock", "test") += 1;
        assert_eq!(*mutex_lock(&lock, "cache::lock", "test"), 2);
    }

    #[test]
    fn try_lock_skips_when_held_and_recovers_poison() {
        let lock = Mutex::new(0_u32);
        {
            let _held = mutex_lock(&lock, "cache::lock", "test");
            assert!(mutex_try_lock(&lock, "cache::lock", "test").is_none());
        }

        let _ = catch_unwind(AssertUnwindSafe(|| {
            let _guard = lock.lock().expect("first lock");
            panic!("poison recency list");
        }));
        let mut guard = mutex_try_lock(&lock, "cache::lock", "test").expect("poison recovered");
        *guard += 1;
        assert_eq!(*guard, 1);
    }

    #[test]
    fn rwlock_guards_survive_poisoning() {
        let lock = RwLock::new(String::from("before"));
        let _ = catch_unwind(AssertUnwindSafe(|| {
            let _guard = lock.write().expect("first write");
            panic!("poison timestamp");
        }));

        rw_write(&lock, "cache::lock", "test").push_str("-after");
        assert_eq!(*rw_read(&lock, "cache::lock", "test"), "before-after");
    }
}
