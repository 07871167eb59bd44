//! Response-output cache core.
//!
//! Stores rendered response bodies by request fingerprint and keeps regeneration under control:
//!
//! - **[`KeyedAsyncLock`]**: one population per key at a time, with bounded waits
//! - **[`SlidingWindowRateLimiter`]**: caps regenerations per key
//! - **[`BoundedCacheStore`]**: count/size-bounded LRU storage with expiry and pattern removal
//! - **[`InvalidationIndex`]**: route and tag sweeps without lost registrations
//! - **[`CacheService`]**: wires the above into read / populate / invalidate
//!
//! ## Configuration
//!
//! Tuning lives in the `[cache]`, `[lock]`, `[rate_limit]` and `[stats]` sections of
//! `rendercache.toml`:
//!
//! ```toml
//! [cache]
//! max_entry_count = 1000
//! max_entry_bytes = 1048576
//! default_ttl_ms = 60000
//! # ... see config.rs for all options
//! ```

mod config;
mod error;
mod keyed_lock;
mod lock;
mod pattern;
mod rate_limit;
mod registry;
mod service;
mod stats;
mod store;

pub use config::CacheConfig;
pub use error::{CacheError, PopulateError};
pub use keyed_lock::{KeyedAsyncLock, KeyedLockGuard};
pub use pattern::PatternLimits;
pub use rate_limit::{RateDecision, SlidingWindowRateLimiter};
pub use registry::{InvalidationIndex, KeyRemover, Registration, Sweep};
pub use service::{CacheService, MaintenanceReport, Population};
pub use stats::{CacheStatistics, InvalidationKind, StatisticsSnapshot};
pub use store::{BoundedCacheStore, EntryOptions, EvictionObserver, EvictionReason, StoreLimits};
