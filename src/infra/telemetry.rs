use std::sync::Once;

use metrics::{Unit, describe_counter, describe_gauge, describe_histogram};
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::config::{LogFormat, LoggingSettings};

use super::error::InfraError;

static METRIC_DESCRIPTIONS: Once = Once::new();

/// Install a global tracing subscriber using the provided logging settings.
pub fn init(logging: &LoggingSettings) -> Result<(), InfraError> {
    describe_metrics();

    let env_filter = EnvFilter::builder()
        .with_default_directive(logging.level.into())
        .from_env_lossy();

    let fmt_layer = match logging.format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .with_target(true)
            .with_writer(std::io::stderr)
            .boxed(),
        LogFormat::Compact => fmt::layer()
            .compact()
            .with_target(true)
            .with_writer(std::io::stderr)
            .boxed(),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(ErrorLayer::default())
        .with(fmt_layer)
        .try_init()
        .map_err(|err| {
            InfraError::telemetry(format!("failed to install tracing subscriber: {err}"))
        })
}

/// Register descriptions for every metric the cache emits. Safe to call repeatedly.
pub fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            "rendercache_cache_hit_total",
            Unit::Count,
            "Total number of response-cache hits."
        );
        describe_counter!(
            "rendercache_cache_miss_total",
            Unit::Count,
            "Total number of response-cache misses."
        );
        describe_counter!(
            "rendercache_cache_evict_total",
            Unit::Count,
            "Total number of response-cache evictions due to capacity."
        );
        describe_counter!(
            "rendercache_cache_expired_total",
            Unit::Count,
            "Total number of response-cache entries removed after expiry."
        );
        describe_counter!(
            "rendercache_cache_invalidated_total",
            Unit::Count,
            "Total number of entries removed by invalidation, labelled by selector kind."
        );
        describe_gauge!(
            "rendercache_cache_entries",
            Unit::Count,
            "Current number of resident response-cache entries."
        );
        describe_histogram!(
            "rendercache_cache_populate_ms",
            Unit::Milliseconds,
            "Population factory latency in milliseconds."
        );
        describe_counter!(
            "rendercache_lock_timeout_total",
            Unit::Count,
            "Total number of population lock waits that timed out."
        );
        describe_counter!(
            "rendercache_rate_limited_total",
            Unit::Count,
            "Total number of regeneration attempts denied by the rate limiter."
        );
    });
}
