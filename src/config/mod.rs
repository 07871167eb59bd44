//! Configuration layer: typed settings with layered precedence (file → env → CLI).

use std::{
    num::{NonZeroU32, NonZeroUsize},
    str::FromStr,
    time::Duration,
};

use clap::Parser;
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

use crate::cache::CacheConfig;

mod cli;

pub use cli::{CacheOverrides, CliArgs, Command, ConfigArgs, SoakArgs};

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "rendercache";
const ENV_PREFIX: &str = "RENDERCACHE";

/// Fully-resolved settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub logging: LoggingSettings,
    pub cache: CacheSettings,
    pub lock: LockSettings,
    pub rate_limit: RateLimitSettings,
    pub stats: StatsSettings,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

impl LogFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Compact => "compact",
        }
    }
}

/// Storage bounds and pattern guards. Zero disables the count, size and TTL bounds.
#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub max_entry_count: usize,
    pub max_entry_bytes: usize,
    pub default_ttl: Duration,
    pub max_pattern_length: NonZeroUsize,
    pub max_pattern_wildcards: usize,
    pub pattern_match_timeout: Duration,
    pub pattern_max_removals: NonZeroUsize,
    pub maintenance_interval: Duration,
}

#[derive(Debug, Clone)]
pub struct LockSettings {
    pub timeout: Duration,
}

/// Regeneration limit applied per cache key.
#[derive(Debug, Clone)]
pub struct RateLimitSettings {
    pub max_attempts: NonZeroU32,
    pub window_seconds: NonZeroU32,
}

/// Automatic statistics resets. Zero disables either trigger.
#[derive(Debug, Clone)]
pub struct StatsSettings {
    pub reset_threshold: u64,
    pub reset_interval: Duration,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Load settings using the configured precedence (file → environment → CLI).
pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(Environment::with_prefix(ENV_PREFIX).separator("__"));

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;

    match cli.command.as_ref() {
        Some(Command::Soak(args)) => raw.apply_overrides(&args.overrides),
        Some(Command::Config(args)) => raw.apply_overrides(&args.overrides),
        None => raw.apply_overrides(&CacheOverrides::default()),
    }

    Settings::from_raw(raw)
}

/// Resolve configuration using the supplied CLI arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    logging: RawLoggingSettings,
    cache: RawCacheSettings,
    lock: RawLockSettings,
    rate_limit: RawRateLimitSettings,
    stats: RawStatsSettings,
}

impl RawSettings {
    fn apply_overrides(&mut self, overrides: &CacheOverrides) {
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
        if let Some(count) = overrides.cache_max_entry_count {
            self.cache.max_entry_count = Some(count);
        }
        if let Some(bytes) = overrides.cache_max_entry_bytes {
            self.cache.max_entry_bytes = Some(bytes);
        }
        if let Some(ttl) = overrides.cache_default_ttl_ms {
            self.cache.default_ttl_ms = Some(ttl);
        }
        if let Some(interval) = overrides.cache_maintenance_interval_ms {
            self.cache.maintenance_interval_ms = Some(interval);
        }
        if let Some(timeout) = overrides.lock_timeout_ms {
            self.lock.timeout_ms = Some(timeout);
        }
        if let Some(max) = overrides.rate_limit_max_attempts {
            self.rate_limit.max_attempts = Some(max);
        }
        if let Some(window) = overrides.rate_limit_window_seconds {
            self.rate_limit.window_seconds = Some(window);
        }
        if let Some(threshold) = overrides.stats_reset_threshold {
            self.stats.reset_threshold = Some(threshold);
        }
        if let Some(interval) = overrides.stats_reset_interval_seconds {
            self.stats.reset_interval_seconds = Some(interval);
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            logging,
            cache,
            lock,
            rate_limit,
            stats,
        } = raw;
        let defaults = CacheConfig::default();

        let logging = build_logging_settings(logging)?;
        let cache = build_cache_settings(cache, &defaults)?;
        let lock = build_lock_settings(lock, &defaults)?;
        let rate_limit = build_rate_limit_settings(rate_limit, &defaults)?;
        let stats = build_stats_settings(stats);

        Ok(Self {
            logging,
            cache,
            lock,
            rate_limit,
            stats,
        })
    }
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

fn build_cache_settings(
    cache: RawCacheSettings,
    defaults: &CacheConfig,
) -> Result<CacheSettings, LoadError> {
    let max_pattern_length = non_zero_usize(
        cache
            .max_pattern_length
            .unwrap_or(defaults.max_pattern_length),
        "cache.max_pattern_length",
    )?;
    let pattern_max_removals = non_zero_usize(
        cache
            .pattern_max_removals
            .unwrap_or(defaults.pattern_max_removals),
        "cache.pattern_max_removals",
    )?;
    let pattern_match_timeout = non_zero_millis(
        cache
            .pattern_match_timeout_ms
            .unwrap_or(defaults.pattern_match_timeout_ms),
        "cache.pattern_match_timeout_ms",
    )?;
    let maintenance_interval = non_zero_millis(
        cache
            .maintenance_interval_ms
            .unwrap_or(defaults.maintenance_interval_ms),
        "cache.maintenance_interval_ms",
    )?;

    Ok(CacheSettings {
        max_entry_count: cache.max_entry_count.unwrap_or(defaults.max_entry_count),
        max_entry_bytes: cache.max_entry_bytes.unwrap_or(defaults.max_entry_bytes),
        default_ttl: Duration::from_millis(cache.default_ttl_ms.unwrap_or(defaults.default_ttl_ms)),
        max_pattern_length,
        max_pattern_wildcards: cache
            .max_pattern_wildcards
            .unwrap_or(defaults.max_pattern_wildcards),
        pattern_match_timeout,
        pattern_max_removals,
        maintenance_interval,
    })
}

fn build_lock_settings(
    lock: RawLockSettings,
    defaults: &CacheConfig,
) -> Result<LockSettings, LoadError> {
    let timeout = non_zero_millis(
        lock.timeout_ms.unwrap_or(defaults.lock_timeout_ms),
        "lock.timeout_ms",
    )?;
    Ok(LockSettings { timeout })
}

fn build_rate_limit_settings(
    rate_limit: RawRateLimitSettings,
    defaults: &CacheConfig,
) -> Result<RateLimitSettings, LoadError> {
    let max_attempts_val = rate_limit
        .max_attempts
        .unwrap_or(u64::from(defaults.regeneration_max_attempts));
    let max_attempts = non_zero_u32(max_attempts_val, "rate_limit.max_attempts")?;

    let window_seconds_val = rate_limit
        .window_seconds
        .unwrap_or(defaults.regeneration_window_secs);
    let window_seconds = non_zero_u32(window_seconds_val, "rate_limit.window_seconds")?;

    Ok(RateLimitSettings {
        max_attempts,
        window_seconds,
    })
}

fn build_stats_settings(stats: RawStatsSettings) -> StatsSettings {
    StatsSettings {
        reset_threshold: stats.reset_threshold.unwrap_or(0),
        reset_interval: Duration::from_secs(stats.reset_interval_seconds.unwrap_or(0)),
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCacheSettings {
    max_entry_count: Option<usize>,
    max_entry_bytes: Option<usize>,
    default_ttl_ms: Option<u64>,
    max_pattern_length: Option<usize>,
    max_pattern_wildcards: Option<usize>,
    pattern_match_timeout_ms: Option<u64>,
    pattern_max_removals: Option<usize>,
    maintenance_interval_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLockSettings {
    timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawRateLimitSettings {
    max_attempts: Option<u64>,
    window_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawStatsSettings {
    reset_threshold: Option<u64>,
    reset_interval_seconds: Option<u64>,
}

fn non_zero_u32(value: u64, key: &'static str) -> Result<NonZeroU32, LoadError> {
    if value == 0 {
        return Err(LoadError::invalid(key, "must be greater than zero"));
    }
    let value_u32: u32 = value
        .try_into()
        .map_err(|_| LoadError::invalid(key, "value exceeds supported range for u32"))?;
    NonZeroU32::new(value_u32).ok_or_else(|| LoadError::invalid(key, "must be greater than zero"))
}

fn non_zero_usize(value: usize, key: &'static str) -> Result<NonZeroUsize, LoadError> {
    NonZeroUsize::new(value).ok_or_else(|| LoadError::invalid(key, "must be greater than zero"))
}

fn non_zero_millis(value: u64, key: &'static str) -> Result<Duration, LoadError> {
    if value == 0 {
        return Err(LoadError::invalid(key, "must be greater than zero"));
    }
    Ok(Duration::from_millis(value))
}

#[cfg(test)]
mod tests;
