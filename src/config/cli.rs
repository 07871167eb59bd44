use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, builder::BoolishValueParser};

/// Command-line arguments for the rendercache binary.
#[derive(Debug, Parser)]
#[command(
    name = "rendercache",
    version,
    about = "Response-output cache core and load driver"
)]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "RENDERCACHE_CONFIG_FILE", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Drive a cache instance with concurrent populate, rate-limit and invalidation traffic.
    Soak(Box<SoakArgs>),
    /// Print the resolved settings and exit.
    Config(ConfigArgs),
}

#[derive(Debug, Args, Clone)]
pub struct SoakArgs {
    #[command(flatten)]
    pub overrides: CacheOverrides,

    /// Number of distinct cache keys to populate.
    #[arg(long, default_value_t = 32, value_parser = clap::value_parser!(usize))]
    pub keys: usize,

    /// Concurrent callers per round.
    #[arg(long, default_value_t = 256, value_parser = clap::value_parser!(usize))]
    pub callers: usize,

    /// Simulated render time in milliseconds.
    #[arg(long = "render-ms", default_value_t = 5)]
    pub render_ms: u64,

    /// Rounds of traffic; every other round invalidates a tag first.
    #[arg(long, default_value_t = 4, value_parser = clap::value_parser!(usize))]
    pub rounds: usize,
}

impl Default for SoakArgs {
    fn default() -> Self {
        Self {
            overrides: CacheOverrides::default(),
            keys: 32,
            callers: 256,
            render_ms: 5,
            rounds: 4,
        }
    }
}

#[derive(Debug, Args, Default, Clone)]
pub struct ConfigArgs {
    #[command(flatten)]
    pub overrides: CacheOverrides,
}

#[derive(Debug, Args, Default, Clone)]
pub struct CacheOverrides {
    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub log_json: Option<bool>,

    /// Override the resident entry limit (0 disables LRU eviction).
    #[arg(long = "cache-max-entry-count", value_name = "COUNT")]
    pub cache_max_entry_count: Option<usize>,

    /// Override the largest accepted value (0 disables the limit).
    #[arg(long = "cache-max-entry-bytes", value_name = "BYTES")]
    pub cache_max_entry_bytes: Option<usize>,

    /// Override the default TTL (0 stores without expiry).
    #[arg(long = "cache-default-ttl-ms", value_name = "MILLIS")]
    pub cache_default_ttl_ms: Option<u64>,

    /// Override the background maintenance cadence.
    #[arg(long = "cache-maintenance-interval-ms", value_name = "MILLIS")]
    pub cache_maintenance_interval_ms: Option<u64>,

    /// Override the population lock wait.
    #[arg(long = "lock-timeout-ms", value_name = "MILLIS")]
    pub lock_timeout_ms: Option<u64>,

    /// Override the regeneration ceiling per key.
    #[arg(long = "rate-limit-max-attempts", value_name = "COUNT")]
    pub rate_limit_max_attempts: Option<u64>,

    /// Override the regeneration window size.
    #[arg(long = "rate-limit-window-seconds", value_name = "SECONDS")]
    pub rate_limit_window_seconds: Option<u64>,

    /// Override the hit count that resets statistics (0 disables).
    #[arg(long = "stats-reset-threshold", value_name = "COUNT")]
    pub stats_reset_threshold: Option<u64>,

    /// Override the statistics reset cadence (0 disables).
    #[arg(long = "stats-reset-interval-seconds", value_name = "SECONDS")]
    pub stats_reset_interval_seconds: Option<u64>,
}
