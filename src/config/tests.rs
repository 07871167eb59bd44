use super::*;

#[test]
fn cli_overrides_take_highest_precedence() {
    let mut raw = RawSettings::default();
    raw.cache.max_entry_count = Some(10);
    raw.logging.level = Some("info".to_string());

    let overrides = CacheOverrides {
        cache_max_entry_count: Some(42),
        log_level: Some("debug".to_string()),
        ..Default::default()
    };

    raw.apply_overrides(&overrides);
    let settings = Settings::from_raw(raw).expect("valid settings");

    assert_eq!(settings.cache.max_entry_count, 42);
    assert_eq!(settings.logging.level, LevelFilter::DEBUG);
}

#[test]
fn defaults_match_cache_config_defaults() {
    let settings = Settings::from_raw(RawSettings::default()).expect("valid settings");
    let from_settings = CacheConfig::from(&settings);
    let defaults = CacheConfig::default();

    assert_eq!(from_settings.max_entry_count, defaults.max_entry_count);
    assert_eq!(from_settings.max_entry_bytes, defaults.max_entry_bytes);
    assert_eq!(from_settings.default_ttl_ms, defaults.default_ttl_ms);
    assert_eq!(from_settings.lock_timeout_ms, defaults.lock_timeout_ms);
    assert_eq!(
        from_settings.regeneration_max_attempts,
        defaults.regeneration_max_attempts
    );
    assert_eq!(
        from_settings.regeneration_window_secs,
        defaults.regeneration_window_secs
    );
    assert_eq!(from_settings.stats_reset_threshold, 0);
    assert!(matches!(settings.logging.format, LogFormat::Compact));
}

#[test]
fn zero_count_and_ttl_are_allowed() {
    let mut raw = RawSettings::default();
    raw.cache.max_entry_count = Some(0);
    raw.cache.default_ttl_ms = Some(0);

    let settings = Settings::from_raw(raw).expect("valid settings");
    let config = CacheConfig::from(&settings);

    assert!(config.max_entry_count_non_zero().is_none());
    assert!(config.default_ttl().is_none());
}

#[test]
fn zero_rate_limit_is_rejected() {
    let mut raw = RawSettings::default();
    raw.rate_limit.max_attempts = Some(0);

    let err = Settings::from_raw(raw).expect_err("invalid settings");
    assert!(matches!(
        err,
        LoadError::Invalid {
            key: "rate_limit.max_attempts",
            ..
        }
    ));
}

#[test]
fn oversized_window_is_rejected() {
    let mut raw = RawSettings::default();
    raw.rate_limit.window_seconds = Some(u64::from(u32::MAX) + 1);

    let err = Settings::from_raw(raw).expect_err("invalid settings");
    assert!(matches!(
        err,
        LoadError::Invalid {
            key: "rate_limit.window_seconds",
            ..
        }
    ));
}

#[test]
fn zero_lock_timeout_is_rejected() {
    let mut raw = RawSettings::default();
    raw.lock.timeout_ms = Some(0);

    assert!(matches!(
        Settings::from_raw(raw),
        Err(LoadError::Invalid {
            key: "lock.timeout_ms",
            ..
        })
    ));
}

#[test]
fn invalid_log_level_is_rejected() {
    let mut raw = RawSettings::default();
    raw.logging.level = Some("loud".to_string());

    assert!(matches!(
        Settings::from_raw(raw),
        Err(LoadError::Invalid {
            key: "logging.level",
            ..
        })
    ));
}

#[test]
fn cli_json_logging_enforces_format() {
    let mut raw = RawSettings::default();
    let overrides = CacheOverrides {
        log_json: Some(true),
        ..Default::default()
    };

    raw.apply_overrides(&overrides);
    let settings = Settings::from_raw(raw).expect("valid settings");

    assert!(matches!(settings.logging.format, LogFormat::Json));
}

#[test]
fn stats_resets_flow_into_cache_config() {
    let mut raw = RawSettings::default();
    raw.apply_overrides(&CacheOverrides {
        stats_reset_threshold: Some(500),
        stats_reset_interval_seconds: Some(3600),
        ..Default::default()
    });

    let config = CacheConfig::from(&Settings::from_raw(raw).expect("valid settings"));
    assert_eq!(config.stats_reset_threshold(), Some(500));
    assert_eq!(
        config.stats_reset_interval(),
        Some(Duration::from_secs(3600))
    );
}

#[test]
fn default_to_soak_command() {
    let args = CliArgs::parse_from(["rendercache"]);
    let command = args
        .command
        .unwrap_or(Command::Soak(Box::<SoakArgs>::default()));
    assert!(matches!(command, Command::Soak(_)));
}

#[test]
fn parse_soak_arguments() {
    let args = CliArgs::parse_from([
        "rendercache",
        "soak",
        "--keys",
        "8",
        "--callers",
        "100",
        "--render-ms",
        "2",
        "--cache-max-entry-count",
        "4",
    ]);

    match args.command.expect("soak command") {
        Command::Soak(soak) => {
            assert_eq!(soak.keys, 8);
            assert_eq!(soak.callers, 100);
            assert_eq!(soak.render_ms, 2);
            assert_eq!(soak.rounds, 4);
            assert_eq!(soak.overrides.cache_max_entry_count, Some(4));
        }
        _ => panic!("wrong command parsed"),
    }
}

#[test]
fn parse_config_overrides() {
    let args = CliArgs::parse_from([
        "rendercache",
        "config",
        "--log-json",
        "true",
        "--rate-limit-max-attempts",
        "5",
    ]);

    match args.command.expect("config command") {
        Command::Config(config) => {
            assert_eq!(config.overrides.log_json, Some(true));
            assert_eq!(config.overrides.rate_limit_max_attempts, Some(5));
        }
        _ => panic!("wrong command parsed"),
    }
}
