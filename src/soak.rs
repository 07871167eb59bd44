//! Concurrent load driver for a single cache instance.

use std::{
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use futures::future::join_all;
use rendercache::{
    cache::{CacheConfig, CacheService, Population, PopulateError, StatisticsSnapshot},
    config::SoakArgs,
    error::AppError,
};
use serde::Serialize;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

const SOAK_TAG: &str = "soak";

#[derive(Debug, Serialize)]
pub struct SoakReport {
    pub rounds: usize,
    pub callers_per_round: usize,
    pub keys: usize,
    pub renders: usize,
    pub uncached_renders: usize,
    pub throttled: usize,
    pub elapsed_ms: u64,
    pub statistics: StatisticsSnapshot,
}

#[derive(Default)]
struct Tally {
    renders: AtomicUsize,
    uncached: AtomicUsize,
    throttled: AtomicUsize,
}

pub async fn run(config: CacheConfig, args: &SoakArgs) -> Result<SoakReport, AppError> {
    if args.keys == 0 || args.callers == 0 {
        return Err(AppError::unexpected(
            "soak needs at least one key and one caller",
        ));
    }

    let lock_timeout = config.lock_timeout();
    let service = Arc::new(CacheService::new(config));
    let shutdown = CancellationToken::new();
    let maintenance = service.spawn_maintenance(shutdown.clone());
    let tally = Arc::new(Tally::default());
    let render_time = Duration::from_millis(args.render_ms);
    let started = Instant::now();

    for round in 0..args.rounds {
        if round % 2 == 1 {
            let removed = service.invalidate_tag(SOAK_TAG);
            info!(round, removed, "invalidated soak tag");
        }
        if round % 3 == 2 {
            let removed = service.invalidate_pattern("soak:1*", None)?;
            info!(round, removed, "invalidated soak pattern");
        }

        let callers = (0..args.callers).map(|caller| {
            let service = Arc::clone(&service);
            let tally = Arc::clone(&tally);
            let shutdown = shutdown.clone();
            let key = format!("soak:{}", caller % args.keys);
            tokio::spawn(async move {
                serve(&service, &tally, &key, lock_timeout, render_time, &shutdown).await
            })
        });

        for outcome in join_all(callers).await {
            outcome.map_err(|err| AppError::unexpected(format!("soak caller failed: {err}")))??;
        }
    }

    shutdown.cancel();
    maintenance
        .await
        .map_err(|err| AppError::unexpected(format!("maintenance task failed: {err}")))?;

    Ok(SoakReport {
        rounds: args.rounds,
        callers_per_round: args.callers,
        keys: args.keys,
        renders: tally.renders.load(Ordering::Relaxed),
        uncached_renders: tally.uncached.load(Ordering::Relaxed),
        throttled: tally.throttled.load(Ordering::Relaxed),
        elapsed_ms: started.elapsed().as_millis() as u64,
        statistics: service.statistics(),
    })
}

/// One request: serve from cache, otherwise regenerate within the rate limit.
async fn serve(
    service: &CacheService,
    tally: &Arc<Tally>,
    key: &str,
    lock_timeout: Duration,
    render_time: Duration,
    cancel: &CancellationToken,
) -> Result<(), AppError> {
    if service.get_cached_value(key).is_some() {
        return Ok(());
    }
    if !service.check_rate(key)?.allowed {
        tally.throttled.fetch_add(1, Ordering::Relaxed);
        return Ok(());
    }

    let route = format!("/{}", key.replace(':', "/"));
    let renders = Arc::clone(tally);
    let render_key = key.to_string();
    let factory = move || async move {
        renders.renders.fetch_add(1, Ordering::Relaxed);
        tokio::time::sleep(render_time).await;
        let body = format!("<html>{render_key}</html>");
        Ok::<_, std::convert::Infallible>(
            Population::new(route, body).with_tags([SOAK_TAG.to_string(), render_key]),
        )
    };

    match service
        .populate_once(key, lock_timeout, cancel, factory)
        .await
    {
        Ok(_) => Ok(()),
        Err(PopulateError::Cache(err)) if err.is_recoverable() => {
            warn!(key, error = %err, "rendering uncached");
            tally.uncached.fetch_add(1, Ordering::Relaxed);
            tokio::time::sleep(render_time).await;
            Ok(())
        }
        Err(PopulateError::Cache(err)) => Err(err.into()),
        Err(PopulateError::Factory(never)) => match never {},
    }
}
