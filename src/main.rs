use std::process;

use rendercache::{
    cache::CacheConfig,
    config,
    error::AppError,
    infra::{error::InfraError, telemetry},
};
use serde_json::json;
use tracing::{Dispatch, Level, dispatcher, error, info};
use tracing_subscriber::fmt as tracing_fmt;

mod soak;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &AppError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "application error");
        return;
    }

    let subscriber = tracing_fmt()
        .with_max_level(Level::ERROR)
        .with_writer(std::io::stderr)
        .finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()?;

    let command = cli_args
        .command
        .unwrap_or(config::Command::Soak(Box::<config::SoakArgs>::default()));

    telemetry::init(&settings.logging)?;

    match command {
        config::Command::Soak(args) => run_soak(settings, &args).await,
        config::Command::Config(_) => print_settings(&settings),
    }
}

async fn run_soak(settings: config::Settings, args: &config::SoakArgs) -> Result<(), AppError> {
    let cache_config = CacheConfig::from(&settings);
    info!(
        keys = args.keys,
        callers = args.callers,
        rounds = args.rounds,
        render_ms = args.render_ms,
        "starting soak"
    );

    let report = soak::run(cache_config, args).await?;
    info!(
        renders = report.renders,
        throttled = report.throttled,
        elapsed_ms = report.elapsed_ms,
        "soak finished"
    );

    let rendered = serde_json::to_string_pretty(&report).map_err(InfraError::from)?;
    println!("{rendered}");
    Ok(())
}

fn print_settings(settings: &config::Settings) -> Result<(), AppError> {
    let resolved = json!({
        "logging": {
            "level": settings.logging.level.to_string(),
            "format": settings.logging.format.as_str(),
        },
        "cache": CacheConfig::from(settings),
    });
    let rendered = serde_json::to_string_pretty(&resolved).map_err(InfraError::from)?;
    println!("{rendered}");
    Ok(())
}
