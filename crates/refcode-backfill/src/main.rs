#![doc = include_str!("../README.md")]

mod config;
mod pools;
mod report;
mod telemetry;

use core::time::Duration;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use config::{BackfillConfig, CliArgs};
use refcode::{Assigner, BatchConfig, EventSender, Orchestrator, StoreKind, Summary};
use refcode_mysql::MySqlConnector;
use telemetry::init_telemetry;
use tokio::signal;
use tokio_util::sync::CancellationToken;

// Using mimalloc for better performance under contention, especially in musl
// environments.
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

/// How long the event reporter may take to drain after the batch ends.
const REPORTER_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Exit code when the batch ran but left failures or stragglers behind.
const EXIT_INCOMPLETE: u8 = 2;

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    // Load from .env
    let _ = dotenvy::dotenv();
    let args = CliArgs::parse();
    let config = BackfillConfig::try_from(args)?;

    let providers = init_telemetry()?;
    log_startup_info(&config);

    let res = run(&config).await;
    providers.shutdown();
    let summary = res?;

    if config.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        println!("{summary}");
    }

    if summary.is_clean() {
        tracing::info!("Backfill complete");
        Ok(ExitCode::SUCCESS)
    } else {
        tracing::warn!(
            failed = summary.failed,
            unresolved = summary.unresolved,
            mismatched = summary.tally.mismatched + summary.tally.diverged,
            "Backfill finished with entities missing or mismatching a code"
        );
        Ok(ExitCode::from(EXIT_INCOMPLETE))
    }
}

async fn run(config: &BackfillConfig) -> anyhow::Result<Summary> {
    let batch_config = BatchConfig::new(config.workers, config.max_rounds, config.seed_bridge)?;
    let (primary, secondary) = pools::open_pair(
        MySqlConnector::new(StoreKind::Primary, &config.primary_url)?,
        config.primary_pool_size,
        MySqlConnector::new(StoreKind::Secondary, &config.secondary_url)?,
        config.secondary_pool_size,
    )
    .await?;

    let (events, rx) = EventSender::channel();
    let reporter = tokio::spawn(report::consume(rx));

    let schema = config.schema.clone();
    let assigner = Assigner::new(Arc::clone(&primary), Arc::clone(&secondary), schema)
        .with_retry(config.retry)
        .with_collision_limit(config.collision_limit)
        .with_events(events);
    let batch = Orchestrator::new(assigner, batch_config);

    let stop = tokio::spawn(shutdown_signal(batch.cancellation_token()));
    let res = batch.run().await;
    stop.abort();

    // The reporter ends once the last event sender, owned by the assigner,
    // is dropped.
    drop(batch);
    if tokio::time::timeout(REPORTER_DRAIN_TIMEOUT, reporter).await.is_err() {
        tracing::warn!("Event reporter did not drain in time");
    }

    pools::close(&primary).await;
    pools::close(&secondary).await;

    res.context("resolving target entities")
}

fn log_startup_info(config: &BackfillConfig) {
    if cfg!(debug_assertions) {
        tracing::info!(
            workers = config.workers,
            primary_pool = config.primary_pool_size,
            secondary_pool = config.secondary_pool_size,
            "Starting backfill with schema {:#?}, retry {:?}, seed {:?}, collision limit {:?}",
            config.schema,
            config.retry,
            config.seed_bridge,
            config.collision_limit,
        );
    } else {
        tracing::info!(
            workers = config.workers,
            max_rounds = config.max_rounds,
            "Starting backfill"
        );
    }
}

/// Cancels dispatching on Ctrl+C or SIGTERM. Submitted tasks still finish.
async fn shutdown_signal(cancel: CancellationToken) {
    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(_e) => {
                tracing::error!("Failed to install SIGTERM handler: {_e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    let ctrl_c = async {
        if let Err(_e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {_e}");
            std::future::pending::<()>().await;
        }
    };

    tokio::select! {
        () = ctrl_c => tracing::info!("Received Ctrl+C signal"),
        () = terminate => tracing::info!("Received SIGTERM signal"),
    }

    tracing::info!("Stopping dispatch; in-flight tasks will finish");
    cancel.cancel();
}
