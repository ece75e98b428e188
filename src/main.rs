//! Contact Import Worker - chunked CSV contact ingestion
//!
//! Each trigger (cron HTTP call, in-process ticker or `run-once`) processes
//! one bounded chunk of one upload job and persists a resume cursor.

mod auth;
mod cli;
mod config;
mod db;
mod handlers;
mod services;
mod types;

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::cli::{Cli, Command};
use crate::config::Config;
use crate::db::PgStore;
use crate::services::chunk_scheduler::ChunkScheduler;
use crate::types::UploadJob;

#[tokio::main]
async fn main() -> Result<()> {
    // Logs directory - use LOGS_DIR env var or default to ../logs
    let logs_dir = std::env::var("LOGS_DIR")
        .unwrap_or_else(|_| "../logs".to_string());
    std::fs::create_dir_all(&logs_dir).ok();

    // File appender for persistent logs (daily rotation)
    let file_appender = RollingFileAppender::new(
        Rotation::DAILY,
        &logs_dir,
        "contact-import-worker.log",
    );
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    // Initialize logging - both stdout and file
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,contact_import_worker=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())  // stdout
        .with(tracing_subscriber::fmt::layer().with_writer(non_blocking).with_ansi(false))  // file
        .init();

    let cli = Cli::parse();

    let config = Config::from_env()?;
    info!("Configuration loaded");

    let pool = db::create_pool(&config.database_url).await?;
    info!("Connected to PostgreSQL");

    match cli.command.unwrap_or(Command::Serve) {
        Command::Migrate => db::run_migrations(&pool).await,
        Command::RunOnce => {
            let scheduler = build_scheduler(&pool, &config);
            let summary = scheduler.run_once().await?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
            Ok(())
        }
        Command::Enqueue { file, lists } => {
            let csv = std::fs::read_to_string(&file)
                .with_context(|| format!("Failed to read {}", file.display()))?;
            let job = UploadJob::new_pending(uuid::Uuid::new_v4().to_string(), csv, lists);
            let job = db::queries::upload_job::create_upload_job(&pool, &job).await?;
            info!("Enqueued upload job {} with {} rows", job.id, job.total_contacts);
            println!("{}", job.id);
            Ok(())
        }
        Command::Serve => {
            db::run_migrations(&pool).await?;
            serve(build_scheduler(&pool, &config), &config).await
        }
    }
}

fn build_scheduler(pool: &sqlx::PgPool, config: &Config) -> Arc<ChunkScheduler> {
    let store = Arc::new(PgStore::new(pool.clone()));
    Arc::new(ChunkScheduler::new(store.clone(), store, config.import.clone()))
}

async fn serve(scheduler: Arc<ChunkScheduler>, config: &Config) -> Result<()> {
    let shutdown = CancellationToken::new();
    let settings = scheduler.settings();
    info!(
        "Import settings: chunk size {}, time budget {:?} at {:.0}%",
        settings.chunk_size,
        settings.time_budget,
        settings.budget_fraction * 100.0
    );

    let ticker = config.tick_interval.map(|interval| {
        info!("In-process ticker enabled every {:?}", interval);
        tokio::spawn(run_ticker(scheduler.clone(), interval, shutdown.clone()))
    });

    let app = handlers::router(handlers::AppState {
        scheduler,
        cron_secret: config.cron_secret.clone(),
    });

    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.bind_addr))?;
    info!("Contact import worker listening on {}", config.bind_addr);

    let signal = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown signal received");
        }
        signal.cancel();
    });

    let server_shutdown = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { server_shutdown.cancelled().await })
        .await
        .map_err(|e| anyhow::anyhow!("HTTP server error: {}", e))?;

    if let Some(ticker) = ticker {
        ticker.await.ok();
    }
    info!("Contact import worker stopped");
    Ok(())
}

/// Drive the scheduler on a fixed interval until shutdown
async fn run_ticker(scheduler: Arc<ChunkScheduler>, interval: std::time::Duration, shutdown: CancellationToken) {
    let mut ticks = tokio::time::interval(interval);
    ticks.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticks.tick() => {
                match scheduler.run_once().await {
                    Ok(summary) if summary.processed > 0 || !summary.success => info!("Tick: {}", summary.message),
                    Ok(_) => {}
                    Err(e) => error!("Tick failed: {}", e),
                }
            }
        }
    }
}
