use anyhow::Context;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

pub mod api;
pub mod broadcast;
pub mod config;
pub mod db;
pub mod repository;
pub mod service;
pub mod worker;

use crate::broadcast::EventBroadcaster;
use crate::config::Config;
use crate::worker::{Capabilities, RunningJobs, WorkerContext, WorkerPool};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "podscribe_server=debug,podscribe_cloud=debug,tower_http=debug".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Podscribe server...");

    let config = Config::from_env().context("Failed to read configuration")?;
    config.validate().context("Invalid configuration")?;

    tracing::info!(
        "Providers: asr={}, diarization={}",
        config.asr_provider,
        config.diarization_provider
    );

    let pool = db::create_pool(&config.database_url)
        .await
        .context("Failed to create database pool")?;

    db::run_migrations(&pool)
        .await
        .context("Failed to run database migrations")?;

    let capabilities = Capabilities {
        asr_provider: config.asr_provider.clone(),
        diarization_provider: config.diarization_provider.clone(),
        llm: config.llm.clone(),
        ..Capabilities::new(config.provider_context()?)
    };

    let events = Arc::new(EventBroadcaster::new(config.subscriber_queue_size));
    let running = RunningJobs::default();
    let shutdown = CancellationToken::new();

    let workers = WorkerPool::new(
        Arc::new(WorkerContext {
            pool: pool.clone(),
            events: Arc::clone(&events),
            capabilities: Arc::new(capabilities),
            running: running.clone(),
        }),
        config.worker_concurrency,
        config.worker_idle_interval,
        shutdown.clone(),
    )
    .spawn();

    let app = api::create_router(api::AppState {
        pool,
        events,
        running,
    });

    tracing::info!("Listening on {}", config.bind_addr);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("Failed to bind to {}", config.bind_addr))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown.clone()))
        .await
        .context("Server error")?;

    shutdown.cancel();
    for worker in workers {
        if let Err(e) = worker.await {
            tracing::warn!("Worker task panicked: {}", e);
        }
    }

    tracing::info!("Podscribe server stopped");
    Ok(())
}

/// Resolves on ctrl-c and stops the worker pool
async fn shutdown_signal(shutdown: CancellationToken) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }

    tracing::info!("Shutdown requested");
    shutdown.cancel();
}
