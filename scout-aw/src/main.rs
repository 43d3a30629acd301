//! scout-aw - Analysis Worker service
//!
//! Hosts the discovery subscriber, the worker pool and the ops HTTP
//! surface. Cross-process state lives in Redis (queue, cache, bus) and the
//! shared SQLite database; worker replicas compete for jobs through the
//! queue alone.

use anyhow::{Context, Result};
use redis::aio::ConnectionManager;
use scout_aw::analyzer::ClaudeAnalyzer;
use scout_aw::api::{self, AppState};
use scout_aw::cache::ResultCache;
use scout_aw::limiter::RateLimitedExecutor;
use scout_aw::processor::{self, CancelRegistry, WorkerProcessor};
use scout_aw::publisher::EventPublisher;
use scout_aw::queue::{AnalysisQueue, QueueOptions, ANALYSIS_QUEUE};
use scout_aw::subscriber::DiscoverySubscriber;
use scout_common::bus::BusClient;
use scout_common::config::ScoutConfig;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

/// Grace period for active jobs on shutdown
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> Result<()> {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!("Starting scout-aw (Analysis Worker)");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let config = ScoutConfig::load().context("failed to load configuration")?;
    let api_key = config.require_api_key().context("analyzer credentials")?;

    let db = scout_common::db::init_database_pool(&config.database_path())
        .await
        .context("database connection")?;
    info!("Database connection established");

    let redis_client =
        redis::Client::open(config.redis_url()).context("redis url")?;
    let redis_conn = ConnectionManager::new(redis_client)
        .await
        .context("redis connection")?;
    info!("Redis connection established");

    let bus = BusClient::connect(&config.redis_url())
        .await
        .context("bus connection")?;
    let publisher = EventPublisher::new(bus.clone());

    let queue = AnalysisQueue::new(redis_conn.clone(), ANALYSIS_QUEUE, QueueOptions::default());
    // A previous shutdown leaves the queue paused; start accepting work
    queue.resume().await.ok();

    let cache = ResultCache::new(redis_conn.clone(), config.worker.cache_ttl_hours);
    let executor = RateLimitedExecutor::new(config.rate_limit.clone());
    let analyzer = Arc::new(
        ClaudeAnalyzer::new(
            api_key,
            config.worker.model.clone(),
            config.worker.max_tokens,
            config.worker.temperature,
        )
        .context("analyzer client")?,
    );
    info!(model = %config.worker.model, "Analyzer client initialized");

    let processor = Arc::new(
        WorkerProcessor::new(
            db.clone(),
            publisher.clone(),
            executor,
            analyzer,
            config.worker.clone(),
        )
        .with_cache(cache.clone())
        .with_queue(queue.clone()),
    );

    let registry = Arc::new(CancelRegistry::default());
    let shutdown = CancellationToken::new();

    // Discovery subscriber
    let discovery_rx = bus.subscribe_discovery();
    let subscriber_task = {
        let subscriber =
            DiscoverySubscriber::new(db.clone(), queue.clone(), publisher.clone());
        let cancel = shutdown.clone();
        tokio::spawn(async move { subscriber.run(discovery_rx, cancel).await })
    };

    // Worker pool
    let mut worker_tasks = Vec::new();
    for worker_id in 0..config.worker.concurrency {
        worker_tasks.push(tokio::spawn(processor::run_worker(
            worker_id,
            queue.clone(),
            processor.clone(),
            registry.clone(),
            shutdown.clone(),
        )));
    }
    info!(concurrency = config.worker.concurrency, "Worker pool started");

    // Delayed-job mover
    let mover_task = tokio::spawn(processor::run_delayed_mover(
        queue.clone(),
        shutdown.clone(),
    ));

    // Ops HTTP surface
    let state = AppState {
        db: db.clone(),
        queue: queue.clone(),
        cache,
        registry: registry.clone(),
        publisher,
    };
    let app = api::build_router(state);
    let addr = format!("127.0.0.1:{}", config.worker.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("bind {addr}"))?;
    info!("Listening on http://{addr}");

    let server_task = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            warn!("Ops server stopped: {}", e);
        }
    });

    shutdown_signal().await;
    info!("Shutdown signal received");

    // Stop claiming new work, give active jobs a grace period, then cancel
    queue.pause().await.ok();
    shutdown.cancel();

    let drain = async {
        for task in worker_tasks {
            task.await.ok();
        }
    };
    if tokio::time::timeout(SHUTDOWN_GRACE, drain).await.is_err() {
        warn!("Active jobs did not finish within grace period; cancelling");
        registry.cancel_all();
        tokio::time::sleep(Duration::from_millis(500)).await;
    }

    subscriber_task.abort();
    mover_task.abort();
    server_task.abort();
    db.close().await;

    info!("scout-aw stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.ok();
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}
