use std::sync::Arc;
use std::time::Duration;

use sdpool_core::task::NotifyMessage;
use sdpool_db::store::{PgCreditLedger, PgJobStore};
use sdpool_db::task_queue::PgTaskQueue;
use sdpool_events::{MemoryQueue, SessionRegistry};
use sdpool_worker::generator::Txt2ImgFactory;
use sdpool_worker::{ServicePool, WorkerConfig};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "sdpool_worker=debug,sdpool_events=debug,sdpool_db=info".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // --- Configuration ---
    let config = WorkerConfig::from_env().expect("Invalid worker configuration");
    tracing::info!(
        services = config.services.len(),
        interval_secs = config.reconcile.interval.as_secs(),
        ttl_secs = config.reconcile.job_ttl.as_secs(),
        "Loaded worker configuration"
    );

    // --- Database ---
    let pool = sdpool_db::create_pool(&config.database_url)
        .await
        .expect("Failed to connect to database");
    tracing::info!("Database connection pool created");

    sdpool_db::health_check(&pool)
        .await
        .expect("Database health check failed");
    tracing::info!("Database health check passed");

    sdpool_db::run_migrations(&pool)
        .await
        .expect("Failed to run database migrations");
    tracing::info!("Database migrations applied");

    // --- Queues and sessions ---
    // Tasks are submitted by inserting into `sd_tasks`, from this process or any other.
    let task_queue =
        Arc::new(PgTaskQueue::new(pool.clone()).with_poll_interval(config.task_poll_interval));
    match task_queue.pending().await {
        Ok(pending) => tracing::info!(pending, "Task queue attached"),
        Err(e) => tracing::warn!(error = %e, "Could not count queued tasks"),
    }
    let notify_queue = Arc::new(MemoryQueue::<NotifyMessage>::new("notifications"));
    let registry = Arc::new(SessionRegistry::new());

    // --- Service pool ---
    let service_pool = ServicePool::new(
        task_queue.clone(),
        notify_queue.clone(),
        Arc::new(PgJobStore::new(pool.clone())),
        Arc::new(Txt2ImgFactory::new()),
    )
    .with_shutdown_timeout(config.shutdown_timeout);

    let started = service_pool.init_services(&config.services).await;
    if started == 0 {
        tracing::warn!("No enabled services configured; tasks will queue until services are added");
    }

    let dispatch = service_pool.spawn_notification_dispatch(registry.clone());
    let reconciler = service_pool.spawn_reconciler(
        Arc::new(PgCreditLedger::new(pool.clone())),
        config.reconcile.clone(),
    );
    tracing::info!("Background loops started (notification dispatch, reconciler)");

    shutdown_signal().await;

    // --- Shutdown ---
    task_queue.close();
    service_pool.shutdown().await;
    tracing::info!("Worker services stopped");

    let _ = tokio::time::timeout(Duration::from_secs(5), dispatch.handle).await;
    let _ = tokio::time::timeout(Duration::from_secs(5), reconciler.handle).await;
    tracing::info!(
        delivered = dispatch.stats.delivered(),
        dropped = dispatch.stats.dropped(),
        refunded = reconciler.stats.refunded(),
        "Background loops stopped"
    );

    notify_queue.close();
    registry.shutdown_all().await;
    pool.close().await;

    tracing::info!("Graceful shutdown complete");
}

/// Wait for SIGINT (Ctrl-C) or, on Unix, SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl-C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}
