//! # Lab Guardian Gateway
//!
//! Entry point of the event buffering gateway. Cameras and robots report
//! status lines over raw TCP; every event is fanned out to live dashboards
//! immediately and buffered in Redis for batched persistence into
//! PostgreSQL.
//!
//! ## Listeners
//! - **Ingest** (raw TCP, default 8888): device status lines.
//! - **Live** (HTTP, default 8080): `/ws` dashboard fan-out and `/health`.
//! - **Admin** (HTTP, default 8000): queue lengths, DLQ peek and replay.
//!
//! ## Background units
//! The dispatch worker, the backlog gauge and the metrics reporter each run
//! under a supervisor that restarts them after a failure.
//!
//! ## Shutdown
//! Ctrl-C or SIGTERM cancels one shared token. Listeners stop accepting,
//! the worker flushes its pending batch, and the process waits up to ten
//! seconds for everything to finish.

mod gateway_logic;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::net::TcpListener;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{error, info, warn};

use gateway_logic::config::load_config;
use gateway_logic::state::AppState;
use gateway_logic::{admin, downstream};
use lib_common::connections::{PostgresSink, RedisQueueStore};
use lib_common::core::{
    AdminSurface, AdmissionFilter, BacklogGauge, Broadcaster, DispatchWorker, EventSink,
    QueueMetrics, QueueStore, supervise,
};
use lib_common::ingestors::IngestListener;
use lib_common::loggers::setup_logging;

const APP_NAME: &str = "lab_gateway";
const SHUTDOWN_LIMIT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let settings = load_config();

    let _guard = match setup_logging(APP_NAME, &settings.log_dir, &settings.log_level) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to initialize logging: {}", e);
            std::process::exit(1);
        }
    };
    info!(
        "Configuration loaded: ingest={}, live={}, admin={}, DB URL (hidden)",
        settings.ingest_port, settings.live_port, settings.admin_port
    );

    // --- External stores ---
    let store: Arc<dyn QueueStore> = Arc::new(RedisQueueStore::connect(&settings.redis_url).await?);
    let postgres = PostgresSink::connect(&settings.database_url, settings.db_pool_size)?;
    if let Err(e) = postgres.ensure_schema().await {
        warn!("Schema bootstrap failed, continuing without it: {}", e);
    }
    let sink: Arc<dyn EventSink> = Arc::new(postgres);

    // --- Pipeline ---
    let pipeline = settings.pipeline.clone();
    let backlog = Arc::new(BacklogGauge::new());
    let metrics = Arc::new(QueueMetrics::new());
    let broadcaster = Arc::new(Broadcaster::new());
    let admission = Arc::new(AdmissionFilter::new(
        store.clone(),
        backlog.clone(),
        metrics.clone(),
        pipeline.backlog_threshold,
    ));
    let worker = Arc::new(DispatchWorker::new(
        store.clone(),
        sink,
        metrics.clone(),
        pipeline.clone(),
    ));

    let token = CancellationToken::new();
    let tracker = TaskTracker::new();

    tracker.spawn(supervise("dispatch-worker", token.clone(), pipeline.restart_backoff, {
        let worker = worker.clone();
        move |token| {
            let worker = worker.clone();
            async move { worker.run(token).await }
        }
    }));

    tracker.spawn(supervise("backlog-gauge", token.clone(), pipeline.restart_backoff, {
        let (backlog, store) = (backlog.clone(), store.clone());
        let period = pipeline.gauge_interval;
        move |token| {
            let (backlog, store) = (backlog.clone(), store.clone());
            async move { backlog.run(store.as_ref(), period, token).await }
        }
    }));

    tracker.spawn(supervise("metrics-reporter", token.clone(), pipeline.restart_backoff, {
        let (metrics, store) = (metrics.clone(), store.clone());
        let period = pipeline.report_interval;
        move |token| {
            let (metrics, store) = (metrics.clone(), store.clone());
            async move { metrics.run_reporter(store.as_ref(), period, token).await }
        }
    }));

    // --- Listeners ---
    let ingest_addr = SocketAddr::from(([0, 0, 0, 0], settings.ingest_port));
    let ingest_listener = TcpListener::bind(ingest_addr).await?;
    let ingest = Arc::new(IngestListener::new(admission, broadcaster.clone()));
    tracker.spawn(ingest.run(ingest_listener, token.clone()));

    let state = AppState::new(broadcaster, AdminSurface::new(store), token.clone());

    let live_state = state.clone();
    let live_port = settings.live_port;
    tracker.spawn(async move {
        if let Err(e) = downstream::run(live_port, live_state).await {
            error!("Live dashboard server failed: {}", e);
        }
    });

    let admin_port = settings.admin_port;
    tracker.spawn(async move {
        if let Err(e) = admin::run(admin_port, state).await {
            error!("Admin server failed: {}", e);
        }
    });

    tracker.close();

    shutdown_signal().await;
    info!("Signal received: initiate graceful shutdown");
    token.cancel();

    match tokio::time::timeout(SHUTDOWN_LIMIT, tracker.wait()).await {
        Ok(()) => info!("shutdown: gracefully"),
        Err(_) => warn!("shutdown: forcefully due to timeout after {:?}", SHUTDOWN_LIMIT),
    }

    info!("Bye!");
    Ok(())
}

/// Resolves on Ctrl-C, or SIGTERM on Unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
