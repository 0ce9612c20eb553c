use std::net::SocketAddr;
use std::sync::Arc;

use courier_dispatch::api;
use courier_dispatch::api::rest::middleware::RateLimiter;
use courier_dispatch::config::Config;
use courier_dispatch::engine::poller::OrderPoller;
use courier_dispatch::engine::reclaimer::ExpiryReclaimer;
use courier_dispatch::error::AppError;
use courier_dispatch::events::{DispatchTable, EventConsumer, EventRouter};
use courier_dispatch::gateway::{HttpOrderSource, OrderSource, RetryPolicy, RetryingOrderSource};
use courier_dispatch::state::AppState;
use courier_dispatch::store::{MemoryStore, PgStore, Store};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), AppError> {
    let config = Config::from_env()?;

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(config.log_level.clone()))
        .with_target(false)
        .compact()
        .init();

    let store: Arc<dyn Store> = if config.in_memory_store {
        tracing::warn!("using in-memory store, data is lost on restart");
        Arc::new(MemoryStore::new())
    } else {
        let store = PgStore::connect(&config.database).await?;
        store.migrate().await?;
        tracing::info!("database connected and migrated");
        Arc::new(store)
    };

    let (app_state, event_rx) = AppState::new(store, config.event_queue_size);
    let mut app_state = app_state
        .with_request_timeout(config.request_timeout)
        .with_metrics_enabled(config.metrics_enabled);
    if let Some(limiter) = RateLimiter::from_settings(&config.rate_limit) {
        app_state = app_state.with_rate_limiter(limiter);
    }
    let shared_state = Arc::new(app_state);

    let order_source: Option<Arc<dyn OrderSource>> = match &config.order_service_url {
        Some(url) => {
            let client = HttpOrderSource::new(url)?;
            let source: Arc<dyn OrderSource> = Arc::new(RetryingOrderSource::new(
                client,
                RetryPolicy::default(),
                shared_state.metrics.clone(),
            ));
            tracing::info!(url = %url, "order service configured");
            Some(source)
        }
        None => {
            tracing::info!("SERVICE_ORDER_URL not set, order poller disabled");
            None
        }
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut tasks: Vec<JoinHandle<()>> = Vec::new();

    let reclaimer = ExpiryReclaimer::new(
        shared_state.ledger.clone(),
        config.release_interval,
        shared_state.metrics.clone(),
    );
    tasks.push(tokio::spawn(reclaimer.run(shutdown_rx.clone())));

    let mut event_router = EventRouter::new(
        DispatchTable::standard(shared_state.engine.clone()),
        shared_state.metrics.clone(),
    );
    if let Some(source) = order_source.as_ref().filter(|_| config.verify_event_status) {
        event_router = event_router.with_verification(source.clone());
    }
    let consumer = EventConsumer::new(event_router);
    tasks.push(tokio::spawn(
        consumer.run(ReceiverStream::new(event_rx), shutdown_rx.clone()),
    ));

    if let Some(source) = order_source {
        let poller = OrderPoller::new(
            source,
            shared_state.engine.clone(),
            config.poll_interval,
            shared_state.metrics.clone(),
        );
        tasks.push(tokio::spawn(poller.run(shutdown_rx.clone())));
    }

    let app = api::rest::router(shared_state.clone());

    let bind_addr = format!("0.0.0.0:{}", config.http_port);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .map_err(|err| AppError::Internal(format!("failed to bind {bind_addr}: {err}")))?;

    tracing::info!(http_port = config.http_port, "http server started");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .map_err(|err| AppError::Internal(format!("server error: {err}")))?;

    tracing::info!("http server stopped, waiting for background tasks");
    let _ = shutdown_tx.send(true);

    let drain = futures::future::join_all(tasks);
    if tokio::time::timeout(config.shutdown_grace, drain).await.is_err() {
        tracing::warn!(
            grace_seconds = config.shutdown_grace.as_secs(),
            "background tasks did not stop in time"
        );
    }

    tracing::info!("shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %err, "failed to listen for shutdown signal");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                tracing::error!(error = %err, "failed to listen for SIGTERM");
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

    tracing::info!("shutdown signal received");
}
