use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use crate::api::rest::middleware::RateLimiter;
use crate::directory::CourierDirectory;
use crate::engine::assignment::AssignmentEngine;
use crate::ledger::DeliveryLedger;
use crate::observability::metrics::Metrics;
use crate::store::Store;

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

pub struct AppState {
    pub directory: CourierDirectory,
    pub ledger: DeliveryLedger,
    pub engine: Arc<AssignmentEngine>,
    pub event_tx: mpsc::Sender<Vec<u8>>,
    pub metrics: Metrics,
    pub rate_limiter: Option<Arc<RateLimiter>>,
    pub request_timeout: Duration,
    pub metrics_enabled: bool,
}

impl AppState {
    pub fn new(
        store: Arc<dyn Store>,
        event_queue_size: usize,
    ) -> (Self, mpsc::Receiver<Vec<u8>>) {
        let (event_tx, event_rx) = mpsc::channel(event_queue_size);
        let metrics = Metrics::new();
        let directory = CourierDirectory::new(store.clone());
        let ledger = DeliveryLedger::new(store.clone());
        let engine = Arc::new(AssignmentEngine::new(
            store,
            directory.clone(),
            ledger.clone(),
            metrics.clone(),
        ));

        (
            Self {
                directory,
                ledger,
                engine,
                event_tx,
                metrics,
                rate_limiter: None,
                request_timeout: DEFAULT_REQUEST_TIMEOUT,
                metrics_enabled: true,
            },
            event_rx,
        )
    }

    pub fn with_rate_limiter(mut self, limiter: RateLimiter) -> Self {
        self.rate_limiter = Some(Arc::new(limiter));
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_metrics_enabled(mut self, enabled: bool) -> Self {
        self.metrics_enabled = enabled;
        self
    }
}
