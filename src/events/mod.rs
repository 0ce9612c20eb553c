//! Order event routing.
//!
//! Each event names an order and its new status. The [`DispatchTable`] maps
//! status strings to handlers; the [`EventRouter`] validates an event,
//! optionally confirms its status with the order service, and dispatches it.

pub mod consumer;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::engine::assignment::{AssignmentEngine, EventOutcome};
use crate::error::AppError;
use crate::gateway::OrderSource;
use crate::models::order::{OrderEvent, STATUS_CANCELLED, STATUS_COMPLETED, STATUS_CREATED};
use crate::observability::metrics::Metrics;

pub use consumer::EventConsumer;

#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, event: &OrderEvent) -> Result<EventOutcome, AppError>;
}

pub struct OrderCreatedHandler {
    engine: Arc<AssignmentEngine>,
}

#[async_trait]
impl EventHandler for OrderCreatedHandler {
    async fn handle(&self, event: &OrderEvent) -> Result<EventOutcome, AppError> {
        self.engine.assign_for_event(&event.order_id).await
    }
}

pub struct OrderCancelledHandler {
    engine: Arc<AssignmentEngine>,
}

#[async_trait]
impl EventHandler for OrderCancelledHandler {
    async fn handle(&self, event: &OrderEvent) -> Result<EventOutcome, AppError> {
        self.engine.unassign_for_event(&event.order_id).await
    }
}

pub struct OrderCompletedHandler {
    engine: Arc<AssignmentEngine>,
}

#[async_trait]
impl EventHandler for OrderCompletedHandler {
    async fn handle(&self, event: &OrderEvent) -> Result<EventOutcome, AppError> {
        self.engine.complete_for_event(&event.order_id).await
    }
}

#[derive(Default, Clone)]
pub struct DispatchTable {
    handlers: HashMap<String, Arc<dyn EventHandler>>,
}

impl DispatchTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// `created`, `cancelled` and `completed` wired to the assignment engine.
    pub fn standard(engine: Arc<AssignmentEngine>) -> Self {
        Self::new()
            .register(
                STATUS_CREATED,
                Arc::new(OrderCreatedHandler {
                    engine: engine.clone(),
                }),
            )
            .register(
                STATUS_CANCELLED,
                Arc::new(OrderCancelledHandler {
                    engine: engine.clone(),
                }),
            )
            .register(STATUS_COMPLETED, Arc::new(OrderCompletedHandler { engine }))
    }

    pub fn register(mut self, status: impl Into<String>, handler: Arc<dyn EventHandler>) -> Self {
        self.handlers.insert(status.into(), handler);
        self
    }

    pub fn get(&self, status: &str) -> Option<&Arc<dyn EventHandler>> {
        self.handlers.get(status)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteOutcome {
    Applied,
    Skipped,
    /// Malformed, or contradicted by the order service.
    Dropped,
    /// No handler for the status.
    Unhandled,
}

impl RouteOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            RouteOutcome::Applied => "applied",
            RouteOutcome::Skipped => "skipped",
            RouteOutcome::Dropped => "dropped",
            RouteOutcome::Unhandled => "unhandled",
        }
    }
}

impl From<EventOutcome> for RouteOutcome {
    fn from(outcome: EventOutcome) -> Self {
        match outcome {
            EventOutcome::Applied => RouteOutcome::Applied,
            EventOutcome::Skipped => RouteOutcome::Skipped,
        }
    }
}

pub struct EventRouter {
    table: DispatchTable,
    source: Option<Arc<dyn OrderSource>>,
    metrics: Metrics,
}

impl EventRouter {
    pub fn new(table: DispatchTable, metrics: Metrics) -> Self {
        Self {
            table,
            source: None,
            metrics,
        }
    }

    /// Confirms each event's status with `source` before dispatching it.
    pub fn with_verification(mut self, source: Arc<dyn OrderSource>) -> Self {
        self.source = Some(source);
        self
    }

    pub async fn route(&self, event: &OrderEvent) -> Result<RouteOutcome, AppError> {
        let result = self.dispatch(event).await;

        let label = match &result {
            Ok(outcome) => outcome.as_str(),
            Err(_) => "error",
        };
        self.metrics
            .events_processed_total
            .with_label_values(&[event.status.as_str(), label])
            .inc();

        result
    }

    async fn dispatch(&self, event: &OrderEvent) -> Result<RouteOutcome, AppError> {
        if !event.is_well_formed() {
            warn!(order_id = %event.order_id, status = %event.status, "dropping malformed event");
            return Ok(RouteOutcome::Dropped);
        }

        let Some(handler) = self.table.get(&event.status) else {
            info!(order_id = %event.order_id, status = %event.status, "no handler for status");
            return Ok(RouteOutcome::Unhandled);
        };

        if let Some(source) = &self.source {
            match source.order_status(&event.order_id).await {
                Ok(current) if current.status != event.status => {
                    info!(
                        order_id = %event.order_id,
                        event_status = %event.status,
                        current_status = %current.status,
                        "event is stale, dropping"
                    );
                    return Ok(RouteOutcome::Dropped);
                }
                Ok(_) => {}
                Err(err) => warn!(
                    order_id = %event.order_id,
                    error = %err,
                    "could not verify order status, processing event as received"
                ),
            }
        }

        handler.handle(event).await.map(RouteOutcome::from)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use chrono::{DateTime, Utc};

    use super::{DispatchTable, EventHandler, EventRouter, RouteOutcome};
    use crate::engine::assignment::EventOutcome;
    use crate::error::AppError;
    use crate::gateway::{GatewayError, OrderSource};
    use crate::models::order::OrderEvent;
    use crate::observability::metrics::Metrics;

    #[derive(Default)]
    struct Counting {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl EventHandler for Counting {
        async fn handle(&self, _: &OrderEvent) -> Result<EventOutcome, AppError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(EventOutcome::Applied)
        }
    }

    struct FixedStatus(Result<&'static str, u16>);

    #[async_trait]
    impl OrderSource for FixedStatus {
        async fn orders_since(&self, _: DateTime<Utc>) -> Result<Vec<OrderEvent>, GatewayError> {
            Ok(Vec::new())
        }

        async fn order_status(&self, order_id: &str) -> Result<OrderEvent, GatewayError> {
            match self.0 {
                Ok(status) => Ok(OrderEvent::new(order_id, status, Utc::now())),
                Err(status) => Err(GatewayError::Status {
                    status,
                    body: String::new(),
                }),
            }
        }
    }

    fn router_with(handler: Arc<Counting>) -> EventRouter {
        EventRouter::new(DispatchTable::new().register("created", handler), Metrics::new())
    }

    fn created(order_id: &str) -> OrderEvent {
        OrderEvent::new(order_id, "created", Utc::now())
    }

    #[tokio::test]
    async fn malformed_and_unknown_events_never_reach_handlers() {
        let handler = Arc::new(Counting::default());
        let router = router_with(handler.clone());

        let no_id = OrderEvent::new("", "created", Utc::now());
        assert_eq!(router.route(&no_id).await.unwrap(), RouteOutcome::Dropped);

        let no_time = OrderEvent::new("o-1", "created", DateTime::<Utc>::UNIX_EPOCH);
        assert_eq!(router.route(&no_time).await.unwrap(), RouteOutcome::Dropped);

        let unknown = OrderEvent::new("o-1", "teleported", Utc::now());
        assert_eq!(router.route(&unknown).await.unwrap(), RouteOutcome::Unhandled);

        assert_eq!(handler.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn well_formed_event_is_dispatched() {
        let handler = Arc::new(Counting::default());
        let router = router_with(handler.clone());

        assert_eq!(router.route(&created("o-1")).await.unwrap(), RouteOutcome::Applied);
        assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn stale_event_is_dropped_after_verification() {
        let handler = Arc::new(Counting::default());
        let router =
            router_with(handler.clone()).with_verification(Arc::new(FixedStatus(Ok("cancelled"))));

        assert_eq!(router.route(&created("o-1")).await.unwrap(), RouteOutcome::Dropped);
        assert_eq!(handler.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn failed_verification_processes_event_as_received() {
        let handler = Arc::new(Counting::default());
        let router = router_with(handler.clone()).with_verification(Arc::new(FixedStatus(Err(503))));

        assert_eq!(router.route(&created("o-1")).await.unwrap(), RouteOutcome::Applied);
        assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
    }
}
