use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tracing::{debug, error, info, warn};

use crate::engine::assignment::{AssignmentEngine, EventOutcome};
use crate::error::AppError;
use crate::gateway::OrderSource;
use crate::models::order::STATUS_CREATED;
use crate::observability::metrics::Metrics;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TickSummary {
    pub fetched: usize,
    pub assigned: usize,
    pub skipped: usize,
    pub failed: usize,
}

/// Pulls newly created orders from the order service and assigns them.
///
/// Each tick looks back one full interval, so consecutive windows overlap;
/// orders seen twice are skipped by the idempotent assignment path.
pub struct OrderPoller {
    source: Arc<dyn OrderSource>,
    engine: Arc<AssignmentEngine>,
    interval: Duration,
    metrics: Metrics,
}

impl OrderPoller {
    pub fn new(
        source: Arc<dyn OrderSource>,
        engine: Arc<AssignmentEngine>,
        interval: Duration,
        metrics: Metrics,
    ) -> Self {
        Self {
            source,
            engine,
            interval,
            metrics,
        }
    }

    pub async fn process_tick(&self, tick_time: DateTime<Utc>) -> Result<TickSummary, AppError> {
        let lookback = chrono::Duration::from_std(self.interval)
            .map_err(|err| AppError::Internal(format!("poll interval out of range: {err}")))?;
        let cursor = tick_time - lookback;

        let orders = self.source.orders_since(cursor).await?;
        self.metrics.poller_orders_total.inc_by(orders.len() as u64);

        let mut summary = TickSummary {
            fetched: orders.len(),
            ..TickSummary::default()
        };

        for order in orders.iter().filter(|order| order.status == STATUS_CREATED) {
            match self.engine.assign_for_event(&order.order_id).await {
                Ok(EventOutcome::Applied) => summary.assigned += 1,
                Ok(EventOutcome::Skipped) => summary.skipped += 1,
                Err(err) => {
                    summary.failed += 1;
                    warn!(order_id = %order.order_id, error = %err, "failed to assign polled order");
                }
            }
        }

        Ok(summary)
    }

    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(interval_seconds = self.interval.as_secs(), "order poller started");

        let mut ticker = interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.process_tick(Utc::now()).await {
                        Ok(summary) if summary.fetched == 0 => debug!("no new orders"),
                        Ok(summary) => info!(
                            fetched = summary.fetched,
                            assigned = summary.assigned,
                            skipped = summary.skipped,
                            failed = summary.failed,
                            "poll tick finished"
                        ),
                        Err(err) => error!(error = %err, "failed to fetch orders"),
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("order poller stopped");
    }
}
