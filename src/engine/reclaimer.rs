use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tracing::{debug, error, info};

use crate::error::AppError;
use crate::ledger::DeliveryLedger;
use crate::observability::metrics::Metrics;

/// Periodically expires overdue deliveries and frees their couriers.
pub struct ExpiryReclaimer {
    ledger: DeliveryLedger,
    interval: Duration,
    metrics: Metrics,
}

impl ExpiryReclaimer {
    pub fn new(ledger: DeliveryLedger, interval: Duration, metrics: Metrics) -> Self {
        Self {
            ledger,
            interval,
            metrics,
        }
    }

    pub async fn tick(&self, now: DateTime<Utc>) -> Result<Vec<String>, AppError> {
        let released = self.ledger.release_expired(now).await?;
        if !released.is_empty() {
            self.metrics
                .deliveries_released_total
                .with_label_values(&["expired"])
                .inc_by(released.len() as u64);
        }
        Ok(released)
    }

    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval_seconds = self.interval.as_secs(),
            "expiry reclaimer started"
        );

        let mut ticker = interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.tick(Utc::now()).await {
                        Ok(released) if released.is_empty() => debug!("no overdue deliveries"),
                        Ok(_) => {}
                        Err(err) => error!(error = %err, "failed to release expired deliveries"),
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("expiry reclaimer stopped");
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use chrono::Utc;
    use tokio::sync::watch;

    use super::ExpiryReclaimer;
    use crate::directory::CourierDirectory;
    use crate::ledger::DeliveryLedger;
    use crate::models::courier::{CourierInput, CourierStatus};
    use crate::models::delivery::NewDelivery;
    use crate::observability::metrics::Metrics;
    use crate::store::MemoryStore;

    #[tokio::test]
    async fn tick_releases_only_overdue_deliveries() {
        let store = Arc::new(MemoryStore::new());
        let directory = CourierDirectory::new(store.clone());
        let ledger = DeliveryLedger::new(store);
        let metrics = Metrics::new();

        let mut couriers = Vec::new();
        for phone in ["+1", "+2"] {
            couriers.push(
                directory
                    .create(CourierInput {
                        name: "Rider".to_string(),
                        phone: phone.to_string(),
                        status: "available".to_string(),
                        transport_mode: "scooter".to_string(),
                    })
                    .await
                    .unwrap(),
            );
        }

        let now = Utc::now();
        for (order_id, courier, offset) in [
            ("overdue", &couriers[0], -chrono::Duration::seconds(1)),
            ("on-time", &couriers[1], chrono::Duration::minutes(10)),
        ] {
            ledger
                .create(NewDelivery {
                    order_id: order_id.to_string(),
                    courier_id: courier.id,
                    assigned_at: now,
                    deadline: now + offset,
                })
                .await
                .unwrap();
        }

        let reclaimer = ExpiryReclaimer::new(ledger.clone(), Duration::from_secs(10), metrics.clone());
        assert_eq!(reclaimer.tick(Utc::now()).await.unwrap(), vec!["overdue".to_string()]);
        assert!(reclaimer.tick(Utc::now()).await.unwrap().is_empty());

        assert_eq!(
            directory.get_by_id(couriers[0].id).await.unwrap().status,
            CourierStatus::Available
        );
        assert_eq!(
            directory.get_by_id(couriers[1].id).await.unwrap().status,
            CourierStatus::Busy
        );
        assert_eq!(
            metrics
                .deliveries_released_total
                .with_label_values(&["expired"])
                .get(),
            1
        );
    }

    #[tokio::test]
    async fn run_exits_on_shutdown() {
        let ledger = DeliveryLedger::new(Arc::new(MemoryStore::new()));
        let reclaimer = ExpiryReclaimer::new(ledger, Duration::from_secs(3600), Metrics::new());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let handle = tokio::spawn(reclaimer.run(shutdown_rx));
        shutdown_tx.send(true).unwrap();

        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
