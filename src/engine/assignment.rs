//! Assignment engine: the only place courier and delivery rows change together.
//!
//! Every operation runs in a single store transaction. A failure at any step
//! rolls the whole transaction back, so other transactions never observe a
//! delivery without a busy courier or the reverse.

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::directory::CourierDirectory;
use crate::engine::deadline;
use crate::error::AppError;
use crate::ledger::DeliveryLedger;
use crate::models::courier::{Courier, CourierStatus};
use crate::models::delivery::{Delivery, NewDelivery};
use crate::observability::metrics::Metrics;
use crate::store::{Store, Transaction, finish};

#[derive(Debug, Clone, Serialize)]
pub struct Assignment {
    pub delivery: Delivery,
    pub courier: Courier,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Release {
    pub order_id: String,
    pub courier_id: Uuid,
}

/// Result of an event-driven operation. `Skipped` means the order was already
/// in the target state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventOutcome {
    Applied,
    Skipped,
}

impl EventOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventOutcome::Applied => "applied",
            EventOutcome::Skipped => "skipped",
        }
    }
}

pub struct AssignmentEngine {
    store: Arc<dyn Store>,
    directory: CourierDirectory,
    ledger: DeliveryLedger,
    metrics: Metrics,
}

fn validate_order_id(order_id: &str) -> Result<&str, AppError> {
    let trimmed = order_id.trim();
    if trimmed.is_empty() {
        return Err(AppError::BadInput("order_id is required".to_string()));
    }
    Ok(trimmed)
}

impl AssignmentEngine {
    pub fn new(
        store: Arc<dyn Store>,
        directory: CourierDirectory,
        ledger: DeliveryLedger,
        metrics: Metrics,
    ) -> Self {
        Self {
            store,
            directory,
            ledger,
            metrics,
        }
    }

    pub fn directory(&self) -> &CourierDirectory {
        &self.directory
    }

    pub fn ledger(&self) -> &DeliveryLedger {
        &self.ledger
    }

    pub async fn assign(&self, order_id: &str) -> Result<Assignment, AppError> {
        let order_id = validate_order_id(order_id)?;

        let mut tx = self.store.begin().await?;
        let result = async {
            if self.ledger.get_active_in_tx(tx.as_mut(), order_id).await?.is_some() {
                return Err(AppError::OrderAlreadyAssigned(order_id.to_string()));
            }
            self.assign_in_tx(tx.as_mut(), order_id).await
        }
        .await;
        let assignment = match finish(tx, result).await {
            Ok(assignment) => assignment,
            Err(err) => {
                self.record_failure(&err);
                return Err(err);
            }
        };
        self.record_success();

        info!(
            order_id = %order_id,
            courier_id = %assignment.courier.id,
            deadline = %assignment.delivery.deadline,
            "order assigned"
        );
        Ok(assignment)
    }

    pub async fn unassign(&self, order_id: &str) -> Result<Release, AppError> {
        let release = self.release(order_id).await?;
        self.metrics
            .deliveries_released_total
            .with_label_values(&["unassigned"])
            .inc();
        info!(order_id = %release.order_id, courier_id = %release.courier_id, "order unassigned");
        Ok(release)
    }

    pub async fn complete(&self, order_id: &str) -> Result<Release, AppError> {
        let release = self.release(order_id).await?;
        self.metrics
            .deliveries_released_total
            .with_label_values(&["completed"])
            .inc();
        info!(order_id = %release.order_id, courier_id = %release.courier_id, "delivery completed");
        Ok(release)
    }

    /// Assigns a courier unless the order already has an active delivery.
    pub async fn assign_for_event(&self, order_id: &str) -> Result<EventOutcome, AppError> {
        let order_id = validate_order_id(order_id)?;

        let mut tx = self.store.begin().await?;
        let result = async {
            if self.ledger.check_exists_in_tx(tx.as_mut(), order_id).await? {
                return Ok(None);
            }
            self.assign_in_tx(tx.as_mut(), order_id).await.map(Some)
        }
        .await;

        match finish(tx, result).await {
            Ok(Some(assignment)) => {
                self.record_success();
                info!(
                    order_id = %order_id,
                    courier_id = %assignment.courier.id,
                    "order assigned from event"
                );
                Ok(EventOutcome::Applied)
            }
            // a concurrent writer may have inserted the row between our check and insert
            Ok(None) | Err(AppError::OrderAlreadyAssigned(_)) => {
                info!(order_id = %order_id, "order already assigned, skipping");
                Ok(EventOutcome::Skipped)
            }
            Err(err) => {
                self.record_failure(&err);
                Err(err)
            }
        }
    }

    pub async fn unassign_for_event(&self, order_id: &str) -> Result<EventOutcome, AppError> {
        self.release_for_event(order_id, "unassigned").await
    }

    pub async fn complete_for_event(&self, order_id: &str) -> Result<EventOutcome, AppError> {
        self.release_for_event(order_id, "completed").await
    }

    async fn assign_in_tx(
        &self,
        tx: &mut dyn Transaction,
        order_id: &str,
    ) -> Result<Assignment, AppError> {
        let courier = self
            .directory
            .find_available_in_tx(tx)
            .await?
            .ok_or(AppError::NoAvailableCourier)?;

        let assigned_at = Utc::now();
        let delivery = self
            .ledger
            .create_in_tx(
                tx,
                &NewDelivery {
                    order_id: order_id.to_string(),
                    courier_id: courier.id,
                    assigned_at,
                    deadline: deadline::deadline(assigned_at, &courier.transport_mode),
                },
            )
            .await?;

        let courier = self
            .directory
            .update_status_in_tx(tx, courier.id, CourierStatus::Busy)
            .await?;

        Ok(Assignment { delivery, courier })
    }

    async fn release(&self, order_id: &str) -> Result<Release, AppError> {
        let order_id = validate_order_id(order_id)?;

        let mut tx = self.store.begin().await?;
        let result = self.release_in_tx(tx.as_mut(), order_id).await;
        finish(tx, result).await
    }

    async fn release_in_tx(
        &self,
        tx: &mut dyn Transaction,
        order_id: &str,
    ) -> Result<Release, AppError> {
        let courier_id = self.ledger.delete_by_order_id_in_tx(tx, order_id).await?;
        self.directory
            .update_status_in_tx(tx, courier_id, CourierStatus::Available)
            .await?;

        Ok(Release {
            order_id: order_id.to_string(),
            courier_id,
        })
    }

    async fn release_for_event(
        &self,
        order_id: &str,
        reason: &'static str,
    ) -> Result<EventOutcome, AppError> {
        let order_id = validate_order_id(order_id)?;

        let mut tx = self.store.begin().await?;
        let result = async {
            if self.ledger.get_active_in_tx(tx.as_mut(), order_id).await?.is_none() {
                return Ok(None);
            }
            self.release_in_tx(tx.as_mut(), order_id).await.map(Some)
        }
        .await;

        match finish(tx, result).await? {
            Some(release) => {
                self.metrics
                    .deliveries_released_total
                    .with_label_values(&[reason])
                    .inc();
                info!(
                    order_id = %release.order_id,
                    courier_id = %release.courier_id,
                    reason,
                    "courier released from event"
                );
                Ok(EventOutcome::Applied)
            }
            None => {
                info!(order_id = %order_id, reason, "no active delivery, skipping");
                Ok(EventOutcome::Skipped)
            }
        }
    }

    fn record_success(&self) {
        self.metrics
            .assignments_total
            .with_label_values(&["success"])
            .inc();
    }

    fn record_failure(&self, err: &AppError) {
        let outcome = match err {
            AppError::NoAvailableCourier => "no_courier",
            AppError::OrderAlreadyAssigned(_) => "already_assigned",
            _ => "error",
        };
        self.metrics
            .assignments_total
            .with_label_values(&[outcome])
            .inc();
        warn!(error = %err, outcome, "assignment failed");
    }
}
