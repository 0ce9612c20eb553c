//! Transactional storage seam.
//!
//! Every read and write the domain layer performs goes through a
//! [`Transaction`]. Callers that need a single operation open a transaction
//! for just that operation; the assignment protocol opens one and threads it
//! through several directory and ledger calls before committing.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::AppError;
use crate::models::courier::{Courier, CourierDraft, CourierStatus};
use crate::models::delivery::{Delivery, DeliveryStatus, ExpiredDelivery, NewDelivery};

pub use memory::MemoryStore;
pub use postgres::PgStore;

#[async_trait]
pub trait Store: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn Transaction>, AppError>;
}

/// Courier rows as seen from inside a transaction.
#[async_trait]
pub trait CourierRows: Send {
    async fn courier_by_id(&mut self, id: Uuid) -> Result<Option<Courier>, AppError>;

    async fn all_couriers(&mut self) -> Result<Vec<Courier>, AppError>;

    /// Fails with `Conflict` when the phone is already taken.
    async fn insert_courier(&mut self, draft: &CourierDraft) -> Result<Courier, AppError>;

    async fn update_courier(
        &mut self,
        id: Uuid,
        draft: &CourierDraft,
    ) -> Result<Option<Courier>, AppError>;

    /// Oldest available courier, locked until the transaction ends. Rows
    /// already locked by another transaction are skipped.
    async fn lock_available_courier(&mut self) -> Result<Option<Courier>, AppError>;

    async fn set_courier_status(
        &mut self,
        id: Uuid,
        status: CourierStatus,
    ) -> Result<Option<Courier>, AppError>;
}

/// Delivery rows as seen from inside a transaction.
#[async_trait]
pub trait DeliveryRows: Send {
    /// Fails with `OrderAlreadyAssigned` when the order already has an
    /// active delivery.
    async fn insert_delivery(&mut self, delivery: &NewDelivery) -> Result<Delivery, AppError>;

    async fn active_delivery(&mut self, order_id: &str) -> Result<Option<Delivery>, AppError>;

    async fn courier_has_active_delivery(&mut self, courier_id: Uuid) -> Result<bool, AppError>;

    /// Active delivery if there is one, otherwise the most recent expired one.
    async fn latest_delivery(&mut self, order_id: &str) -> Result<Option<Delivery>, AppError>;

    async fn set_delivery_status(
        &mut self,
        order_id: &str,
        status: DeliveryStatus,
    ) -> Result<Option<Delivery>, AppError>;

    /// Removes the active delivery and returns it.
    async fn delete_active_delivery(&mut self, order_id: &str)
    -> Result<Option<Delivery>, AppError>;

    /// Flips every active delivery whose deadline is before `before` to
    /// expired and returns what was flipped.
    async fn expire_overdue(
        &mut self,
        before: DateTime<Utc>,
    ) -> Result<Vec<ExpiredDelivery>, AppError>;
}

#[async_trait]
pub trait Transaction: CourierRows + DeliveryRows {
    async fn commit(self: Box<Self>) -> Result<(), AppError>;

    async fn rollback(self: Box<Self>) -> Result<(), AppError>;
}

/// Commits on success and rolls back on failure, returning the original
/// result. A failed rollback is logged; the original error wins.
pub async fn finish<T>(
    tx: Box<dyn Transaction>,
    result: Result<T, AppError>,
) -> Result<T, AppError> {
    match result {
        Ok(value) => {
            tx.commit().await?;
            Ok(value)
        }
        Err(err) => {
            if let Err(rollback_err) = tx.rollback().await {
                tracing::warn!(error = %rollback_err, "rollback failed");
            }
            Err(err)
        }
    }
}
