//! Delivery ledger keyed by order id.
//!
//! The `*_in_tx` operations only touch delivery rows and leave courier status
//! to the caller. The plain entry points run in their own transaction and keep
//! the courier row in step (busy on create, available on delete or expiry).

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::info;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::courier::CourierStatus;
use crate::models::delivery::{Delivery, DeliveryStatus, NewDelivery};
use crate::store::{CourierRows, DeliveryRows, Store, Transaction, finish};

#[derive(Clone)]
pub struct DeliveryLedger {
    store: Arc<dyn Store>,
}

fn delivery_not_found(order_id: &str) -> AppError {
    AppError::NotFound(format!("delivery for order {order_id} not found"))
}

impl DeliveryLedger {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    pub async fn create(&self, delivery: NewDelivery) -> Result<Delivery, AppError> {
        let mut tx = self.store.begin().await?;
        let result = async {
            let created = self.create_in_tx(tx.as_mut(), &delivery).await?;
            mark_courier(tx.as_mut(), created.courier_id, CourierStatus::Busy).await?;
            Ok::<_, AppError>(created)
        }
        .await;
        finish(tx, result).await
    }

    pub async fn create_in_tx(
        &self,
        tx: &mut dyn Transaction,
        delivery: &NewDelivery,
    ) -> Result<Delivery, AppError> {
        tx.insert_delivery(delivery).await
    }

    /// Active delivery for the order, or the most recent expired one.
    pub async fn get_by_order_id(&self, order_id: &str) -> Result<Delivery, AppError> {
        let mut tx = self.store.begin().await?;
        let result = tx
            .latest_delivery(order_id)
            .await
            .and_then(|found| found.ok_or_else(|| delivery_not_found(order_id)));
        finish(tx, result).await
    }

    pub async fn get_active_in_tx(
        &self,
        tx: &mut dyn Transaction,
        order_id: &str,
    ) -> Result<Option<Delivery>, AppError> {
        tx.active_delivery(order_id).await
    }

    pub async fn update_status(
        &self,
        order_id: &str,
        status: DeliveryStatus,
    ) -> Result<Delivery, AppError> {
        let mut tx = self.store.begin().await?;
        let result = async {
            let updated = self.update_status_in_tx(tx.as_mut(), order_id, status).await?;
            if status == DeliveryStatus::Expired {
                mark_courier(tx.as_mut(), updated.courier_id, CourierStatus::Available).await?;
            }
            Ok::<_, AppError>(updated)
        }
        .await;
        finish(tx, result).await
    }

    /// Changes the status of the active delivery for `order_id`.
    pub async fn update_status_in_tx(
        &self,
        tx: &mut dyn Transaction,
        order_id: &str,
        status: DeliveryStatus,
    ) -> Result<Delivery, AppError> {
        tx.set_delivery_status(order_id, status)
            .await?
            .ok_or_else(|| delivery_not_found(order_id))
    }

    /// Deletes the active delivery and frees its courier; returns the courier id.
    pub async fn delete_by_order_id(&self, order_id: &str) -> Result<Uuid, AppError> {
        let mut tx = self.store.begin().await?;
        let result = async {
            let courier_id = self.delete_by_order_id_in_tx(tx.as_mut(), order_id).await?;
            mark_courier(tx.as_mut(), courier_id, CourierStatus::Available).await?;
            Ok::<_, AppError>(courier_id)
        }
        .await;
        finish(tx, result).await
    }

    /// Deletes the active delivery and returns the courier it referenced.
    pub async fn delete_by_order_id_in_tx(
        &self,
        tx: &mut dyn Transaction,
        order_id: &str,
    ) -> Result<Uuid, AppError> {
        tx.delete_active_delivery(order_id)
            .await?
            .map(|deleted| deleted.courier_id)
            .ok_or_else(|| delivery_not_found(order_id))
    }

    pub async fn check_exists(&self, order_id: &str) -> Result<bool, AppError> {
        let mut tx = self.store.begin().await?;
        let result = self.check_exists_in_tx(tx.as_mut(), order_id).await;
        finish(tx, result).await
    }

    /// Whether the order currently has an active delivery.
    pub async fn check_exists_in_tx(
        &self,
        tx: &mut dyn Transaction,
        order_id: &str,
    ) -> Result<bool, AppError> {
        Ok(tx.active_delivery(order_id).await?.is_some())
    }

    /// Expires every active delivery with a deadline before `before` and frees
    /// the couriers, all in one transaction. Returns the affected order ids.
    pub async fn release_expired(&self, before: DateTime<Utc>) -> Result<Vec<String>, AppError> {
        let mut tx = self.store.begin().await?;
        let result = async {
            let expired = tx.expire_overdue(before).await?;
            for row in &expired {
                mark_courier(tx.as_mut(), row.courier_id, CourierStatus::Available).await?;
            }
            Ok::<_, AppError>(expired.into_iter().map(|row| row.order_id).collect::<Vec<_>>())
        }
        .await;
        let order_ids = finish(tx, result).await?;

        if !order_ids.is_empty() {
            info!(count = order_ids.len(), order_ids = ?order_ids, "expired deliveries released");
        }
        Ok(order_ids)
    }
}

async fn mark_courier(
    tx: &mut dyn Transaction,
    courier_id: Uuid,
    status: CourierStatus,
) -> Result<(), AppError> {
    tx.set_courier_status(courier_id, status)
        .await?
        .map(|_| ())
        .ok_or_else(|| AppError::NotFound(format!("courier {courier_id} not found")))
}
