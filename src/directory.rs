//! Courier directory: validated CRUD and status transitions over couriers.

use std::sync::Arc;

use uuid::Uuid;

use crate::error::AppError;
use crate::models::courier::{Courier, CourierInput, CourierStatus};
use crate::store::{CourierRows, DeliveryRows, Store, Transaction, finish};

#[derive(Clone)]
pub struct CourierDirectory {
    store: Arc<dyn Store>,
}

impl CourierDirectory {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    pub async fn get_by_id(&self, id: Uuid) -> Result<Courier, AppError> {
        let mut tx = self.store.begin().await?;
        let result = self.get_by_id_in_tx(tx.as_mut(), id).await;
        finish(tx, result).await
    }

    pub async fn get_by_id_in_tx(
        &self,
        tx: &mut dyn Transaction,
        id: Uuid,
    ) -> Result<Courier, AppError> {
        tx.courier_by_id(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("courier {id} not found")))
    }

    pub async fn get_all(&self) -> Result<Vec<Courier>, AppError> {
        let mut tx = self.store.begin().await?;
        let result = tx.all_couriers().await;
        finish(tx, result).await
    }

    pub async fn create(&self, input: CourierInput) -> Result<Courier, AppError> {
        let draft = input.validate()?;

        let mut tx = self.store.begin().await?;
        let result = tx.insert_courier(&draft).await;
        let courier = finish(tx, result).await?;

        tracing::info!(courier_id = %courier.id, "courier created");
        Ok(courier)
    }

    /// A courier holding an active delivery stays busy until the delivery is
    /// released; any other status is a conflict.
    pub async fn update(&self, id: Uuid, input: CourierInput) -> Result<Courier, AppError> {
        let draft = input.validate()?;

        let mut tx = self.store.begin().await?;
        let result = async {
            // the row update takes the courier lock before the delivery check
            let updated = tx
                .update_courier(id, &draft)
                .await?
                .ok_or_else(|| AppError::NotFound(format!("courier {id} not found")))?;

            if updated.status != CourierStatus::Busy
                && tx.courier_has_active_delivery(id).await?
            {
                return Err(AppError::Conflict(format!(
                    "courier {id} has an active delivery and must stay busy"
                )));
            }
            Ok::<_, AppError>(updated)
        }
        .await;
        finish(tx, result).await
    }

    /// Oldest-created available courier. Outside a transaction this is only a
    /// snapshot; the assignment protocol uses [`Self::find_available_in_tx`].
    pub async fn find_available(&self) -> Result<Courier, AppError> {
        let mut tx = self.store.begin().await?;
        let result = self
            .find_available_in_tx(tx.as_mut())
            .await
            .and_then(|found| {
                found.ok_or_else(|| AppError::NotFound("no available courier".to_string()))
            });
        finish(tx, result).await
    }

    /// Locks the oldest available courier for the rest of `tx`.
    pub async fn find_available_in_tx(
        &self,
        tx: &mut dyn Transaction,
    ) -> Result<Option<Courier>, AppError> {
        tx.lock_available_courier().await
    }

    pub async fn update_status(&self, id: Uuid, status: CourierStatus) -> Result<Courier, AppError> {
        let mut tx = self.store.begin().await?;
        let result = self.update_status_in_tx(tx.as_mut(), id, status).await;
        finish(tx, result).await
    }

    pub async fn update_status_in_tx(
        &self,
        tx: &mut dyn Transaction,
        id: Uuid,
        status: CourierStatus,
    ) -> Result<Courier, AppError> {
        tx.set_courier_status(id, status)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("courier {id} not found")))
    }
}
