//! In-process store used by tests and by local runs without a database.
//!
//! Transactions are fully serialized: `begin` takes the table lock and works
//! on a private copy that only replaces the shared tables on commit.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use crate::error::AppError;
use crate::models::courier::{Courier, CourierDraft, CourierStatus};
use crate::models::delivery::{Delivery, DeliveryStatus, ExpiredDelivery, NewDelivery};
use crate::store::{CourierRows, DeliveryRows, Store, Transaction};

#[derive(Debug, Clone, Default)]
struct Tables {
    couriers: Vec<Courier>,
    deliveries: Vec<Delivery>,
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    tables: Arc<Mutex<Tables>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn begin(&self) -> Result<Box<dyn Transaction>, AppError> {
        let guard = self.tables.clone().lock_owned().await;
        let working = guard.clone();
        Ok(Box::new(MemoryTransaction { guard, working }))
    }
}

struct MemoryTransaction {
    guard: OwnedMutexGuard<Tables>,
    working: Tables,
}

#[async_trait]
impl CourierRows for MemoryTransaction {
    async fn courier_by_id(&mut self, id: Uuid) -> Result<Option<Courier>, AppError> {
        Ok(self.working.couriers.iter().find(|c| c.id == id).cloned())
    }

    async fn all_couriers(&mut self) -> Result<Vec<Courier>, AppError> {
        Ok(self.working.couriers.clone())
    }

    async fn insert_courier(&mut self, draft: &CourierDraft) -> Result<Courier, AppError> {
        if self.working.couriers.iter().any(|c| c.phone == draft.phone) {
            return Err(AppError::Conflict(format!(
                "phone {} is already registered",
                draft.phone
            )));
        }

        let now = Utc::now();
        let courier = Courier {
            id: Uuid::new_v4(),
            name: draft.name.clone(),
            phone: draft.phone.clone(),
            status: draft.status,
            transport_mode: draft.transport_mode.clone(),
            created_at: now,
            updated_at: now,
        };
        self.working.couriers.push(courier.clone());
        Ok(courier)
    }

    async fn update_courier(
        &mut self,
        id: Uuid,
        draft: &CourierDraft,
    ) -> Result<Option<Courier>, AppError> {
        if self
            .working
            .couriers
            .iter()
            .any(|c| c.id != id && c.phone == draft.phone)
        {
            return Err(AppError::Conflict(format!(
                "phone {} is already registered",
                draft.phone
            )));
        }

        let Some(courier) = self.working.couriers.iter_mut().find(|c| c.id == id) else {
            return Ok(None);
        };
        courier.name = draft.name.clone();
        courier.phone = draft.phone.clone();
        courier.status = draft.status;
        courier.transport_mode = draft.transport_mode.clone();
        courier.updated_at = Utc::now();
        Ok(Some(courier.clone()))
    }

    async fn lock_available_courier(&mut self) -> Result<Option<Courier>, AppError> {
        Ok(self
            .working
            .couriers
            .iter()
            .filter(|c| c.status == CourierStatus::Available)
            .min_by_key(|c| (c.created_at, c.id))
            .cloned())
    }

    async fn set_courier_status(
        &mut self,
        id: Uuid,
        status: CourierStatus,
    ) -> Result<Option<Courier>, AppError> {
        let Some(courier) = self.working.couriers.iter_mut().find(|c| c.id == id) else {
            return Ok(None);
        };
        courier.status = status;
        courier.updated_at = Utc::now();
        Ok(Some(courier.clone()))
    }
}

#[async_trait]
impl DeliveryRows for MemoryTransaction {
    async fn insert_delivery(&mut self, delivery: &NewDelivery) -> Result<Delivery, AppError> {
        if self
            .working
            .deliveries
            .iter()
            .any(|d| d.order_id == delivery.order_id && d.is_active())
        {
            return Err(AppError::OrderAlreadyAssigned(delivery.order_id.clone()));
        }
        if !self
            .working
            .couriers
            .iter()
            .any(|c| c.id == delivery.courier_id)
        {
            return Err(AppError::NotFound(format!(
                "courier {} not found",
                delivery.courier_id
            )));
        }

        let now = Utc::now();
        let row = Delivery {
            id: Uuid::new_v4(),
            order_id: delivery.order_id.clone(),
            courier_id: delivery.courier_id,
            status: DeliveryStatus::Assigned,
            assigned_at: delivery.assigned_at,
            deadline: delivery.deadline,
            created_at: now,
            updated_at: now,
        };
        self.working.deliveries.push(row.clone());
        Ok(row)
    }

    async fn active_delivery(&mut self, order_id: &str) -> Result<Option<Delivery>, AppError> {
        Ok(self
            .working
            .deliveries
            .iter()
            .find(|d| d.order_id == order_id && d.is_active())
            .cloned())
    }

    async fn courier_has_active_delivery(&mut self, courier_id: Uuid) -> Result<bool, AppError> {
        Ok(self
            .working
            .deliveries
            .iter()
            .any(|d| d.courier_id == courier_id && d.is_active()))
    }

    async fn latest_delivery(&mut self, order_id: &str) -> Result<Option<Delivery>, AppError> {
        if let Some(active) = self.active_delivery(order_id).await? {
            return Ok(Some(active));
        }
        Ok(self
            .working
            .deliveries
            .iter()
            .filter(|d| d.order_id == order_id)
            .max_by_key(|d| d.created_at)
            .cloned())
    }

    async fn set_delivery_status(
        &mut self,
        order_id: &str,
        status: DeliveryStatus,
    ) -> Result<Option<Delivery>, AppError> {
        let Some(row) = self
            .working
            .deliveries
            .iter_mut()
            .find(|d| d.order_id == order_id && d.is_active())
        else {
            return Ok(None);
        };
        row.status = status;
        row.updated_at = Utc::now();
        Ok(Some(row.clone()))
    }

    async fn delete_active_delivery(
        &mut self,
        order_id: &str,
    ) -> Result<Option<Delivery>, AppError> {
        let position = self
            .working
            .deliveries
            .iter()
            .position(|d| d.order_id == order_id && d.is_active());
        Ok(position.map(|idx| self.working.deliveries.remove(idx)))
    }

    async fn expire_overdue(
        &mut self,
        before: DateTime<Utc>,
    ) -> Result<Vec<ExpiredDelivery>, AppError> {
        let now = Utc::now();
        let mut expired = Vec::new();
        for row in self
            .working
            .deliveries
            .iter_mut()
            .filter(|d| d.is_active() && d.deadline < before)
        {
            row.status = DeliveryStatus::Expired;
            row.updated_at = now;
            expired.push(ExpiredDelivery {
                order_id: row.order_id.clone(),
                courier_id: row.courier_id,
            });
        }
        Ok(expired)
    }
}

#[async_trait]
impl Transaction for MemoryTransaction {
    async fn commit(self: Box<Self>) -> Result<(), AppError> {
        let MemoryTransaction { mut guard, working } = *self;
        *guard = working;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), AppError> {
        Ok(())
    }
}
