//! PostgreSQL store.
//!
//! Available couriers are claimed with `FOR UPDATE SKIP LOCKED` so that two
//! concurrent assignments never pick the same courier; a partial unique index
//! on active deliveries backs the one-active-delivery-per-order rule.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{Postgres, Row};
use tracing::info;
use uuid::Uuid;

use crate::config::DatabaseSettings;
use crate::error::AppError;
use crate::models::courier::{Courier, CourierDraft, CourierStatus, TransportMode};
use crate::models::delivery::{Delivery, DeliveryStatus, ExpiredDelivery, NewDelivery};
use crate::store::{CourierRows, DeliveryRows, Store, Transaction};

static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

const COURIER_COLUMNS: &str = "id, name, phone, status, transport_mode, created_at, updated_at";
const DELIVERY_COLUMNS: &str =
    "id, order_id, courier_id, status, assigned_at, deadline, created_at, updated_at";

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(settings: &DatabaseSettings) -> Result<Self, AppError> {
        let pool = PgPoolOptions::new()
            .max_connections(settings.max_connections)
            .min_connections(settings.min_connections)
            .max_lifetime(settings.max_lifetime)
            .acquire_timeout(settings.acquire_timeout)
            .connect(&settings.url)
            .await?;

        sqlx::query("SELECT 1").execute(&pool).await?;

        info!(
            max_connections = settings.max_connections,
            min_connections = settings.min_connections,
            "database pool initialized"
        );

        Ok(Self { pool })
    }

    pub async fn migrate(&self) -> Result<(), AppError> {
        MIGRATOR.run(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl Store for PgStore {
    async fn begin(&self) -> Result<Box<dyn Transaction>, AppError> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgTransaction { tx }))
    }
}

struct PgTransaction {
    tx: sqlx::Transaction<'static, Postgres>,
}

fn courier_from_row(row: &PgRow) -> Result<Courier, AppError> {
    let status: String = row.try_get("status")?;
    let transport_mode: String = row.try_get("transport_mode")?;

    Ok(Courier {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        phone: row.try_get("phone")?,
        status: status.parse()?,
        transport_mode: TransportMode::from(transport_mode),
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn delivery_from_row(row: &PgRow) -> Result<Delivery, AppError> {
    let status: String = row.try_get("status")?;

    Ok(Delivery {
        id: row.try_get("id")?,
        order_id: row.try_get("order_id")?,
        courier_id: row.try_get("courier_id")?,
        status: status.parse()?,
        assigned_at: row.try_get("assigned_at")?,
        deadline: row.try_get("deadline")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn phone_conflict(err: sqlx::Error, phone: &str) -> AppError {
    match err {
        sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
            AppError::Conflict(format!("phone {phone} is already registered"))
        }
        other => other.into(),
    }
}

#[async_trait]
impl CourierRows for PgTransaction {
    async fn courier_by_id(&mut self, id: Uuid) -> Result<Option<Courier>, AppError> {
        let row = sqlx::query(&format!(
            "SELECT {COURIER_COLUMNS} FROM couriers WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&mut *self.tx)
        .await?;

        row.as_ref().map(courier_from_row).transpose()
    }

    async fn all_couriers(&mut self) -> Result<Vec<Courier>, AppError> {
        let rows = sqlx::query(&format!(
            "SELECT {COURIER_COLUMNS} FROM couriers ORDER BY created_at ASC, id ASC"
        ))
        .fetch_all(&mut *self.tx)
        .await?;

        rows.iter().map(courier_from_row).collect()
    }

    async fn insert_courier(&mut self, draft: &CourierDraft) -> Result<Courier, AppError> {
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO couriers (id, name, phone, status, transport_mode, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, NOW(), NOW())
            RETURNING {COURIER_COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(&draft.name)
        .bind(&draft.phone)
        .bind(draft.status.as_str())
        .bind(draft.transport_mode.as_str())
        .fetch_one(&mut *self.tx)
        .await
        .map_err(|err| phone_conflict(err, &draft.phone))?;

        courier_from_row(&row)
    }

    async fn update_courier(
        &mut self,
        id: Uuid,
        draft: &CourierDraft,
    ) -> Result<Option<Courier>, AppError> {
        let row = sqlx::query(&format!(
            r#"
            UPDATE couriers
            SET name = $1, phone = $2, status = $3, transport_mode = $4, updated_at = NOW()
            WHERE id = $5
            RETURNING {COURIER_COLUMNS}
            "#
        ))
        .bind(&draft.name)
        .bind(&draft.phone)
        .bind(draft.status.as_str())
        .bind(draft.transport_mode.as_str())
        .bind(id)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|err| phone_conflict(err, &draft.phone))?;

        row.as_ref().map(courier_from_row).transpose()
    }

    async fn lock_available_courier(&mut self) -> Result<Option<Courier>, AppError> {
        let row = sqlx::query(&format!(
            r#"
            SELECT {COURIER_COLUMNS}
            FROM couriers
            WHERE status = 'available'
            ORDER BY created_at ASC, id ASC
            LIMIT 1
            FOR UPDATE SKIP LOCKED
            "#
        ))
        .fetch_optional(&mut *self.tx)
        .await?;

        row.as_ref().map(courier_from_row).transpose()
    }

    async fn set_courier_status(
        &mut self,
        id: Uuid,
        status: CourierStatus,
    ) -> Result<Option<Courier>, AppError> {
        let row = sqlx::query(&format!(
            r#"
            UPDATE couriers
            SET status = $1, updated_at = NOW()
            WHERE id = $2
            RETURNING {COURIER_COLUMNS}
            "#
        ))
        .bind(status.as_str())
        .bind(id)
        .fetch_optional(&mut *self.tx)
        .await?;

        row.as_ref().map(courier_from_row).transpose()
    }
}

#[async_trait]
impl DeliveryRows for PgTransaction {
    async fn insert_delivery(&mut self, delivery: &NewDelivery) -> Result<Delivery, AppError> {
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO deliveries
                (id, order_id, courier_id, status, assigned_at, deadline, created_at, updated_at)
            VALUES ($1, $2, $3, 'assigned', $4, $5, NOW(), NOW())
            RETURNING {DELIVERY_COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(&delivery.order_id)
        .bind(delivery.courier_id)
        .bind(delivery.assigned_at)
        .bind(delivery.deadline)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(|err| match err {
            sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
                AppError::OrderAlreadyAssigned(delivery.order_id.clone())
            }
            sqlx::Error::Database(db_err) if db_err.is_foreign_key_violation() => {
                AppError::NotFound(format!("courier {} not found", delivery.courier_id))
            }
            other => other.into(),
        })?;

        delivery_from_row(&row)
    }

    async fn active_delivery(&mut self, order_id: &str) -> Result<Option<Delivery>, AppError> {
        let row = sqlx::query(&format!(
            r#"
            SELECT {DELIVERY_COLUMNS}
            FROM deliveries
            WHERE order_id = $1 AND status = 'assigned'
            FOR UPDATE
            "#
        ))
        .bind(order_id)
        .fetch_optional(&mut *self.tx)
        .await?;

        row.as_ref().map(delivery_from_row).transpose()
    }

    async fn courier_has_active_delivery(&mut self, courier_id: Uuid) -> Result<bool, AppError> {
        let exists: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM deliveries
                WHERE courier_id = $1 AND status = 'assigned'
            )
            "#,
        )
        .bind(courier_id)
        .fetch_one(&mut *self.tx)
        .await?;

        Ok(exists)
    }

    async fn latest_delivery(&mut self, order_id: &str) -> Result<Option<Delivery>, AppError> {
        let row = sqlx::query(&format!(
            r#"
            SELECT {DELIVERY_COLUMNS}
            FROM deliveries
            WHERE order_id = $1
            ORDER BY (status = 'assigned') DESC, created_at DESC
            LIMIT 1
            "#
        ))
        .bind(order_id)
        .fetch_optional(&mut *self.tx)
        .await?;

        row.as_ref().map(delivery_from_row).transpose()
    }

    async fn set_delivery_status(
        &mut self,
        order_id: &str,
        status: DeliveryStatus,
    ) -> Result<Option<Delivery>, AppError> {
        let row = sqlx::query(&format!(
            r#"
            UPDATE deliveries
            SET status = $1, updated_at = NOW()
            WHERE order_id = $2 AND status = 'assigned'
            RETURNING {DELIVERY_COLUMNS}
            "#
        ))
        .bind(status.as_str())
        .bind(order_id)
        .fetch_optional(&mut *self.tx)
        .await?;

        row.as_ref().map(delivery_from_row).transpose()
    }

    async fn delete_active_delivery(
        &mut self,
        order_id: &str,
    ) -> Result<Option<Delivery>, AppError> {
        let row = sqlx::query(&format!(
            r#"
            DELETE FROM deliveries
            WHERE order_id = $1 AND status = 'assigned'
            RETURNING {DELIVERY_COLUMNS}
            "#
        ))
        .bind(order_id)
        .fetch_optional(&mut *self.tx)
        .await?;

        row.as_ref().map(delivery_from_row).transpose()
    }

    async fn expire_overdue(
        &mut self,
        before: DateTime<Utc>,
    ) -> Result<Vec<ExpiredDelivery>, AppError> {
        let rows = sqlx::query(
            r#"
            WITH overdue AS (
                SELECT id
                FROM deliveries
                WHERE status = 'assigned' AND deadline < $1
                FOR UPDATE SKIP LOCKED
            )
            UPDATE deliveries AS d
            SET status = 'expired', updated_at = NOW()
            FROM overdue
            WHERE d.id = overdue.id
            RETURNING d.order_id, d.courier_id
            "#,
        )
        .bind(before)
        .fetch_all(&mut *self.tx)
        .await?;

        rows.iter()
            .map(|row| -> Result<ExpiredDelivery, AppError> {
                Ok(ExpiredDelivery {
                    order_id: row.try_get("order_id")?,
                    courier_id: row.try_get("courier_id")?,
                })
            })
            .collect()
    }
}

#[async_trait]
impl Transaction for PgTransaction {
    async fn commit(self: Box<Self>) -> Result<(), AppError> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), AppError> {
        self.tx.rollback().await?;
        Ok(())
    }
}
