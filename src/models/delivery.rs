use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Assigned,
    Expired,
}

impl DeliveryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryStatus::Assigned => "assigned",
            DeliveryStatus::Expired => "expired",
        }
    }
}

impl fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeliveryStatus {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "assigned" => Ok(DeliveryStatus::Assigned),
            "expired" => Ok(DeliveryStatus::Expired),
            other => Err(AppError::BadInput(format!("unknown delivery status: {other}"))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Delivery {
    pub id: Uuid,
    pub order_id: String,
    pub courier_id: Uuid,
    pub status: DeliveryStatus,
    pub assigned_at: DateTime<Utc>,
    pub deadline: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Delivery {
    pub fn is_active(&self) -> bool {
        self.status == DeliveryStatus::Assigned
    }
}

/// Row to insert; the store fills in identity and bookkeeping timestamps.
#[derive(Debug, Clone)]
pub struct NewDelivery {
    pub order_id: String,
    pub courier_id: Uuid,
    pub assigned_at: DateTime<Utc>,
    pub deadline: DateTime<Utc>,
}

/// A delivery flipped to expired by a reclaim sweep.
#[derive(Debug, Clone, PartialEq)]
pub struct ExpiredDelivery {
    pub order_id: String,
    pub courier_id: Uuid,
}
