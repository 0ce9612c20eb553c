use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const STATUS_CREATED: &str = "created";
pub const STATUS_CANCELLED: &str = "cancelled";
pub const STATUS_COMPLETED: &str = "completed";

/// Order status change as published by the order service, either through the
/// event stream or its polling API.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OrderEvent {
    #[serde(default)]
    pub order_id: String,
    #[serde(default)]
    pub status: String,
    #[serde(default = "unset_timestamp")]
    pub created_at: DateTime<Utc>,
}

fn unset_timestamp() -> DateTime<Utc> {
    DateTime::<Utc>::UNIX_EPOCH
}

impl OrderEvent {
    pub fn new(order_id: impl Into<String>, status: impl Into<String>, created_at: DateTime<Utc>) -> Self {
        Self {
            order_id: order_id.into(),
            status: status.into(),
            created_at,
        }
    }

    /// Shape check only; whether the status has a handler is the router's call.
    /// Producers encode a missing timestamp either as the epoch or as
    /// `0001-01-01T00:00:00Z`, so anything not after the epoch counts as unset.
    pub fn is_well_formed(&self) -> bool {
        !self.order_id.trim().is_empty()
            && !self.status.trim().is_empty()
            && self.created_at > DateTime::<Utc>::UNIX_EPOCH
    }
}
