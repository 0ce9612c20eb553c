//! Client side of the order service.

pub mod http;
pub mod retry;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::error::AppError;
use crate::models::order::OrderEvent;

pub use http::HttpOrderSource;
pub use retry::{RetryPolicy, RetryingOrderSource};

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("order service returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("order service request timed out")]
    Timeout,

    #[error("could not reach order service: {0}")]
    Connect(String),

    #[error("order service request failed: {0}")]
    Request(String),

    #[error("invalid order service response: {0}")]
    Decode(String),
}

impl GatewayError {
    pub fn is_retryable(&self) -> bool {
        match self {
            GatewayError::Status { status, .. } => matches!(status, 429 | 500 | 502 | 503 | 504),
            GatewayError::Timeout | GatewayError::Connect(_) => true,
            GatewayError::Request(_) | GatewayError::Decode(_) => false,
        }
    }
}

impl From<GatewayError> for AppError {
    fn from(err: GatewayError) -> Self {
        AppError::Upstream(err.to_string())
    }
}

/// Authoritative view of orders, owned by the order service.
#[async_trait]
pub trait OrderSource: Send + Sync {
    /// Orders created at or after `cursor`.
    async fn orders_since(&self, cursor: DateTime<Utc>) -> Result<Vec<OrderEvent>, GatewayError>;

    async fn order_status(&self, order_id: &str) -> Result<OrderEvent, GatewayError>;
}
