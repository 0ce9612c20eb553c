use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum CourierStatus {
    Available,
    Busy,
    Paused,
}

impl CourierStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CourierStatus::Available => "available",
            CourierStatus::Busy => "busy",
            CourierStatus::Paused => "paused",
        }
    }
}

impl fmt::Display for CourierStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CourierStatus {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "available" => Ok(CourierStatus::Available),
            "busy" => Ok(CourierStatus::Busy),
            "paused" => Ok(CourierStatus::Paused),
            other => Err(AppError::BadInput(format!(
                "unknown courier status: {other}, expected available/busy/paused"
            ))),
        }
    }
}

/// How a courier moves. Modes outside the known set are kept verbatim so the
/// deadline policy can fall back to its default.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum TransportMode {
    OnFoot,
    Scooter,
    Car,
    Other(String),
}

impl TransportMode {
    pub fn as_str(&self) -> &str {
        match self {
            TransportMode::OnFoot => "on_foot",
            TransportMode::Scooter => "scooter",
            TransportMode::Car => "car",
            TransportMode::Other(raw) => raw,
        }
    }
}

impl From<String> for TransportMode {
    fn from(raw: String) -> Self {
        match raw.as_str() {
            "on_foot" => TransportMode::OnFoot,
            "scooter" => TransportMode::Scooter,
            "car" => TransportMode::Car,
            _ => TransportMode::Other(raw),
        }
    }
}

impl From<&str> for TransportMode {
    fn from(raw: &str) -> Self {
        TransportMode::from(raw.to_string())
    }
}

impl From<TransportMode> for String {
    fn from(mode: TransportMode) -> Self {
        mode.as_str().to_string()
    }
}

impl fmt::Display for TransportMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Courier {
    pub id: Uuid,
    pub name: String,
    pub phone: String,
    pub status: CourierStatus,
    pub transport_mode: TransportMode,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Validated courier fields, used for both create and update.
#[derive(Debug, Clone, PartialEq)]
pub struct CourierDraft {
    pub name: String,
    pub phone: String,
    pub status: CourierStatus,
    pub transport_mode: TransportMode,
}

/// Courier payload as it arrives over the wire, before validation.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CourierInput {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub phone: String,
    #[serde(default)]
    pub status: String,
    #[serde(default, alias = "transport_type")]
    pub transport_mode: String,
}

impl CourierInput {
    pub fn validate(self) -> Result<CourierDraft, AppError> {
        let name = required("name", &self.name)?;
        let phone = required("phone", &self.phone)?;
        let status = required("status", &self.status)?.parse::<CourierStatus>()?;
        let transport_mode = required("transport_mode", &self.transport_mode)?;

        Ok(CourierDraft {
            name,
            phone,
            status,
            transport_mode: TransportMode::from(transport_mode),
        })
    }
}

fn required(field: &str, value: &str) -> Result<String, AppError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(AppError::BadInput(format!("{field} cannot be empty")));
    }
    Ok(trimmed.to_string())
}
