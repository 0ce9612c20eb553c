use chrono::{DateTime, Duration, Utc};

use crate::models::courier::TransportMode;

const CAR_MINUTES: i64 = 5;
const SCOOTER_MINUTES: i64 = 15;
const DEFAULT_MINUTES: i64 = 30;

/// Time a courier is given to finish a delivery, by transport mode.
pub fn delivery_window(mode: &TransportMode) -> Duration {
    match mode {
        TransportMode::Car => Duration::minutes(CAR_MINUTES),
        TransportMode::Scooter => Duration::minutes(SCOOTER_MINUTES),
        TransportMode::OnFoot | TransportMode::Other(_) => Duration::minutes(DEFAULT_MINUTES),
    }
}

pub fn deadline(start: DateTime<Utc>, mode: &TransportMode) -> DateTime<Utc> {
    start + delivery_window(mode)
}
