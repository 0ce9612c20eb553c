use std::sync::Arc;

use axum::Router;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::post;

use crate::engine::queue::enqueue_event;
use crate::error::AppError;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/api/events", post(ingest_event))
}

/// Accepts a raw order event; decoding happens in the consumer.
async fn ingest_event(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<StatusCode, AppError> {
    if body.is_empty() {
        return Err(AppError::BadInput("event payload is empty".to_string()));
    }

    enqueue_event(&state, body.to_vec())?;
    Ok(StatusCode::ACCEPTED)
}
