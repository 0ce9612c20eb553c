use crate::error::AppError;
use crate::state::AppState;

/// Hands a raw event payload to the consumer; fails fast when the queue is full.
pub fn enqueue_event(state: &AppState, payload: Vec<u8>) -> Result<(), AppError> {
    state.event_tx.try_send(payload).map_err(|err| match err {
        tokio::sync::mpsc::error::TrySendError::Full(_) => {
            AppError::Unavailable("event queue is full".to_string())
        }
        tokio::sync::mpsc::error::TrySendError::Closed(_) => {
            AppError::Internal("event queue is closed".to_string())
        }
    })
}
