use futures::{Stream, StreamExt};
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::events::EventRouter;
use crate::models::order::OrderEvent;

/// Drains raw event payloads into the [`EventRouter`].
pub struct EventConsumer {
    router: EventRouter,
}

impl EventConsumer {
    pub fn new(router: EventRouter) -> Self {
        Self { router }
    }

    /// Handles one raw payload. Undecodable payloads are logged and dropped.
    pub async fn process(&self, payload: &[u8]) {
        let event: OrderEvent = match serde_json::from_slice(payload) {
            Ok(event) => event,
            Err(err) => {
                warn!(error = %err, bytes = payload.len(), "dropping undecodable event payload");
                return;
            }
        };

        if let Err(err) = self.router.route(&event).await {
            error!(
                order_id = %event.order_id,
                status = %event.status,
                error = %err,
                "failed to handle order event"
            );
        }
    }

    /// Runs until the stream ends or shutdown is signalled.
    pub async fn run<S>(self, stream: S, mut shutdown: watch::Receiver<bool>)
    where
        S: Stream<Item = Vec<u8>> + Send,
    {
        info!("event consumer started");
        futures::pin_mut!(stream);

        loop {
            tokio::select! {
                next = stream.next() => match next {
                    Some(payload) => self.process(&payload).await,
                    None => {
                        info!("event stream closed");
                        break;
                    }
                },
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("event consumer stopped");
    }
}
