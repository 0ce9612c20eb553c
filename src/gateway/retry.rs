//! Exponential backoff with jitter around any [`OrderSource`].

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::Rng;
use tracing::warn;

use crate::gateway::{GatewayError, OrderSource};
use crate::models::order::OrderEvent;
use crate::observability::metrics::Metrics;

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub factor: f64,
    pub max_delay: Duration,
    /// Fraction of the delay randomised in both directions.
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(100),
            factor: 2.0,
            max_delay: Duration::from_secs(2),
            jitter: 0.2,
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `retry` (0-based), before jitter.
    pub fn base_delay(&self, retry: u32) -> Duration {
        let exponent = retry.min(30) as i32;
        let secs = self.initial_delay.as_secs_f64() * self.factor.powi(exponent);
        Duration::from_secs_f64(secs.min(self.max_delay.as_secs_f64()))
    }

    fn delay(&self, retry: u32) -> Duration {
        apply_jitter(self.base_delay(retry), self.jitter)
    }
}

fn apply_jitter(delay: Duration, jitter: f64) -> Duration {
    if jitter <= 0.0 || delay.is_zero() {
        return delay;
    }

    let range = delay.as_secs_f64() * jitter.clamp(0.0, 1.0);
    let offset = rand::thread_rng().gen_range(-range..=range);
    Duration::from_secs_f64((delay.as_secs_f64() + offset).max(0.0))
}

pub struct RetryingOrderSource<S> {
    inner: S,
    policy: RetryPolicy,
    metrics: Metrics,
}

impl<S: OrderSource> RetryingOrderSource<S> {
    pub fn new(inner: S, policy: RetryPolicy, metrics: Metrics) -> Self {
        Self {
            inner,
            policy,
            metrics,
        }
    }

    async fn with_retry<T, F, Fut>(&self, method: &'static str, mut call: F) -> Result<T, GatewayError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, GatewayError>>,
    {
        let mut retry = 0;
        loop {
            match call().await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_retryable() && retry < self.policy.max_retries => {
                    let delay = self.policy.delay(retry);
                    warn!(
                        method,
                        attempt = retry + 1,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "order service call failed, retrying"
                    );
                    self.metrics
                        .gateway_retries_total
                        .with_label_values(&[method])
                        .inc();
                    tokio::time::sleep(delay).await;
                    retry += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

#[async_trait]
impl<S: OrderSource> OrderSource for RetryingOrderSource<S> {
    async fn orders_since(&self, cursor: DateTime<Utc>) -> Result<Vec<OrderEvent>, GatewayError> {
        self.with_retry("orders_since", || self.inner.orders_since(cursor))
            .await
    }

    async fn order_status(&self, order_id: &str) -> Result<OrderEvent, GatewayError> {
        self.with_retry("order_status", || self.inner.order_status(order_id))
            .await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use chrono::{DateTime, Utc};

    use super::{RetryPolicy, RetryingOrderSource};
    use crate::gateway::{GatewayError, OrderSource};
    use crate::models::order::OrderEvent;
    use crate::observability::metrics::Metrics;

    struct Flaky {
        failures: u32,
        status: u16,
        calls: AtomicU32,
    }

    #[async_trait]
    impl OrderSource for Flaky {
        async fn orders_since(&self, _: DateTime<Utc>) -> Result<Vec<OrderEvent>, GatewayError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                return Err(GatewayError::Status {
                    status: self.status,
                    body: String::new(),
                });
            }
            Ok(vec![OrderEvent::new("o-1", "created", Utc::now())])
        }

        async fn order_status(&self, order_id: &str) -> Result<OrderEvent, GatewayError> {
            Err(GatewayError::Status {
                status: 404,
                body: format!("{order_id} not found"),
            })
        }
    }

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            ..RetryPolicy::default()
        }
    }

    fn flaky(failures: u32, status: u16) -> Flaky {
        Flaky {
            failures,
            status,
            calls: AtomicU32::new(0),
        }
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.base_delay(0), Duration::from_millis(100));
        assert_eq!(policy.base_delay(1), Duration::from_millis(200));
        assert_eq!(policy.base_delay(2), Duration::from_millis(400));
        assert_eq!(policy.base_delay(10), Duration::from_secs(2));
    }

    #[test]
    fn jittered_delay_stays_within_bounds() {
        let policy = RetryPolicy::default();
        for _ in 0..100 {
            let delay = policy.delay(1);
            assert!(delay >= Duration::from_millis(159), "{delay:?}");
            assert!(delay <= Duration::from_millis(241), "{delay:?}");
        }
    }

    #[tokio::test]
    async fn recovers_after_transient_failures() {
        let metrics = Metrics::new();
        let source = RetryingOrderSource::new(flaky(2, 503), fast_policy(), metrics.clone());

        let orders = source.orders_since(Utc::now()).await.unwrap();
        assert_eq!(orders.len(), 1);
        assert_eq!(source.inner.calls.load(Ordering::SeqCst), 3);
        assert_eq!(
            metrics
                .gateway_retries_total
                .with_label_values(&["orders_since"])
                .get(),
            2
        );
    }

    #[tokio::test]
    async fn gives_up_after_max_retries() {
        let source = RetryingOrderSource::new(flaky(10, 502), fast_policy(), Metrics::new());

        let err = source.orders_since(Utc::now()).await.unwrap_err();
        assert!(matches!(err, GatewayError::Status { status: 502, .. }));
        assert_eq!(source.inner.calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn client_errors_are_not_retried() {
        let source = RetryingOrderSource::new(flaky(1, 400), fast_policy(), Metrics::new());
        assert!(source.orders_since(Utc::now()).await.is_err());
        assert_eq!(source.inner.calls.load(Ordering::SeqCst), 1);

        let err = source.order_status("o-9").await.unwrap_err();
        assert!(!err.is_retryable());
    }
}
