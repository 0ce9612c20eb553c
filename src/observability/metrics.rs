use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts, Registry, TextEncoder,
};

#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    pub http_requests_total: IntCounterVec,
    pub http_request_duration_seconds: HistogramVec,
    pub rate_limit_exceeded_total: IntCounterVec,
    pub assignments_total: IntCounterVec,
    pub deliveries_released_total: IntCounterVec,
    pub events_processed_total: IntCounterVec,
    pub gateway_retries_total: IntCounterVec,
    pub poller_orders_total: IntCounter,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let http_requests_total = IntCounterVec::new(
            Opts::new("http_requests_total", "Total number of HTTP requests"),
            &["method", "path", "status"],
        )
        .expect("valid http_requests_total metric");

        let http_request_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "http_request_duration_seconds",
                "Duration of HTTP requests in seconds",
            ),
            &["path"],
        )
        .expect("valid http_request_duration_seconds metric");

        let rate_limit_exceeded_total = IntCounterVec::new(
            Opts::new(
                "rate_limit_exceeded_total",
                "Total number of requests rejected by the rate limiter",
            ),
            &["path"],
        )
        .expect("valid rate_limit_exceeded_total metric");

        let assignments_total = IntCounterVec::new(
            Opts::new("assignments_total", "Assignment attempts by outcome"),
            &["outcome"],
        )
        .expect("valid assignments_total metric");

        let deliveries_released_total = IntCounterVec::new(
            Opts::new(
                "deliveries_released_total",
                "Couriers released from deliveries by reason",
            ),
            &["reason"],
        )
        .expect("valid deliveries_released_total metric");

        let events_processed_total = IntCounterVec::new(
            Opts::new(
                "events_processed_total",
                "Order events processed by status and result",
            ),
            &["status", "result"],
        )
        .expect("valid events_processed_total metric");

        let gateway_retries_total = IntCounterVec::new(
            Opts::new("gateway_retries_total", "Order service request retries"),
            &["method"],
        )
        .expect("valid gateway_retries_total metric");

        let poller_orders_total = IntCounter::new(
            "poller_orders_total",
            "Orders fetched by the order poller",
        )
        .expect("valid poller_orders_total metric");

        registry
            .register(Box::new(http_requests_total.clone()))
            .expect("register http_requests_total");
        registry
            .register(Box::new(http_request_duration_seconds.clone()))
            .expect("register http_request_duration_seconds");
        registry
            .register(Box::new(rate_limit_exceeded_total.clone()))
            .expect("register rate_limit_exceeded_total");
        registry
            .register(Box::new(assignments_total.clone()))
            .expect("register assignments_total");
        registry
            .register(Box::new(deliveries_released_total.clone()))
            .expect("register deliveries_released_total");
        registry
            .register(Box::new(events_processed_total.clone()))
            .expect("register events_processed_total");
        registry
            .register(Box::new(gateway_retries_total.clone()))
            .expect("register gateway_retries_total");
        registry
            .register(Box::new(poller_orders_total.clone()))
            .expect("register poller_orders_total");

        Self {
            registry,
            http_requests_total,
            http_request_duration_seconds,
            rate_limit_exceeded_total,
            assignments_total,
            deliveries_released_total,
            events_processed_total,
            gateway_retries_total,
            poller_orders_total,
        }
    }

    pub fn encode(&self) -> Result<String, String> {
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();

        TextEncoder::new()
            .encode(&metric_families, &mut buffer)
            .map_err(|err| format!("failed to encode metrics: {err}"))?;

        String::from_utf8(buffer).map_err(|err| format!("metrics are not valid utf8: {err}"))
    }
}
