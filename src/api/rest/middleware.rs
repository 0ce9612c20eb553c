use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use axum::Json;
use axum::extract::{ConnectInfo, MatchedPath, Request, State};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use dashmap::DashMap;
use serde_json::json;
use tracing::{debug, warn};

use crate::config::RateLimitSettings;
use crate::state::AppState;

const WINDOW: Duration = Duration::from_secs(1);
const SWEEP_EVERY: Duration = Duration::from_secs(60);

/// Per-client sliding one-second window. Clients idle for a full window are
/// dropped by a sweep that runs at most once a minute.
pub struct RateLimiter {
    capacity: usize,
    requests: DashMap<String, VecDeque<Instant>>,
    origin: Instant,
    next_sweep_ms: AtomicU64,
}

impl RateLimiter {
    pub fn new(requests_per_second: u32, burst: u32) -> Self {
        Self {
            capacity: requests_per_second.max(burst).max(1) as usize,
            requests: DashMap::new(),
            origin: Instant::now(),
            next_sweep_ms: AtomicU64::new(SWEEP_EVERY.as_millis() as u64),
        }
    }

    pub fn from_settings(settings: &RateLimitSettings) -> Option<Self> {
        settings
            .enabled
            .then(|| Self::new(settings.requests_per_second, settings.burst))
    }

    pub fn allow(&self, client: &str) -> bool {
        self.allow_at(client, Instant::now())
    }

    pub fn allow_at(&self, client: &str, now: Instant) -> bool {
        // must run before `entry` takes a shard lock
        self.sweep_idle(now);

        let mut window = self.requests.entry(client.to_string()).or_default();
        while window
            .front()
            .is_some_and(|seen| now.saturating_duration_since(*seen) >= WINDOW)
        {
            window.pop_front();
        }

        if window.len() >= self.capacity {
            return false;
        }
        window.push_back(now);
        true
    }

    pub fn tracked_clients(&self) -> usize {
        self.requests.len()
    }

    fn sweep_idle(&self, now: Instant) {
        let elapsed_ms = now.saturating_duration_since(self.origin).as_millis() as u64;
        let due = self.next_sweep_ms.load(Ordering::Relaxed);
        if elapsed_ms < due {
            return;
        }
        let next = elapsed_ms + SWEEP_EVERY.as_millis() as u64;
        if self
            .next_sweep_ms
            .compare_exchange(due, next, Ordering::Relaxed, Ordering::Relaxed)
            .is_err()
        {
            return;
        }

        let before = self.requests.len();
        self.requests.retain(|_, window| {
            window
                .back()
                .is_some_and(|seen| now.saturating_duration_since(*seen) < WINDOW)
        });
        debug!(
            evicted = before.saturating_sub(self.requests.len()),
            "rate limiter swept idle clients"
        );
    }
}

fn client_key(request: &Request) -> String {
    if let Some(forwarded) = request
        .headers()
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
    {
        return forwarded.to_string();
    }

    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

fn path_label(request: &Request) -> String {
    request
        .extensions()
        .get::<MatchedPath>()
        .map(|path| path.as_str().to_string())
        .unwrap_or_else(|| "unmatched".to_string())
}

pub async fn rate_limit(State(state): State<Arc<AppState>>, request: Request, next: Next) -> Response {
    let Some(limiter) = &state.rate_limiter else {
        return next.run(request).await;
    };

    let client = client_key(&request);
    if limiter.allow(&client) {
        return next.run(request).await;
    }

    let path = path_label(&request);
    warn!(client = %client, path = %path, "rate limit exceeded");
    state
        .metrics
        .rate_limit_exceeded_total
        .with_label_values(&[&path])
        .inc();

    (
        StatusCode::TOO_MANY_REQUESTS,
        Json(json!({ "error": "too many requests" })),
    )
        .into_response()
}

pub async fn track_metrics(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Response {
    if !state.metrics_enabled {
        return next.run(request).await;
    }

    let start = Instant::now();
    let path = path_label(&request);
    let method = request.method().to_string();

    let response = next.run(request).await;

    let status = response.status().as_u16().to_string();
    state
        .metrics
        .http_requests_total
        .with_label_values(&[&method, &path, &status])
        .inc();
    state
        .metrics
        .http_request_duration_seconds
        .with_label_values(&[&path])
        .observe(start.elapsed().as_secs_f64());

    response
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use super::RateLimiter;

    #[test]
    fn window_slides_per_client() {
        let limiter = RateLimiter::new(2, 0);
        let start = Instant::now();

        assert!(limiter.allow_at("a", start));
        assert!(limiter.allow_at("a", start + Duration::from_millis(100)));
        assert!(!limiter.allow_at("a", start + Duration::from_millis(200)));
        assert!(limiter.allow_at("b", start + Duration::from_millis(200)));

        assert!(limiter.allow_at("a", start + Duration::from_millis(1000)));
        assert!(!limiter.allow_at("a", start + Duration::from_millis(1050)));
    }

    #[test]
    fn burst_raises_capacity() {
        let limiter = RateLimiter::new(1, 3);
        let now = Instant::now();

        for _ in 0..3 {
            assert!(limiter.allow_at("a", now));
        }
        assert!(!limiter.allow_at("a", now));
    }

    #[test]
    fn idle_clients_are_evicted() {
        let limiter = RateLimiter::new(5, 0);
        let start = Instant::now();

        for i in 0..1_000 {
            assert!(limiter.allow_at(&format!("10.0.0.{i}"), start));
        }
        assert_eq!(limiter.tracked_clients(), 1_000);

        let later = start + Duration::from_secs(3_600);
        assert!(limiter.allow_at("late", later));
        assert_eq!(limiter.tracked_clients(), 1);
    }

    #[test]
    fn sweep_keeps_clients_inside_their_window() {
        let limiter = RateLimiter::new(1, 0);
        let start = Instant::now();
        let later = start + Duration::from_secs(120);

        assert!(limiter.allow_at("idle", start));
        assert!(limiter.allow_at("busy", later));
        assert!(limiter.allow_at("other", later + Duration::from_millis(10)));

        assert_eq!(limiter.tracked_clients(), 2);
        assert!(!limiter.allow_at("busy", later + Duration::from_millis(20)));
    }
}
