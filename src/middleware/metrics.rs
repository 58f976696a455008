use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::context::RequestContext;
use crate::error::Failure;
use crate::handler::{Endpoint, Flow, Middleware};
use crate::response::Response;

/// Middleware for collecting Prometheus-compatible metrics
///
/// All counters are atomics updated with `Ordering::Relaxed`; readings are
/// eventually consistent. Share one instance between the routes it observes
/// and a [`MetricsEndpoint`] through an `Arc`.
///
/// Metrics collected:
/// - Requests entering the middleware
/// - Average latency of responses flowing back through it
/// - Responses by status class (2xx, 3xx, 4xx, 5xx)
/// - Authentication denials (401 and 403)
///
/// Error responses flow back through `after` too, so handler failures show up
/// in the 5xx class.
#[derive(Debug, Default)]
pub struct MetricsMiddleware {
    request_count: AtomicUsize,
    completed: AtomicUsize,
    total_latency_ns: AtomicU64,
    status_classes: [AtomicUsize; 4],
    auth_failures: AtomicUsize,
}

impl MetricsMiddleware {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the total number of requests seen
    #[must_use]
    pub fn request_count(&self) -> usize {
        self.request_count.load(Ordering::Relaxed)
    }

    /// Mean latency of completed requests, zero before the first one.
    #[must_use]
    pub fn average_latency(&self) -> Duration {
        let count = self.completed.load(Ordering::Relaxed) as u64;
        if count == 0 {
            Duration::from_nanos(0)
        } else {
            Duration::from_nanos(self.total_latency_ns.load(Ordering::Relaxed) / count)
        }
    }

    /// Responses observed for a status class (`2` for 2xx, ... `5` for 5xx).
    #[must_use]
    pub fn status_class_count(&self, class: u16) -> usize {
        match class {
            2..=5 => self.status_classes[usize::from(class - 2)].load(Ordering::Relaxed),
            _ => 0,
        }
    }

    #[must_use]
    pub fn auth_failures(&self) -> usize {
        self.auth_failures.load(Ordering::Relaxed)
    }

    /// Prometheus text exposition of the counters.
    #[must_use]
    pub fn render_prometheus(&self) -> String {
        let mut lines = vec![
            "# HELP brrtchain_requests_total Requests seen by the metrics middleware".to_string(),
            "# TYPE brrtchain_requests_total counter".to_string(),
            format!("brrtchain_requests_total {}", self.request_count()),
            "# HELP brrtchain_responses_total Responses by status class".to_string(),
            "# TYPE brrtchain_responses_total counter".to_string(),
        ];
        lines.extend((2..=5u16).map(|class| {
            format!(
                "brrtchain_responses_total{{class=\"{class}xx\"}} {}",
                self.status_class_count(class)
            )
        }));
        lines.extend([
            "# HELP brrtchain_auth_failures_total Responses with status 401 or 403".to_string(),
            "# TYPE brrtchain_auth_failures_total counter".to_string(),
            format!("brrtchain_auth_failures_total {}", self.auth_failures()),
            "# HELP brrtchain_request_latency_seconds_avg Mean latency of completed requests"
                .to_string(),
            "# TYPE brrtchain_request_latency_seconds_avg gauge".to_string(),
            format!(
                "brrtchain_request_latency_seconds_avg {:.6}",
                self.average_latency().as_secs_f64()
            ),
        ]);
        let mut out = lines.join("\n");
        out.push('\n');
        out
    }
}

#[async_trait]
impl Middleware for MetricsMiddleware {
    fn name(&self) -> &str {
        "metrics"
    }

    async fn before(&self, _ctx: &mut RequestContext) -> Result<Flow, Failure> {
        self.request_count.fetch_add(1, Ordering::Relaxed);
        Ok(Flow::Continue)
    }

    async fn after(
        &self,
        _ctx: &RequestContext,
        res: &mut Response,
        elapsed: Duration,
    ) -> Result<(), Failure> {
        self.completed.fetch_add(1, Ordering::Relaxed);
        self.total_latency_ns
            .fetch_add(elapsed.as_nanos() as u64, Ordering::Relaxed);
        let class = res.status / 100;
        if (2..=5).contains(&class) {
            self.status_classes[usize::from(class - 2)].fetch_add(1, Ordering::Relaxed);
        }
        if matches!(res.status, 401 | 403) {
            self.auth_failures.fetch_add(1, Ordering::Relaxed);
        }
        Ok(())
    }
}

/// Serves [`MetricsMiddleware::render_prometheus`] as `text/plain`.
pub struct MetricsEndpoint {
    metrics: Arc<MetricsMiddleware>,
}

impl MetricsEndpoint {
    #[must_use]
    pub fn new(metrics: Arc<MetricsMiddleware>) -> Self {
        Self { metrics }
    }
}

#[async_trait]
impl Endpoint for MetricsEndpoint {
    fn name(&self) -> &str {
        "metrics"
    }

    async fn call(&self, _ctx: &mut RequestContext) -> Result<Response, Failure> {
        Ok(Response::text(200, self.metrics.render_prometheus())
            .with_header("content-type", "text/plain; version=0.0.4"))
    }
}
