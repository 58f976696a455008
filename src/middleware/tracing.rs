use async_trait::async_trait;
use std::time::Duration;
use tracing::{field, info, info_span, Span};

use crate::context::RequestContext;
use crate::error::Failure;
use crate::handler::{Flow, Middleware};
use crate::response::Response;

/// Span opened for a request, kept in the attribute bag between hooks.
#[derive(Clone, Debug)]
pub struct RequestSpan(pub Span);

/// Opens a `request` span in `before` and records status and latency on it
/// in `after`, emitting one completion event per request.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingMiddleware;

#[async_trait]
impl Middleware for TracingMiddleware {
    fn name(&self) -> &str {
        "tracing"
    }

    async fn before(&self, ctx: &mut RequestContext) -> Result<Flow, Failure> {
        let span = info_span!(
            "request",
            request_id = %ctx.request_id,
            method = %ctx.method,
            path = %ctx.path,
            route = ctx.route.as_deref().unwrap_or("-"),
            status = field::Empty,
            latency_ms = field::Empty,
        );
        ctx.insert_attribute(RequestSpan(span));
        Ok(Flow::Continue)
    }

    async fn after(
        &self,
        ctx: &RequestContext,
        res: &mut Response,
        elapsed: Duration,
    ) -> Result<(), Failure> {
        let latency_ms = elapsed.as_millis() as u64;
        let span = ctx
            .attribute::<RequestSpan>()
            .map_or_else(Span::current, |s| s.0.clone());
        span.record("status", res.status);
        span.record("latency_ms", latency_ms);
        span.in_scope(|| {
            info!(status = res.status, latency_ms = latency_ms, "Request completed");
        });
        Ok(())
    }
}
