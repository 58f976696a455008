//! Reusable middleware for route chains.
//!
//! Each type implements [`crate::handler::Middleware`] and can be attached
//! to routes through [`crate::router::RouteTableBuilder::middleware`] or a
//! [`crate::handler::Chain`]. Authentication gates live in
//! [`crate::security`].

mod cors;
mod metrics;
mod rate_limit;
mod request_id;
mod security_headers;
mod tracing;

pub use cors::{CorsConfigError, CorsMiddleware, CorsMiddlewareBuilder, OriginValidation};
pub use metrics::{MetricsEndpoint, MetricsMiddleware};
pub use rate_limit::RateLimitMiddleware;
pub use request_id::RequestIdMiddleware;
pub use security_headers::SecurityHeaders;
pub use self::tracing::{RequestSpan, TracingMiddleware};
