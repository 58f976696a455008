mod builder;
mod error;

pub use builder::CorsMiddlewareBuilder;
pub use error::CorsConfigError;

use async_trait::async_trait;
use http::Method;
use regex::Regex;
use std::fmt;
use std::time::Duration;
use tracing::{debug, warn};

use crate::context::RequestContext;
use crate::error::{ErrorBody, ErrorKind, Failure};
use crate::handler::{Flow, Middleware};
use crate::response::Response;

/// Origin validation strategy
#[derive(Clone)]
pub enum OriginValidation {
    /// Any origin
    Wildcard,
    /// Origins listed exactly or matching one of the patterns
    AllowList {
        exact: Vec<String>,
        patterns: Vec<Regex>,
    },
}

impl fmt::Debug for OriginValidation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OriginValidation::Wildcard => write!(f, "Wildcard"),
            OriginValidation::AllowList { exact, patterns } => f
                .debug_struct("AllowList")
                .field("exact", exact)
                .field(
                    "patterns",
                    &patterns.iter().map(Regex::as_str).collect::<Vec<_>>(),
                )
                .finish(),
        }
    }
}

impl OriginValidation {
    fn is_allowed(&self, origin: &str) -> bool {
        match self {
            OriginValidation::Wildcard => true,
            OriginValidation::AllowList { exact, patterns } => {
                exact.iter().any(|o| o == origin) || patterns.iter().any(|re| re.is_match(origin))
            }
        }
    }

    fn is_wildcard(&self) -> bool {
        matches!(self, OriginValidation::Wildcard)
    }
}

/// CORS (Cross-Origin Resource Sharing) middleware
///
/// Requests without an `Origin` header pass through untouched. A request
/// from an origin outside the allow-list is refused with 403 before the
/// endpoint runs. Allowed cross-origin requests get
/// `access-control-allow-origin` (plus credentials and exposed headers when
/// configured) on the way out.
///
/// Preflight `OPTIONS` requests are answered directly when they reach the
/// middleware. Register the table with
/// [`RouteTableBuilder::auto_options`](crate::router::RouteTableBuilder::auto_options)
/// (or an explicit `OPTIONS` route) so preflights are routed at all.
///
/// Build one with [`CorsMiddlewareBuilder`].
#[derive(Debug, Clone)]
pub struct CorsMiddleware {
    pub(crate) origin_validation: OriginValidation,
    pub(crate) allowed_headers: Vec<String>,
    pub(crate) allowed_methods: Vec<Method>,
    pub(crate) allow_credentials: bool,
    pub(crate) expose_headers: Vec<String>,
    pub(crate) max_age: Option<u32>,
}

impl CorsMiddleware {
    /// Allow every origin, without credentials. Development only.
    #[must_use]
    pub fn permissive() -> Self {
        Self {
            origin_validation: OriginValidation::Wildcard,
            allowed_headers: vec!["Content-Type".into(), "Authorization".into()],
            allowed_methods: vec![
                Method::GET,
                Method::POST,
                Method::PUT,
                Method::DELETE,
                Method::OPTIONS,
            ],
            allow_credentials: false,
            expose_headers: Vec::new(),
            max_age: None,
        }
    }

    /// Value for `access-control-allow-origin`, or `None` if refused.
    fn allow_origin_value(&self, origin: &str) -> Option<String> {
        if !self.origin_validation.is_allowed(origin) {
            return None;
        }
        if self.origin_validation.is_wildcard() && !self.allow_credentials {
            Some("*".to_string())
        } else {
            Some(origin.to_string())
        }
    }

    fn forbidden(ctx: &RequestContext, message: &str) -> Flow {
        let mut body = ErrorBody::new(403, ErrorKind::Auth, message).with_request_id(ctx.request_id);
        body.reason = Some("origin_not_allowed".to_string());
        Flow::Respond(body.into_response())
    }

    /// Check the requested method and headers of a preflight.
    fn preflight(&self, ctx: &RequestContext, allow_origin: String) -> Flow {
        let Some(requested) = ctx
            .get_header("access-control-request-method")
            .and_then(|m| m.trim().parse::<Method>().ok())
        else {
            warn!(request_id = %ctx.request_id, "CORS preflight: invalid Access-Control-Request-Method");
            return Self::forbidden(ctx, "CORS preflight rejected");
        };
        if !self.allowed_methods.contains(&requested) {
            warn!(
                request_id = %ctx.request_id,
                method = %requested,
                "CORS preflight: method not allowed"
            );
            return Self::forbidden(ctx, "CORS preflight rejected");
        }

        let any_header = self.allowed_headers.iter().any(|h| h == "*");
        if let Some(requested_headers) = ctx.get_header("access-control-request-headers") {
            let rejected = requested_headers
                .split(',')
                .map(str::trim)
                .filter(|h| !h.is_empty())
                .find(|h| !any_header && !self.allowed_headers.iter().any(|a| a.eq_ignore_ascii_case(h)));
            if let Some(header) = rejected {
                warn!(
                    request_id = %ctx.request_id,
                    header = header,
                    "CORS preflight: header not allowed"
                );
                return Self::forbidden(ctx, "CORS preflight rejected");
            }
        }

        let methods = self
            .allowed_methods
            .iter()
            .map(Method::as_str)
            .collect::<Vec<_>>()
            .join(", ");
        let mut res = Response::empty(204)
            .with_header("access-control-allow-origin", allow_origin)
            .with_header("access-control-allow-methods", methods)
            .with_header("access-control-allow-headers", self.allowed_headers.join(", "))
            .with_header("vary", "Origin");
        if self.allow_credentials {
            res.set_header("access-control-allow-credentials", "true");
        }
        if let Some(age) = self.max_age {
            res.set_header("access-control-max-age", age.to_string());
        }
        Flow::Respond(res)
    }
}

#[async_trait]
impl Middleware for CorsMiddleware {
    fn name(&self) -> &str {
        "cors"
    }

    async fn before(&self, ctx: &mut RequestContext) -> Result<Flow, Failure> {
        let Some(origin) = ctx.get_header("origin") else {
            return Ok(Flow::Continue);
        };
        let Some(allow_origin) = self.allow_origin_value(origin) else {
            warn!(
                request_id = %ctx.request_id,
                origin = origin,
                "CORS: origin not allowed"
            );
            return Ok(Self::forbidden(ctx, "Origin not allowed"));
        };
        if ctx.method == Method::OPTIONS && ctx.get_header("access-control-request-method").is_some() {
            debug!(request_id = %ctx.request_id, origin = origin, "CORS preflight");
            return Ok(self.preflight(ctx, allow_origin));
        }
        Ok(Flow::Continue)
    }

    async fn after(
        &self,
        ctx: &RequestContext,
        res: &mut Response,
        _elapsed: Duration,
    ) -> Result<(), Failure> {
        let Some(allow_origin) = ctx.get_header("origin").and_then(|o| self.allow_origin_value(o))
        else {
            return Ok(());
        };
        let wildcard = allow_origin == "*";
        res.set_header("access-control-allow-origin", allow_origin);
        if !wildcard {
            res.set_header("vary", "Origin");
        }
        if self.allow_credentials {
            res.set_header("access-control-allow-credentials", "true");
        }
        if !self.expose_headers.is_empty() {
            res.set_header("access-control-expose-headers", self.expose_headers.join(", "));
        }
        Ok(())
    }
}
