use async_trait::async_trait;
use tracing::{error, warn};

use crate::context::RequestContext;
use crate::error::{ErrorBody, Failure};
use crate::handler::ErrorHandler;
use crate::response::Response;

/// Classifies failures into [`ErrorBody`] responses and logs the full
/// diagnostic out of band.
///
/// Server-class failures are logged at `error!` with their debug chain; the
/// client sees only the generic message. Client-class failures are logged at
/// `warn!`.
#[derive(Debug, Clone)]
pub struct DefaultErrorHandler {
    include_request_id: bool,
}

impl DefaultErrorHandler {
    #[must_use]
    pub fn new() -> Self {
        Self {
            include_request_id: true,
        }
    }

    /// Omit `request_id` from bodies, for callers that compare bodies across
    /// requests.
    #[must_use]
    pub fn without_request_id(mut self) -> Self {
        self.include_request_id = false;
        self
    }
}

impl Default for DefaultErrorHandler {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ErrorHandler for DefaultErrorHandler {
    async fn handle(&self, failure: &Failure, ctx: &RequestContext) -> Result<Response, Failure> {
        let kind = failure.kind();
        let route = ctx.route.as_deref().unwrap_or("-");
        if kind.is_server_error() {
            error!(
                request_id = %ctx.request_id,
                method = %ctx.method,
                path = %ctx.path,
                route = %route,
                kind = %kind,
                failure = ?failure,
                "Request failed"
            );
        } else {
            warn!(
                request_id = %ctx.request_id,
                method = %ctx.method,
                path = %ctx.path,
                route = %route,
                kind = %kind,
                failure = %failure,
                "Request rejected"
            );
        }

        let request_id = self.include_request_id.then_some(ctx.request_id);
        Ok(ErrorBody::response_for(failure, request_id))
    }
}
