use async_trait::async_trait;
use std::time::Duration;

use crate::context::RequestContext;
use crate::error::Failure;
use crate::handler::Middleware;
use crate::ids::REQUEST_ID_HEADER;
use crate::response::Response;

/// Echoes the request id on the response as `x-request-id`, unless the
/// endpoint already set one.
#[derive(Debug, Default, Clone, Copy)]
pub struct RequestIdMiddleware;

#[async_trait]
impl Middleware for RequestIdMiddleware {
    fn name(&self) -> &str {
        "request_id"
    }

    async fn after(
        &self,
        ctx: &RequestContext,
        res: &mut Response,
        _elapsed: Duration,
    ) -> Result<(), Failure> {
        res.set_header_if_absent(REQUEST_ID_HEADER, ctx.request_id.to_string());
        Ok(())
    }
}
