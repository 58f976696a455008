use futures::FutureExt;
use http::Extensions;
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::config::PipelineConfig;
use crate::context::RequestContext;
use crate::error::{fallback_response, ErrorBody, Failure};
use crate::error_handler::DefaultErrorHandler;
use crate::handler::{ErrorHandler, Flow, Middleware};
use crate::ids::RequestId;
use crate::response::Response;
use crate::router::{Route, RouteLookup, RouteTable};

/// The transport dropped the request before a response was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("request {request_id} abandoned before completion")]
pub struct Abandoned {
    pub request_id: RequestId,
}

/// Why a stage did not produce its value.
enum Interrupt {
    Failed(Failure),
    Cancelled,
}

impl From<Failure> for Interrupt {
    fn from(failure: Failure) -> Self {
        Interrupt::Failed(failure)
    }
}

struct Inner {
    routes: Arc<RouteTable>,
    error_handler: Arc<dyn ErrorHandler>,
    request_timeout: Option<Duration>,
    state: Extensions,
}

/// Request executor over an immutable route table.
///
/// Cloning is cheap and every clone shares the same table, error handler and
/// application state. The pipeline keeps no per-request state between calls.
#[derive(Clone)]
pub struct Pipeline {
    inner: Arc<Inner>,
}

impl Pipeline {
    pub fn builder(routes: impl Into<Arc<RouteTable>>) -> PipelineBuilder {
        PipelineBuilder {
            routes: routes.into(),
            error_handler: None,
            request_timeout: None,
            state: Extensions::new(),
        }
    }

    #[must_use]
    pub fn routes(&self) -> &RouteTable {
        &self.inner.routes
    }

    #[must_use]
    pub fn request_timeout(&self) -> Option<Duration> {
        self.inner.request_timeout
    }

    /// Process a request to completion.
    pub async fn handle(&self, ctx: RequestContext) -> Response {
        match self.run(ctx, None).await {
            Ok(response) => response,
            // Without a token nothing can cancel the run.
            Err(_) => fallback_response(),
        }
    }

    /// Process a request, abandoning it at the next suspension point once
    /// `token` is cancelled.
    pub async fn handle_cancellable(
        &self,
        ctx: RequestContext,
        token: &CancellationToken,
    ) -> Result<Response, Abandoned> {
        self.run(ctx, Some(token)).await
    }

    async fn run(
        &self,
        mut ctx: RequestContext,
        cancel: Option<&CancellationToken>,
    ) -> Result<Response, Abandoned> {
        let started = Instant::now();
        let request_id = ctx.request_id;
        ctx.attributes.extend(self.inner.state.clone());

        let route = match self.inner.routes.lookup(&ctx.method, &ctx.path) {
            RouteLookup::Matched(m) => {
                ctx.path_params = m.path_params;
                ctx.route = Some(Arc::clone(m.route.pattern.raw()));
                m.route
            }
            RouteLookup::MethodNotAllowed { allowed } => {
                let failure = Failure::MethodNotAllowed {
                    method: ctx.method.clone(),
                    path: ctx.path.clone(),
                    allowed,
                };
                return Ok(ErrorBody::response_for(&failure, Some(request_id)));
            }
            RouteLookup::NotFound => {
                let failure = Failure::NotFound {
                    method: ctx.method.clone(),
                    path: ctx.path.clone(),
                };
                return Ok(ErrorBody::response_for(&failure, Some(request_id)));
            }
        };

        let mut entered: Vec<Entered<'_>> = Vec::with_capacity(route.middleware.len());
        let outcome = self
            .execute_with_deadline(route, &mut ctx, cancel, &mut entered)
            .await;

        let mut recovered = false;
        let mut response = match outcome {
            Ok(response) => response,
            Err(Interrupt::Cancelled) => return Err(abandon(request_id, started)),
            Err(Interrupt::Failed(failure)) => {
                recovered = true;
                match self.recover(&failure, &ctx, cancel).await {
                    Ok(response) => response,
                    Err(interrupt) => return unrecoverable(&failure, interrupt, request_id, started),
                }
            }
        };

        // Unwind every middleware that continued, including on error responses.
        for (mw, continued_at) in entered.iter().rev() {
            match guard(mw.after(&ctx, &mut response, continued_at.elapsed()), cancel).await {
                Ok(()) => {}
                Err(Interrupt::Cancelled) => return Err(abandon(request_id, started)),
                Err(Interrupt::Failed(failure)) if !recovered => {
                    debug!(
                        request_id = %request_id,
                        middleware_name = %mw.name(),
                        "Middleware after-hook failed"
                    );
                    recovered = true;
                    response = match self.recover(&failure, &ctx, cancel).await {
                        Ok(response) => response,
                        Err(interrupt) => {
                            return unrecoverable(&failure, interrupt, request_id, started)
                        }
                    };
                }
                Err(Interrupt::Failed(failure)) => {
                    error!(
                        request_id = %request_id,
                        middleware_name = %mw.name(),
                        failure = ?failure,
                        "After-hook failed on an error response; sending fallback response"
                    );
                    return Ok(fallback_response());
                }
            }
        }

        debug!(
            request_id = %request_id,
            status = response.status,
            latency_ms = started.elapsed().as_millis() as u64,
            "Pipeline completed"
        );
        Ok(response)
    }

    async fn execute_with_deadline<'r>(
        &self,
        route: &'r Route,
        ctx: &mut RequestContext,
        cancel: Option<&CancellationToken>,
        entered: &mut Vec<Entered<'r>>,
    ) -> Result<Response, Interrupt> {
        let Some(limit) = self.inner.request_timeout else {
            return execute(route, ctx, cancel, entered).await;
        };
        match tokio::time::timeout(limit, execute(route, ctx, cancel, entered)).await {
            Ok(outcome) => outcome,
            Err(_) => Err(Interrupt::Failed(Failure::Timeout(limit))),
        }
    }

    async fn recover(
        &self,
        failure: &Failure,
        ctx: &RequestContext,
        cancel: Option<&CancellationToken>,
    ) -> Result<Response, Interrupt> {
        guard(self.inner.error_handler.handle(failure, ctx), cancel).await
    }
}

/// A middleware that continued, with the moment it did.
type Entered<'r> = (&'r Arc<dyn Middleware>, Instant);

/// Walk the route's middleware and call the endpoint. Middleware that
/// continue are recorded in `entered` for the caller to unwind.
async fn execute<'r>(
    route: &'r Route,
    ctx: &mut RequestContext,
    cancel: Option<&CancellationToken>,
    entered: &mut Vec<Entered<'r>>,
) -> Result<Response, Interrupt> {
    for (idx, mw) in route.middleware.iter().enumerate() {
        match guard(mw.before(ctx), cancel).await? {
            Flow::Continue => entered.push((mw, Instant::now())),
            Flow::Respond(response) => {
                debug!(
                    request_id = %ctx.request_id,
                    middleware_idx = idx,
                    middleware_name = %mw.name(),
                    status = response.status,
                    "Middleware returned early response"
                );
                return Ok(response);
            }
            Flow::Halt => {
                return Err(Interrupt::Failed(Failure::IncompleteResponse {
                    stage: mw.name().to_string(),
                }))
            }
        }
    }

    debug!(
        request_id = %ctx.request_id,
        handler_name = %route.name(),
        "Request dispatched to endpoint"
    );
    guard(route.endpoint.call(ctx), cancel).await
}

/// Await one stage, converting panics to failures and racing cancellation.
async fn guard<T, F>(stage: F, cancel: Option<&CancellationToken>) -> Result<T, Interrupt>
where
    F: Future<Output = Result<T, Failure>>,
{
    let caught = AssertUnwindSafe(stage).catch_unwind();
    let outcome = match cancel {
        Some(token) => {
            tokio::select! {
                biased;
                _ = token.cancelled() => return Err(Interrupt::Cancelled),
                outcome = caught => outcome,
            }
        }
        None => caught.await,
    };
    match outcome {
        Ok(result) => result.map_err(Interrupt::Failed),
        Err(payload) => Err(Interrupt::Failed(panic_failure(payload.as_ref()))),
    }
}

fn panic_failure(payload: &(dyn Any + Send)) -> Failure {
    let message = payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_string());
    error!(panic_message = %message, "Handler panicked");
    Failure::Unhandled(anyhow::anyhow!("handler panicked: {message}"))
}

/// The error handler itself failed or the request was dropped meanwhile.
fn unrecoverable(
    failure: &Failure,
    interrupt: Interrupt,
    request_id: RequestId,
    started: Instant,
) -> Result<Response, Abandoned> {
    match interrupt {
        Interrupt::Cancelled => Err(abandon(request_id, started)),
        Interrupt::Failed(second) => {
            error!(
                request_id = %request_id,
                failure = ?failure,
                error_handler_failure = ?second,
                "Error handler failed; sending fallback response"
            );
            Ok(fallback_response())
        }
    }
}

fn abandon(request_id: RequestId, started: Instant) -> Abandoned {
    info!(
        request_id = %request_id,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "Request abandoned by transport"
    );
    Abandoned { request_id }
}

/// Assembles a [`Pipeline`].
pub struct PipelineBuilder {
    routes: Arc<RouteTable>,
    error_handler: Option<Arc<dyn ErrorHandler>>,
    request_timeout: Option<Duration>,
    state: Extensions,
}

impl PipelineBuilder {
    /// Replace the [`DefaultErrorHandler`].
    #[must_use]
    pub fn error_handler(mut self, handler: impl ErrorHandler + 'static) -> Self {
        self.error_handler = Some(Arc::new(handler));
        self
    }

    /// Deadline for the `before` hooks and endpoint of one request. Exceeding
    /// it raises [`Failure::Timeout`]; `after` hooks still run on the 503.
    #[must_use]
    pub fn request_timeout(mut self, limit: Duration) -> Self {
        self.request_timeout = Some(limit);
        self
    }

    /// Apply settings from a loaded [`PipelineConfig`].
    #[must_use]
    pub fn config(mut self, config: &PipelineConfig) -> Self {
        if let Some(limit) = config.request_timeout() {
            self.request_timeout = Some(limit);
        }
        self
    }

    /// Application state inserted into every request's attribute bag.
    #[must_use]
    pub fn state<T: Clone + Send + Sync + 'static>(mut self, value: T) -> Self {
        self.state.insert(value);
        self
    }

    #[must_use]
    pub fn build(self) -> Pipeline {
        let error_handler = self
            .error_handler
            .unwrap_or_else(|| Arc::new(DefaultErrorHandler::new()));
        info!(
            routes_count = self.routes.len(),
            request_timeout_ms = self.request_timeout.map(|d| d.as_millis() as u64),
            "Pipeline built"
        );
        Pipeline {
            inner: Arc::new(Inner {
                routes: self.routes,
                error_handler,
                request_timeout: self.request_timeout,
                state: self.state,
            }),
        }
    }
}
