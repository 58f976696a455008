//! The handler contract shared by every stage of a chain.
//!
//! A chain is an ordered list of [`Middleware`] followed by exactly one
//! [`Endpoint`]. Middleware decide, per request, whether to continue
//! ([`Flow::Continue`]), answer directly ([`Flow::Respond`]) or fail. Work that
//! has to happen after the rest of the chain has run goes in
//! [`Middleware::after`], which the pipeline calls in reverse order once a
//! response exists.
//!
//! ```rust,ignore
//! use brrtchain::handler::{endpoint_sync, Chain};
//! use brrtchain::response::Response;
//!
//! let chain = Chain::new(endpoint_sync("hello", |_ctx| Ok(Response::ok_text("hi"))))
//!     .with(brrtchain::middleware::SecurityHeaders::default());
//! ```

use async_trait::async_trait;
use futures::future::BoxFuture;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::context::RequestContext;
use crate::error::Failure;
use crate::response::Response;

/// Outcome of a middleware's `before` hook.
#[derive(Debug)]
pub enum Flow {
    /// Hand control to the next stage.
    Continue,
    /// Stop here and send this response.
    Respond(Response),
    /// Stop without a response. The pipeline reports this as
    /// [`Failure::IncompleteResponse`].
    Halt,
}

/// Last path segment of a type name, used for default handler names.
fn short_type_name<T: ?Sized>() -> &'static str {
    let full = std::any::type_name::<T>();
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base)
}

/// A stage that may run before and after the rest of its chain.
#[async_trait]
pub trait Middleware: Send + Sync {
    /// Name used in logs and in [`Failure::IncompleteResponse`].
    fn name(&self) -> &str {
        short_type_name::<Self>()
    }

    async fn before(&self, _ctx: &mut RequestContext) -> Result<Flow, Failure> {
        Ok(Flow::Continue)
    }

    /// Runs once a response exists, only for middleware that returned
    /// [`Flow::Continue`]. That includes error responses produced after a
    /// later stage failed. `elapsed` is measured from that continuation.
    async fn after(
        &self,
        _ctx: &RequestContext,
        _res: &mut Response,
        _elapsed: Duration,
    ) -> Result<(), Failure> {
        Ok(())
    }
}

/// The terminal stage of a chain. Always produces a response or fails.
#[async_trait]
pub trait Endpoint: Send + Sync {
    fn name(&self) -> &str {
        short_type_name::<Self>()
    }

    async fn call(&self, ctx: &mut RequestContext) -> Result<Response, Failure>;
}

/// Single sink for failures raised by any stage.
///
/// Returning `Err` is allowed but the pipeline never routes that error
/// anywhere else: it falls back to a fixed 500 response.
#[async_trait]
pub trait ErrorHandler: Send + Sync {
    async fn handle(&self, failure: &Failure, ctx: &RequestContext) -> Result<Response, Failure>;
}

#[async_trait]
impl<M: Middleware + ?Sized> Middleware for Arc<M> {
    fn name(&self) -> &str {
        (**self).name()
    }

    async fn before(&self, ctx: &mut RequestContext) -> Result<Flow, Failure> {
        (**self).before(ctx).await
    }

    async fn after(
        &self,
        ctx: &RequestContext,
        res: &mut Response,
        elapsed: Duration,
    ) -> Result<(), Failure> {
        (**self).after(ctx, res, elapsed).await
    }
}

#[async_trait]
impl<E: Endpoint + ?Sized> Endpoint for Arc<E> {
    fn name(&self) -> &str {
        (**self).name()
    }

    async fn call(&self, ctx: &mut RequestContext) -> Result<Response, Failure> {
        (**self).call(ctx).await
    }
}

/// Endpoint built from an async closure. See [`endpoint_fn`].
pub struct FnEndpoint<F> {
    name: String,
    f: F,
}

/// Build an endpoint from a closure returning a boxed future.
///
/// ```rust,ignore
/// let ep = endpoint_fn("get_user", |ctx| Box::pin(async move {
///     let id = ctx.require_path_param("id")?;
///     Ok(Response::ok_text(format!("User ID is: {id}")))
/// }));
/// ```
pub fn endpoint_fn<F>(name: impl Into<String>, f: F) -> FnEndpoint<F>
where
    F: for<'a> Fn(&'a mut RequestContext) -> BoxFuture<'a, Result<Response, Failure>>
        + Send
        + Sync,
{
    FnEndpoint {
        name: name.into(),
        f,
    }
}

#[async_trait]
impl<F> Endpoint for FnEndpoint<F>
where
    F: for<'a> Fn(&'a mut RequestContext) -> BoxFuture<'a, Result<Response, Failure>>
        + Send
        + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn call(&self, ctx: &mut RequestContext) -> Result<Response, Failure> {
        (self.f)(ctx).await
    }
}

/// Endpoint built from a synchronous closure. See [`endpoint_sync`].
pub struct SyncEndpoint<F> {
    name: String,
    f: F,
}

/// Build an endpoint from a plain function of the context.
pub fn endpoint_sync<F>(name: impl Into<String>, f: F) -> SyncEndpoint<F>
where
    F: Fn(&mut RequestContext) -> Result<Response, Failure> + Send + Sync,
{
    SyncEndpoint {
        name: name.into(),
        f,
    }
}

#[async_trait]
impl<F> Endpoint for SyncEndpoint<F>
where
    F: Fn(&mut RequestContext) -> Result<Response, Failure> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn call(&self, ctx: &mut RequestContext) -> Result<Response, Failure> {
        (self.f)(ctx)
    }
}

/// Middleware built from a synchronous `before` closure.
pub struct BeforeFn<F> {
    name: String,
    f: F,
}

pub fn before_fn<F>(name: impl Into<String>, f: F) -> BeforeFn<F>
where
    F: Fn(&mut RequestContext) -> Result<Flow, Failure> + Send + Sync,
{
    BeforeFn {
        name: name.into(),
        f,
    }
}

#[async_trait]
impl<F> Middleware for BeforeFn<F>
where
    F: Fn(&mut RequestContext) -> Result<Flow, Failure> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn before(&self, ctx: &mut RequestContext) -> Result<Flow, Failure> {
        (self.f)(ctx)
    }
}

/// Ordered middleware plus the endpoint that ends them.
#[derive(Clone)]
pub struct Chain {
    pub(crate) middleware: Vec<Arc<dyn Middleware>>,
    pub(crate) endpoint: Arc<dyn Endpoint>,
}

impl Chain {
    pub fn new(endpoint: impl Endpoint + 'static) -> Self {
        Self {
            middleware: Vec::new(),
            endpoint: Arc::new(endpoint),
        }
    }

    /// Append a middleware. Middleware run in the order they are added.
    #[must_use]
    pub fn with(mut self, middleware: impl Middleware + 'static) -> Self {
        self.middleware.push(Arc::new(middleware));
        self
    }

    /// Append an already shared middleware.
    #[must_use]
    pub fn with_shared(mut self, middleware: Arc<dyn Middleware>) -> Self {
        self.middleware.push(middleware);
        self
    }

    pub fn middleware(&self) -> &[Arc<dyn Middleware>] {
        &self.middleware
    }

    pub fn endpoint(&self) -> &Arc<dyn Endpoint> {
        &self.endpoint
    }
}

impl<E: Endpoint + 'static> From<E> for Chain {
    fn from(endpoint: E) -> Self {
        Chain::new(endpoint)
    }
}

impl fmt::Debug for Chain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Chain")
            .field(
                "middleware",
                &self.middleware.iter().map(|m| m.name()).collect::<Vec<_>>(),
            )
            .field("endpoint", &self.endpoint.name())
            .finish()
    }
}
