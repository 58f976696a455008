//! # brrtchain
//!
//! **brrtchain** is an ordered, async request pipeline: a router picks a
//! chain of middleware ending in one endpoint, runs it in registration order,
//! and funnels every failure through a single error handler.
//!
//! ## Architecture
//!
//! - **[`router`]** - Path patterns (`/user/:id`) and the immutable route table
//! - **[`pipeline`]** - The executor: ordered traversal, after-hooks, deadlines,
//!   cancellation, panic capture and the fixed fallback response
//! - **[`handler`]** - `Middleware`, `Endpoint` and `ErrorHandler` traits
//! - **[`error`]** / **[`error_handler`]** - Failure taxonomy and the stable
//!   error body
//! - **[`security`]** - Authentication gates (HS256 bearer tokens, sessions)
//! - **[`middleware`]** - Tracing, request id, metrics, CORS, security headers,
//!   rate limiting
//! - **[`transport`]** - Conversion to and from `http` crate types
//! - **[`config`]** / **[`logging`]** - YAML + env configuration, `tracing` setup
//!
//! ## Request Flow
//!
//! ```text
//! RequestContext
//!   -> RouteTable::lookup          404 / 405 answered directly
//!   -> middleware[0].before ... middleware[n].before
//!   -> endpoint.call               (skipped if a middleware responded)
//!   -> middleware[k].after ... middleware[0].after
//!   -> Response
//! any failure -> ErrorHandler (once) -> after hooks -> Response,
//!                or the fixed fallback
//! ```
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use brrtchain::{endpoint_fn, Pipeline, RequestContext, Response, RouteTable};
//! use http::Method;
//!
//! let routes = RouteTable::builder()
//!     .middleware(brrtchain::middleware::TracingMiddleware)
//!     .get("/user/:id", endpoint_fn("get_user", |ctx| Box::pin(async move {
//!         let id = ctx.require_path_param("id")?;
//!         Ok(Response::ok_text(format!("User ID is: {id}")))
//!     })))
//!     .build()?;
//!
//! let pipeline = Pipeline::builder(routes).build();
//! let res = pipeline.handle(RequestContext::new(Method::GET, "/user/123")).await;
//! assert_eq!(res.status, 200);
//! ```

pub mod cli;
pub mod config;
pub mod context;
pub mod error;
pub mod error_handler;
pub mod handler;
pub mod ids;
pub mod logging;
pub mod middleware;
pub mod pipeline;
pub mod response;
pub mod router;
pub mod security;
pub mod transport;

pub use config::{AuthConfig, ConfigError, PipelineConfig};
pub use context::{Body, QueryValue, RequestContext};
pub use error::{AuthFailure, ErrorBody, ErrorKind, Failure};
pub use error_handler::DefaultErrorHandler;
pub use handler::{before_fn, endpoint_fn, endpoint_sync, Chain, Endpoint, ErrorHandler, Flow, Middleware};
pub use ids::RequestId;
pub use pipeline::{Abandoned, Pipeline, PipelineBuilder};
pub use response::{Response, ResponseBody};
pub use router::{RouteError, RouteTable, RouteTableBuilder};
pub use security::Identity;
