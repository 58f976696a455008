//! # Pipeline Module
//!
//! Runs one request through its route's chain.
//!
//! ## Execution order
//!
//! 1. The route table selects a route. No match, or a match under another
//!    method, is answered directly with 404 / 405 and no handler runs.
//! 2. Middleware `before` hooks run in registration order. The first one that
//!    responds ends the walk; one that halts without a response becomes an
//!    `IncompleteResponse` failure.
//! 3. The endpoint runs if every middleware continued.
//! 4. `after` hooks of the middleware that continued run in reverse order.
//!
//! Any failure or panic skips whatever is left of steps 2-3 and goes to the
//! single [`ErrorHandler`](crate::handler::ErrorHandler); step 4 then runs on
//! its response. A failing `after` hook also goes to the error handler unless
//! it already ran. If the error handler fails, or an `after` hook fails on
//! its response, a fixed 500 body is returned.
//!
//! Each stage is raced against an optional
//! [`CancellationToken`](tokio_util::sync::CancellationToken); when it fires the
//! in-flight stage and the request context are dropped and the call returns
//! [`Abandoned`].

mod core;

pub use core::{Abandoned, Pipeline, PipelineBuilder};
