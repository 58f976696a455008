//! # Router Module
//!
//! Ordered route table and path matcher.
//!
//! Routes are registered once at startup through [`RouteTableBuilder`] and
//! matched by a linear scan in registration order, so when two patterns could
//! both match a path the one registered first wins. A path that matches some
//! pattern under a different method yields
//! [`RouteLookup::MethodNotAllowed`], which is distinct from
//! [`RouteLookup::NotFound`].
//!
//! ## Example
//!
//! ```rust,ignore
//! use brrtchain::handler::endpoint_sync;
//! use brrtchain::response::Response;
//! use brrtchain::router::{RouteLookup, RouteTable};
//! use http::Method;
//!
//! let table = RouteTable::builder()
//!     .get("/user/:id", endpoint_sync("get_user", |ctx| {
//!         let id = ctx.require_path_param("id")?;
//!         Ok(Response::ok_text(format!("User ID is: {id}")))
//!     }))
//!     .build()?;
//!
//! if let RouteLookup::Matched(m) = table.lookup(&Method::GET, "/user/123") {
//!     assert_eq!(m.path_params[0].1, "123");
//! }
//! ```

mod core;
mod pattern;

pub use core::{Route, RouteLookup, RouteMatch, RouteTable, RouteTableBuilder};
pub use pattern::{RouteError, RoutePattern};
