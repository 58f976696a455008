use async_trait::async_trait;
use http::Method;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::pattern::{RouteError, RoutePattern};
use crate::context::{ParamVec, RequestContext};
use crate::error::Failure;
use crate::handler::{Chain, Endpoint, Middleware};
use crate::response::Response;

/// One registered (method, pattern) binding and its handler sequence.
#[derive(Clone)]
pub struct Route {
    pub method: Method,
    pub pattern: RoutePattern,
    /// Middleware in execution order: builder-level first, then the chain's own.
    pub middleware: Vec<Arc<dyn Middleware>>,
    pub endpoint: Arc<dyn Endpoint>,
}

impl Route {
    /// Name of the terminal handler.
    #[must_use]
    pub fn name(&self) -> &str {
        self.endpoint.name()
    }
}

impl fmt::Debug for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Route")
            .field("method", &self.method)
            .field("pattern", &self.pattern.as_str())
            .field(
                "middleware",
                &self.middleware.iter().map(|m| m.name()).collect::<Vec<_>>(),
            )
            .field("endpoint", &self.endpoint.name())
            .finish()
    }
}

/// A successful lookup: the route plus its bound path parameters.
#[derive(Debug)]
pub struct RouteMatch<'a> {
    pub route: &'a Route,
    pub path_params: ParamVec,
}

/// Outcome of [`RouteTable::lookup`].
#[derive(Debug)]
pub enum RouteLookup<'a> {
    Matched(RouteMatch<'a>),
    /// Some pattern matched the path, none under this method. `allowed`
    /// lists the registered methods in registration order.
    MethodNotAllowed { allowed: Vec<Method> },
    NotFound,
}

/// Immutable, ordered route table. Built once by [`RouteTableBuilder`] and
/// shared read-only across requests.
#[derive(Clone, Debug, Default)]
pub struct RouteTable {
    routes: Vec<Route>,
}

impl RouteTable {
    #[must_use]
    pub fn builder() -> RouteTableBuilder {
        RouteTableBuilder::default()
    }

    #[must_use]
    pub fn routes(&self) -> &[Route] {
        &self.routes
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Select the route for a request.
    ///
    /// Routes are tried in registration order and the first one whose method
    /// and pattern both match wins.
    #[must_use]
    pub fn lookup(&self, method: &Method, path: &str) -> RouteLookup<'_> {
        let mut allowed: Vec<Method> = Vec::new();

        for route in &self.routes {
            let Some(path_params) = route.pattern.matches(path) else {
                continue;
            };
            if route.method == *method {
                debug!(
                    method = %method,
                    path = %path,
                    route_pattern = %route.pattern,
                    handler_name = %route.name(),
                    path_params = ?path_params,
                    "Route matched"
                );
                return RouteLookup::Matched(RouteMatch { route, path_params });
            }
            if !allowed.contains(&route.method) {
                allowed.push(route.method.clone());
            }
        }

        if allowed.is_empty() {
            warn!(method = %method, path = %path, "No route matched");
            RouteLookup::NotFound
        } else {
            warn!(
                method = %method,
                path = %path,
                allowed = ?allowed,
                "Path matched but method is not registered"
            );
            RouteLookup::MethodNotAllowed { allowed }
        }
    }

    /// One line per route: `METHOD pattern -> endpoint [middleware, ...]`.
    #[must_use]
    pub fn describe(&self) -> Vec<String> {
        self.routes
            .iter()
            .map(|r| {
                let mw: Vec<&str> = r.middleware.iter().map(|m| m.name()).collect();
                format!("{} {} -> {} [{}]", r.method, r.pattern, r.name(), mw.join(", "))
            })
            .collect()
    }
}

/// Answers `OPTIONS` for a pattern with `204` and its `allow` list.
struct OptionsEndpoint {
    allow: String,
}

#[async_trait]
impl Endpoint for OptionsEndpoint {
    fn name(&self) -> &str {
        "options"
    }

    async fn call(&self, _ctx: &mut RequestContext) -> Result<Response, Failure> {
        Ok(Response::empty(204).with_header("allow", self.allow.as_str()))
    }
}

/// Collects route registrations. Pattern errors are held until
/// [`build`](Self::build) so registration reads as one expression.
#[derive(Default)]
pub struct RouteTableBuilder {
    scoped: Vec<Arc<dyn Middleware>>,
    routes: Vec<Route>,
    /// How many leading middleware of each route came from `scoped`
    scoped_counts: Vec<usize>,
    auto_options: bool,
    errors: Vec<RouteError>,
}

impl RouteTableBuilder {
    /// Add middleware applied to every route registered after this call,
    /// ahead of the route's own middleware.
    #[must_use]
    pub fn middleware(self, middleware: impl Middleware + 'static) -> Self {
        self.middleware_shared(Arc::new(middleware))
    }

    #[must_use]
    pub fn middleware_shared(mut self, middleware: Arc<dyn Middleware>) -> Self {
        self.scoped.push(middleware);
        self
    }

    /// Answer `OPTIONS` for every pattern that has no `OPTIONS` route of its
    /// own. The generated route runs the builder-level middleware that was in
    /// scope for the pattern's first route (so CORS preflights reach
    /// [`CorsMiddleware`](crate::middleware::CorsMiddleware)), but not the
    /// route's own chain, and replies `204` with an `allow` header.
    #[must_use]
    pub fn auto_options(mut self) -> Self {
        self.auto_options = true;
        self
    }

    #[must_use]
    pub fn route(mut self, method: Method, pattern: &str, chain: impl Into<Chain>) -> Self {
        let chain = chain.into();
        match RoutePattern::parse(pattern) {
            Ok(pattern) => {
                let middleware = self
                    .scoped
                    .iter()
                    .cloned()
                    .chain(chain.middleware)
                    .collect();
                self.scoped_counts.push(self.scoped.len());
                self.routes.push(Route {
                    method,
                    pattern,
                    middleware,
                    endpoint: chain.endpoint,
                });
            }
            Err(e) => self.errors.push(e),
        }
        self
    }

    #[must_use]
    pub fn get(self, pattern: &str, chain: impl Into<Chain>) -> Self {
        self.route(Method::GET, pattern, chain)
    }

    #[must_use]
    pub fn post(self, pattern: &str, chain: impl Into<Chain>) -> Self {
        self.route(Method::POST, pattern, chain)
    }

    #[must_use]
    pub fn put(self, pattern: &str, chain: impl Into<Chain>) -> Self {
        self.route(Method::PUT, pattern, chain)
    }

    #[must_use]
    pub fn patch(self, pattern: &str, chain: impl Into<Chain>) -> Self {
        self.route(Method::PATCH, pattern, chain)
    }

    #[must_use]
    pub fn delete(self, pattern: &str, chain: impl Into<Chain>) -> Self {
        self.route(Method::DELETE, pattern, chain)
    }

    /// Finish registration. Fails on the first invalid pattern.
    pub fn build(mut self) -> Result<RouteTable, RouteError> {
        if let Some(err) = self.errors.into_iter().next() {
            return Err(err);
        }
        if self.auto_options {
            let generated = options_routes(&self.routes, &self.scoped_counts);
            self.routes.extend(generated);
        }

        for (i, later) in self.routes.iter().enumerate() {
            let shadowed = self.routes[..i]
                .iter()
                .any(|earlier| earlier.method == later.method && earlier.pattern == later.pattern);
            if shadowed {
                warn!(
                    method = %later.method,
                    route_pattern = %later.pattern,
                    "Duplicate route registration; the earlier one wins"
                );
            }
        }

        let routes_summary: Vec<String> = self
            .routes
            .iter()
            .take(10)
            .map(|r| format!("{} {}", r.method, r.pattern))
            .collect();
        info!(
            routes_count = self.routes.len(),
            routes_summary = ?routes_summary,
            "Routing table loaded"
        );

        Ok(RouteTable {
            routes: self.routes,
        })
    }
}

/// One `OPTIONS` route per pattern lacking one, in first-registration order.
fn options_routes(routes: &[Route], scoped_counts: &[usize]) -> Vec<Route> {
    let mut generated: Vec<Route> = Vec::new();
    for (route, &scoped) in routes.iter().zip(scoped_counts) {
        let covered = routes
            .iter()
            .chain(generated.iter())
            .any(|r| r.method == Method::OPTIONS && r.pattern == route.pattern);
        if covered {
            continue;
        }
        let mut allow: Vec<&str> = Vec::new();
        for r in routes.iter().filter(|r| r.pattern == route.pattern) {
            if !allow.contains(&r.method.as_str()) {
                allow.push(r.method.as_str());
            }
        }
        allow.push(Method::OPTIONS.as_str());
        generated.push(Route {
            method: Method::OPTIONS,
            pattern: route.pattern.clone(),
            middleware: route.middleware[..scoped.min(route.middleware.len())].to_vec(),
            endpoint: Arc::new(OptionsEndpoint {
                allow: allow.join(", "),
            }),
        });
    }
    generated
}
