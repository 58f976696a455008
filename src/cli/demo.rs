//! The demo application served by the CLI.

use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

use crate::config::PipelineConfig;
use crate::context::RequestContext;
use crate::error::{AuthFailure, Failure};
use crate::handler::{endpoint_fn, endpoint_sync, Chain, Middleware};
use crate::middleware::{
    CorsMiddleware, MetricsEndpoint, MetricsMiddleware, RateLimitMiddleware, RequestIdMiddleware,
    SecurityHeaders, TracingMiddleware,
};
use crate::pipeline::Pipeline;
use crate::response::Response;
use crate::router::RouteTable;
use crate::security::{BearerJwtGate, InMemorySessionStore, SessionGate, TokenIssuer};

/// Demo pipeline plus the shared pieces the CLI needs to drive it.
pub struct DemoApp {
    pub pipeline: Pipeline,
    pub sessions: Arc<InMemorySessionStore>,
    pub metrics: Arc<MetricsMiddleware>,
    pub issuer: TokenIssuer,
}

#[derive(Debug, Deserialize)]
struct NewUser {
    name: String,
    #[serde(default)]
    email: Option<String>,
}

fn current_identity(ctx: &mut RequestContext) -> Result<Response, Failure> {
    let identity = ctx.identity().ok_or(Failure::Auth(AuthFailure::Missing))?;
    Ok(Response::ok_json(json!({
        "subject": identity.subject,
        "scopes": identity.scopes,
        "source": identity.source,
    })))
}

fn create_user(ctx: &mut RequestContext) -> Result<Response, Failure> {
    let user: NewUser = ctx.json()?;
    let mut details = Vec::new();
    if user.name.trim().is_empty() {
        details.push("name must not be empty".to_string());
    }
    if let Some(email) = user.email.as_deref().filter(|e| !e.contains('@')) {
        details.push(format!("email {email:?} is not an address"));
    }
    if !details.is_empty() {
        return Err(Failure::validation_with("invalid user", details));
    }
    Ok(Response::json(
        201,
        json!({ "name": user.name.trim(), "email": user.email }),
    ))
}

/// Build the demo routes:
///
/// | Route | Chain |
/// |---|---|
/// | `GET /` | banner |
/// | `GET /user/:id` | `User ID is: <id>` |
/// | `GET /users/me` | bearer gate, then the caller's identity |
/// | `POST /users` | rate limit, JSON validation, `201` |
/// | `GET /session/me` | session gate, then the caller's identity |
/// | `GET /metrics` | Prometheus text |
/// | `GET /boom` | always fails, surfaces as a generic `500` |
///
/// Every route runs tracing, request id, CORS, security headers and
/// metrics middleware first. `OPTIONS` is answered for every path so CORS
/// preflights succeed.
pub fn build_demo(config: &PipelineConfig) -> anyhow::Result<DemoApp> {
    let sessions = Arc::new(InMemorySessionStore::new());
    let metrics = Arc::new(MetricsMiddleware::new());
    let bearer = BearerJwtGate::from_config(&config.auth)?;
    let issuer = TokenIssuer::from_config(&config.auth)?;

    let routes = RouteTable::builder()
        .middleware(TracingMiddleware)
        .middleware(RequestIdMiddleware)
        .middleware(CorsMiddleware::permissive())
        .middleware(SecurityHeaders::default())
        .middleware_shared(Arc::clone(&metrics) as Arc<dyn Middleware>)
        .get(
            "/",
            endpoint_sync("index", |_ctx: &mut RequestContext| {
                Ok(Response::ok_text("brrtchain demo"))
            }),
        )
        .get(
            "/user/:id",
            endpoint_fn("get_user", |ctx| {
                Box::pin(async move {
                    let id = ctx.require_path_param("id")?;
                    Ok(Response::ok_text(format!("User ID is: {id}")))
                })
            }),
        )
        .get(
            "/users/me",
            Chain::new(endpoint_sync("current_user", current_identity)).with(bearer),
        )
        .post(
            "/users",
            Chain::new(endpoint_sync("create_user", create_user))
                .with(RateLimitMiddleware::per_minute(30)),
        )
        .get(
            "/session/me",
            Chain::new(endpoint_sync("current_session", current_identity)).with(
                SessionGate::from_config(
                    Arc::clone(&sessions) as Arc<dyn crate::security::SessionStore>,
                    &config.auth,
                ),
            ),
        )
        .get("/metrics", MetricsEndpoint::new(Arc::clone(&metrics)))
        .get(
            "/boom",
            endpoint_sync("boom", |_ctx: &mut RequestContext| {
                Err(Failure::unhandled(anyhow::anyhow!(
                    "ledger connection refused at 10.0.0.7:5432"
                )))
            }),
        )
        .auto_options()
        .build()?;

    let pipeline = Pipeline::builder(routes).config(config).build();
    Ok(DemoApp {
        pipeline,
        sessions,
        metrics,
        issuer,
    })
}
