mod common;

use brrtchain::router::{RouteLookup, RoutePattern};
use brrtchain::{endpoint_fn, Chain, Pipeline, RequestContext, Response, RouteError, RouteTable};
use common::{Action, Journal, Step, Terminal};
use http::Method;

#[tokio::test]
async fn test_user_id_scenario() {
    let routes = RouteTable::builder()
        .get(
            "/user/:id",
            endpoint_fn("get_user", |ctx| {
                Box::pin(async move {
                    let id = ctx.require_path_param("id")?;
                    Ok(Response::ok_text(format!("User ID is: {id}")))
                })
            }),
        )
        .build()
        .unwrap();
    let pipeline = Pipeline::builder(routes).build();

    let res = pipeline.handle(RequestContext::new(Method::GET, "/user/123")).await;
    assert_eq!(res.status, 200);
    assert_eq!(res.body.as_text(), Some("User ID is: 123"));

    let res = pipeline.handle(RequestContext::new(Method::GET, "/nope")).await;
    assert_eq!(res.status, 404);
}

#[test]
fn test_lookup_binds_params_and_route() {
    let journal = Journal::default();
    let table = RouteTable::builder()
        .get("/orgs/:org/repos/:repo", Terminal::new("repo", &journal))
        .build()
        .unwrap();

    match table.lookup(&Method::GET, "/orgs/rust-lang/repos/cargo") {
        RouteLookup::Matched(m) => {
            assert_eq!(m.route.pattern.as_str(), "/orgs/:org/repos/:repo");
            let params: Vec<_> = m
                .path_params
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect();
            assert_eq!(
                params,
                vec![
                    ("org".to_string(), "rust-lang".to_string()),
                    ("repo".to_string(), "cargo".to_string())
                ]
            );
        }
        other => panic!("expected a match, got {other:?}"),
    }
}

#[tokio::test]
async fn test_first_registered_wins_on_overlap() {
    let journal = Journal::default();
    let routes = RouteTable::builder()
        .get("/users/:id", Terminal::new("by_id", &journal))
        .get("/users/me", Terminal::new("me", &journal))
        .build()
        .unwrap();
    let pipeline = Pipeline::builder(routes).build();

    let res = pipeline.handle(RequestContext::new(Method::GET, "/users/me")).await;
    assert_eq!(res.body.as_text(), Some("by_id:none"));
    assert_eq!(journal.events(), vec!["endpoint:by_id"]);
}

#[tokio::test]
async fn test_query_and_path_together() {
    let routes = RouteTable::builder()
        .get(
            "/search/:scope",
            endpoint_fn("search", |ctx| {
                Box::pin(async move {
                    let scope = ctx.require_path_param("scope")?.to_string();
                    let tags = ctx.query_values("tag").join("+");
                    let page = ctx.query_param("page").unwrap_or("1").to_string();
                    Ok(Response::ok_text(format!("{scope}|{tags}|{page}")))
                })
            }),
        )
        .build()
        .unwrap();

    let res = Pipeline::builder(routes)
        .build()
        .handle(RequestContext::new(
            Method::GET,
            "/search/docs?tag=rust&tag=async%20io&page=2",
        ))
        .await;
    assert_eq!(res.body.as_text(), Some("docs|rust+async io|2"));
}

#[test]
fn test_invalid_patterns_fail_build() {
    let journal = Journal::default();
    let err = RouteTable::builder()
        .get("/ok", Terminal::new("ok", &journal))
        .get("/a/:id/b/:id", Terminal::new("dup", &journal))
        .build()
        .unwrap_err();
    assert!(matches!(err, RouteError::DuplicateParam { .. }));

    assert!(matches!(
        RoutePattern::parse("user/:id"),
        Err(RouteError::MissingLeadingSlash { .. })
    ));
}

#[test]
fn test_describe_lists_routes_in_order() {
    let journal = Journal::default();
    let table = RouteTable::builder()
        .get("/", Terminal::new("home", &journal))
        .delete("/user/:id", Terminal::new("remove_user", &journal))
        .build()
        .unwrap();
    assert_eq!(
        table.describe(),
        vec!["GET / -> home []", "DELETE /user/:id -> remove_user []"]
    );
}

#[tokio::test]
async fn test_auto_options_answers_every_pattern() {
    let journal = Journal::default();
    let routes = RouteTable::builder()
        .middleware(Step::new("global", Action::Continue, &journal))
        .get("/items", Terminal::new("list", &journal))
        .post(
            "/items",
            Chain::new(Terminal::new("create", &journal)).with(Step::new(
                "gate",
                Action::Respond(401),
                &journal,
            )),
        )
        .get("/reports", Terminal::new("reports", &journal))
        .route(Method::OPTIONS, "/reports", Terminal::new("custom_options", &journal))
        .auto_options()
        .build()
        .unwrap();
    let pipeline = Pipeline::builder(routes).build();

    let res = pipeline
        .handle(RequestContext::new(Method::OPTIONS, "/items"))
        .await;
    assert_eq!(res.status, 204);
    assert_eq!(res.get_header("allow"), Some("GET, POST, OPTIONS"));
    // Builder-level middleware runs; the POST route's own gate does not.
    assert_eq!(res.get_header("x-after-global"), Some("1"));
    assert_eq!(journal.events(), vec!["before:global", "after:global"]);

    let res = pipeline
        .handle(RequestContext::new(Method::OPTIONS, "/reports"))
        .await;
    assert_eq!(res.body.as_text(), Some("custom_options:none"));
}

#[test]
fn test_options_not_generated_by_default() {
    let journal = Journal::default();
    let table = RouteTable::builder()
        .get("/items", Terminal::new("list", &journal))
        .build()
        .unwrap();
    assert!(matches!(
        table.lookup(&Method::OPTIONS, "/items"),
        RouteLookup::MethodNotAllowed { .. }
    ));
}
