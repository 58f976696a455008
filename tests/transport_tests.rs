use brrtchain::transport::{into_context, into_http, IncomingRequest};
use brrtchain::{endpoint_sync, Body, Failure, Pipeline, RequestContext, Response, RouteTable};
use http::header::{CONTENT_LENGTH, CONTENT_TYPE};
use http::{Method, StatusCode};
use serde_json::json;

fn echo_pipeline() -> Pipeline {
    let routes = RouteTable::builder()
        .post(
            "/echo",
            endpoint_sync("echo", |ctx: &mut RequestContext| {
                let kind = match &ctx.body {
                    Body::Json(v) => return Ok(Response::ok_json(json!({ "json": v }))),
                    Body::Form(pairs) => format!("form:{}", pairs.len()),
                    Body::Text(t) => format!("text:{t}"),
                    Body::Bytes(b) => format!("bytes:{}", b.len()),
                    Body::Empty => "empty".to_string(),
                    Body::Invalid { .. } => return ctx.json_body().map(|_| Response::empty(204)),
                };
                Ok(Response::ok_text(kind))
            }),
        )
        .get(
            "/fail",
            endpoint_sync("fail", |_ctx: &mut RequestContext| {
                Err(Failure::validation_with("bad input", vec!["limit must be positive".into()]))
            }),
        )
        .build()
        .unwrap();
    Pipeline::builder(routes).build()
}

async fn post(content_type: &str, body: &[u8]) -> http::Response<Vec<u8>> {
    let req = http::Request::builder()
        .method(Method::POST)
        .uri("/echo")
        .header(CONTENT_TYPE, content_type)
        .body(body.to_vec())
        .unwrap();
    into_http(echo_pipeline().handle(into_context(req)).await).unwrap()
}

#[tokio::test]
async fn test_body_parsed_by_content_type() {
    let res = post("application/json", br#"{"a":1}"#).await;
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(res.body(), br#"{"json":{"a":1}}"#);

    let res = post("application/x-www-form-urlencoded", b"a=1&b=two+words").await;
    assert_eq!(res.body(), b"form:2");

    let res = post("text/plain; charset=utf-8", b"hello").await;
    assert_eq!(res.body(), b"text:hello");

    let res = post("application/octet-stream", &[0, 159, 146, 150]).await;
    assert_eq!(res.body(), b"bytes:4");
}

#[tokio::test]
async fn test_malformed_json_is_validation_failure() {
    let res = post("application/json", b"{not json").await;
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    let body: serde_json::Value = serde_json::from_slice(res.body()).unwrap();
    assert_eq!(body["kind"], "validation");
    assert_eq!(body["details"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_error_response_wire_shape() {
    let ctx: RequestContext = IncomingRequest::new(Method::GET, "/fail").into();
    let request_id = ctx.request_id.to_string();
    let res = into_http(echo_pipeline().handle(ctx).await).unwrap();

    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    assert_eq!(res.headers()[CONTENT_TYPE], "application/json");
    assert_eq!(
        res.headers()[CONTENT_LENGTH].to_str().unwrap(),
        res.body().len().to_string()
    );
    let body: serde_json::Value = serde_json::from_slice(res.body()).unwrap();
    assert_eq!(
        body,
        json!({
            "status": 400,
            "kind": "validation",
            "message": "bad input",
            "request_id": request_id,
            "details": ["limit must be positive"],
        })
    );
}

#[tokio::test]
async fn test_method_not_allowed_over_the_wire() {
    let req = http::Request::builder()
        .method(Method::GET)
        .uri("/echo")
        .body(Vec::new())
        .unwrap();
    let res = into_http(echo_pipeline().handle(into_context(req)).await).unwrap();
    assert_eq!(res.status(), StatusCode::METHOD_NOT_ALLOWED);
    assert_eq!(res.headers()["allow"], "POST");
}
