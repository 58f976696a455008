//! Per-request state handed to every handler in a chain.
//!
//! A [`RequestContext`] is created once per inbound call, moved into the
//! [`Pipeline`](crate::pipeline::Pipeline), and lent to each handler as
//! `&mut RequestContext`. Handlers can read the parsed request, bind values
//! into the attribute bag for downstream handlers, and nothing can hold on to
//! the context once the call completes.

use http::{Extensions, Method};
use serde::de::DeserializeOwned;
use serde_json::Value;
use smallvec::SmallVec;
use std::net::SocketAddr;
use std::sync::Arc;

use crate::error::Failure;
use crate::ids::{RequestId, REQUEST_ID_HEADER};
use crate::security::Identity;

/// Maximum number of path parameters before heap allocation.
/// Most REST APIs have ≤4 path params (e.g., /users/:id/posts/:post_id).
pub const MAX_INLINE_PARAMS: usize = 8;

/// Stack-allocated path parameter storage.
///
/// Param names are `Arc<str>` because they come from the route table built at
/// startup; values are per-request data taken from the URL.
pub type ParamVec = SmallVec<[(Arc<str>, String); MAX_INLINE_PARAMS]>;

/// Maximum inline headers before heap allocation.
pub const MAX_INLINE_HEADERS: usize = 16;

/// Stack-allocated header storage. Lookups are case-insensitive.
pub type HeaderVec = SmallVec<[(Arc<str>, String); MAX_INLINE_HEADERS]>;

/// A query parameter value: names seen once stay single, repeated names
/// collect every value in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryValue {
    Single(String),
    Multi(Vec<String>),
}

impl QueryValue {
    /// The last value supplied for this name.
    #[must_use]
    pub fn last(&self) -> &str {
        match self {
            QueryValue::Single(v) => v,
            QueryValue::Multi(vs) => vs.last().map(String::as_str).unwrap_or_default(),
        }
    }

    /// Every value supplied for this name, in order.
    #[must_use]
    pub fn values(&self) -> Vec<&str> {
        match self {
            QueryValue::Single(v) => vec![v.as_str()],
            QueryValue::Multi(vs) => vs.iter().map(String::as_str).collect(),
        }
    }

    fn push(&mut self, value: String) {
        match self {
            QueryValue::Single(first) => {
                let first = std::mem::take(first);
                *self = QueryValue::Multi(vec![first, value]);
            }
            QueryValue::Multi(vs) => vs.push(value),
        }
    }
}

/// Decoded query string, keeping first-seen name order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryParams(Vec<(String, QueryValue)>);

impl QueryParams {
    /// Parse a raw query string (without the leading `?`).
    #[must_use]
    pub fn parse(query: &str) -> Self {
        let mut params = QueryParams::default();
        for (k, v) in url::form_urlencoded::parse(query.as_bytes()) {
            params.append(k.into_owned(), v.into_owned());
        }
        params
    }

    /// Add a value, promoting the entry to [`QueryValue::Multi`] on repeats.
    pub fn append(&mut self, name: String, value: String) {
        match self.0.iter_mut().find(|(k, _)| *k == name) {
            Some((_, existing)) => existing.push(value),
            None => self.0.push((name, QueryValue::Single(value))),
        }
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&QueryValue> {
        self.0.iter().find(|(k, _)| k == name).map(|(_, v)| v)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &QueryValue)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }
}

/// Request payload, parsed according to the declared `content-type`.
#[derive(Debug, Clone, PartialEq)]
pub enum Body {
    Empty,
    Json(Value),
    Form(Vec<(String, String)>),
    Text(String),
    Bytes(Vec<u8>),
    /// The payload did not parse under its declared content type. Handlers
    /// asking for a parsed body get a validation failure.
    Invalid { content_type: String, reason: String },
}

impl Body {
    /// Parse raw bytes according to a `content-type` header value.
    #[must_use]
    pub fn parse(content_type: Option<&str>, bytes: Vec<u8>) -> Self {
        if bytes.is_empty() {
            return Body::Empty;
        }
        let declared = content_type.unwrap_or("application/octet-stream");
        let mime = declared
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();

        if mime == "application/json" || mime.ends_with("+json") {
            match serde_json::from_slice(&bytes) {
                Ok(v) => Body::Json(v),
                Err(e) => Body::Invalid {
                    content_type: mime,
                    reason: e.to_string(),
                },
            }
        } else if mime == "application/x-www-form-urlencoded" {
            Body::Form(
                url::form_urlencoded::parse(&bytes)
                    .map(|(k, v)| (k.into_owned(), v.into_owned()))
                    .collect(),
            )
        } else if mime.starts_with("text/") {
            match String::from_utf8(bytes) {
                Ok(s) => Body::Text(s),
                Err(e) => Body::Invalid {
                    content_type: mime,
                    reason: e.to_string(),
                },
            }
        } else {
            Body::Bytes(bytes)
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        matches!(self, Body::Empty)
    }
}

/// One inbound call.
///
/// Fields are public in the same way a parsed request is: the router writes
/// `path_params` and `route`, handlers read everything and write
/// `attributes`.
#[derive(Debug)]
pub struct RequestContext {
    /// Unique request ID for tracing and correlation
    pub request_id: RequestId,
    pub method: Method,
    /// Request path without the query string
    pub path: String,
    /// Pattern of the matched route, set by the pipeline after routing
    pub route: Option<Arc<str>>,
    /// Path parameters bound by the router
    pub path_params: ParamVec,
    pub query: QueryParams,
    pub headers: HeaderVec,
    pub body: Body,
    /// Address of the connected client as seen by the transport
    pub peer_addr: Option<SocketAddr>,
    /// Typed attribute bag shared between handlers of this request only
    pub attributes: Extensions,
}

impl RequestContext {
    /// Create a context from a method and a path that may carry a query string.
    #[must_use]
    pub fn new(method: Method, path_and_query: &str) -> Self {
        let (path, query) = match path_and_query.split_once('?') {
            Some((p, q)) => (p, QueryParams::parse(q)),
            None => (path_and_query, QueryParams::default()),
        };
        let path = if path.is_empty() { "/" } else { path };
        Self {
            request_id: RequestId::new(),
            method,
            path: path.to_string(),
            route: None,
            path_params: ParamVec::new(),
            query,
            headers: HeaderVec::new(),
            body: Body::Empty,
            peer_addr: None,
            attributes: Extensions::new(),
        }
    }

    /// Add a header. An `x-request-id` header carrying a valid ULID becomes
    /// this context's request id.
    #[must_use]
    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        let value = value.into();
        if name.eq_ignore_ascii_case(REQUEST_ID_HEADER) {
            if let Some(id) = RequestId::from_header(&value) {
                self.request_id = id;
            }
        }
        self.headers.push((Arc::from(name.to_ascii_lowercase()), value));
        self
    }

    /// Record the client address reported by the transport.
    #[must_use]
    pub fn with_peer_addr(mut self, addr: SocketAddr) -> Self {
        self.peer_addr = Some(addr);
        self
    }

    /// Attach a raw payload, parsed according to the current `content-type`.
    #[must_use]
    pub fn with_body(mut self, bytes: impl Into<Vec<u8>>) -> Self {
        self.body = Body::parse(self.get_header("content-type"), bytes.into());
        self
    }

    /// Attach a JSON payload and its content type.
    #[must_use]
    pub fn with_json(self, value: &Value) -> Self {
        let bytes = value.to_string().into_bytes();
        self.with_header("content-type", "application/json")
            .with_body(bytes)
    }

    /// Get a path parameter by name.
    ///
    /// Uses "last write wins" semantics like query parameters do.
    #[inline]
    #[must_use]
    pub fn get_path_param(&self, name: &str) -> Option<&str> {
        self.path_params
            .iter()
            .rfind(|(k, _)| k.as_ref() == name)
            .map(|(_, v)| v.as_str())
    }

    /// Get a path parameter or fail the request with a validation failure.
    pub fn require_path_param(&self, name: &str) -> Result<&str, Failure> {
        self.get_path_param(name)
            .ok_or_else(|| Failure::validation(format!("missing path parameter `{name}`")))
    }

    /// Last value of a query parameter.
    #[must_use]
    pub fn query_param(&self, name: &str) -> Option<&str> {
        self.query.get(name).map(QueryValue::last)
    }

    /// Every value of a query parameter, in order.
    #[must_use]
    pub fn query_values(&self, name: &str) -> Vec<&str> {
        self.query.get(name).map(QueryValue::values).unwrap_or_default()
    }

    /// Get a header by name (case-insensitive per RFC 7230)
    #[inline]
    #[must_use]
    pub fn get_header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Get a cookie by name from the `cookie` header(s).
    #[must_use]
    pub fn get_cookie(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .filter(|(k, _)| k.eq_ignore_ascii_case("cookie"))
            .flat_map(|(_, v)| v.split(';'))
            .filter_map(|pair| {
                let (k, v) = pair.trim().split_once('=')?;
                Some((k.trim(), v.trim()))
            })
            .find(|(k, _)| *k == name)
            .map(|(_, v)| v)
    }

    /// The parsed JSON body, or a validation failure.
    pub fn json_body(&self) -> Result<&Value, Failure> {
        match &self.body {
            Body::Json(v) => Ok(v),
            Body::Empty => Err(Failure::validation("request body is required")),
            Body::Invalid { reason, .. } => Err(Failure::validation_with(
                "request body is not valid JSON",
                vec![reason.clone()],
            )),
            _ => Err(Failure::validation("expected an application/json body")),
        }
    }

    /// Deserialize the JSON body into `T`, mapping any mismatch to a
    /// validation failure.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, Failure> {
        let value = self.json_body()?;
        T::deserialize(value).map_err(|e| {
            Failure::validation_with("request body does not match the expected shape", vec![
                e.to_string(),
            ])
        })
    }

    /// Bind a typed value for downstream handlers. Returns the previous value
    /// of the same type, if any.
    pub fn insert_attribute<T: Clone + Send + Sync + 'static>(&mut self, value: T) -> Option<T> {
        self.attributes.insert(value)
    }

    #[must_use]
    pub fn attribute<T: Send + Sync + 'static>(&self) -> Option<&T> {
        self.attributes.get::<T>()
    }

    pub fn attribute_mut<T: Send + Sync + 'static>(&mut self) -> Option<&mut T> {
        self.attributes.get_mut::<T>()
    }

    /// The identity bound by an authentication gate, if one ran.
    #[must_use]
    pub fn identity(&self) -> Option<&Identity> {
        self.attribute::<Identity>()
    }
}
