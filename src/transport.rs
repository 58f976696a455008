//! Conversion between `http` crate types and pipeline types.
//!
//! The pipeline never touches sockets. A server (or the `replay` CLI
//! command) turns its request into a [`RequestContext`] here, runs it, and
//! converts the [`Response`] back with [`into_http`].

use http::header::{HeaderName, HeaderValue, CONTENT_LENGTH, CONTENT_TYPE};
use http::{Method, StatusCode};
use std::net::SocketAddr;
use thiserror::Error;
use tracing::debug;

use crate::context::RequestContext;
use crate::response::Response;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("invalid status code {0}")]
    InvalidStatus(u16),

    #[error("invalid header {name}: {reason}")]
    InvalidHeader { name: String, reason: String },

    #[error("failed to serialize response body: {0}")]
    Body(#[from] serde_json::Error),

    #[error("malformed header line {0:?}, expected `Name: value`")]
    MalformedHeaderLine(String),

    #[error(transparent)]
    Http(#[from] http::Error),
}

/// A request described by plain parts, e.g. from the command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingRequest {
    pub method: Method,
    /// Path with optional query string
    pub path: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
    pub peer_addr: Option<SocketAddr>,
}

impl IncomingRequest {
    #[must_use]
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            headers: Vec::new(),
            body: Vec::new(),
            peer_addr: None,
        }
    }

    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    #[must_use]
    pub fn body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    #[must_use]
    pub fn peer_addr(mut self, addr: SocketAddr) -> Self {
        self.peer_addr = Some(addr);
        self
    }
}

impl From<IncomingRequest> for RequestContext {
    fn from(req: IncomingRequest) -> Self {
        let mut ctx = req
            .headers
            .iter()
            .fold(RequestContext::new(req.method, &req.path), |ctx, (k, v)| {
                ctx.with_header(k, v.as_str())
            });
        ctx.peer_addr = req.peer_addr;
        if req.body.is_empty() {
            ctx
        } else {
            ctx.with_body(req.body)
        }
    }
}

/// Parse a `Name: value` header line.
pub fn parse_header_line(line: &str) -> Result<(String, String), TransportError> {
    match line.split_once(':') {
        Some((name, value)) if !name.trim().is_empty() => {
            Ok((name.trim().to_string(), value.trim().to_string()))
        }
        _ => Err(TransportError::MalformedHeaderLine(line.to_string())),
    }
}

/// Build a [`RequestContext`] from an `http::Request`. Header values that are
/// not valid UTF-8 are dropped. A `SocketAddr` request extension, as servers
/// record for the accepted connection, becomes the peer address.
#[must_use]
pub fn into_context(req: http::Request<Vec<u8>>) -> RequestContext {
    let (parts, body) = req.into_parts();
    let target = parts
        .uri
        .path_and_query()
        .map_or_else(|| parts.uri.path().to_string(), |pq| pq.as_str().to_string());

    let mut ctx = RequestContext::new(parts.method, &target);
    ctx.peer_addr = parts.extensions.get::<SocketAddr>().copied();
    for (name, value) in &parts.headers {
        match value.to_str() {
            Ok(v) => ctx = ctx.with_header(name.as_str(), v),
            Err(_) => debug!(header = %name, "Dropping non UTF-8 header value"),
        }
    }
    if body.is_empty() {
        ctx
    } else {
        ctx.with_body(body)
    }
}

/// Serialize a pipeline [`Response`] into an `http::Response`.
///
/// `content-type` comes from the body variant unless a handler set one;
/// `content-length` always reflects the serialized body.
pub fn into_http(res: Response) -> Result<http::Response<Vec<u8>>, TransportError> {
    let status = StatusCode::from_u16(res.status).map_err(|_| TransportError::InvalidStatus(res.status))?;
    let bytes = res.body.to_bytes()?;

    let mut builder = http::Response::builder().status(status);
    let mut has_content_type = false;
    for (name, value) in &res.headers {
        let header_name =
            HeaderName::from_bytes(name.as_bytes()).map_err(|e| TransportError::InvalidHeader {
                name: name.to_string(),
                reason: e.to_string(),
            })?;
        if header_name == CONTENT_LENGTH {
            continue;
        }
        has_content_type |= header_name == CONTENT_TYPE;
        let header_value =
            HeaderValue::from_str(value).map_err(|e| TransportError::InvalidHeader {
                name: name.to_string(),
                reason: e.to_string(),
            })?;
        builder = builder.header(header_name, header_value);
    }
    if !has_content_type {
        if let Some(ct) = res.body.default_content_type() {
            builder = builder.header(CONTENT_TYPE, ct);
        }
    }
    builder = builder.header(CONTENT_LENGTH, bytes.len());
    Ok(builder.body(bytes)?)
}
