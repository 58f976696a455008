use serde_json::Value;
use std::sync::Arc;

use crate::context::HeaderVec;

/// Response payload. Serialization to bytes happens at the transport
/// boundary, see [`crate::transport::into_http`].
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseBody {
    Empty,
    Json(Value),
    Text(String),
    Bytes(Vec<u8>),
}

impl ResponseBody {
    /// Content type implied by the body variant.
    #[must_use]
    pub fn default_content_type(&self) -> Option<&'static str> {
        match self {
            ResponseBody::Empty => None,
            ResponseBody::Json(_) => Some("application/json"),
            ResponseBody::Text(_) => Some("text/plain; charset=utf-8"),
            ResponseBody::Bytes(_) => Some("application/octet-stream"),
        }
    }

    /// Serialize the body to wire bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        match self {
            ResponseBody::Empty => Ok(Vec::new()),
            ResponseBody::Json(v) => serde_json::to_vec(v),
            ResponseBody::Text(s) => Ok(s.clone().into_bytes()),
            ResponseBody::Bytes(b) => Ok(b.clone()),
        }
    }

    #[must_use]
    pub fn as_json(&self) -> Option<&Value> {
        match self {
            ResponseBody::Json(v) => Some(v),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            ResponseBody::Text(s) => Some(s),
            _ => None,
        }
    }
}

/// The single response produced for a request.
///
/// Contains the HTTP status code, headers, and body to be handed to the
/// transport.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    /// HTTP status code (200, 404, 500, etc.)
    pub status: u16,
    /// HTTP response headers (stack-allocated for ≤16 headers)
    pub headers: HeaderVec,
    pub body: ResponseBody,
}

impl Response {
    /// Create a response with the given status and no body
    #[must_use]
    pub fn empty(status: u16) -> Self {
        Self {
            status,
            headers: HeaderVec::new(),
            body: ResponseBody::Empty,
        }
    }

    /// Create a JSON response with a content-type header
    #[must_use]
    pub fn json(status: u16, body: Value) -> Self {
        let mut headers = HeaderVec::new();
        headers.push((Arc::from("content-type"), "application/json".to_string()));
        Self {
            status,
            headers,
            body: ResponseBody::Json(body),
        }
    }

    /// Create a plain-text response
    #[must_use]
    pub fn text(status: u16, body: impl Into<String>) -> Self {
        let mut headers = HeaderVec::new();
        headers.push((
            Arc::from("content-type"),
            "text/plain; charset=utf-8".to_string(),
        ));
        Self {
            status,
            headers,
            body: ResponseBody::Text(body.into()),
        }
    }

    /// `200 OK` with a JSON body
    #[must_use]
    pub fn ok_json(body: Value) -> Self {
        Self::json(200, body)
    }

    /// `200 OK` with a text body
    #[must_use]
    pub fn ok_text(body: impl Into<String>) -> Self {
        Self::text(200, body)
    }

    /// Get a header by name
    #[inline]
    #[must_use]
    pub fn get_header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Add or replace a header
    pub fn set_header(&mut self, name: &str, value: impl Into<String>) {
        self.headers.retain(|(k, _)| !k.eq_ignore_ascii_case(name));
        self.headers.push((Arc::from(name), value.into()));
    }

    /// Set a header only when the handler did not already set one
    pub fn set_header_if_absent(&mut self, name: &str, value: impl Into<String>) {
        if self.get_header(name).is_none() {
            self.headers.push((Arc::from(name), value.into()));
        }
    }

    /// Builder-style [`Response::set_header`]
    #[must_use]
    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.set_header(name, value);
        self
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_json_sets_content_type() {
        let r = Response::json(201, json!({"id": 1}));
        assert_eq!(r.status, 201);
        assert_eq!(r.get_header("Content-Type"), Some("application/json"));
        assert_eq!(r.body.as_json(), Some(&json!({"id": 1})));
    }

    #[test]
    fn test_set_header_replaces_case_insensitively() {
        let mut r = Response::ok_text("hi");
        r.set_header("X-Thing", "a");
        r.set_header("x-thing", "b");
        assert_eq!(r.get_header("X-THING"), Some("b"));
        assert_eq!(r.headers.iter().filter(|(k, _)| k.eq_ignore_ascii_case("x-thing")).count(), 1);
    }

    #[test]
    fn test_set_header_if_absent_keeps_handler_value() {
        let mut r = Response::empty(204).with_header("cache-control", "no-store");
        r.set_header_if_absent("Cache-Control", "public");
        assert_eq!(r.get_header("cache-control"), Some("no-store"));
    }

    #[test]
    fn test_body_bytes() {
        assert_eq!(ResponseBody::Text("ok".into()).to_bytes().unwrap(), b"ok");
        assert_eq!(
            ResponseBody::Json(json!({"a": true})).to_bytes().unwrap(),
            br#"{"a":true}"#
        );
        assert!(ResponseBody::Empty.to_bytes().unwrap().is_empty());
    }
}
