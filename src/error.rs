//! Failure taxonomy and the stable error body every failed request receives.
//!
//! Handlers return [`Failure`] from any stage. The router produces
//! [`Failure::NotFound`] and [`Failure::MethodNotAllowed`] itself; everything
//! else travels to the pipeline's single
//! [`ErrorHandler`](crate::handler::ErrorHandler).
//!
//! [`ErrorBody`] is what reaches the client. It carries a classification and a
//! safe message only: internal detail is logged, never serialized.

use http::Method;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

use crate::ids::RequestId;
use crate::response::Response;

/// Message used for every server-class failure.
pub const GENERIC_SERVER_ERROR: &str = "Internal Server Error";

/// Reported classification of a failed request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NotFound,
    MethodNotAllowed,
    Validation,
    Auth,
    RateLimited,
    IncompleteResponse,
    Timeout,
    Internal,
}

impl ErrorKind {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::NotFound => "not_found",
            ErrorKind::MethodNotAllowed => "method_not_allowed",
            ErrorKind::Validation => "validation",
            ErrorKind::Auth => "auth",
            ErrorKind::RateLimited => "rate_limited",
            ErrorKind::IncompleteResponse => "incomplete_response",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Internal => "internal",
        }
    }

    /// Default status for the kind. Auth failures may refine this (403 for
    /// insufficient scope).
    #[must_use]
    pub fn status(&self) -> u16 {
        match self {
            ErrorKind::NotFound => 404,
            ErrorKind::MethodNotAllowed => 405,
            ErrorKind::Validation => 400,
            ErrorKind::Auth => 401,
            ErrorKind::RateLimited => 429,
            ErrorKind::Timeout => 503,
            ErrorKind::IncompleteResponse | ErrorKind::Internal => 500,
        }
    }

    #[must_use]
    pub fn is_server_error(&self) -> bool {
        self.status() >= 500
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why an authentication gate refused a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AuthFailure {
    #[error("no credential supplied")]
    Missing,
    #[error("credential is invalid")]
    Invalid,
    #[error("credential has expired")]
    Expired,
    #[error("credential lacks a required scope")]
    InsufficientScope,
}

impl AuthFailure {
    /// Access-denial status: 401 for anything identity related, 403 when the
    /// identity is known but not allowed.
    #[must_use]
    pub fn status(&self) -> u16 {
        match self {
            AuthFailure::InsufficientScope => 403,
            _ => 401,
        }
    }

    /// Stable machine-readable reason.
    #[must_use]
    pub fn reason(&self) -> &'static str {
        match self {
            AuthFailure::Missing => "missing_credential",
            AuthFailure::Invalid => "invalid_credential",
            AuthFailure::Expired => "expired_credential",
            AuthFailure::InsufficientScope => "insufficient_scope",
        }
    }
}

/// Anything that can go wrong while serving one request.
#[derive(Debug, Error)]
pub enum Failure {
    #[error("no route for {method} {path}")]
    NotFound { method: Method, path: String },

    #[error("method {method} not allowed for {path}")]
    MethodNotAllowed {
        method: Method,
        path: String,
        allowed: Vec<Method>,
    },

    /// Malformed client input. The message is returned to the client, so it
    /// must be written for the client.
    #[error("validation failed: {message}")]
    Validation {
        message: String,
        details: Vec<String>,
    },

    #[error("authentication failed: {0}")]
    Auth(AuthFailure),

    /// A handler neither produced a response nor continued the chain.
    #[error("handler `{stage}` produced no response and did not continue")]
    IncompleteResponse { stage: String },

    #[error("request exceeded its deadline of {0:?}")]
    Timeout(Duration),

    #[error(transparent)]
    Unhandled(#[from] anyhow::Error),
}

impl Failure {
    pub fn validation(message: impl Into<String>) -> Self {
        Failure::Validation {
            message: message.into(),
            details: Vec::new(),
        }
    }

    pub fn validation_with(message: impl Into<String>, details: Vec<String>) -> Self {
        Failure::Validation {
            message: message.into(),
            details,
        }
    }

    /// Wrap any error as an unhandled (server-class) failure.
    pub fn unhandled(err: impl Into<anyhow::Error>) -> Self {
        Failure::Unhandled(err.into())
    }

    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Failure::NotFound { .. } => ErrorKind::NotFound,
            Failure::MethodNotAllowed { .. } => ErrorKind::MethodNotAllowed,
            Failure::Validation { .. } => ErrorKind::Validation,
            Failure::Auth(_) => ErrorKind::Auth,
            Failure::IncompleteResponse { .. } => ErrorKind::IncompleteResponse,
            Failure::Timeout(_) => ErrorKind::Timeout,
            Failure::Unhandled(_) => ErrorKind::Internal,
        }
    }

    #[must_use]
    pub fn status(&self) -> u16 {
        match self {
            Failure::Auth(a) => a.status(),
            other => other.kind().status(),
        }
    }

    /// Message that is safe to show the caller.
    #[must_use]
    pub fn public_message(&self) -> String {
        match self {
            Failure::NotFound { .. } => "Not Found".to_string(),
            Failure::MethodNotAllowed { .. } => "Method Not Allowed".to_string(),
            Failure::Validation { message, .. } => message.clone(),
            Failure::Auth(a) => a.to_string(),
            Failure::Timeout(_) => "Service Unavailable".to_string(),
            Failure::IncompleteResponse { .. } | Failure::Unhandled(_) => {
                GENERIC_SERVER_ERROR.to_string()
            }
        }
    }
}

/// Structured body of every error response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub status: u16,
    pub kind: ErrorKind,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub details: Vec<String>,
}

impl ErrorBody {
    #[must_use]
    pub fn new(status: u16, kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            status,
            kind,
            message: message.into(),
            reason: None,
            request_id: None,
            details: Vec::new(),
        }
    }

    /// Classify a failure into its public body.
    #[must_use]
    pub fn from_failure(failure: &Failure, request_id: Option<RequestId>) -> Self {
        let mut body = ErrorBody::new(failure.status(), failure.kind(), failure.public_message());
        body.request_id = request_id.map(|id| id.to_string());
        match failure {
            Failure::Validation { details, .. } => body.details.clone_from(details),
            Failure::Auth(a) => body.reason = Some(a.reason().to_string()),
            _ => {}
        }
        body
    }

    /// Body used when the error handler itself fails.
    #[must_use]
    pub fn fallback() -> Self {
        ErrorBody::new(500, ErrorKind::Internal, GENERIC_SERVER_ERROR)
    }

    #[must_use]
    pub fn with_request_id(mut self, request_id: RequestId) -> Self {
        self.request_id = Some(request_id.to_string());
        self
    }

    #[must_use]
    pub fn into_response(self) -> Response {
        let status = self.status;
        let value = serde_json::to_value(&self).unwrap_or_else(|_| {
            serde_json::json!({
                "status": status,
                "kind": "internal",
                "message": GENERIC_SERVER_ERROR,
            })
        });
        Response::json(status, value)
    }

    /// Full response for a failure, including protocol headers (`allow` for
    /// 405, `www-authenticate` for 401).
    #[must_use]
    pub fn response_for(failure: &Failure, request_id: Option<RequestId>) -> Response {
        let mut response = ErrorBody::from_failure(failure, request_id).into_response();
        match failure {
            Failure::MethodNotAllowed { allowed, .. } => {
                let allow = allowed
                    .iter()
                    .map(Method::as_str)
                    .collect::<Vec<_>>()
                    .join(", ");
                response.set_header("allow", allow);
            }
            Failure::Auth(a) if a.status() == 401 => {
                let challenge = match a {
                    AuthFailure::Missing => "Bearer".to_string(),
                    other => format!("Bearer error=\"{}\"", other.reason()),
                };
                response.set_header("www-authenticate", challenge);
            }
            _ => {}
        }
        response
    }
}

/// Hard-coded response used when the error handler fails or panics.
#[must_use]
pub fn fallback_response() -> Response {
    Response::json(
        500,
        serde_json::json!({
            "status": 500,
            "kind": "internal",
            "message": GENERIC_SERVER_ERROR,
        }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_kind_statuses() {
        assert_eq!(Failure::validation("bad").status(), 400);
        assert_eq!(Failure::Auth(AuthFailure::Missing).status(), 401);
        assert_eq!(Failure::Auth(AuthFailure::InsufficientScope).status(), 403);
        assert_eq!(
            Failure::IncompleteResponse { stage: "x".into() }.status(),
            500
        );
        assert_eq!(Failure::Timeout(Duration::from_millis(5)).status(), 503);
        assert_eq!(Failure::unhandled(anyhow::anyhow!("db down")).status(), 500);
    }

    #[test]
    fn test_internal_message_is_generic() {
        let f = Failure::unhandled(anyhow::anyhow!("password=hunter2 at db.rs:42"));
        let body = ErrorBody::from_failure(&f, None);
        assert_eq!(body.message, GENERIC_SERVER_ERROR);
        assert_eq!(body.kind, ErrorKind::Internal);
        let text = serde_json::to_string(&body).unwrap();
        assert!(!text.contains("hunter2"));
    }

    #[test]
    fn test_validation_details_survive() {
        let f = Failure::validation_with("bad body", vec!["name is required".into()]);
        let body = ErrorBody::from_failure(&f, None);
        assert_eq!(body.details, vec!["name is required".to_string()]);
    }

    #[test]
    fn test_error_body_serialization_shape() {
        let body = ErrorBody::new(404, ErrorKind::NotFound, "Not Found");
        assert_eq!(
            serde_json::to_value(&body).unwrap(),
            json!({"status": 404, "kind": "not_found", "message": "Not Found"})
        );
    }

    #[test]
    fn test_method_not_allowed_sets_allow() {
        let f = Failure::MethodNotAllowed {
            method: Method::DELETE,
            path: "/a".into(),
            allowed: vec![Method::GET, Method::POST],
        };
        let r = ErrorBody::response_for(&f, None);
        assert_eq!(r.status, 405);
        assert_eq!(r.get_header("allow"), Some("GET, POST"));
    }

    #[test]
    fn test_auth_challenge_header() {
        let r = ErrorBody::response_for(&Failure::Auth(AuthFailure::Expired), None);
        assert_eq!(
            r.get_header("www-authenticate"),
            Some("Bearer error=\"expired_credential\"")
        );
        let forbidden = ErrorBody::response_for(&Failure::Auth(AuthFailure::InsufficientScope), None);
        assert_eq!(forbidden.status, 403);
        assert!(forbidden.get_header("www-authenticate").is_none());
    }

    #[test]
    fn test_fallback_response() {
        let r = fallback_response();
        assert_eq!(r.status, 500);
        assert_eq!(
            r.body.as_json(),
            Some(&json!({"status": 500, "kind": "internal", "message": "Internal Server Error"}))
        );
    }
}
