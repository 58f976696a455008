//! # Security Module
//!
//! Authentication gates: middleware that verify a credential before the rest
//! of the chain runs.
//!
//! A gate that accepts a request binds an [`Identity`] into the request's
//! attribute bag and continues. A gate that rejects it answers directly with
//! an access-denial response and the endpoint never runs:
//!
//! | Condition | Status | `reason` |
//! |---|---|---|
//! | no credential | 401 + `WWW-Authenticate: Bearer` | `missing_credential` |
//! | malformed, bad signature, unknown session | 401 | `invalid_credential` |
//! | expired token or session | 401 | `expired_credential` |
//! | valid but missing a required scope | 403 | `insufficient_scope` |
//!
//! ## Gates
//!
//! - [`BearerJwtGate`] verifies HS256 JWTs from `Authorization: Bearer` or a
//!   cookie.
//! - [`SessionGate`] resolves a session cookie through a [`SessionStore`].
//!
//! ```rust,ignore
//! use brrtchain::security::{BearerJwtGate, TokenIssuer};
//!
//! let gate = BearerJwtGate::new("dev-secret").require_scopes(&["read:users"]);
//! let token = TokenIssuer::new("dev-secret").issue("alice", &["read:users"])?;
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::context::RequestContext;
use crate::error::{AuthFailure, ErrorBody, Failure};
use crate::handler::Flow;

mod bearer_jwt;
mod session;

pub use bearer_jwt::{BearerJwtGate, Claims, TokenIssuer};
pub use session::{InMemorySessionStore, SessionGate, SessionRecord, SessionStore};

/// Where an identity came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialSource {
    BearerToken,
    Session,
}

/// The authenticated caller, bound by a gate for downstream handlers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Identity {
    pub subject: String,
    pub scopes: Vec<String>,
    /// Raw token claims or session data.
    pub claims: Value,
    pub source: CredentialSource,
}

impl Identity {
    #[must_use]
    pub fn has_scope(&self, scope: &str) -> bool {
        self.scopes.iter().any(|s| s == scope)
    }

    /// First required scope this identity lacks.
    #[must_use]
    pub fn missing_scope<'a>(&self, required: &'a [String]) -> Option<&'a str> {
        required
            .iter()
            .find(|r| !self.has_scope(r))
            .map(String::as_str)
    }
}

/// Split a space-separated `scope` claim.
pub(crate) fn parse_scopes(scope: &str) -> Vec<String> {
    scope.split_whitespace().map(str::to_string).collect()
}

/// Denial response for a gate, stamped with the request id.
pub(crate) fn deny(gate: &str, failure: AuthFailure, ctx: &RequestContext) -> Flow {
    warn!(
        request_id = %ctx.request_id,
        gate = gate,
        path = %ctx.path,
        reason = failure.reason(),
        "Authentication gate denied request"
    );
    Flow::Respond(ErrorBody::response_for(
        &Failure::Auth(failure),
        Some(ctx.request_id),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_missing_scope() {
        let id = Identity {
            subject: "alice".into(),
            scopes: parse_scopes("read:users  write:users"),
            claims: json!({}),
            source: CredentialSource::BearerToken,
        };
        assert!(id.has_scope("write:users"));
        let required = vec!["read:users".to_string(), "admin".to_string()];
        assert_eq!(id.missing_scope(&required), Some("admin"));
        assert_eq!(id.missing_scope(&required[..1]), None);
    }
}
