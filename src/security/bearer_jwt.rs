use async_trait::async_trait;
use jsonwebtoken::errors::ErrorKind as JwtErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::Duration;
use tracing::debug;

use super::{deny, parse_scopes, CredentialSource, Identity};
use crate::config::{AuthConfig, ConfigError};
use crate::context::RequestContext;
use crate::error::{AuthFailure, Failure};
use crate::handler::{Flow, Middleware};

/// Registered and custom claims of a bearer token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub exp: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iat: Option<u64>,
    /// Space-separated scopes.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub scope: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Bearer/JWT gate that verifies HS256 tokens against a shared secret.
///
/// The token is read from the configured cookie first, then from the
/// `Authorization: Bearer` header. Signature, `exp` (with leeway) and the
/// required scopes are all checked before the identity is bound.
pub struct BearerJwtGate {
    key: DecodingKey,
    validation: Validation,
    cookie_name: Option<String>,
    required_scopes: Vec<String>,
}

impl BearerJwtGate {
    pub fn new(secret: impl AsRef<[u8]>) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_required_spec_claims(&["exp", "sub"]);
        Self {
            key: DecodingKey::from_secret(secret.as_ref()),
            validation,
            cookie_name: None,
            required_scopes: Vec::new(),
        }
    }

    /// Build a gate from [`AuthConfig`]. An empty secret is rejected.
    pub fn from_config(config: &AuthConfig) -> Result<Self, ConfigError> {
        if config.jwt_secret.is_empty() {
            return Err(ConfigError::MissingSecret);
        }
        let mut gate = Self::new(config.jwt_secret.as_bytes()).leeway(config.leeway_secs);
        if let Some(cookie) = &config.token_cookie {
            gate = gate.cookie_name(cookie.clone());
        }
        Ok(gate)
    }

    /// Clock skew tolerated when checking `exp`, in seconds.
    #[must_use]
    pub fn leeway(mut self, secs: u64) -> Self {
        self.validation.leeway = secs;
        self
    }

    /// Configure the cookie name used to read the token.
    #[must_use]
    pub fn cookie_name(mut self, name: impl Into<String>) -> Self {
        self.cookie_name = Some(name.into());
        self
    }

    /// Scopes every accepted token must carry.
    #[must_use]
    pub fn require_scopes(mut self, scopes: &[&str]) -> Self {
        self.required_scopes = scopes.iter().map(|s| (*s).to_string()).collect();
        self
    }

    fn extract_token<'a>(&self, ctx: &'a RequestContext) -> Option<&'a str> {
        if let Some(name) = &self.cookie_name {
            if let Some(t) = ctx.get_cookie(name).filter(|t| !t.is_empty()) {
                return Some(t);
            }
        }
        let header = ctx.get_header("authorization")?;
        let (scheme, token) = header.trim().split_once(' ')?;
        let token = token.trim();
        (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then_some(token)
    }

    /// Verify a raw token and resolve it to an identity.
    pub fn verify(&self, token: &str) -> Result<Identity, AuthFailure> {
        let data = jsonwebtoken::decode::<Claims>(token, &self.key, &self.validation).map_err(
            |e| match e.kind() {
                JwtErrorKind::ExpiredSignature => {
                    debug!("BearerJWT validation failed: token expired");
                    AuthFailure::Expired
                }
                other => {
                    debug!(error = ?other, "BearerJWT validation failed: invalid token");
                    AuthFailure::Invalid
                }
            },
        )?;

        let claims = data.claims;
        let identity = Identity {
            subject: claims.sub.clone(),
            scopes: parse_scopes(&claims.scope),
            claims: serde_json::to_value(&claims).unwrap_or(Value::Null),
            source: CredentialSource::BearerToken,
        };

        if let Some(missing) = identity.missing_scope(&self.required_scopes) {
            debug!(
                subject = %identity.subject,
                missing_scope = missing,
                "BearerJWT validation failed: missing required scope"
            );
            return Err(AuthFailure::InsufficientScope);
        }
        Ok(identity)
    }
}

#[async_trait]
impl Middleware for BearerJwtGate {
    fn name(&self) -> &str {
        "bearer_jwt"
    }

    async fn before(&self, ctx: &mut RequestContext) -> Result<Flow, Failure> {
        let Some(token) = self.extract_token(ctx) else {
            return Ok(deny(self.name(), AuthFailure::Missing, ctx));
        };
        match self.verify(token) {
            Ok(identity) => {
                debug!(
                    request_id = %ctx.request_id,
                    subject = %identity.subject,
                    "BearerJWT validation succeeded"
                );
                ctx.insert_attribute(identity);
                Ok(Flow::Continue)
            }
            Err(failure) => Ok(deny(self.name(), failure, ctx)),
        }
    }
}

/// Mints HS256 tokens accepted by a [`BearerJwtGate`] with the same secret.
pub struct TokenIssuer {
    key: EncodingKey,
    ttl: Duration,
}

impl TokenIssuer {
    pub fn new(secret: impl AsRef<[u8]>) -> Self {
        Self {
            key: EncodingKey::from_secret(secret.as_ref()),
            ttl: Duration::from_secs(3600),
        }
    }

    pub fn from_config(config: &AuthConfig) -> Result<Self, ConfigError> {
        if config.jwt_secret.is_empty() {
            return Err(ConfigError::MissingSecret);
        }
        Ok(Self::new(config.jwt_secret.as_bytes()).ttl(Duration::from_secs(config.token_ttl_secs)))
    }

    #[must_use]
    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Issue a token for `subject` carrying `scopes`, valid for the issuer's
    /// TTL from now.
    pub fn issue(&self, subject: &str, scopes: &[&str]) -> Result<String, jsonwebtoken::errors::Error> {
        let now = jsonwebtoken::get_current_timestamp();
        let claims = Claims {
            sub: subject.to_string(),
            exp: now + self.ttl.as_secs(),
            iat: Some(now),
            scope: scopes.join(" "),
            extra: Map::new(),
        };
        self.issue_claims(&claims)
    }

    pub fn issue_claims(&self, claims: &Claims) -> Result<String, jsonwebtoken::errors::Error> {
        jsonwebtoken::encode(&Header::new(Algorithm::HS256), claims, &self.key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::Method;

    const SECRET: &str = "unit-test-secret";

    fn bearer(token: &str) -> RequestContext {
        RequestContext::new(Method::GET, "/me").with_header("Authorization", format!("Bearer {token}"))
    }

    #[test]
    fn test_issue_then_verify() {
        let token = TokenIssuer::new(SECRET).issue("alice", &["read:users"]).unwrap();
        let id = BearerJwtGate::new(SECRET).verify(&token).unwrap();
        assert_eq!(id.subject, "alice");
        assert_eq!(id.scopes, vec!["read:users"]);
        assert_eq!(id.source, CredentialSource::BearerToken);
    }

    #[test]
    fn test_wrong_secret_is_invalid() {
        let token = TokenIssuer::new("other").issue("alice", &[]).unwrap();
        assert_eq!(
            BearerJwtGate::new(SECRET).verify(&token),
            Err(AuthFailure::Invalid)
        );
        assert_eq!(
            BearerJwtGate::new(SECRET).verify("not.a.jwt"),
            Err(AuthFailure::Invalid)
        );
    }

    #[test]
    fn test_expired_token() {
        let now = jsonwebtoken::get_current_timestamp();
        let claims = Claims {
            sub: "alice".into(),
            exp: now - 600,
            iat: Some(now - 1200),
            scope: String::new(),
            extra: Map::new(),
        };
        let token = TokenIssuer::new(SECRET).issue_claims(&claims).unwrap();
        let gate = BearerJwtGate::new(SECRET).leeway(0);
        assert_eq!(gate.verify(&token), Err(AuthFailure::Expired));
        // Inside the leeway the token is still accepted.
        assert!(BearerJwtGate::new(SECRET).leeway(900).verify(&token).is_ok());
    }

    #[test]
    fn test_required_scopes() {
        let token = TokenIssuer::new(SECRET).issue("bob", &["read:users"]).unwrap();
        let gate = BearerJwtGate::new(SECRET).require_scopes(&["read:users", "write:users"]);
        assert_eq!(gate.verify(&token), Err(AuthFailure::InsufficientScope));
    }

    #[test]
    fn test_token_extraction() {
        let gate = BearerJwtGate::new(SECRET).cookie_name("auth_token");
        let ctx = bearer("abc");
        assert_eq!(gate.extract_token(&ctx), Some("abc"));

        let ctx = RequestContext::new(Method::GET, "/").with_header("authorization", "bearer  xyz ");
        assert_eq!(gate.extract_token(&ctx), Some("xyz"));

        let ctx = RequestContext::new(Method::GET, "/").with_header("Authorization", "Basic dXNlcg==");
        assert_eq!(gate.extract_token(&ctx), None);

        let ctx = RequestContext::new(Method::GET, "/")
            .with_header("Cookie", "auth_token=from-cookie")
            .with_header("Authorization", "Bearer from-header");
        assert_eq!(gate.extract_token(&ctx), Some("from-cookie"));
    }

    #[tokio::test]
    async fn test_gate_binds_identity() {
        let token = TokenIssuer::new(SECRET).issue("carol", &[]).unwrap();
        let mut ctx = bearer(&token);
        let flow = BearerJwtGate::new(SECRET).before(&mut ctx).await.unwrap();
        assert!(matches!(flow, Flow::Continue));
        assert_eq!(ctx.identity().map(|i| i.subject.as_str()), Some("carol"));
    }

    #[tokio::test]
    async fn test_gate_denies_missing() {
        let mut ctx = RequestContext::new(Method::GET, "/me");
        let flow = BearerJwtGate::new(SECRET).before(&mut ctx).await.unwrap();
        match flow {
            Flow::Respond(res) => {
                assert_eq!(res.status, 401);
                assert_eq!(res.get_header("www-authenticate"), Some("Bearer"));
            }
            other => panic!("expected denial, got {other:?}"),
        }
        assert!(ctx.identity().is_none());
    }

    #[test]
    fn test_from_config_requires_secret() {
        let config = AuthConfig::default();
        assert!(matches!(
            BearerJwtGate::from_config(&config),
            Err(ConfigError::MissingSecret)
        ));
    }
}
