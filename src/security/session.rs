use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tracing::debug;

use super::{deny, CredentialSource, Identity};
use crate::config::AuthConfig;
use crate::context::RequestContext;
use crate::error::{AuthFailure, Failure};
use crate::handler::{Flow, Middleware};

/// Server-side session state.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionRecord {
    pub subject: String,
    pub scopes: Vec<String>,
    pub data: Value,
    pub expires_at: SystemTime,
}

impl SessionRecord {
    #[must_use]
    pub fn new(subject: impl Into<String>, ttl: Duration) -> Self {
        Self {
            subject: subject.into(),
            scopes: Vec::new(),
            data: Value::Null,
            expires_at: SystemTime::now() + ttl,
        }
    }

    #[must_use]
    pub fn with_scopes(mut self, scopes: &[&str]) -> Self {
        self.scopes = scopes.iter().map(|s| (*s).to_string()).collect();
        self
    }

    #[must_use]
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = data;
        self
    }

    #[must_use]
    pub fn is_expired(&self, now: SystemTime) -> bool {
        now >= self.expires_at
    }
}

/// Lookup side of a session store.
///
/// Implementations own their own synchronization. An expired record may be
/// returned; the gate rejects it as expired.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn load(&self, session_id: &str) -> anyhow::Result<Option<SessionRecord>>;
}

/// Process-local session store backed by a concurrent map.
///
/// Expired records are purged on lookup: the lookup that finds one returns it
/// once, later lookups see nothing. Creating or inserting a session also
/// sweeps every expired record, so abandoned sessions do not pile up.
#[derive(Debug, Default)]
pub struct InMemorySessionStore {
    sessions: DashMap<String, SessionRecord>,
}

impl InMemorySessionStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a record under a fresh ULID session id and return the id.
    pub fn create(&self, record: SessionRecord) -> String {
        let id = ulid::Ulid::new().to_string();
        self.insert(id.clone(), record);
        id
    }

    pub fn insert(&self, session_id: impl Into<String>, record: SessionRecord) {
        self.purge_expired();
        self.sessions.insert(session_id.into(), record);
    }

    /// Drop every expired record. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = SystemTime::now();
        let before = self.sessions.len();
        self.sessions.retain(|_, record| !record.is_expired(now));
        let purged = before.saturating_sub(self.sessions.len());
        if purged > 0 {
            debug!(purged, remaining = self.sessions.len(), "Expired sessions purged");
        }
        purged
    }

    pub fn remove(&self, session_id: &str) -> Option<SessionRecord> {
        self.sessions.remove(session_id).map(|(_, r)| r)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn load(&self, session_id: &str) -> anyhow::Result<Option<SessionRecord>> {
        let record = match self.sessions.get(session_id) {
            Some(entry) => entry.value().clone(),
            None => return Ok(None),
        };
        if record.is_expired(SystemTime::now()) {
            self.sessions.remove(session_id);
        }
        Ok(Some(record))
    }
}

/// Gate that resolves a session cookie to a live session record.
pub struct SessionGate {
    store: Arc<dyn SessionStore>,
    cookie_name: String,
    required_scopes: Vec<String>,
}

impl SessionGate {
    pub fn new(store: Arc<dyn SessionStore>) -> Self {
        Self {
            store,
            cookie_name: "sid".to_string(),
            required_scopes: Vec::new(),
        }
    }

    pub fn from_config(store: Arc<dyn SessionStore>, config: &AuthConfig) -> Self {
        Self::new(store).cookie_name(config.session_cookie.clone())
    }

    #[must_use]
    pub fn cookie_name(mut self, name: impl Into<String>) -> Self {
        self.cookie_name = name.into();
        self
    }

    #[must_use]
    pub fn require_scopes(mut self, scopes: &[&str]) -> Self {
        self.required_scopes = scopes.iter().map(|s| (*s).to_string()).collect();
        self
    }

    async fn resolve(&self, session_id: &str) -> Result<Result<Identity, AuthFailure>, Failure> {
        let record = self.store.load(session_id).await.map_err(Failure::Unhandled)?;
        let Some(record) = record else {
            return Ok(Err(AuthFailure::Invalid));
        };
        if record.is_expired(SystemTime::now()) {
            return Ok(Err(AuthFailure::Expired));
        }
        let identity = Identity {
            subject: record.subject,
            scopes: record.scopes,
            claims: record.data,
            source: CredentialSource::Session,
        };
        if identity.missing_scope(&self.required_scopes).is_some() {
            return Ok(Err(AuthFailure::InsufficientScope));
        }
        Ok(Ok(identity))
    }
}

#[async_trait]
impl Middleware for SessionGate {
    fn name(&self) -> &str {
        "session"
    }

    async fn before(&self, ctx: &mut RequestContext) -> Result<Flow, Failure> {
        let Some(session_id) = ctx.get_cookie(&self.cookie_name).filter(|s| !s.is_empty()) else {
            return Ok(deny(self.name(), AuthFailure::Missing, ctx));
        };
        let session_id = session_id.to_string();
        match self.resolve(&session_id).await? {
            Ok(identity) => {
                debug!(
                    request_id = %ctx.request_id,
                    subject = %identity.subject,
                    "Session validation succeeded"
                );
                ctx.insert_attribute(identity);
                Ok(Flow::Continue)
            }
            Err(failure) => Ok(deny(self.name(), failure, ctx)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::Method;
    use serde_json::json;

    fn with_sid(id: &str) -> RequestContext {
        RequestContext::new(Method::GET, "/session/me").with_header("Cookie", format!("sid={id}"))
    }

    #[tokio::test]
    async fn test_expired_record_is_returned_once_then_purged() {
        let store = InMemorySessionStore::new();
        store.insert("old", SessionRecord::new("alice", Duration::ZERO));
        let first = store.load("old").await.unwrap();
        assert!(first.is_some_and(|r| r.is_expired(SystemTime::now())));
        assert!(store.load("old").await.unwrap().is_none());
        assert!(store.is_empty());
    }

    #[test]
    fn test_create_sweeps_abandoned_sessions() {
        let store = InMemorySessionStore::new();
        for subject in ["a", "b", "c"] {
            store.insert(subject, SessionRecord::new(subject, Duration::ZERO));
        }
        // Each insert swept the previous expired one.
        assert_eq!(store.len(), 1);

        let live = store.create(SessionRecord::new("dave", Duration::from_secs(60)));
        assert_eq!(store.len(), 1);
        assert!(store.remove(&live).is_some());

        store.insert("x", SessionRecord::new("x", Duration::ZERO));
        assert_eq!(store.purge_expired(), 1);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_live_session_binds_identity() {
        let store = Arc::new(InMemorySessionStore::new());
        let id = store.create(
            SessionRecord::new("dave", Duration::from_secs(60))
                .with_scopes(&["profile"])
                .with_data(json!({"theme": "dark"})),
        );
        let gate = SessionGate::new(Arc::clone(&store) as Arc<dyn SessionStore>);
        let mut ctx = with_sid(&id);
        assert!(matches!(gate.before(&mut ctx).await.unwrap(), Flow::Continue));
        let identity = ctx.identity().unwrap();
        assert_eq!(identity.subject, "dave");
        assert_eq!(identity.source, CredentialSource::Session);
        assert_eq!(identity.claims, json!({"theme": "dark"}));
    }

    #[tokio::test]
    async fn test_unknown_and_expired_sessions_are_denied() {
        let store = Arc::new(InMemorySessionStore::new());
        store.insert("stale", SessionRecord::new("erin", Duration::ZERO));
        let gate = SessionGate::new(store);

        for (sid, reason) in [("missing", "invalid_credential"), ("stale", "expired_credential")] {
            let mut ctx = with_sid(sid);
            match gate.before(&mut ctx).await.unwrap() {
                Flow::Respond(res) => {
                    assert_eq!(res.status, 401);
                    assert_eq!(res.body.as_json().unwrap()["reason"], reason);
                }
                other => panic!("expected denial for {sid}, got {other:?}"),
            }
        }
    }

    struct BrokenStore;

    #[async_trait]
    impl SessionStore for BrokenStore {
        async fn load(&self, _session_id: &str) -> anyhow::Result<Option<SessionRecord>> {
            anyhow::bail!("session backend unavailable")
        }
    }

    #[tokio::test]
    async fn test_store_error_is_a_failure() {
        let gate = SessionGate::new(Arc::new(BrokenStore));
        let mut ctx = with_sid("any");
        let err = gate.before(&mut ctx).await.unwrap_err();
        assert_eq!(err.status(), 500);
    }
}
