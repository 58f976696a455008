use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::context::RequestContext;
use crate::error::{ErrorBody, ErrorKind, Failure};
use crate::handler::{Flow, Middleware};
use crate::response::Response;

/// Admissions between sweeps of elapsed windows.
const DEFAULT_SWEEP_EVERY: u64 = 1024;

static NEXT_LIMITER_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy)]
struct Window {
    started: Instant,
    count: u32,
}

#[derive(Debug, Clone, Copy)]
struct Quota {
    limit: u32,
    remaining: u32,
    reset_in: Duration,
}

/// Quota snapshots left in the request attributes for `after`, one per
/// limiter on the route.
#[derive(Debug, Clone, Default)]
struct Quotas(Vec<(u64, Quota)>);

/// Fixed-window request limiter keyed by caller.
///
/// The caller key is the subject of an authenticated identity, else the
/// first `x-forwarded-for` entry when [`trust_forwarded_for`] is on, else the
/// peer IP reported by the transport, else `anonymous`. Put the limiter after
/// an auth gate to key by subject. Over-limit requests get 429 with
/// `retry-after`; admitted ones carry `x-ratelimit-limit`,
/// `x-ratelimit-remaining` and `x-ratelimit-reset`. With several limiters on
/// one route the headers describe the most restrictive one.
///
/// [`trust_forwarded_for`]: Self::trust_forwarded_for
#[derive(Debug)]
pub struct RateLimitMiddleware {
    id: u64,
    limit: u32,
    window: Duration,
    trust_forwarded_for: bool,
    sweep_every: u64,
    admissions: AtomicU64,
    windows: DashMap<String, Window>,
}

impl RateLimitMiddleware {
    #[must_use]
    pub fn new(limit: u32, window: Duration) -> Self {
        Self {
            id: NEXT_LIMITER_ID.fetch_add(1, Ordering::Relaxed),
            limit,
            window,
            trust_forwarded_for: false,
            sweep_every: DEFAULT_SWEEP_EVERY,
            admissions: AtomicU64::new(0),
            windows: DashMap::new(),
        }
    }

    #[must_use]
    pub fn per_minute(limit: u32) -> Self {
        Self::new(limit, Duration::from_secs(60))
    }

    /// Key anonymous callers by `x-forwarded-for`. Only enable behind a
    /// proxy that overwrites the header.
    #[must_use]
    pub fn trust_forwarded_for(mut self, trust: bool) -> Self {
        self.trust_forwarded_for = trust;
        self
    }

    /// Sweep elapsed windows once every `admissions` requests.
    #[must_use]
    pub fn sweep_every(mut self, admissions: u64) -> Self {
        self.sweep_every = admissions.max(1);
        self
    }

    fn caller_key(&self, ctx: &RequestContext) -> String {
        if let Some(identity) = ctx.identity() {
            return format!("sub:{}", identity.subject);
        }
        if self.trust_forwarded_for {
            if let Some(ip) = ctx
                .get_header("x-forwarded-for")
                .and_then(|v| v.split(',').next())
                .map(str::trim)
                .filter(|ip| !ip.is_empty())
            {
                return format!("ip:{ip}");
            }
        }
        match ctx.peer_addr {
            Some(addr) => format!("ip:{}", addr.ip()),
            None => "anonymous".to_string(),
        }
    }

    /// Count one request for `key`. `Err` carries the wait until reset.
    fn admit(&self, key: String, now: Instant) -> Result<Quota, Duration> {
        let seen = self.admissions.fetch_add(1, Ordering::Relaxed) + 1;
        if seen % self.sweep_every == 0 {
            self.purge_expired_at(now);
        }

        let mut entry = self.windows.entry(key).or_insert(Window {
            started: now,
            count: 0,
        });
        let elapsed = now.saturating_duration_since(entry.started);
        if elapsed >= self.window {
            *entry = Window {
                started: now,
                count: 0,
            };
        }
        let reset_in = self
            .window
            .saturating_sub(now.saturating_duration_since(entry.started));
        if entry.count >= self.limit {
            return Err(reset_in);
        }
        entry.count += 1;
        Ok(Quota {
            limit: self.limit,
            remaining: self.limit - entry.count,
            reset_in,
        })
    }

    /// Drop windows that have fully elapsed.
    pub fn purge_expired(&self) {
        self.purge_expired_at(Instant::now());
    }

    fn purge_expired_at(&self, now: Instant) {
        let before = self.windows.len();
        self.windows
            .retain(|_, w| now.saturating_duration_since(w.started) < self.window);
        debug!(
            limiter_id = self.id,
            purged = before.saturating_sub(self.windows.len()),
            tracked = self.windows.len(),
            "Rate limit windows swept"
        );
    }

    #[must_use]
    pub fn tracked_callers(&self) -> usize {
        self.windows.len()
    }
}

/// Write `quota` unless a stricter one is already on the response.
fn apply_quota_headers(res: &mut Response, quota: &Quota) {
    let stricter_present = res
        .get_header("x-ratelimit-remaining")
        .and_then(|v| v.parse::<u32>().ok())
        .is_some_and(|current| current < quota.remaining);
    if stricter_present {
        return;
    }
    res.set_header("x-ratelimit-limit", quota.limit.to_string());
    res.set_header("x-ratelimit-remaining", quota.remaining.to_string());
    res.set_header("x-ratelimit-reset", quota.reset_in.as_secs().to_string());
}

#[async_trait]
impl Middleware for RateLimitMiddleware {
    fn name(&self) -> &str {
        "rate_limit"
    }

    async fn before(&self, ctx: &mut RequestContext) -> Result<Flow, Failure> {
        let key = self.caller_key(ctx);
        match self.admit(key.clone(), Instant::now()) {
            Ok(quota) => {
                match ctx.attribute_mut::<Quotas>() {
                    Some(quotas) => quotas.0.push((self.id, quota)),
                    None => {
                        ctx.insert_attribute(Quotas(vec![(self.id, quota)]));
                    }
                }
                Ok(Flow::Continue)
            }
            Err(reset_in) => {
                let retry_after = reset_in.as_secs().max(1);
                warn!(
                    request_id = %ctx.request_id,
                    caller = %key,
                    limit = self.limit,
                    retry_after,
                    "Rate limit exceeded"
                );
                let body = ErrorBody::new(429, ErrorKind::RateLimited, "Too Many Requests")
                    .with_request_id(ctx.request_id);
                let mut res = body
                    .into_response()
                    .with_header("retry-after", retry_after.to_string());
                apply_quota_headers(
                    &mut res,
                    &Quota {
                        limit: self.limit,
                        remaining: 0,
                        reset_in,
                    },
                );
                Ok(Flow::Respond(res))
            }
        }
    }

    async fn after(
        &self,
        ctx: &RequestContext,
        res: &mut Response,
        _elapsed: Duration,
    ) -> Result<(), Failure> {
        let own = ctx
            .attribute::<Quotas>()
            .and_then(|quotas| quotas.0.iter().find(|(id, _)| *id == self.id))
            .map(|(_, quota)| *quota);
        if let Some(quota) = own {
            apply_quota_headers(res, &quota);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::{CredentialSource, Identity};
    use http::Method;
    use std::net::SocketAddr;

    fn ctx_from(peer: &str) -> RequestContext {
        let addr: SocketAddr = format!("{peer}:40000").parse().unwrap();
        RequestContext::new(Method::GET, "/").with_peer_addr(addr)
    }

    #[tokio::test]
    async fn test_limit_enforced_per_caller() {
        let mw = RateLimitMiddleware::per_minute(2);
        for _ in 0..2 {
            let mut ctx = ctx_from("10.0.0.1");
            assert!(matches!(mw.before(&mut ctx).await.unwrap(), Flow::Continue));
        }
        let mut ctx = ctx_from("10.0.0.1");
        match mw.before(&mut ctx).await.unwrap() {
            Flow::Respond(res) => {
                assert_eq!(res.status, 429);
                assert_eq!(res.body.as_json().unwrap()["kind"], "rate_limited");
                assert!(res.get_header("retry-after").is_some());
                assert_eq!(res.get_header("x-ratelimit-remaining"), Some("0"));
            }
            other => panic!("expected 429, got {other:?}"),
        }

        let mut other = ctx_from("10.0.0.2");
        assert!(matches!(mw.before(&mut other).await.unwrap(), Flow::Continue));
        assert_eq!(mw.tracked_callers(), 2);
    }

    #[tokio::test]
    async fn test_rotating_forwarded_for_is_ignored_by_default() {
        let mw = RateLimitMiddleware::per_minute(2);
        let mut admitted = 0;
        for i in 0..20 {
            let mut ctx = ctx_from("198.51.100.7").with_header("X-Forwarded-For", format!("10.1.0.{i}"));
            if matches!(mw.before(&mut ctx).await.unwrap(), Flow::Continue) {
                admitted += 1;
            }
        }
        assert_eq!(admitted, 2);
        assert_eq!(mw.tracked_callers(), 1);
    }

    #[tokio::test]
    async fn test_trusted_forwarded_for_keys_by_client() {
        let mw = RateLimitMiddleware::per_minute(1).trust_forwarded_for(true);
        for client in ["10.0.0.1, 192.168.1.1", "10.0.0.2"] {
            let mut ctx = ctx_from("192.168.1.1").with_header("X-Forwarded-For", client);
            assert!(matches!(mw.before(&mut ctx).await.unwrap(), Flow::Continue));
        }
        assert_eq!(mw.caller_key(&ctx_from("192.168.1.1")), "ip:192.168.1.1");
    }

    #[test]
    fn test_identity_takes_priority() {
        let mw = RateLimitMiddleware::per_minute(1).trust_forwarded_for(true);
        let mut ctx = ctx_from("10.0.0.1").with_header("X-Forwarded-For", "10.9.9.9");
        ctx.insert_attribute(Identity {
            subject: "ada".into(),
            scopes: Vec::new(),
            claims: serde_json::Value::Null,
            source: CredentialSource::Session,
        });
        assert_eq!(mw.caller_key(&ctx), "sub:ada");
    }

    #[test]
    fn test_anonymous_key() {
        let mw = RateLimitMiddleware::per_minute(1);
        let ctx = RequestContext::new(Method::GET, "/").with_header("X-Forwarded-For", "10.0.0.1");
        assert_eq!(mw.caller_key(&ctx), "anonymous");
    }

    #[tokio::test]
    async fn test_quota_headers() {
        let mw = RateLimitMiddleware::per_minute(5);
        let mut ctx = ctx_from("10.0.0.9");
        mw.before(&mut ctx).await.unwrap();
        let mut res = Response::ok_text("ok");
        mw.after(&ctx, &mut res, Duration::ZERO).await.unwrap();
        assert_eq!(res.get_header("x-ratelimit-limit"), Some("5"));
        assert_eq!(res.get_header("x-ratelimit-remaining"), Some("4"));
    }

    #[tokio::test]
    async fn test_stacked_limiters_keep_their_own_quota() {
        let burst = RateLimitMiddleware::per_minute(2);
        let hourly = RateLimitMiddleware::new(100, Duration::from_secs(3600));
        let mut ctx = ctx_from("10.0.0.3");
        burst.before(&mut ctx).await.unwrap();
        hourly.before(&mut ctx).await.unwrap();

        // Hooks unwind in reverse: inner limiter first.
        let mut res = Response::ok_text("ok");
        hourly.after(&ctx, &mut res, Duration::ZERO).await.unwrap();
        assert_eq!(res.get_header("x-ratelimit-remaining"), Some("99"));
        burst.after(&ctx, &mut res, Duration::ZERO).await.unwrap();
        assert_eq!(res.get_header("x-ratelimit-limit"), Some("2"));
        assert_eq!(res.get_header("x-ratelimit-remaining"), Some("1"));
    }

    #[test]
    fn test_window_resets() {
        let mw = RateLimitMiddleware::new(1, Duration::from_secs(10));
        let start = Instant::now();
        assert!(mw.admit("k".into(), start).is_ok());
        let wait = mw.admit("k".into(), start + Duration::from_secs(4)).unwrap_err();
        assert_eq!(wait, Duration::from_secs(6));
        assert!(mw.admit("k".into(), start + Duration::from_secs(10)).is_ok());
    }

    #[test]
    fn test_admissions_sweep_elapsed_windows() {
        let mw = RateLimitMiddleware::new(1, Duration::from_secs(10)).sweep_every(2);
        let start = Instant::now();
        let later = start + Duration::from_secs(10);
        assert!(mw.admit("a".into(), start).is_ok());
        assert!(mw.admit("b".into(), start).is_ok());
        assert_eq!(mw.tracked_callers(), 2);

        assert!(mw.admit("c".into(), later).is_ok());
        assert_eq!(mw.tracked_callers(), 3);
        // Fourth admission sweeps `a` and `b`.
        assert!(mw.admit("d".into(), later).is_ok());
        assert_eq!(mw.tracked_callers(), 2);
    }

    #[test]
    fn test_purge_expired_keeps_live_windows() {
        let mw = RateLimitMiddleware::new(5, Duration::from_secs(60));
        let now = Instant::now();
        mw.admit("live".into(), now).unwrap();
        mw.purge_expired();
        assert_eq!(mw.tracked_callers(), 1);
    }
}
