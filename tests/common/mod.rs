#![allow(dead_code)]

use async_trait::async_trait;
use brrtchain::{Endpoint, Failure, Flow, Middleware, RequestContext, Response};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Install a test-writer subscriber once so failing tests show pipeline logs.
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter("brrtchain=debug")
        .try_init()
        .ok();
}

/// Ordered record of handler events, shared across one test.
#[derive(Clone, Default)]
pub struct Journal(Arc<Mutex<Vec<String>>>);

impl Journal {
    pub fn push(&self, event: impl Into<String>) {
        self.0.lock().unwrap().push(event.into());
    }

    pub fn events(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }
}

/// What a [`Step`] does in `before`.
#[derive(Clone, Debug)]
pub enum Action {
    Continue,
    Respond(u16),
    Halt,
    Fail,
    Panic,
    Sleep(Duration),
    /// Store a marker attribute for later handlers
    Mark(&'static str),
}

/// Marker attribute written by [`Action::Mark`].
#[derive(Clone, Debug, PartialEq)]
pub struct Marker(pub &'static str);

/// Middleware that journals `before:<label>` and `after:<label>`.
pub struct Step {
    pub label: &'static str,
    pub action: Action,
    pub journal: Journal,
}

impl Step {
    pub fn new(label: &'static str, action: Action, journal: &Journal) -> Self {
        Self {
            label,
            action,
            journal: journal.clone(),
        }
    }
}

#[async_trait]
impl Middleware for Step {
    fn name(&self) -> &str {
        self.label
    }

    async fn before(&self, ctx: &mut RequestContext) -> Result<Flow, Failure> {
        self.journal.push(format!("before:{}", self.label));
        match &self.action {
            Action::Continue => Ok(Flow::Continue),
            Action::Respond(status) => Ok(Flow::Respond(Response::text(*status, self.label))),
            Action::Halt => Ok(Flow::Halt),
            Action::Fail => Err(Failure::unhandled(anyhow::anyhow!(
                "secret dsn postgres://admin:hunter2@db"
            ))),
            Action::Panic => panic!("step {} exploded", self.label),
            Action::Sleep(d) => {
                tokio::time::sleep(*d).await;
                Ok(Flow::Continue)
            }
            Action::Mark(value) => {
                ctx.insert_attribute(Marker(*value));
                Ok(Flow::Continue)
            }
        }
    }

    async fn after(
        &self,
        _ctx: &RequestContext,
        res: &mut Response,
        _elapsed: Duration,
    ) -> Result<(), Failure> {
        self.journal.push(format!("after:{}", self.label));
        res.set_header(&format!("x-after-{}", self.label), "1");
        Ok(())
    }
}

/// Terminal handler that journals `endpoint:<label>` and echoes the marker.
pub struct Terminal {
    pub label: &'static str,
    pub journal: Journal,
    pub calls: Arc<AtomicUsize>,
}

impl Terminal {
    pub fn new(label: &'static str, journal: &Journal) -> Self {
        Self {
            label,
            journal: journal.clone(),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }
}

#[async_trait]
impl Endpoint for Terminal {
    fn name(&self) -> &str {
        self.label
    }

    async fn call(&self, ctx: &mut RequestContext) -> Result<Response, Failure> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.journal.push(format!("endpoint:{}", self.label));
        let marker = ctx.attribute::<Marker>().map_or("none", |m| m.0);
        Ok(Response::ok_text(format!("{}:{marker}", self.label)))
    }
}

/// Sets its flag when dropped; used to prove resources are released.
pub struct ReleaseGuard(pub Arc<AtomicBool>);

impl Drop for ReleaseGuard {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}
