use async_trait::async_trait;
use std::time::Duration;

use crate::context::RequestContext;
use crate::error::Failure;
use crate::handler::Middleware;
use crate::response::Response;

/// Adds defensive response headers. Values set by the endpoint win.
#[derive(Debug, Clone)]
pub struct SecurityHeaders {
    frame_options: String,
    referrer_policy: String,
    hsts_max_age: Option<u64>,
}

impl Default for SecurityHeaders {
    fn default() -> Self {
        Self {
            frame_options: "DENY".to_string(),
            referrer_policy: "no-referrer".to_string(),
            hsts_max_age: None,
        }
    }
}

impl SecurityHeaders {
    #[must_use]
    pub fn frame_options(mut self, value: impl Into<String>) -> Self {
        self.frame_options = value.into();
        self
    }

    #[must_use]
    pub fn referrer_policy(mut self, value: impl Into<String>) -> Self {
        self.referrer_policy = value.into();
        self
    }

    /// Also send `strict-transport-security` with this max-age in seconds.
    #[must_use]
    pub fn hsts(mut self, max_age_secs: u64) -> Self {
        self.hsts_max_age = Some(max_age_secs);
        self
    }
}

#[async_trait]
impl Middleware for SecurityHeaders {
    fn name(&self) -> &str {
        "security_headers"
    }

    async fn after(
        &self,
        _ctx: &RequestContext,
        res: &mut Response,
        _elapsed: Duration,
    ) -> Result<(), Failure> {
        res.set_header_if_absent("x-content-type-options", "nosniff");
        res.set_header_if_absent("x-frame-options", self.frame_options.clone());
        res.set_header_if_absent("referrer-policy", self.referrer_policy.clone());
        if let Some(max_age) = self.hsts_max_age {
            res.set_header_if_absent(
                "strict-transport-security",
                format!("max-age={max_age}; includeSubDomains"),
            );
        }
        Ok(())
    }
}
