use http::Method;
use regex::Regex;

use super::{CorsConfigError, CorsMiddleware, OriginValidation};

/// Fluent builder for [`CorsMiddleware`].
///
/// ```rust,ignore
/// use brrtchain::middleware::CorsMiddlewareBuilder;
/// use http::Method;
///
/// let cors = CorsMiddlewareBuilder::new()
///     .allowed_origins(&["https://example.com"])
///     .allowed_methods(&[Method::GET, Method::POST])
///     .allow_credentials(true)
///     .max_age(3600)
///     .build()?;
/// ```
#[derive(Debug, Clone)]
pub struct CorsMiddlewareBuilder {
    allowed_origins: Vec<String>,
    origin_patterns: Vec<String>,
    allowed_headers: Vec<String>,
    allowed_methods: Vec<Method>,
    allow_credentials: bool,
    expose_headers: Vec<String>,
    max_age: Option<u32>,
}

impl Default for CorsMiddlewareBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl CorsMiddlewareBuilder {
    /// Secure defaults: no origins, `Content-Type` and `Authorization`
    /// headers, the common methods, no credentials.
    #[must_use]
    pub fn new() -> Self {
        Self {
            allowed_origins: Vec::new(),
            origin_patterns: Vec::new(),
            allowed_headers: vec!["Content-Type".into(), "Authorization".into()],
            allowed_methods: vec![
                Method::GET,
                Method::POST,
                Method::PUT,
                Method::DELETE,
                Method::OPTIONS,
            ],
            allow_credentials: false,
            expose_headers: Vec::new(),
            max_age: None,
        }
    }

    /// Exact origins, or `&["*"]` for any origin.
    #[must_use]
    pub fn allowed_origins(mut self, origins: &[&str]) -> Self {
        self.allowed_origins = origins.iter().map(|s| (*s).to_string()).collect();
        self
    }

    /// Regex patterns matched against the full `Origin` value, e.g.
    /// `^https://.*\.example\.com$`. Checked alongside the exact origins.
    #[must_use]
    pub fn allowed_origin_patterns(mut self, patterns: &[&str]) -> Self {
        self.origin_patterns = patterns.iter().map(|s| (*s).to_string()).collect();
        self
    }

    #[must_use]
    pub fn allowed_methods(mut self, methods: &[Method]) -> Self {
        self.allowed_methods = methods.to_vec();
        self
    }

    /// Allowed request headers, `&["*"]` for any.
    #[must_use]
    pub fn allowed_headers(mut self, headers: &[&str]) -> Self {
        self.allowed_headers = headers.iter().map(|s| (*s).to_string()).collect();
        self
    }

    #[must_use]
    pub fn allow_credentials(mut self, allow: bool) -> Self {
        self.allow_credentials = allow;
        self
    }

    #[must_use]
    pub fn expose_headers(mut self, headers: &[&str]) -> Self {
        self.expose_headers = headers.iter().map(|s| (*s).to_string()).collect();
        self
    }

    /// Preflight cache duration in seconds.
    #[must_use]
    pub fn max_age(mut self, seconds: u32) -> Self {
        self.max_age = Some(seconds);
        self
    }

    pub fn build(self) -> Result<CorsMiddleware, CorsConfigError> {
        let wildcard = self.allowed_origins.iter().any(|o| o == "*");

        let origin_validation = if wildcard {
            if self.allow_credentials {
                return Err(CorsConfigError::WildcardWithCredentials);
            }
            OriginValidation::Wildcard
        } else {
            for origin in &self.allowed_origins {
                validate_origin_format(origin)?;
            }
            let patterns = self
                .origin_patterns
                .iter()
                .map(|p| {
                    Regex::new(p).map_err(|e| CorsConfigError::InvalidPattern {
                        pattern: p.clone(),
                        reason: e.to_string(),
                    })
                })
                .collect::<Result<Vec<_>, _>>()?;
            if self.allow_credentials && self.allowed_origins.is_empty() && patterns.is_empty() {
                return Err(CorsConfigError::EmptyOriginsWithCredentials);
            }
            OriginValidation::AllowList {
                exact: self.allowed_origins,
                patterns,
            }
        };

        Ok(CorsMiddleware {
            origin_validation,
            allowed_headers: self.allowed_headers,
            allowed_methods: self.allowed_methods,
            allow_credentials: self.allow_credentials,
            expose_headers: self.expose_headers,
            max_age: self.max_age,
        })
    }
}

/// An origin is `scheme://host[:port]` with no path, query or fragment.
fn validate_origin_format(origin: &str) -> Result<(), CorsConfigError> {
    let invalid = || CorsConfigError::InvalidOriginFormat {
        origin: origin.to_string(),
    };
    let parsed = url::Url::parse(origin).map_err(|_| invalid())?;
    let bare = matches!(parsed.scheme(), "http" | "https")
        && parsed.host_str().is_some()
        && parsed.path() == "/"
        && parsed.query().is_none()
        && parsed.fragment().is_none()
        && !origin.ends_with('/');
    if bare {
        Ok(())
    } else {
        Err(invalid())
    }
}
