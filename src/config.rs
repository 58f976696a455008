//! # Configuration Module
//!
//! Pipeline and authentication settings, loaded from YAML and overridden by
//! environment variables.
//!
//! ## Environment Variables
//!
//! | Variable | Field |
//! |---|---|
//! | `BRRTC_REQUEST_TIMEOUT_MS` | `request_timeout_ms` (`0` disables the deadline) |
//! | `BRRTC_JWT_SECRET` | `auth.jwt_secret` |
//! | `BRRTC_JWT_LEEWAY_SECS` | `auth.leeway_secs` |
//! | `BRRTC_TOKEN_COOKIE` | `auth.token_cookie` |
//! | `BRRTC_SESSION_COOKIE` | `auth.session_cookie` |
//! | `BRRTC_SESSION_TTL_SECS` | `auth.session_ttl_secs` |
//!
//! ## Example
//!
//! ```yaml
//! request_timeout_ms: 5000
//! auth:
//!   jwt_secret: change-me
//!   leeway_secs: 30
//!   session_cookie: sid
//! ```

use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("environment variable {name}={value:?} is not valid: {reason}")]
    InvalidEnv {
        name: &'static str,
        value: String,
        reason: String,
    },

    #[error("auth.jwt_secret is empty; set it in the config file or BRRTC_JWT_SECRET")]
    MissingSecret,
}

fn default_leeway_secs() -> u64 {
    60
}

fn default_token_ttl_secs() -> u64 {
    3600
}

fn default_session_cookie() -> String {
    "sid".to_string()
}

fn default_session_ttl_secs() -> u64 {
    3600
}

/// Settings for the authentication gates and the token issuer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AuthConfig {
    /// HS256 shared secret. Empty means bearer auth is not configured.
    #[serde(default)]
    pub jwt_secret: String,
    #[serde(default = "default_leeway_secs")]
    pub leeway_secs: u64,
    /// Cookie checked for a bearer token before the `Authorization` header.
    #[serde(default)]
    pub token_cookie: Option<String>,
    #[serde(default = "default_token_ttl_secs")]
    pub token_ttl_secs: u64,
    #[serde(default = "default_session_cookie")]
    pub session_cookie: String,
    #[serde(default = "default_session_ttl_secs")]
    pub session_ttl_secs: u64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: String::new(),
            leeway_secs: default_leeway_secs(),
            token_cookie: None,
            token_ttl_secs: default_token_ttl_secs(),
            session_cookie: default_session_cookie(),
            session_ttl_secs: default_session_ttl_secs(),
        }
    }
}

impl AuthConfig {
    #[must_use]
    pub fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.session_ttl_secs)
    }
}

/// Top-level pipeline settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PipelineConfig {
    /// Per-request deadline for middleware and endpoint, in milliseconds.
    #[serde(default)]
    pub request_timeout_ms: Option<u64>,
    #[serde(default)]
    pub auth: AuthConfig,
}

impl PipelineConfig {
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml_str(&text)
    }

    /// Defaults overridden by the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_env_overrides()?;
        Ok(config)
    }

    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides_from(|name| env::var(name).ok())
    }

    /// Apply `BRRTC_*` overrides read through `lookup`.
    pub fn apply_overrides_from<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("BRRTC_REQUEST_TIMEOUT_MS") {
            let ms = parse_u64("BRRTC_REQUEST_TIMEOUT_MS", v)?;
            self.request_timeout_ms = (ms > 0).then_some(ms);
        }
        if let Some(v) = lookup("BRRTC_JWT_SECRET") {
            self.auth.jwt_secret = v;
        }
        if let Some(v) = lookup("BRRTC_JWT_LEEWAY_SECS") {
            self.auth.leeway_secs = parse_u64("BRRTC_JWT_LEEWAY_SECS", v)?;
        }
        if let Some(v) = lookup("BRRTC_TOKEN_COOKIE") {
            self.auth.token_cookie = (!v.is_empty()).then_some(v);
        }
        if let Some(v) = lookup("BRRTC_SESSION_COOKIE") {
            if v.is_empty() {
                return Err(ConfigError::InvalidEnv {
                    name: "BRRTC_SESSION_COOKIE",
                    value: v,
                    reason: "cookie name must not be empty".to_string(),
                });
            }
            self.auth.session_cookie = v;
        }
        if let Some(v) = lookup("BRRTC_SESSION_TTL_SECS") {
            self.auth.session_ttl_secs = parse_u64("BRRTC_SESSION_TTL_SECS", v)?;
        }
        Ok(())
    }

    #[must_use]
    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_ms
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
    }
}

fn parse_u64(name: &'static str, value: String) -> Result<u64, ConfigError> {
    value
        .trim()
        .parse::<u64>()
        .map_err(|e| ConfigError::InvalidEnv {
            name,
            reason: e.to_string(),
            value,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_defaults() {
        let c = PipelineConfig::default();
        assert_eq!(c.request_timeout(), None);
        assert_eq!(c.auth.session_cookie, "sid");
        assert_eq!(c.auth.leeway_secs, 60);
        assert!(c.auth.jwt_secret.is_empty());
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let c = PipelineConfig::from_yaml_str("auth:\n  jwt_secret: s3cret\n").unwrap();
        assert_eq!(c.auth.jwt_secret, "s3cret");
        assert_eq!(c.auth.session_ttl_secs, 3600);
    }

    #[test]
    fn test_unknown_field_rejected() {
        assert!(matches!(
            PipelineConfig::from_yaml_str("request_timeout: 5\n"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_overrides() {
        let mut c = PipelineConfig::default();
        c.apply_overrides_from(lookup(&[
            ("BRRTC_REQUEST_TIMEOUT_MS", "250"),
            ("BRRTC_JWT_SECRET", "from-env"),
            ("BRRTC_SESSION_COOKIE", "session"),
        ]))
        .unwrap();
        assert_eq!(c.request_timeout(), Some(Duration::from_millis(250)));
        assert_eq!(c.auth.jwt_secret, "from-env");
        assert_eq!(c.auth.session_cookie, "session");

        c.apply_overrides_from(lookup(&[("BRRTC_REQUEST_TIMEOUT_MS", "0")]))
            .unwrap();
        assert_eq!(c.request_timeout(), None);
    }

    #[test]
    fn test_invalid_override() {
        let mut c = PipelineConfig::default();
        let err = c
            .apply_overrides_from(lookup(&[("BRRTC_JWT_LEEWAY_SECS", "soon")]))
            .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidEnv { name: "BRRTC_JWT_LEEWAY_SECS", .. }
        ));
    }
}
