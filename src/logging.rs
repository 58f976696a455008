//! Structured logging setup.
//!
//! Every component logs through `tracing` macros with structured fields
//! (`request_id`, `path`, `status`, ...). This module installs the subscriber:
//!
//! - `EnvFilter` from `RUST_LOG`, else the configured level, plus any extra
//!   target directives
//! - a [`SamplingLayer`] that thins out low-severity events
//! - a JSON or pretty `fmt` layer, optionally behind a `tracing-appender`
//!   non-blocking writer
//!
//! ## Environment Variables
//!
//! `BRRTC_LOG_LEVEL`, `BRRTC_LOG_FORMAT` (`json`|`pretty`),
//! `BRRTC_LOG_SAMPLING_MODE` (`all`|`error-only`|`sampled`),
//! `BRRTC_LOG_SAMPLING_RATE`, `BRRTC_LOG_ASYNC`, `BRRTC_LOG_TARGET_FILTER`,
//! `BRRTC_LOG_INCLUDE_LOCATION`, `BRRTC_LOG_STDERR`.

use anyhow::{Context, Result};
use std::env;
use std::ffi::OsStr;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{Level, Metadata, Subscriber};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::layer::{Context as LayerContext, SubscriberExt};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Log format: JSON for production, pretty-print for development
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Pretty,
}

impl LogFormat {
    #[must_use]
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "pretty" => LogFormat::Pretty,
            _ => LogFormat::Json,
        }
    }
}

/// Which events reach the output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SamplingMode {
    All,
    /// WARN and ERROR only
    ErrorOnly,
    /// Every WARN/ERROR, a fraction of everything else
    Sampled,
}

impl SamplingMode {
    #[must_use]
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "error-only" | "error_only" => SamplingMode::ErrorOnly,
            "sampled" => SamplingMode::Sampled,
            _ => SamplingMode::All,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LogConfig {
    /// trace/debug/info/warn/error
    pub log_level: String,
    pub format: LogFormat,
    pub sampling_mode: SamplingMode,
    /// Fraction (0.0-1.0) of low-severity events kept in `Sampled` mode
    pub sampling_rate: f64,
    /// Write through a background worker thread
    pub async_logging: bool,
    /// Extra comma-separated `EnvFilter` directives
    pub target_filter: Option<String>,
    /// Include file:line in output
    pub include_location: bool,
    /// Write to stderr instead of stdout, keeping stdout for command output
    pub to_stderr: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            format: LogFormat::Json,
            sampling_mode: SamplingMode::All,
            sampling_rate: 1.0,
            async_logging: false,
            target_filter: None,
            include_location: false,
            to_stderr: false,
        }
    }
}

impl LogConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Build from `BRRTC_LOG_*` values read through `lookup`. Unparseable
    /// values fall back to defaults.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let flag = |name: &str, default: bool| {
            lookup(name)
                .and_then(|s| s.parse::<bool>().ok())
                .unwrap_or(default)
        };
        Self {
            log_level: lookup("BRRTC_LOG_LEVEL").unwrap_or(defaults.log_level),
            format: lookup("BRRTC_LOG_FORMAT")
                .map(|s| LogFormat::parse(&s))
                .unwrap_or(defaults.format),
            sampling_mode: lookup("BRRTC_LOG_SAMPLING_MODE")
                .map(|s| SamplingMode::parse(&s))
                .unwrap_or(defaults.sampling_mode),
            sampling_rate: lookup("BRRTC_LOG_SAMPLING_RATE")
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.sampling_rate),
            async_logging: flag("BRRTC_LOG_ASYNC", defaults.async_logging),
            target_filter: lookup("BRRTC_LOG_TARGET_FILTER").filter(|s| !s.is_empty()),
            include_location: flag("BRRTC_LOG_INCLUDE_LOCATION", defaults.include_location),
            to_stderr: flag("BRRTC_LOG_STDERR", defaults.to_stderr),
        }
    }

    /// Settings for the CLI: the structured setup from [`LogConfig::from_env`]
    /// when any `BRRTC_LOG_*` variable is present, else [`LogConfig::default_dev`].
    #[must_use]
    pub fn for_cli() -> Self {
        if structured_requested(env::vars_os().map(|(name, _)| name)) {
            Self::from_env()
        } else {
            Self::default_dev()
        }
    }

    /// Human-friendly settings for the CLI.
    #[must_use]
    pub fn default_dev() -> Self {
        Self {
            log_level: "warn".to_string(),
            format: LogFormat::Pretty,
            include_location: true,
            to_stderr: true,
            ..Self::default()
        }
    }
}

/// Whether any of `names` is a `BRRTC_LOG_*` variable. Names that are not
/// valid UTF-8 are skipped.
pub fn structured_requested<I>(names: I) -> bool
where
    I: IntoIterator,
    I::Item: AsRef<OsStr>,
{
    names.into_iter().any(|name| {
        name.as_ref()
            .to_str()
            .is_some_and(|name| name.starts_with("BRRTC_LOG_"))
    })
}

/// Layer that drops low-severity events according to a [`SamplingMode`].
pub struct SamplingLayer {
    mode: SamplingMode,
    sampling_rate: f64,
    counter: AtomicU64,
}

impl SamplingLayer {
    #[must_use]
    pub fn new(mode: SamplingMode, sampling_rate: f64) -> Self {
        Self {
            mode,
            sampling_rate: sampling_rate.clamp(0.0, 1.0),
            counter: AtomicU64::new(0),
        }
    }

    fn should_sample(&self, level: &Level) -> bool {
        let severe = matches!(*level, Level::WARN | Level::ERROR);
        match self.mode {
            SamplingMode::All => true,
            SamplingMode::ErrorOnly => severe,
            SamplingMode::Sampled if severe => true,
            SamplingMode::Sampled => {
                if self.sampling_rate <= 0.0 {
                    return false;
                }
                let interval = (1.0 / self.sampling_rate).round().max(1.0) as u64;
                self.counter.fetch_add(1, Ordering::Relaxed) % interval == 0
            }
        }
    }
}

impl<S> Layer<S> for SamplingLayer
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn enabled(&self, metadata: &Metadata<'_>, _ctx: LayerContext<'_, S>) -> bool {
        // Spans always pass so request context survives on sampled events.
        metadata.is_span() || self.should_sample(metadata.level())
    }
}

/// Install the global subscriber.
///
/// With `async_logging` the returned guard owns the background writer;
/// keep it alive until exit so buffered lines are flushed.
pub fn init_logging_with_config(config: &LogConfig) -> Result<Option<WorkerGuard>> {
    let mut env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.to_lowercase()));

    if let Some(target_filter) = &config.target_filter {
        for filter in target_filter.split(',').map(str::trim).filter(|f| !f.is_empty()) {
            match filter.parse() {
                Ok(directive) => env_filter = env_filter.add_directive(directive),
                Err(_) => eprintln!("Warning: Invalid log filter directive: {filter}"),
            }
        }
    }

    let (writer, guard) = match (config.async_logging, config.to_stderr) {
        (true, false) => {
            let (w, g) = tracing_appender::non_blocking(std::io::stdout());
            (BoxMakeWriter::new(w), Some(g))
        }
        (true, true) => {
            let (w, g) = tracing_appender::non_blocking(std::io::stderr());
            (BoxMakeWriter::new(w), Some(g))
        }
        (false, false) => (BoxMakeWriter::new(std::io::stdout), None),
        (false, true) => (BoxMakeWriter::new(std::io::stderr), None),
    };

    let fmt_layer = match config.format {
        LogFormat::Json => tracing_subscriber::fmt::layer()
            .json()
            .with_current_span(true)
            .with_target(true)
            .with_span_list(true)
            .with_file(config.include_location)
            .with_line_number(config.include_location)
            .with_writer(writer)
            .boxed(),
        LogFormat::Pretty => tracing_subscriber::fmt::layer()
            .pretty()
            .with_target(true)
            .with_file(config.include_location)
            .with_line_number(config.include_location)
            .with_writer(writer)
            .boxed(),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(SamplingLayer::new(config.sampling_mode, config.sampling_rate))
        .with(fmt_layer)
        .try_init()
        .context("Failed to initialize logging")?;

    Ok(guard)
}
