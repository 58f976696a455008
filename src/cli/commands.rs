use anyhow::Context;
use clap::{Parser, Subcommand};
use http::Method;
use std::path::PathBuf;
use tracing::warn;

use super::demo::build_demo;
use crate::config::PipelineConfig;
use crate::context::RequestContext;
use crate::ids::{RequestId, REQUEST_ID_HEADER};
use crate::security::SessionRecord;
use crate::transport::{into_http, parse_header_line, IncomingRequest};

/// Secret used when neither the config file nor `BRRTC_JWT_SECRET` sets one.
pub const DEV_JWT_SECRET: &str = "brrtchain-dev-secret-do-not-deploy";

/// Command-line interface for brrtchain
///
/// Drives the demo pipeline without a network listener.
#[derive(Debug, Parser)]
#[command(name = "brrtchain")]
#[command(version, about = "Request pipeline demo and tooling", long_about = None)]
pub struct Cli {
    /// YAML config file; `BRRTC_*` environment variables override it
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Print the demo routing table
    Routes,

    /// Run one request through the demo pipeline and print the response
    Replay {
        #[arg(short, long, default_value = "GET")]
        method: String,

        /// Path with optional query string, e.g. `/user/123?verbose=1`
        #[arg(short, long)]
        path: String,

        /// Request header as `Name: value`, repeatable
        #[arg(short = 'H', long = "header")]
        headers: Vec<String>,

        /// Request body; sent as JSON unless a content-type header is given
        #[arg(short, long)]
        body: Option<String>,

        /// Open a session for this subject and send its cookie
        #[arg(long)]
        session: Option<String>,

        /// Send the identical request this many times
        #[arg(long, default_value_t = 1)]
        repeat: u32,
    },

    /// Mint a bearer token with the configured secret
    Token {
        #[arg(long)]
        sub: String,

        /// Granted scope, repeatable
        #[arg(long = "scope")]
        scopes: Vec<String>,

        #[arg(long)]
        ttl_secs: Option<u64>,
    },
}

/// Load configuration for the CLI, falling back to [`DEV_JWT_SECRET`].
pub fn load_config(path: Option<&PathBuf>) -> anyhow::Result<PipelineConfig> {
    let mut config = match path {
        Some(path) => {
            let mut config = PipelineConfig::from_yaml_file(path)?;
            config.apply_env_overrides()?;
            config
        }
        None => PipelineConfig::from_env()?,
    };
    if config.auth.jwt_secret.is_empty() {
        warn!("No JWT secret configured; using the built-in development secret");
        config.auth.jwt_secret = DEV_JWT_SECRET.to_string();
    }
    Ok(config)
}

/// Run a command and return what it prints.
pub async fn execute(cli: &Cli) -> anyhow::Result<String> {
    let config = load_config(cli.config.as_ref())?;
    let app = build_demo(&config)?;

    match &cli.command {
        Commands::Routes => {
            let mut out = app.pipeline.routes().describe().join("\n");
            out.push('\n');
            Ok(out)
        }
        Commands::Replay {
            method,
            path,
            headers,
            body,
            session,
            repeat,
        } => {
            let method = Method::from_bytes(method.to_ascii_uppercase().as_bytes())
                .with_context(|| format!("invalid method {method:?}"))?;
            let mut request = IncomingRequest::new(method, path.as_str());
            for line in headers {
                let (name, value) = parse_header_line(line)?;
                request = request.header(name, value);
            }
            let has_header = |req: &IncomingRequest, name: &str| {
                req.headers.iter().any(|(k, _)| k.eq_ignore_ascii_case(name))
            };
            // Pin the request id so repeats are byte-identical.
            if !has_header(&request, REQUEST_ID_HEADER) {
                request = request.header(REQUEST_ID_HEADER, RequestId::new().to_string());
            }
            if let Some(body) = body {
                if !has_header(&request, "content-type") {
                    request = request.header("content-type", "application/json");
                }
                request = request.body(body.as_bytes());
            }
            if let Some(subject) = session {
                let id = app
                    .sessions
                    .create(SessionRecord::new(subject.as_str(), config.auth.session_ttl()));
                request = request.header("cookie", format!("{}={id}", config.auth.session_cookie));
            }

            let mut out = String::new();
            for _ in 0..(*repeat).max(1) {
                let ctx = RequestContext::from(request.clone());
                let response = into_http(app.pipeline.handle(ctx).await)?;
                out.push_str(&render_response(&response));
            }
            Ok(out)
        }
        Commands::Token {
            sub,
            scopes,
            ttl_secs,
        } => {
            let mut issuer = app.issuer;
            if let Some(secs) = ttl_secs {
                issuer = issuer.ttl(std::time::Duration::from_secs(*secs));
            }
            let scopes: Vec<&str> = scopes.iter().map(String::as_str).collect();
            let token = issuer.issue(sub, &scopes).context("failed to sign token")?;
            Ok(format!("{token}\n"))
        }
    }
}

/// Run a command and print its output.
pub async fn run_cli(cli: Cli) -> anyhow::Result<()> {
    let output = execute(&cli).await?;
    print!("{output}");
    Ok(())
}

/// Status line, headers, blank line, body.
fn render_response(res: &http::Response<Vec<u8>>) -> String {
    let mut out = format!("HTTP {}\n", res.status().as_u16());
    for (name, value) in res.headers() {
        out.push_str(&format!("{name}: {}\n", String::from_utf8_lossy(value.as_bytes())));
    }
    out.push('\n');
    out.push_str(&String::from_utf8_lossy(res.body()));
    out.push('\n');
    out
}
