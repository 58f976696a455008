//! # CLI Module
//!
//! The `brrtchain` binary drives a small demo application through the
//! pipeline in-process, with no network listener.
//!
//! ## Commands
//!
//! ### `routes`
//!
//! Print the demo routing table, one route per line with its middleware:
//!
//! ```bash
//! brrtchain routes
//! ```
//!
//! ### `replay`
//!
//! Run a request and print status, headers and body:
//!
//! ```bash
//! brrtchain replay --path /user/123
//! brrtchain replay -m POST --path /users --body '{"name":"ada"}'
//! brrtchain replay --path /users/me -H "Authorization: Bearer $(brrtchain token --sub ada)"
//! brrtchain replay --path /session/me --session ada
//! ```
//!
//! `--repeat N` sends the same request N times with a pinned request id, so
//! the printed responses can be compared for determinism.
//!
//! ### `token`
//!
//! Mint an HS256 bearer token with the configured secret:
//!
//! ```bash
//! brrtchain token --sub ada --scope users:read --ttl-secs 600
//! ```
//!
//! ## Usage from Code
//!
//! ```rust,ignore
//! use brrtchain::cli::{Cli, run_cli};
//! use clap::Parser;
//!
//! run_cli(Cli::parse()).await?;
//! ```

mod commands;
mod demo;


pub use commands::{execute, load_config, run_cli, Cli, Commands, DEV_JWT_SECRET};
pub use demo::{build_demo, DemoApp};
