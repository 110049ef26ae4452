//! CLI argument definitions for tradewire.
//!
//! # Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `get` | Read a resource (deduplicated, retried) |
//! | `post` | Create a resource from a JSON body |
//! | `put` | Replace a resource from a JSON body |
//! | `patch` | Update a resource from a JSON body |
//! | `delete` | Delete a resource |
//! | `login` | Persist a bearer token to the credentials file |
//! | `logout` | Remove the credentials file |
//!
//! # Global Options
//!
//! | Option | Default | Description |
//! |--------|---------|-------------|
//! | `--base-url` | `TRADEWIRE_BASE_URL` | Backend base URL |
//! | `--token` | persisted credential | Bearer token for this invocation only |
//! | `--credentials` | `~/.tradewire/credentials.json` | Credentials file |
//! | `--max-retries` | `TRADEWIRE_MAX_RETRIES` | Retry budget per call |
//! | `--pretty` | `false` | Pretty-print JSON output |
//!
//! # Examples
//!
//! ```bash
//! tradewire login --token "$TOKEN"
//! tradewire get /portfolio/balance --pretty
//! tradewire get /markets/candles --query symbol=BTC/USDT --query interval=1h
//! tradewire post /orders --body '{"symbol":"ETH/USDT","side":"buy","qty":0.5}'
//! ```

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

/// tradewire - resilient command-line client for the trading backend
#[derive(Debug, Parser)]
#[command(
    name = "tradewire",
    author,
    version,
    about = "Command-line client for the tradewire trading backend",
    long_about = "tradewire issues calls to the trading backend through the same client core \
the dashboard uses:\n\
\n\
  • Classified errors with per-kind exit codes\n\
  • Automatic retry with exponential backoff\n\
  • Envelope unwrapping for v1/v2 responses\n\
  • Persistent bearer credentials\n\
\n\
Set RUST_LOG=tradewire_core=debug to trace individual attempts."
)]
pub struct Cli {
    /// Backend base URL, e.g. https://trade.example.com/api.
    #[arg(long)]
    pub base_url: Option<String>,

    /// Bearer token used for this invocation only; never persisted.
    #[arg(long)]
    pub token: Option<String>,

    /// Path of the credentials file written by `login`.
    #[arg(long)]
    pub credentials: Option<PathBuf>,

    /// Retries per call for every retryable error kind.
    #[arg(long)]
    pub max_retries: Option<u32>,

    /// Pretty-print JSON output with indentation.
    #[arg(long, global = true, default_value_t = false)]
    pub pretty: bool,

    #[command(subcommand)]
    pub command: Command,
}

/// Available CLI commands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Read a resource.
    ///
    /// # Examples
    ///
    ///   tradewire get /bots
    ///   tradewire get /trades --query limit=50 --query page=2
    Get(GetArgs),

    /// Create a resource.
    Post(BodyArgs),

    /// Replace a resource.
    Put(BodyArgs),

    /// Partially update a resource.
    Patch(BodyArgs),

    /// Delete a resource.
    Delete(PathArgs),

    /// Store a bearer token (and optional user identity) in the credentials file.
    Login(LoginArgs),

    /// Remove the stored credentials.
    Logout,
}

/// Arguments for the `get` command.
#[derive(Debug, Args)]
pub struct GetArgs {
    /// Path relative to the base URL, or an absolute URL.
    pub path: String,

    /// Query parameter as `name=value`; repeatable, order is kept.
    #[arg(long = "query", value_name = "NAME=VALUE", value_parser = parse_query_pair)]
    pub query: Vec<(String, String)>,

    /// Always issue a fresh call instead of joining an identical one in flight.
    #[arg(long, default_value_t = false)]
    pub no_dedupe: bool,
}

/// Arguments for `post`, `put`, and `patch`.
#[derive(Debug, Args)]
pub struct BodyArgs {
    /// Path relative to the base URL, or an absolute URL.
    pub path: String,

    /// JSON request body.
    #[arg(long, value_name = "JSON")]
    pub body: Option<String>,
}

/// Arguments for `delete`.
#[derive(Debug, Args)]
pub struct PathArgs {
    /// Path relative to the base URL, or an absolute URL.
    pub path: String,
}

/// Arguments for `login`.
#[derive(Debug, Args)]
pub struct LoginArgs {
    /// Bearer token issued by the backend.
    #[arg(long)]
    pub token: String,

    /// User identity as a JSON object, stored alongside the token.
    #[arg(long, value_name = "JSON")]
    pub user: Option<String>,
}

fn parse_query_pair(raw: &str) -> Result<(String, String), String> {
    let (name, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected NAME=VALUE, got '{raw}'"))?;
    if name.is_empty() {
        return Err(format!("query parameter name is empty in '{raw}'"));
    }
    Ok((name.to_owned(), value.to_owned()))
}
