mod request;
mod session;

use std::env;
use std::path::PathBuf;

use serde_json::Value;
use tradewire_core::{ClientConfig, Payload, RequestDescriptor, RetryPolicy};

use crate::cli::{Cli, Command};
use crate::error::CliError;

/// What a command hands to the output layer.
#[derive(Debug, PartialEq)]
pub enum CommandOutput {
    Payload(Payload),
    Message(String),
}

pub async fn run(cli: &Cli) -> Result<CommandOutput, CliError> {
    let config = load_config(cli, |key| env::var(key).ok())?;

    let token = cli.token.as_deref();

    match &cli.command {
        Command::Get(args) => request::run(&config, token, request::get(args)).await,
        Command::Post(args) => {
            let descriptor = request::with_body(RequestDescriptor::post(&args.path), args)?;
            request::run(&config, token, descriptor).await
        }
        Command::Put(args) => {
            let descriptor = request::with_body(RequestDescriptor::put(&args.path), args)?;
            request::run(&config, token, descriptor).await
        }
        Command::Patch(args) => {
            let descriptor = request::with_body(RequestDescriptor::patch(&args.path), args)?;
            request::run(&config, token, descriptor).await
        }
        Command::Delete(args) => {
            request::run(&config, token, RequestDescriptor::delete(&args.path)).await
        }
        Command::Login(args) => session::login(&config, args),
        Command::Logout => session::logout(&config),
    }
}

/// Environment first, then command-line overrides.
fn load_config<F>(cli: &Cli, lookup: F) -> Result<ClientConfig, CliError>
where
    F: Fn(&str) -> Option<String>,
{
    let mut config = ClientConfig::from_lookup(&lookup)?;

    if let Some(base_url) = &cli.base_url {
        config.base_url = base_url.clone();
    }
    if let Some(max_retries) = cli.max_retries {
        config.retry = RetryPolicy::uniform(max_retries, config.retry.backoff);
    }
    if let Some(path) = &cli.credentials {
        config.credentials_path = Some(path.clone());
    } else if config.credentials_path.is_none() {
        config.credentials_path = lookup("HOME")
            .filter(|home| !home.is_empty())
            .map(|home| PathBuf::from(home).join(".tradewire").join("credentials.json"));
    }

    config.validate()?;
    Ok(config)
}

fn parse_json(flag: &'static str, raw: &str) -> Result<Value, CliError> {
    serde_json::from_str(raw).map_err(|source| CliError::InvalidJson { flag, source })
}
