use std::sync::Arc;

use tracing::debug;
use tradewire_core::{AuthSession, ClientConfig, ClientContext, Credential, RequestDescriptor};

use crate::cli::{BodyArgs, GetArgs};
use crate::error::CliError;

use super::{parse_json, CommandOutput};

pub async fn run(
    config: &ClientConfig,
    token: Option<&str>,
    request: RequestDescriptor,
) -> Result<CommandOutput, CliError> {
    let client = connect(config.clone(), token)?;
    let _expired = client.on_session_expired(|_| {
        eprintln!("session expired; run 'tradewire login'");
    });

    let payload = client.send(request).await?;
    let correlation = client.correlation();
    debug!(
        request_id = correlation.request_id.as_deref().unwrap_or("-"),
        trace_id = correlation.trace_id.as_deref().unwrap_or("-"),
        "request completed"
    );

    Ok(CommandOutput::Payload(payload))
}

/// A `--token` flag gets a throwaway in-memory session so it never reaches disk.
fn connect(config: ClientConfig, token: Option<&str>) -> Result<ClientContext, CliError> {
    let builder = ClientContext::builder(config);
    let Some(token) = token else {
        return Ok(builder.build()?);
    };

    let session = Arc::new(AuthSession::new());
    session.login(Credential::new(token))?;
    Ok(builder.with_session(session).build()?)
}

pub fn get(args: &GetArgs) -> RequestDescriptor {
    args.query
        .iter()
        .fold(RequestDescriptor::get(&args.path), |request, (name, value)| {
            request.with_query(name, value)
        })
        .with_dedupe(!args.no_dedupe)
}

pub fn with_body(request: RequestDescriptor, args: &BodyArgs) -> Result<RequestDescriptor, CliError> {
    match &args.body {
        Some(raw) => Ok(request.with_json(&parse_json("--body", raw)?)?),
        None => Ok(request),
    }
}

#[cfg(test)]
mod tests {
    use clap::Parser;
    use tradewire_core::HttpMethod;

    use super::*;
    use crate::cli::{Cli, Command};

    fn describe_args(args: &[&str]) -> Result<RequestDescriptor, CliError> {
        let cli = Cli::parse_from(std::iter::once("tradewire").chain(args.iter().copied()));
        match &cli.command {
            Command::Get(args) => Ok(get(args)),
            Command::Post(args) => with_body(RequestDescriptor::post(&args.path), args),
            Command::Patch(args) => with_body(RequestDescriptor::patch(&args.path), args),
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn get_keeps_query_order_and_dedupe_flag() {
        let request = describe_args(&["get", "/trades", "--query", "b=2", "--query", "a=1", "--no-dedupe"])
            .expect("request");

        assert_eq!(request.method(), HttpMethod::Get);
        assert_eq!(request.url("https://api.example.test"), "https://api.example.test/trades?b=2&a=1");
        assert!(!request.dedupe());
    }

    #[test]
    fn body_is_validated_as_json() {
        let request = describe_args(&["post", "/orders", "--body", r#"{"qty": 2}"#]).expect("request");
        assert_eq!(request.body(), Some(r#"{"qty":2}"#));

        let error = describe_args(&["patch", "/orders/1", "--body", "{qty"]).expect_err("invalid");
        assert!(matches!(error, CliError::InvalidJson { flag: "--body", .. }));
    }

    #[test]
    fn flag_token_is_not_persisted() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("credentials.json");
        let config = ClientConfig::default().with_credentials_path(&path);

        let client = connect(config, Some("one-off")).expect("client");

        assert_eq!(client.session().token().as_deref(), Some("one-off"));
        assert!(!path.exists());
    }
}
