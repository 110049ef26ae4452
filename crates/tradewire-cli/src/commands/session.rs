use std::path::PathBuf;
use std::sync::Arc;

use tradewire_core::{AuthSession, ClientConfig, Credential, FileCredentialStore};

use crate::cli::LoginArgs;
use crate::error::CliError;

use super::{parse_json, CommandOutput};

pub fn login(config: &ClientConfig, args: &LoginArgs) -> Result<CommandOutput, CliError> {
    let path = credentials_path(config)?;

    let mut credential = Credential::new(&args.token);
    if let Some(raw) = &args.user {
        credential = credential.with_user(parse_json("--user", raw)?);
    }

    // Overwrites whatever is on disk, including a blob that no longer parses.
    let session = AuthSession::fresh(Arc::new(FileCredentialStore::new(&path)));
    session.login(credential)?;

    Ok(CommandOutput::Message(format!(
        "credentials saved to {}",
        path.display()
    )))
}

pub fn logout(config: &ClientConfig) -> Result<CommandOutput, CliError> {
    let path = credentials_path(config)?;

    let session = AuthSession::fresh(Arc::new(FileCredentialStore::new(&path)));
    session.logout()?;

    Ok(CommandOutput::Message(String::from("logged out")))
}

fn credentials_path(config: &ClientConfig) -> Result<PathBuf, CliError> {
    config
        .credentials_path
        .clone()
        .ok_or(CliError::NoCredentialsPath)
}
