use thiserror::Error;
use tradewire_core::{ClassifiedError, ConfigError, ErrorKind, StoreError};

/// CLI-level error categories mapped to exit codes.
#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Request(#[from] ClassifiedError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    CredentialStore(#[from] StoreError),

    #[error("no credentials file configured; pass --credentials or set TRADEWIRE_CREDENTIALS_PATH")]
    NoCredentialsPath,

    #[error("{flag} is not valid JSON: {source}")]
    InvalidJson {
        flag: &'static str,
        source: serde_json::Error,
    },

    #[error(transparent)]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl CliError {
    pub const fn exit_code(&self) -> u8 {
        match self {
            Self::Request(error) => match error.kind() {
                ErrorKind::Network => 10,
                ErrorKind::Timeout => 11,
                ErrorKind::ClientError => 2,
                ErrorKind::AuthError => 3,
                ErrorKind::RateLimited => 4,
                ErrorKind::ServerError => 5,
                ErrorKind::Unknown => 1,
            },
            Self::Config(_) => 2,
            Self::CredentialStore(_) => 2,
            Self::NoCredentialsPath => 2,
            Self::InvalidJson { .. } => 2,
            Self::Serialization(_) => 1,
            Self::Io(_) => 1,
        }
    }
}
