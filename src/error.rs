use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum MirrorError {
    #[error("failed to read manifest {path}: {message}")]
    ManifestRead { path: PathBuf, message: String },

    #[error("invalid manifest {path}: {message}")]
    ManifestParse { path: PathBuf, message: String },

    #[error("invalid source URL: {0}")]
    InvalidUrl(String),

    #[error("transfer failed: {0}")]
    Transfer(String),

    #[error("remote store request failed: {0}")]
    RemoteHttp(String),

    #[error("remote store returned status {status}: {message}")]
    RemoteStatus { status: u16, message: String },

    #[error("missing access token: set {0}")]
    #[diagnostic(help("export an oneprovider REST access token before running uploads"))]
    MissingToken(String),

    #[error("missing remote setting: {0}")]
    MissingRemoteSetting(String),

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("invalid config value: {0}")]
    InvalidConfig(String),

    #[error("invalid transfer list {path} line {line}: {message}")]
    TransferListParse {
        path: PathBuf,
        line: u64,
        message: String,
    },

    #[error("filesystem error: {0}")]
    Filesystem(String),
}

impl MirrorError {
    pub fn is_config(&self) -> bool {
        matches!(
            self,
            MirrorError::MissingToken(_)
                | MirrorError::MissingRemoteSetting(_)
                | MirrorError::ConfigRead(_)
                | MirrorError::ConfigParse(_)
                | MirrorError::InvalidConfig(_)
        )
    }
}
