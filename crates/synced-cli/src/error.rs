use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Core(#[from] synced_core::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    #[error("Model `{0}` is not configured in {1}")]
    UnknownModel(String, String),
    #[error(
        "No remote source. Pass --input, or set --api-url, SYNCED_API_URL, or api_url in the config file."
    )]
    RemoteNotConfigured,
    #[error("{0} record(s) failed to synchronize")]
    PartialSync(usize),
}
