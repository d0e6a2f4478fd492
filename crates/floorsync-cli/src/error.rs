use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Core(#[from] floorsync_core::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),
    #[error("Change ID cannot be empty")]
    EmptyChangeId,
    #[error("Change not found for id/prefix: {0}")]
    ChangeNotFound(String),
    #[error("{0}")]
    AmbiguousChangeId(String),
    #[error("Name at least one change id or pass --all")]
    NothingToResolve,
    #[error(
        "No server configured. Set api_base_url in settings, pass --api-url, or set FLOORSYNC_API_URL."
    )]
    ApiNotConfigured,
}
