use autopro_client::ApiError;
use autopro_client::ConfigError;
use autopro_client::auth::StorageError;
use thiserror::Error;

/// Errors surfaced by CLI commands.
#[derive(Debug, Error)]
pub enum CliError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("session storage error: {0}")]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Api(#[from] ApiError),

    #[error("failed to write output: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to format response: {0}")]
    Json(#[from] serde_json::Error),

    #[error("no config directory found, set AUTOPRO_SESSION_FILE")]
    NoConfigDir,

    #[error("not signed in")]
    NotSignedIn,
}
