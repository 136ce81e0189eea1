//! CLI command implementations.

pub mod auth;
pub mod request;

use std::path::PathBuf;
use std::sync::Arc;

use autopro_client::auth::FileStorage;
use autopro_client::{ClientConfig, ClientState};

use crate::error::CliError;

/// Session file used when none is given.
fn default_session_file() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("autopro").join("session.json"))
}

/// Build client state backed by the session file.
pub fn client_state(session_file: Option<PathBuf>) -> Result<ClientState, CliError> {
    let config = ClientConfig::from_env()?;
    let path = session_file
        .or_else(default_session_file)
        .ok_or(CliError::NoConfigDir)?;

    tracing::debug!(path = %path.display(), "opening session file");
    let storage = FileStorage::open(path)?;

    Ok(ClientState::new(config, Arc::new(storage)))
}
