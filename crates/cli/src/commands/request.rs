//! Ad-hoc requests.

use std::io::Write;

use autopro_client::ClientState;
use serde_json::Value;

use crate::error::CliError;

/// GET `path` and pretty-print the JSON response.
pub async fn get(state: &ClientState, path: &str) -> Result<(), CliError> {
    let value: Value = state.api().get(path).await?;

    let mut out = std::io::stdout().lock();
    serde_json::to_writer_pretty(&mut out, &value)?;
    writeln!(out)?;
    Ok(())
}
