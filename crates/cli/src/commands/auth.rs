//! Session commands.
//!
//! # Usage
//!
//! ```bash
//! autopro login admin --password secret
//! autopro whoami
//! autopro logout
//! ```

use std::fmt::Write as _;
use std::io::Write;

use autopro_client::ClientState;
use autopro_core::{AuthUser, Permission, Session};
use chrono::{DateTime, Utc};
use secrecy::SecretString;

use crate::error::CliError;

/// Sign in and persist the session.
pub async fn login(
    state: &ClientState,
    username: &str,
    password: SecretString,
) -> Result<(), CliError> {
    let user = state.login(username, &password).await?;
    tracing::info!(user_id = %user.id, "signed in");

    let mut out = std::io::stdout().lock();
    writeln!(out, "Signed in as {} ({})", user.name, user.role)?;
    Ok(())
}

/// Drop the stored session.
pub async fn logout(state: &ClientState) -> Result<(), CliError> {
    let was_signed_in = state.auth().current_user().is_some();
    state.logout().await;

    let mut out = std::io::stdout().lock();
    if was_signed_in {
        writeln!(out, "Signed out")?;
    } else {
        writeln!(out, "No session stored")?;
    }
    Ok(())
}

/// Print the signed-in user.
pub fn whoami(state: &ClientState) -> Result<(), CliError> {
    let (session, user) = state.auth().get_session();
    let (Some(session), Some(user)) = (session, user) else {
        return Err(CliError::NotSignedIn);
    };

    let expired = session.is_expired_at(state.auth().now_millis());
    let mut out = std::io::stdout().lock();
    out.write_all(describe(&user, &session, expired).as_bytes())?;
    Ok(())
}

fn describe(user: &AuthUser, session: &Session, expired: bool) -> String {
    let permissions: Vec<&str> = user
        .effective_permissions()
        .into_iter()
        .map(Permission::as_str)
        .collect();
    let expires = DateTime::<Utc>::from_timestamp_millis(session.expires_at)
        .map_or_else(|| session.expires_at.to_string(), |dt| dt.to_rfc3339());

    let mut text = String::new();
    let _ = writeln!(text, "{} <{}>", user.name, user.id);
    if let Some(email) = &user.email {
        let _ = writeln!(text, "email:       {email}");
    }
    let _ = writeln!(text, "role:        {}", user.role);
    let _ = writeln!(text, "permissions: {}", permissions.join(", "));
    let _ = writeln!(
        text,
        "token:       {} {expires}",
        if expired { "expired at" } else { "expires at" }
    );
    text
}
