//! AutoPro CLI - sign in to the AutoPro backend and issue requests.
//!
//! # Usage
//!
//! ```bash
//! # Sign in (password from flag or AUTOPRO_PASSWORD)
//! autopro login admin --password secret
//!
//! # Show the signed-in user and their permissions
//! autopro whoami
//!
//! # GET an endpoint with the stored session
//! autopro get /cars
//!
//! # Drop the stored session
//! autopro logout
//! ```
//!
//! # Environment Variables
//!
//! - `AUTOPRO_SESSION_FILE` - Session file (default: `<config dir>/autopro/session.json`)
//! - `SENTRY_DSN` - Sentry DSN for error tracking (optional)
//! - Client variables (`AUTOPRO_API_URL`, ...) as documented in `autopro_client::config`

#![cfg_attr(not(test), forbid(unsafe_code))]

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use sentry::integrations::tracing as sentry_tracing;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;
mod error;

use error::CliError;

#[derive(Parser)]
#[command(name = "autopro")]
#[command(author, version, about = "AutoPro backend CLI")]
struct Cli {
    /// File the session is stored in
    #[arg(long, global = true, env = "AUTOPRO_SESSION_FILE")]
    session_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Sign in and store the session
    Login {
        /// Account username
        username: String,

        /// Account password
        #[arg(short, long, env = "AUTOPRO_PASSWORD", hide_env_values = true)]
        password: String,
    },
    /// Drop the stored session
    Logout,
    /// Show the signed-in user
    Whoami,
    /// GET a path and print the JSON response
    Get {
        /// Path relative to the API base URL, or an absolute URL
        path: String,
    },
}

/// Initialize Sentry error tracking and return guard that must be kept alive.
fn init_sentry() -> Option<sentry::ClientInitGuard> {
    let dsn = std::env::var("SENTRY_DSN").ok()?;

    let guard = sentry::init((
        dsn.as_str(),
        sentry::ClientOptions {
            release: sentry::release_name!(),
            attach_stacktrace: true,
            ..Default::default()
        },
    ));

    Some(guard)
}

/// Filter tracing events to Sentry event types.
fn sentry_event_filter(metadata: &tracing::Metadata<'_>) -> sentry_tracing::EventFilter {
    match *metadata.level() {
        tracing::Level::ERROR | tracing::Level::WARN => sentry_tracing::EventFilter::Event,
        tracing::Level::INFO | tracing::Level::DEBUG => sentry_tracing::EventFilter::Breadcrumb,
        tracing::Level::TRACE => sentry_tracing::EventFilter::Ignore,
    }
}

#[tokio::main]
async fn main() {
    // Load .env before reading SENTRY_DSN
    dotenvy::dotenv().ok();

    let sentry_guard = init_sentry();

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "autopro_client=info,autopro_cli=info".into());

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(sentry_guard.as_ref().map(|_| {
            sentry_tracing::layer().event_filter(sentry_event_filter)
        }))
        .init();

    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        tracing::error!("Command failed: {e}");
        drop(sentry_guard);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), CliError> {
    let state = commands::client_state(cli.session_file)?;

    let result = match cli.command {
        Commands::Login { username, password } => {
            commands::auth::login(&state, &username, password.into()).await
        }
        Commands::Logout => commands::auth::logout(&state).await,
        Commands::Whoami => commands::auth::whoami(&state),
        Commands::Get { path } => commands::request::get(&state, &path).await,
    };

    // Audit forwards must land before the runtime goes away
    state.teardown().await;
    result
}
