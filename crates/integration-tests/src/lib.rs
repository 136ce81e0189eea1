//! End-to-end tests for the AutoPro client data-access layer.
//!
//! Every test builds its own [`TestContext`]: a mock backend plus a fresh
//! [`ClientState`] on a manual clock, so no state leaks between cases.
//!
//! # Test Categories
//!
//! - `auth_flow` - Login, token refresh and role checks
//! - `error_handling` - Classification, handlers and session clearing
//! - `cache_and_mutation` - Cached reads and optimistic writes
//! - `audit_trail` - Audit buffer, export and forwarding

use std::sync::Arc;
use std::time::Duration;

use autopro_client::auth::MemoryStorage;
use autopro_client::{ClientConfig, ClientState};
use autopro_core::ManualClock;
use serde_json::{Value, json};
use url::Url;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Fixed start time for every context.
pub const START_MS: i64 = 1_700_000_000_000;

/// A mock backend and client state wired to it.
pub struct TestContext {
    pub server: MockServer,
    pub state: ClientState,
    pub clock: Arc<ManualClock>,
}

impl TestContext {
    /// Context with audit forwarding disabled and fast retries.
    pub async fn new() -> Self {
        Self::with_config(|config| {
            config.audit_forward = false;
        })
        .await
    }

    /// Context with a customized configuration.
    pub async fn with_config(customize: impl FnOnce(&mut ClientConfig)) -> Self {
        let server = MockServer::start().await;
        let mut config = ClientConfig::new(base_url(&server.uri()));
        config.retry_delay = Duration::from_millis(1);
        customize(&mut config);

        let clock = Arc::new(ManualClock::new(START_MS));
        let state = ClientState::with_clock(config, Arc::new(MemoryStorage::new()), clock.clone());

        Self {
            server,
            state,
            clock,
        }
    }

    /// Mount a `/auth/login` that accepts any credentials and returns `user`.
    pub async fn mount_login(&self, user: Value, expires_in_secs: i64) {
        Mock::given(method("POST"))
            .and(path("/auth/login"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "accessToken": "access-1",
                "refreshToken": "refresh-1",
                "expiresIn": expires_in_secs,
                "user": user
            })))
            .mount(&self.server)
            .await;
    }
}

/// Parse a mock server URI.
///
/// # Panics
///
/// Panics if `uri` is not a valid URL.
#[must_use]
pub fn base_url(uri: &str) -> Url {
    Url::parse(uri).expect("mock server URI is a valid URL")
}

/// A base URL on a local port with nothing listening.
///
/// # Panics
///
/// Panics if no local port can be bound.
#[must_use]
pub fn closed_port_url() -> Url {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind ephemeral port");
    let addr = listener.local_addr().expect("local addr");
    drop(listener);
    base_url(&format!("http://{addr}"))
}

/// JSON for an admin user.
#[must_use]
pub fn admin_user() -> Value {
    json!({"id": "1", "name": "Administrator", "email": "admin@autopro.ru", "role": "admin"})
}
