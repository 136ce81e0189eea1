//! Remote destinations for audit entries.

use std::fmt::Debug;

use async_trait::async_trait;
use autopro_core::AuditLogEntry;
use reqwest::header::CONTENT_TYPE;
use secrecy::ExposeSecret;
use tracing::debug;
use url::Url;

use super::error::AuditError;
use crate::auth::AuthStore;

/// Path entries are posted to, relative to the API base URL.
pub const AUDIT_LOGS_PATH: &str = "/audit/logs";

/// Receives every audit entry after it is recorded locally.
///
/// Sends run in background tasks. Errors are logged by the
/// [`AuditLogger`](super::AuditLogger) and never reach the code that logged
/// the event.
#[async_trait]
pub trait AuditSink: Send + Sync + Debug {
    /// Name used in log messages.
    fn name(&self) -> &str;

    /// Deliver one entry.
    async fn send(&self, entry: &AuditLogEntry) -> Result<(), AuditError>;
}

/// Posts entries to the backend.
///
/// Uses its own HTTP client rather than the [`ApiClient`](crate::api::ApiClient):
/// it never refreshes tokens, never clears the session and never notifies the
/// API error handlers. An expired token is simply not sent.
#[derive(Debug, Clone)]
pub struct HttpAuditSink {
    client: reqwest::Client,
    endpoint: String,
    auth: AuthStore,
}

impl HttpAuditSink {
    #[must_use]
    pub fn new(base_url: &Url, auth: AuthStore) -> Self {
        Self::with_http_client(reqwest::Client::new(), base_url, auth)
    }

    #[must_use]
    pub fn with_http_client(client: reqwest::Client, base_url: &Url, auth: AuthStore) -> Self {
        Self {
            client,
            endpoint: format!(
                "{}{AUDIT_LOGS_PATH}",
                base_url.as_str().trim_end_matches('/')
            ),
            auth,
        }
    }
}

#[async_trait]
impl AuditSink for HttpAuditSink {
    fn name(&self) -> &str {
        "http"
    }

    async fn send(&self, entry: &AuditLogEntry) -> Result<(), AuditError> {
        let mut request = self
            .client
            .post(&self.endpoint)
            .header(CONTENT_TYPE, "application/json")
            .json(entry);

        if let (Some(session), _) = self.auth.get_session()
            && !session.is_expired_at(self.auth.now_millis())
        {
            request = request.bearer_auth(session.access_token.expose_secret());
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(AuditError::Forward(format!("backend returned {status}")));
        }

        debug!(event_type = %entry.event_type, "audit entry forwarded");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use autopro_core::{AuditEventType, AuditLevel, AuthUser, ManualClock, Role, Session, UserId};
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::auth::MemoryStorage;

    const NOW: i64 = 1_700_000_000_000;

    fn entry() -> AuditLogEntry {
        AuditLogEntry {
            user_id: UserId::new("7"),
            user_name: "Manager".to_string(),
            user_role: Role::Manager,
            timestamp: NOW,
            event_type: AuditEventType::CarUpdated,
            level: AuditLevel::Info,
            action: "Updated car price".to_string(),
            target: Some("car_12".to_string()),
            details: None,
            ip: Some("127.0.0.1".to_string()),
            user_agent: None,
            app_version: "0.1.0".to_string(),
        }
    }

    fn auth() -> AuthStore {
        AuthStore::new(
            Arc::new(MemoryStorage::new()),
            Arc::new(ManualClock::new(NOW)),
        )
    }

    #[tokio::test]
    async fn test_posts_entry_with_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/audit/logs"))
            .and(header("authorization", "Bearer live-token"))
            .and(body_partial_json(json!({"eventType": "CAR_UPDATED", "target": "car_12"})))
            .respond_with(ResponseTemplate::new(201))
            .expect(1)
            .mount(&server)
            .await;

        let auth = auth();
        auth.save_session(
            &Session::new("live-token", "refresh", NOW + 60_000),
            &AuthUser::new("7", "Manager", Role::Manager),
        )
        .expect("save");

        let base = Url::parse(&format!("{}/v1", server.uri())).expect("url");
        let sink = HttpAuditSink::new(&base, auth);
        sink.send(&entry()).await.expect("forwarded");
    }

    #[tokio::test]
    async fn test_rejection_leaves_session_alone() {
        let server = MockServer::start().await;
        Mock::given(path("/audit/logs"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let auth = auth();
        auth.save_session(
            &Session::new("live-token", "refresh", NOW + 60_000),
            &AuthUser::new("7", "Manager", Role::Manager),
        )
        .expect("save");

        let sink = HttpAuditSink::new(&Url::parse(&server.uri()).expect("url"), auth.clone());
        let err = sink.send(&entry()).await.expect_err("should fail");

        assert!(matches!(err, AuditError::Forward(_)));
        assert!(auth.is_authenticated());
    }

    #[tokio::test]
    async fn test_expired_token_not_sent() {
        let server = MockServer::start().await;
        Mock::given(path("/audit/logs"))
            .respond_with(ResponseTemplate::new(204))
            .mount(&server)
            .await;

        let auth = auth();
        auth.save_session(
            &Session::new("stale-token", "refresh", NOW - 1),
            &AuthUser::new("7", "Manager", Role::Manager),
        )
        .expect("save");

        let sink = HttpAuditSink::new(&Url::parse(&server.uri()).expect("url"), auth);
        sink.send(&entry()).await.expect("forwarded");

        let requests = server.received_requests().await.expect("recorded");
        assert!(requests[0].headers.get("authorization").is_none());
    }
}
