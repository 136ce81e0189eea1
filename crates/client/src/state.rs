//! Explicitly constructed client state shared across the application.

use std::sync::Arc;

use autopro_core::{AuthUser, Clock, SystemClock};
use secrecy::SecretString;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::api::{ApiClient, ApiError};
use crate::audit::{AuditLogger, AuditSink, HttpAuditSink};
use crate::auth::{AuthStore, SessionStorage};
use crate::cache::ResponseCache;
use crate::config::ClientConfig;
use crate::mutation::{MutationMethod, MutationOptions, OptimisticMutation};
use crate::prefetch::Prefetcher;

/// Every data-access component, wired together.
///
/// Created once at application start. Cheaply cloneable via `Arc`; clones
/// share the session, cache, error handlers and audit buffer. Tests build a
/// fresh state per case.
#[derive(Clone, Debug)]
pub struct ClientState {
    inner: Arc<ClientStateInner>,
}

#[derive(Debug)]
struct ClientStateInner {
    config: ClientConfig,
    auth: AuthStore,
    api: ApiClient,
    cache: ResponseCache,
    audit: AuditLogger,
    prefetcher: Prefetcher,
}

impl ClientState {
    /// Create client state using the system clock.
    #[must_use]
    pub fn new(config: ClientConfig, storage: Arc<dyn SessionStorage>) -> Self {
        Self::with_clock(config, storage, Arc::new(SystemClock))
    }

    /// Create client state measuring time with `clock`.
    #[must_use]
    pub fn with_clock(
        config: ClientConfig,
        storage: Arc<dyn SessionStorage>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let auth = AuthStore::new(storage, Arc::clone(&clock));
        let http = reqwest::Client::new();
        let api = ApiClient::with_http_client(http.clone(), &config.api_url, auth.clone());
        let cache = ResponseCache::new(config.cache_capacity, config.cache_ttl, clock);

        let audit = if config.audit_forward {
            let sink: Arc<dyn AuditSink> = Arc::new(HttpAuditSink::with_http_client(
                http,
                &config.api_url,
                auth.clone(),
            ));
            AuditLogger::with_sink(
                auth.clone(),
                config.audit_capacity,
                sink,
                config.client_ip.clone(),
            )
        } else {
            AuditLogger::new(auth.clone(), config.audit_capacity, config.client_ip.clone())
        };

        let prefetcher = Prefetcher::new(api.clone(), cache.clone(), config.prefetch_delay);

        Self {
            inner: Arc::new(ClientStateInner {
                config,
                auth,
                api,
                cache,
                audit,
                prefetcher,
            }),
        }
    }

    #[must_use]
    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    #[must_use]
    pub fn auth(&self) -> &AuthStore {
        &self.inner.auth
    }

    #[must_use]
    pub fn api(&self) -> &ApiClient {
        &self.inner.api
    }

    #[must_use]
    pub fn cache(&self) -> &ResponseCache {
        &self.inner.cache
    }

    #[must_use]
    pub fn audit(&self) -> &AuditLogger {
        &self.inner.audit
    }

    #[must_use]
    pub fn prefetcher(&self) -> &Prefetcher {
        &self.inner.prefetcher
    }

    /// Mutation options seeded with the configured retry policy.
    #[must_use]
    pub fn mutation_options<T, R>(
        &self,
        path: impl Into<String>,
        method: MutationMethod,
    ) -> MutationOptions<T, R> {
        MutationOptions::new(path, method)
            .max_retries(self.inner.config.max_retries)
            .retry_delay(self.inner.config.retry_delay)
    }

    /// Build a mutation that evicts from this state's cache.
    #[must_use]
    pub fn mutation<T, R>(&self, options: MutationOptions<T, R>) -> OptimisticMutation<T, R>
    where
        T: Serialize,
        R: DeserializeOwned + Clone,
    {
        OptimisticMutation::new(self.inner.api.clone(), options).with_cache(self.inner.cache.clone())
    }

    /// Sign in and record the login in the audit trail.
    ///
    /// # Errors
    ///
    /// Returns the `ApiError` from [`ApiClient::login`].
    pub async fn login(&self, username: &str, password: &SecretString) -> Result<AuthUser, ApiError> {
        let (_, user) = self.inner.api.login(username, password).await?;
        self.inner.audit.user_login(&user.id, None);
        Ok(user)
    }

    /// Record the logout, then drop the session and cached responses.
    pub async fn logout(&self) {
        if let Some(user) = self.inner.auth.current_user() {
            self.inner.audit.user_logout(&user.id);
        }
        self.inner.api.logout();
        self.inner.cache.clear_all().await;
    }

    /// Wait for audit forwards in flight, then drop cached responses and
    /// buffered audit entries.
    ///
    /// Call before the runtime shuts down or forwarded entries may be lost.
    pub async fn teardown(&self) {
        self.inner.audit.flush().await;
        self.inner.cache.clear_all().await;
        self.inner.audit.clear();
    }
}

#[cfg(test)]
mod tests {
    use std::convert::Infallible;
    use std::time::Duration;

    use autopro_core::{AuditEventType, ManualClock, Role};
    use serde_json::json;
    use url::Url;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::audit::AuditQuery;
    use crate::auth::MemoryStorage;

    fn state_for(uri: &str) -> ClientState {
        let mut config = ClientConfig::new(Url::parse(uri).expect("url"));
        config.audit_forward = false;
        config.max_retries = 1;
        config.retry_delay = Duration::from_millis(5);
        ClientState::with_clock(
            config,
            Arc::new(MemoryStorage::new()),
            Arc::new(ManualClock::new(1_700_000_000_000)),
        )
    }

    async fn mount_login(server: &MockServer) {
        Mock::given(method("POST"))
            .and(path("/auth/login"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "accessToken": "access",
                "refreshToken": "refresh",
                "expiresIn": 3600,
                "user": {"id": "5", "name": "Anna", "role": "manager"}
            })))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_login_and_logout_are_audited() {
        let server = MockServer::start().await;
        mount_login(&server).await;

        let state = state_for(&server.uri());
        let user = state
            .login("anna", &SecretString::from("pw"))
            .await
            .expect("login");
        assert_eq!(user.role, Role::Manager);
        assert!(state.auth().has_role(Role::Manager));
        assert!(!state.auth().has_role(Role::Admin));

        let _: Result<u8, Infallible> = state
            .cache()
            .get("cars", Duration::from_secs(60), || async { Ok(1) })
            .await;

        state.logout().await;

        assert!(!state.auth().is_authenticated());
        assert!(!state.cache().contains("cars").await);

        let entries = state.audit().query(&AuditQuery::default());
        assert_eq!(entries[0].event_type, AuditEventType::UserLogout);
        assert_eq!(entries[1].event_type, AuditEventType::UserLogin);
        assert_eq!(entries[1].user_name, "Anna");
    }

    #[test]
    fn test_mutation_options_follow_config() {
        let state = state_for("http://127.0.0.1:9");
        let options = state.mutation_options::<(), ()>("/cars", MutationMethod::Post);
        let debug = format!("{options:?}");
        assert!(debug.contains("max_retries: 1"));
        assert!(debug.contains("retry_delay: 5ms"));
    }

    #[tokio::test]
    async fn test_teardown_resets_shared_state() {
        let state = state_for("http://127.0.0.1:9");
        state.audit().info("something", None, None);
        let _: Result<u8, Infallible> = state
            .cache()
            .get("k", Duration::from_secs(60), || async { Ok(1) })
            .await;

        state.teardown().await;

        assert!(state.audit().is_empty());
        assert!(!state.cache().contains("k").await);
    }

    #[test]
    fn test_client_ip_recorded_without_forwarding() {
        let mut config = ClientConfig::new(Url::parse("http://127.0.0.1:9").expect("url"));
        config.audit_forward = false;
        config.client_ip = Some("10.0.0.1".to_string());
        let state = ClientState::new(config, Arc::new(MemoryStorage::new()));

        state.audit().info("Opened fleet view", None, None);

        let entry = state.audit().query(&AuditQuery::default()).remove(0);
        assert_eq!(entry.ip.as_deref(), Some("10.0.0.1"));
    }

    #[tokio::test]
    async fn test_teardown_delivers_pending_forwards() {
        let server = MockServer::start().await;
        mount_login(&server).await;
        Mock::given(method("POST"))
            .and(path("/audit/logs"))
            .respond_with(ResponseTemplate::new(201))
            .expect(1)
            .mount(&server)
            .await;

        let mut config = ClientConfig::new(Url::parse(&server.uri()).expect("url"));
        config.audit_forward = true;
        let state = ClientState::with_clock(
            config,
            Arc::new(MemoryStorage::new()),
            Arc::new(ManualClock::new(1_700_000_000_000)),
        );

        state
            .login("anna", &SecretString::from("pw"))
            .await
            .expect("login");
        state.teardown().await;

        let forwarded = server
            .received_requests()
            .await
            .expect("recording enabled")
            .into_iter()
            .filter(|request| request.url.path() == "/audit/logs")
            .count();
        assert_eq!(forwarded, 1);
    }
}
