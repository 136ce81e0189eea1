//! Structured audit trail of user and admin actions.
//!
//! Entries live in a bounded in-memory buffer, newest first. When a sink is
//! configured each entry is also forwarded in a background task; forwarding
//! failures are logged and otherwise ignored. [`AuditLogger::flush`] waits
//! for forwards still in flight, which short-lived processes must do before
//! the runtime shuts down.

mod error;
pub mod export;
pub mod sink;

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use autopro_core::{AuditEventType, AuditLevel, AuditLogEntry, Role, UserId};
use serde_json::Value;
use tokio::runtime::Handle;
use tokio::task::JoinSet;
use tracing::{info, warn};

use crate::auth::AuthStore;

pub use error::AuditError;
pub use export::ExportFormat;
pub use sink::{AuditSink, HttpAuditSink};

/// Default number of entries kept in memory.
pub const DEFAULT_CAPACITY: usize = 100;
/// Default number of entries a query returns.
pub const DEFAULT_QUERY_LIMIT: usize = 50;

const ANONYMOUS_NAME: &str = "Guest";
const USER_AGENT: &str = concat!("autopro-client/", env!("CARGO_PKG_VERSION"));

/// Optional fields of a logged event.
#[derive(Debug, Clone, Default)]
pub struct LogOptions {
    pub level: AuditLevel,
    pub target: Option<String>,
    pub details: Option<Value>,
}

impl LogOptions {
    #[must_use]
    pub fn level(level: AuditLevel) -> Self {
        Self {
            level,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    #[must_use]
    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    fn maybe(level: AuditLevel, target: Option<&str>, details: Option<Value>) -> Self {
        Self {
            level,
            target: target.map(ToOwned::to_owned),
            details,
        }
    }
}

/// Filters for [`AuditLogger::query`]. All set filters must match.
#[derive(Debug, Clone)]
pub struct AuditQuery {
    pub user_id: Option<UserId>,
    pub level: Option<AuditLevel>,
    pub event_type: Option<AuditEventType>,
    /// Inclusive lower bound, Unix milliseconds.
    pub from: Option<i64>,
    /// Inclusive upper bound, Unix milliseconds.
    pub to: Option<i64>,
    pub limit: usize,
}

impl Default for AuditQuery {
    fn default() -> Self {
        Self {
            user_id: None,
            level: None,
            event_type: None,
            from: None,
            to: None,
            limit: DEFAULT_QUERY_LIMIT,
        }
    }
}

impl AuditQuery {
    /// A query returning every buffered entry.
    #[must_use]
    pub fn all() -> Self {
        Self {
            limit: usize::MAX,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn user(mut self, user_id: impl Into<UserId>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    #[must_use]
    pub const fn level(mut self, level: AuditLevel) -> Self {
        self.level = Some(level);
        self
    }

    #[must_use]
    pub const fn event_type(mut self, event_type: AuditEventType) -> Self {
        self.event_type = Some(event_type);
        self
    }

    #[must_use]
    pub const fn between(mut self, from: Option<i64>, to: Option<i64>) -> Self {
        self.from = from;
        self.to = to;
        self
    }

    #[must_use]
    pub const fn limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    fn matches(&self, entry: &AuditLogEntry) -> bool {
        self.user_id.as_ref().is_none_or(|id| *id == entry.user_id)
            && self.level.is_none_or(|level| level == entry.level)
            && self.event_type.is_none_or(|ty| ty == entry.event_type)
            && self.from.is_none_or(|from| entry.timestamp >= from)
            && self.to.is_none_or(|to| entry.timestamp <= to)
    }
}

/// Audit trail.
///
/// Cheap to clone; clones share the buffer. The acting identity and the
/// timestamp of every entry come from the [`AuthStore`].
#[derive(Clone)]
pub struct AuditLogger {
    inner: Arc<AuditLoggerInner>,
}

struct AuditLoggerInner {
    entries: RwLock<VecDeque<AuditLogEntry>>,
    auth: AuthStore,
    sink: Option<Arc<dyn AuditSink>>,
    capacity: usize,
    ip: Option<String>,
    pending: Mutex<JoinSet<()>>,
}

impl Drop for AuditLoggerInner {
    // Forwards outlive the logger unless flushed.
    fn drop(&mut self) {
        self.pending
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .detach_all();
    }
}

impl std::fmt::Debug for AuditLogger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditLogger")
            .field("entries", &self.len())
            .field("capacity", &self.inner.capacity)
            .field("sink", &self.inner.sink.as_ref().map(|s| s.name().to_owned()))
            .finish_non_exhaustive()
    }
}

impl AuditLogger {
    /// Create a logger keeping at most `capacity` entries, without a sink.
    ///
    /// `ip` is recorded on every entry.
    #[must_use]
    pub fn new(auth: AuthStore, capacity: usize, ip: Option<String>) -> Self {
        Self::build(auth, capacity, None, ip)
    }

    /// Create a logger that also forwards entries to `sink`.
    #[must_use]
    pub fn with_sink(
        auth: AuthStore,
        capacity: usize,
        sink: Arc<dyn AuditSink>,
        ip: Option<String>,
    ) -> Self {
        Self::build(auth, capacity, Some(sink), ip)
    }

    fn build(
        auth: AuthStore,
        capacity: usize,
        sink: Option<Arc<dyn AuditSink>>,
        ip: Option<String>,
    ) -> Self {
        Self {
            inner: Arc::new(AuditLoggerInner {
                entries: RwLock::new(VecDeque::with_capacity(capacity)),
                auth,
                sink,
                capacity,
                ip,
                pending: Mutex::new(JoinSet::new()),
            }),
        }
    }

    // =========================================================================
    // Recording
    // =========================================================================

    /// Record an event as the current user, or as an anonymous guest.
    pub fn log(&self, event_type: AuditEventType, action: impl Into<String>, options: LogOptions) {
        let auth = &self.inner.auth;
        let (user_id, user_name, user_role) = auth.current_user().map_or_else(
            || (UserId::anonymous(), ANONYMOUS_NAME.to_owned(), Role::Guest),
            |user| (user.id, user.name, user.role),
        );

        let entry = AuditLogEntry {
            user_id,
            user_name,
            user_role,
            timestamp: auth.now_millis(),
            event_type,
            level: options.level,
            action: action.into(),
            target: options.target,
            details: options.details,
            ip: self.inner.ip.clone(),
            user_agent: Some(USER_AGENT.to_owned()),
            app_version: env!("CARGO_PKG_VERSION").to_owned(),
        };

        info!(
            event_type = %entry.event_type,
            level = %entry.level,
            user_id = %entry.user_id,
            target = entry.target.as_deref(),
            "{}",
            entry.action
        );

        if let Some(sink) = &self.inner.sink {
            self.forward(Arc::clone(sink), entry.clone());
        }

        let mut entries = self
            .inner
            .entries
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        entries.push_front(entry);
        entries.truncate(self.inner.capacity);
    }

    fn forward(&self, sink: Arc<dyn AuditSink>, entry: AuditLogEntry) {
        let Ok(runtime) = Handle::try_current() else {
            warn!(sink = sink.name(), "no async runtime, audit entry not forwarded");
            return;
        };

        let mut pending = self
            .inner
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        while pending.try_join_next().is_some() {}

        pending.spawn_on(
            async move {
                if let Err(e) = sink.send(&entry).await {
                    warn!(sink = sink.name(), error = %e, "failed to forward audit entry");
                }
            },
            &runtime,
        );
    }

    /// Wait until every forward started so far has finished.
    ///
    /// Forwarding errors are already logged by the background task; this
    /// never fails.
    pub async fn flush(&self) {
        let mut pending = std::mem::take(
            &mut *self
                .inner
                .pending
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        );

        while let Some(result) = pending.join_next().await {
            if let Err(e) = result {
                warn!(error = %e, "audit forward task did not complete");
            }
        }
    }

    /// INFO-level user update.
    pub fn info(&self, action: impl Into<String>, target: Option<&str>, details: Option<Value>) {
        self.log(
            AuditEventType::UserUpdated,
            action,
            LogOptions::maybe(AuditLevel::Info, target, details),
        );
    }

    /// WARNING-level user update.
    pub fn warning(&self, action: impl Into<String>, target: Option<&str>, details: Option<Value>) {
        self.log(
            AuditEventType::UserUpdated,
            action,
            LogOptions::maybe(AuditLevel::Warning, target, details),
        );
    }

    /// ERROR-level API failure.
    pub fn error(&self, action: impl Into<String>, target: Option<&str>, details: Option<Value>) {
        self.log(
            AuditEventType::ApiError,
            action,
            LogOptions::maybe(AuditLevel::Error, target, details),
        );
    }

    /// CRITICAL-level permission denial.
    pub fn critical(&self, action: impl Into<String>, target: Option<&str>, details: Option<Value>) {
        self.log(
            AuditEventType::PermissionDenied,
            action,
            LogOptions::maybe(AuditLevel::Critical, target, details),
        );
    }

    pub fn user_login(&self, user_id: &UserId, details: Option<Value>) {
        self.log(
            AuditEventType::UserLogin,
            "User signed in",
            LogOptions::maybe(AuditLevel::Info, Some(user_id.as_str()), details),
        );
    }

    pub fn user_logout(&self, user_id: &UserId) {
        self.log(
            AuditEventType::UserLogout,
            "User signed out",
            LogOptions::maybe(AuditLevel::Info, Some(user_id.as_str()), None),
        );
    }

    /// WARNING-level settings change.
    pub fn admin_action(
        &self,
        action: impl Into<String>,
        target: Option<&str>,
        details: Option<Value>,
    ) {
        self.log(
            AuditEventType::SettingsUpdated,
            action,
            LogOptions::maybe(AuditLevel::Warning, target, details),
        );
    }

    // =========================================================================
    // Reading
    // =========================================================================

    /// Entries matching `query`, newest first, at most `query.limit`.
    #[must_use]
    pub fn query(&self, query: &AuditQuery) -> Vec<AuditLogEntry> {
        self.read()
            .iter()
            .filter(|entry| query.matches(entry))
            .take(query.limit)
            .cloned()
            .collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every buffered entry.
    pub fn clear(&self) {
        self.inner
            .entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, VecDeque<AuditLogEntry>> {
        self.inner
            .entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn auth(&self) -> &AuthStore {
        &self.inner.auth
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::time::Duration;

    use async_trait::async_trait;
    use autopro_core::{AuthUser, ManualClock, Session};
    use serde_json::json;

    use super::*;
    use crate::auth::MemoryStorage;

    const NOW: i64 = 1_700_000_000_000;

    fn logger() -> (AuditLogger, AuthStore, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(NOW));
        let auth = AuthStore::new(Arc::new(MemoryStorage::new()), clock.clone());
        (
            AuditLogger::new(auth.clone(), DEFAULT_CAPACITY, Some("127.0.0.1".to_string())),
            auth,
            clock,
        )
    }

    fn sign_in(auth: &AuthStore, user: &AuthUser) {
        auth.save_session(&Session::new("a", "r", NOW + 3_600_000), user)
            .expect("save");
    }

    #[derive(Debug, Default)]
    struct RecordingSink {
        sent: Mutex<Vec<AuditLogEntry>>,
        fail: bool,
    }

    #[async_trait]
    impl AuditSink for RecordingSink {
        fn name(&self) -> &str {
            "recording"
        }

        async fn send(&self, entry: &AuditLogEntry) -> Result<(), AuditError> {
            if self.fail {
                return Err(AuditError::Forward("unavailable".to_string()));
            }
            self.sent.lock().expect("lock").push(entry.clone());
            Ok(())
        }
    }

    #[test]
    fn test_anonymous_identity() {
        let (logger, _, _) = logger();
        logger.log(AuditEventType::CarCreated, "Viewed catalog", LogOptions::default());

        let entries = logger.query(&AuditQuery::default());
        let entry = &entries[0];
        assert_eq!(entry.user_id, UserId::anonymous());
        assert_eq!(entry.user_name, "Guest");
        assert_eq!(entry.user_role, Role::Guest);
        assert_eq!(entry.timestamp, NOW);
        assert_eq!(entry.level, AuditLevel::Info);
        assert_eq!(entry.app_version, env!("CARGO_PKG_VERSION"));
        assert!(entry.user_agent.as_deref().is_some_and(|ua| ua.starts_with("autopro-client/")));
        assert_eq!(entry.ip.as_deref(), Some("127.0.0.1"));
    }

    #[test]
    fn test_uses_current_user() {
        let (logger, auth, _) = logger();
        sign_in(&auth, &AuthUser::new("9", "Olga", Role::Manager));

        logger.log(
            AuditEventType::CarUpdated,
            "Changed price",
            LogOptions::level(AuditLevel::Warning)
                .with_target("car_3")
                .with_details(json!({"from": 3000, "to": 3500})),
        );

        let entry = logger.query(&AuditQuery::default()).remove(0);
        assert_eq!(entry.user_id, UserId::new("9"));
        assert_eq!(entry.user_name, "Olga");
        assert_eq!(entry.user_role, Role::Manager);
        assert_eq!(entry.target.as_deref(), Some("car_3"));
        assert_eq!(entry.details, Some(json!({"from": 3000, "to": 3500})));
    }

    #[test]
    fn test_ring_keeps_newest() {
        let (logger, _, _) = logger();
        for i in 0..105 {
            logger.info(format!("event {i}"), None, None);
        }

        assert_eq!(logger.len(), 100);
        let entries = logger.query(&AuditQuery::all());
        assert_eq!(entries.len(), 100);
        assert_eq!(entries[0].action, "event 104");
        assert_eq!(entries[99].action, "event 5");
        assert!(entries.iter().all(|e| e.action != "event 4"));
    }

    #[test]
    fn test_query_filters_conjunctively() {
        let (logger, auth, clock) = logger();

        logger.error("Timeout on /cars", None, None);
        clock.advance(Duration::from_secs(10));

        sign_in(&auth, &AuthUser::new("1", "Admin", Role::Admin));
        logger.admin_action("Changed currency", Some("settings"), None);
        clock.advance(Duration::from_secs(10));
        logger.critical("Tried to delete admin", Some("user_1"), None);
        clock.advance(Duration::from_secs(10));
        logger.warning("Reset password", Some("user_5"), None);

        let by_user = logger.query(&AuditQuery::default().user("1"));
        assert_eq!(by_user.len(), 3);

        let warnings = logger.query(&AuditQuery::default().user("1").level(AuditLevel::Warning));
        assert_eq!(
            warnings.iter().map(|e| e.action.as_str()).collect::<Vec<_>>(),
            vec!["Reset password", "Changed currency"]
        );

        let settings = logger.query(
            &AuditQuery::default()
                .event_type(AuditEventType::SettingsUpdated)
                .level(AuditLevel::Warning),
        );
        assert_eq!(settings.len(), 1);

        let window = logger.query(&AuditQuery::default().between(Some(NOW + 10_000), Some(NOW + 20_000)));
        assert_eq!(window.len(), 2);
        assert_eq!(window[0].event_type, AuditEventType::PermissionDenied);
        assert_eq!(window[1].event_type, AuditEventType::SettingsUpdated);

        assert_eq!(logger.query(&AuditQuery::default().limit(1)).len(), 1);
    }

    #[test]
    fn test_default_query_limit() {
        let (logger, _, _) = logger();
        for i in 0..80 {
            logger.info(format!("event {i}"), None, None);
        }
        assert_eq!(logger.query(&AuditQuery::default()).len(), DEFAULT_QUERY_LIMIT);
    }

    #[test]
    fn test_login_logout_helpers() {
        let (logger, _, _) = logger();
        let id = UserId::new("42");
        logger.user_login(&id, Some(json!({"provider": "email"})));
        logger.user_logout(&id);

        let entries = logger.query(&AuditQuery::default());
        assert_eq!(entries[0].event_type, AuditEventType::UserLogout);
        assert_eq!(entries[1].event_type, AuditEventType::UserLogin);
        assert!(entries.iter().all(|e| e.target.as_deref() == Some("42")));
    }

    #[test]
    fn test_clear() {
        let (logger, _, _) = logger();
        logger.info("x", None, None);
        logger.clear();
        assert!(logger.is_empty());
    }

    #[tokio::test]
    async fn test_forwards_to_sink() {
        let clock = Arc::new(ManualClock::new(NOW));
        let auth = AuthStore::new(Arc::new(MemoryStorage::new()), clock);
        let sink = Arc::new(RecordingSink::default());
        let logger = AuditLogger::with_sink(auth, 10, sink.clone(), Some("10.0.0.1".to_string()));

        logger.admin_action("Enabled maintenance", None, None);
        logger.flush().await;

        let sent = sink.sent.lock().expect("lock");
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].ip.as_deref(), Some("10.0.0.1"));
    }

    #[tokio::test]
    async fn test_sink_failure_does_not_affect_caller() {
        let auth = AuthStore::in_memory();
        let sink = Arc::new(RecordingSink {
            fail: true,
            ..RecordingSink::default()
        });
        let logger = AuditLogger::with_sink(auth, 10, sink, None);

        logger.error("Backend down", None, None);
        logger.flush().await;

        assert_eq!(logger.len(), 1);
    }

    #[test]
    fn test_sink_without_runtime_still_records() {
        let logger = AuditLogger::with_sink(
            AuthStore::in_memory(),
            10,
            Arc::new(RecordingSink::default()),
            None,
        );
        logger.info("offline", None, None);
        assert_eq!(logger.len(), 1);
    }

    #[test]
    fn test_ip_recorded_without_sink() {
        let logger = AuditLogger::new(AuthStore::in_memory(), 10, Some("10.0.0.1".to_string()));
        logger.info("local only", None, None);
        let entry = logger.query(&AuditQuery::default()).remove(0);
        assert_eq!(entry.ip.as_deref(), Some("10.0.0.1"));
    }

    #[derive(Debug)]
    struct SlowSink {
        sent: Arc<Mutex<usize>>,
    }

    #[async_trait]
    impl AuditSink for SlowSink {
        fn name(&self) -> &str {
            "slow"
        }

        async fn send(&self, _: &AuditLogEntry) -> Result<(), AuditError> {
            tokio::time::sleep(Duration::from_millis(50)).await;
            *self.sent.lock().expect("lock") += 1;
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_flush_waits_for_forwards() {
        let sent = Arc::new(Mutex::new(0));
        let sink = Arc::new(SlowSink { sent: sent.clone() });
        let logger = AuditLogger::with_sink(AuthStore::in_memory(), 10, sink, None);

        logger.info("one", None, None);
        logger.info("two", None, None);
        assert_eq!(*sent.lock().expect("lock"), 0);

        logger.flush().await;
        assert_eq!(*sent.lock().expect("lock"), 2);

        // Nothing pending
        logger.flush().await;
    }
}
