//! Optimistic mutations with bounded exponential-backoff retry.
//!
//! A mutation applies the caller's optimistic update first, then sends the
//! request through the [`ApiClient`], retrying failures the
//! [`should_retry`](MutationOptions::should_retry) predicate accepts. The delay
//! before retry `n` (0-indexed) is `retry_delay * 2^n`.
//!
//! There is no automatic rollback. When a mutation ends in
//! [`MutationStatus::Error`] the caller must reconcile its optimistic state,
//! either from the `on_error` callback or by watching [`MutationState`].

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::watch;
use tracing::{debug, instrument};

use crate::api::{ApiClient, ApiError, ApiErrorKind};
use crate::cache::ResponseCache;

/// Default number of retries after the first attempt.
pub const DEFAULT_MAX_RETRIES: u32 = 3;
/// Default backoff base.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(1000);

/// HTTP method of a mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationMethod {
    Post,
    Put,
    Patch,
    /// Sends no body.
    Delete,
}

impl MutationMethod {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
        }
    }
}

impl fmt::Display for MutationMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle of a mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MutationStatus {
    #[default]
    Idle,
    Loading,
    Success,
    Error,
}

/// Observable state of a mutation.
#[derive(Debug, Clone, PartialEq)]
pub struct MutationState<R> {
    pub status: MutationStatus,
    /// Response of the last successful call.
    pub data: Option<R>,
    /// Error of the last failed call.
    pub error: Option<ApiError>,
}

impl<R> Default for MutationState<R> {
    fn default() -> Self {
        Self {
            status: MutationStatus::Idle,
            data: None,
            error: None,
        }
    }
}

type RetryPredicate = Arc<dyn Fn(&ApiError, u32) -> bool + Send + Sync>;
type Callback<V> = Arc<dyn Fn(&V) + Send + Sync>;

/// Configuration for an [`OptimisticMutation`].
pub struct MutationOptions<T, R> {
    path: String,
    method: MutationMethod,
    cache_prefix: Option<String>,
    max_retries: u32,
    retry_delay: Duration,
    should_retry: RetryPredicate,
    on_optimistic_update: Option<Callback<T>>,
    on_success: Option<Callback<R>>,
    on_error: Option<Callback<ApiError>>,
}

impl<T, R> MutationOptions<T, R> {
    /// Options for `method` on `path`, retrying network errors only.
    pub fn new(path: impl Into<String>, method: MutationMethod) -> Self {
        Self {
            path: path.into(),
            method,
            cache_prefix: None,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_delay: DEFAULT_RETRY_DELAY,
            should_retry: Arc::new(|error: &ApiError, _: u32| {
                error.kind() == ApiErrorKind::Network
            }),
            on_optimistic_update: None,
            on_success: None,
            on_error: None,
        }
    }

    /// Evict cache keys starting with `prefix` after a successful call.
    #[must_use]
    pub fn cache_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.cache_prefix = Some(prefix.into());
        self
    }

    #[must_use]
    pub const fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    #[must_use]
    pub const fn retry_delay(mut self, retry_delay: Duration) -> Self {
        self.retry_delay = retry_delay;
        self
    }

    /// Decide whether a failed attempt is retried. Receives the error and
    /// the 0-indexed attempt that produced it.
    #[must_use]
    pub fn should_retry<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&ApiError, u32) -> bool + Send + Sync + 'static,
    {
        self.should_retry = Arc::new(predicate);
        self
    }

    /// Applied to the input before the request is sent.
    #[must_use]
    pub fn on_optimistic_update<F>(mut self, callback: F) -> Self
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        self.on_optimistic_update = Some(Arc::new(callback));
        self
    }

    #[must_use]
    pub fn on_success<F>(mut self, callback: F) -> Self
    where
        F: Fn(&R) + Send + Sync + 'static,
    {
        self.on_success = Some(Arc::new(callback));
        self
    }

    #[must_use]
    pub fn on_error<F>(mut self, callback: F) -> Self
    where
        F: Fn(&ApiError) + Send + Sync + 'static,
    {
        self.on_error = Some(Arc::new(callback));
        self
    }

    /// Backoff before retry `attempt`.
    fn backoff(&self, attempt: u32) -> Duration {
        self.retry_delay
            .saturating_mul(2_u32.saturating_pow(attempt))
    }
}

impl<T, R> fmt::Debug for MutationOptions<T, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MutationOptions")
            .field("path", &self.path)
            .field("method", &self.method)
            .field("cache_prefix", &self.cache_prefix)
            .field("max_retries", &self.max_retries)
            .field("retry_delay", &self.retry_delay)
            .finish_non_exhaustive()
    }
}

/// A reusable mutation bound to one endpoint.
pub struct OptimisticMutation<T, R> {
    api: ApiClient,
    cache: Option<ResponseCache>,
    options: MutationOptions<T, R>,
    state: watch::Sender<MutationState<R>>,
}

impl<T, R> fmt::Debug for OptimisticMutation<T, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OptimisticMutation")
            .field("options", &self.options)
            .field("status", &self.state.borrow().status)
            .finish_non_exhaustive()
    }
}

impl<T, R> OptimisticMutation<T, R>
where
    T: Serialize,
    R: DeserializeOwned + Clone,
{
    /// Create a mutation without cache eviction.
    #[must_use]
    pub fn new(api: ApiClient, options: MutationOptions<T, R>) -> Self {
        Self {
            api,
            cache: None,
            options,
            state: watch::Sender::new(MutationState::default()),
        }
    }

    /// Use `cache` for [`cache_prefix`](MutationOptions::cache_prefix) eviction.
    #[must_use]
    pub fn with_cache(mut self, cache: ResponseCache) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Run the mutation.
    ///
    /// Returns the response on success, or `None` once retries are exhausted;
    /// the error is then available from [`error`](Self::error).
    #[instrument(skip_all, fields(method = %self.options.method, path = %self.options.path))]
    pub async fn mutate(&self, data: T) -> Option<R> {
        self.state.send_modify(|state| {
            state.status = MutationStatus::Loading;
            state.error = None;
        });

        if let Some(update) = &self.options.on_optimistic_update {
            update(&data);
        }

        match self.execute_with_retry(&data).await {
            Ok(response) => {
                if let (Some(prefix), Some(cache)) = (&self.options.cache_prefix, &self.cache) {
                    cache.invalidate_by_prefix(prefix).await;
                }

                self.state.send_modify(|state| {
                    state.status = MutationStatus::Success;
                    state.data = Some(response.clone());
                });

                if let Some(on_success) = &self.options.on_success {
                    on_success(&response);
                }

                Some(response)
            }
            Err(error) => {
                self.state.send_modify(|state| {
                    state.status = MutationStatus::Error;
                    state.error = Some(error.clone());
                });

                if let Some(on_error) = &self.options.on_error {
                    on_error(&error);
                }

                None
            }
        }
    }

    /// Return to [`MutationStatus::Idle`] and drop data and error.
    pub fn reset(&self) {
        self.state.send_replace(MutationState::default());
    }

    #[must_use]
    pub fn status(&self) -> MutationStatus {
        self.state.borrow().status
    }

    #[must_use]
    pub fn data(&self) -> Option<R> {
        self.state.borrow().data.clone()
    }

    #[must_use]
    pub fn error(&self) -> Option<ApiError> {
        self.state.borrow().error.clone()
    }

    #[must_use]
    pub fn is_loading(&self) -> bool {
        self.status() == MutationStatus::Loading
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status() == MutationStatus::Success
    }

    #[must_use]
    pub fn is_error(&self) -> bool {
        self.status() == MutationStatus::Error
    }

    /// Watch state transitions.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<MutationState<R>> {
        self.state.subscribe()
    }

    async fn execute_with_retry(&self, data: &T) -> Result<R, ApiError> {
        let mut attempt = 0;

        loop {
            match self.send(data).await {
                Ok(response) => return Ok(response),
                Err(error)
                    if attempt < self.options.max_retries
                        && (self.options.should_retry)(&error, attempt) =>
                {
                    let delay = self.options.backoff(attempt);
                    debug!(attempt, ?delay, error = %error, "retrying mutation");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(error) => return Err(error),
            }
        }
    }

    async fn send(&self, data: &T) -> Result<R, ApiError> {
        let path = self.options.path.as_str();
        match self.options.method {
            MutationMethod::Post => self.api.post(path, data).await,
            MutationMethod::Put => self.api.put(path, data).await,
            MutationMethod::Patch => self.api.patch(path, data).await,
            MutationMethod::Delete => self.api.delete(path).await,
        }
    }
}
