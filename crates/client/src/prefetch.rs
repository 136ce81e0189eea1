//! Debounced background prefetching of GET endpoints into the response cache.

use std::time::Duration;

use serde::de::DeserializeOwned;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, instrument, warn};

use crate::api::ApiClient;
use crate::cache::ResponseCache;

/// Cache key a prefetched `path` is stored under.
#[must_use]
pub fn cache_key(path: &str) -> String {
    format!("prefetch_{path}")
}

/// Warms the [`ResponseCache`] ahead of navigation.
#[derive(Debug, Clone)]
pub struct Prefetcher {
    api: ApiClient,
    cache: ResponseCache,
    delay: Duration,
    ttl: Duration,
}

impl Prefetcher {
    /// Create a prefetcher that waits `delay` before fetching and caches
    /// results for the cache's default TTL.
    #[must_use]
    pub fn new(api: ApiClient, cache: ResponseCache, delay: Duration) -> Self {
        let ttl = cache.default_ttl();
        Self {
            api,
            cache,
            delay,
            ttl,
        }
    }

    #[must_use]
    pub const fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Fetch `paths` after the debounce delay, caching each response under
    /// [`cache_key`].
    ///
    /// Dropping or cancelling the returned handle before the delay elapses
    /// prevents the fetches. Nothing is scheduled when `paths` is empty or
    /// no tokio runtime is running.
    pub fn schedule<T>(&self, paths: &[&str]) -> PrefetchHandle
    where
        T: DeserializeOwned + Send + Sync + 'static,
    {
        if paths.is_empty() {
            return PrefetchHandle { task: None };
        }

        let Ok(runtime) = Handle::try_current() else {
            warn!("no async runtime, prefetch skipped");
            return PrefetchHandle { task: None };
        };

        let this = self.clone();
        let paths: Vec<String> = paths.iter().map(|p| (*p).to_owned()).collect();

        let task = runtime.spawn(async move {
            tokio::time::sleep(this.delay).await;
            this.prefetch_now::<T>(&paths).await;
        });

        PrefetchHandle { task: Some(task) }
    }

    /// Fetch and cache `paths` immediately.
    ///
    /// Failures are logged and skipped.
    #[instrument(skip(self))]
    pub async fn prefetch_now<T>(&self, paths: &[String])
    where
        T: DeserializeOwned + Send + Sync + 'static,
    {
        let fetches = paths.iter().map(|path| async move {
            let result = self
                .cache
                .prefetch(&cache_key(path), self.ttl, || self.api.get::<T>(path))
                .await;

            match result {
                Ok(()) => debug!(path, "prefetched"),
                Err(e) => warn!(path, error = %e, "prefetch failed"),
            }
        });

        futures::future::join_all(fetches).await;
    }

    /// Fire uncached GETs for `paths` in the background, ignoring the results.
    ///
    /// Warms the HTTP connection pool and any server-side caches before
    /// navigation.
    pub fn prefetch_routes(&self, paths: &[&str]) {
        let Ok(runtime) = Handle::try_current() else {
            return;
        };

        for path in paths {
            let api = self.api.clone();
            let path = (*path).to_owned();
            runtime.spawn(async move {
                if let Err(e) = api.get::<serde_json::Value>(&path).await {
                    debug!(path, error = %e, "route prefetch failed");
                }
            });
        }
    }
}

/// A pending prefetch. Cancels on drop.
#[derive(Debug)]
#[must_use = "dropping the handle cancels the prefetch"]
pub struct PrefetchHandle {
    task: Option<JoinHandle<()>>,
}

impl PrefetchHandle {
    /// Stop the prefetch. Fetches already under way are aborted too.
    pub fn cancel(mut self) {
        self.abort();
    }

    /// Wait for the prefetch to finish.
    pub async fn wait(mut self) {
        if let Some(task) = self.task.take()
            && let Err(e) = task.await
            && !e.is_cancelled()
        {
            warn!(error = %e, "prefetch task failed");
        }
    }

    /// Whether nothing is left to run.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.task.as_ref().is_none_or(JoinHandle::is_finished)
    }

    fn abort(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for PrefetchHandle {
    fn drop(&mut self) {
        self.abort();
    }
}
