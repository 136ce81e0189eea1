//! Key-addressed TTL cache wrapping arbitrary fetch functions.
//!
//! Entries are type-erased so one cache can hold every response shape; a read
//! with the wrong type is treated as a miss. Validity is checked lazily on read
//! against the injected [`Clock`]: an entry is valid while
//! `now - timestamp < ttl`. Stale entries stay in the map until they are
//! overwritten, invalidated or pushed out by the capacity bound.
//!
//! # Concurrency
//!
//! Fetches are not coalesced. Two overlapping [`ResponseCache::get`] calls for
//! a key that is not cached both run their fetch function, and the later
//! result overwrites the earlier one.

use std::any::Any;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use autopro_core::Clock;
use futures::future::try_join_all;
use moka::future::Cache;
use tracing::debug;

/// Options for [`ResponseCache::get_with_options`].
#[derive(Debug, Clone, Copy, Default)]
pub struct CacheOptions {
    /// Skip the cached value and fetch again.
    pub force: bool,
}

/// One entry of a [`ResponseCache::batch_prefetch`] call.
#[derive(Debug)]
pub struct PrefetchRequest<F> {
    pub key: String,
    pub ttl: Duration,
    pub fetch: F,
}

impl<F> PrefetchRequest<F> {
    pub fn new(key: impl Into<String>, ttl: Duration, fetch: F) -> Self {
        Self {
            key: key.into(),
            ttl,
            fetch,
        }
    }
}

#[derive(Clone)]
struct CacheEntry {
    data: Arc<dyn Any + Send + Sync>,
    /// Unix milliseconds when the entry was written.
    timestamp: i64,
    ttl_ms: i64,
}

impl CacheEntry {
    fn is_valid_at(&self, now_ms: i64) -> bool {
        now_ms.saturating_sub(self.timestamp) < self.ttl_ms
    }
}

/// Shared response cache.
///
/// Cheap to clone; clones share the same entries. Construct one per
/// application (or per test) rather than using a global.
#[derive(Clone)]
pub struct ResponseCache {
    inner: Arc<ResponseCacheInner>,
}

struct ResponseCacheInner {
    entries: Cache<String, CacheEntry>,
    clock: Arc<dyn Clock>,
    default_ttl: Duration,
}

impl std::fmt::Debug for ResponseCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseCache")
            .field("entries", &self.inner.entries.entry_count())
            .field("default_ttl", &self.inner.default_ttl)
            .finish_non_exhaustive()
    }
}

impl ResponseCache {
    /// Create a cache holding at most `capacity` entries.
    ///
    /// Once full, admission is decided by moka's TinyLFU policy, which may
    /// reject a fresh insert in favour of more frequently used keys. A
    /// rejected key misses on the next read and is fetched again, so size
    /// `capacity` well above the working set.
    #[must_use]
    pub fn new(capacity: u64, default_ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        let entries = Cache::builder().max_capacity(capacity).build();

        Self {
            inner: Arc::new(ResponseCacheInner {
                entries,
                clock,
                default_ttl,
            }),
        }
    }

    /// TTL used by callers that do not pick their own.
    #[must_use]
    pub fn default_ttl(&self) -> Duration {
        self.inner.default_ttl
    }

    /// Return the cached value for `key`, or fetch and cache it.
    ///
    /// # Errors
    ///
    /// Propagates the error from `fetch`; nothing is cached in that case.
    pub async fn get<T, E, F, Fut>(&self, key: &str, ttl: Duration, fetch: F) -> Result<T, E>
    where
        T: Clone + Send + Sync + 'static,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.get_with_options(key, ttl, fetch, CacheOptions::default())
            .await
    }

    /// [`get`](Self::get) with options.
    ///
    /// # Errors
    ///
    /// Propagates the error from `fetch`; nothing is cached in that case.
    pub async fn get_with_options<T, E, F, Fut>(
        &self,
        key: &str,
        ttl: Duration,
        fetch: F,
        options: CacheOptions,
    ) -> Result<T, E>
    where
        T: Clone + Send + Sync + 'static,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if !options.force
            && let Some(data) = self.peek::<T>(key).await
        {
            debug!(key, "cache hit");
            return Ok(data);
        }

        debug!(key, force = options.force, "cache miss");
        let data = fetch().await?;
        self.store(key, ttl, data.clone()).await;
        Ok(data)
    }

    /// Fetch unconditionally and replace the cached value.
    ///
    /// # Errors
    ///
    /// Propagates the error from `fetch`; the previous entry is kept.
    pub async fn refetch<T, E, F, Fut>(&self, key: &str, ttl: Duration, fetch: F) -> Result<T, E>
    where
        T: Clone + Send + Sync + 'static,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.get_with_options(key, ttl, fetch, CacheOptions { force: true })
            .await
    }

    /// Warm `key` without returning the value.
    ///
    /// # Errors
    ///
    /// Propagates the error from `fetch`.
    pub async fn prefetch<T, E, F, Fut>(&self, key: &str, ttl: Duration, fetch: F) -> Result<(), E>
    where
        T: Send + Sync + 'static,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let data = fetch().await?;
        self.store(key, ttl, data).await;
        Ok(())
    }

    /// Prefetch several keys concurrently.
    ///
    /// # Errors
    ///
    /// Returns the first fetch error. Keys whose fetch already finished stay
    /// cached.
    pub async fn batch_prefetch<T, E, F, Fut, I>(&self, requests: I) -> Result<(), E>
    where
        T: Send + Sync + 'static,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        I: IntoIterator<Item = PrefetchRequest<F>>,
    {
        try_join_all(
            requests
                .into_iter()
                .map(|request| async move { self.prefetch(&request.key, request.ttl, request.fetch).await }),
        )
        .await?;
        Ok(())
    }

    /// The cached value for `key` if it is valid and of type `T`.
    pub async fn peek<T>(&self, key: &str) -> Option<T>
    where
        T: Clone + Send + Sync + 'static,
    {
        let entry = self.valid_entry(key).await?;
        entry.data.downcast_ref::<T>().cloned()
    }

    /// Whether `key` holds a valid entry of any type.
    pub async fn contains(&self, key: &str) -> bool {
        self.valid_entry(key).await.is_some()
    }

    /// Remove `key` if present.
    pub async fn invalidate(&self, key: &str) {
        self.inner.entries.invalidate(key).await;
    }

    /// Remove every entry whose key starts with `prefix`.
    pub async fn invalidate_by_prefix(&self, prefix: &str) {
        let keys: Vec<Arc<String>> = self
            .inner
            .entries
            .iter()
            .filter(|(key, _)| key.starts_with(prefix))
            .map(|(key, _)| key)
            .collect();

        debug!(prefix, count = keys.len(), "invalidating cache prefix");
        for key in keys {
            self.inner.entries.invalidate(key.as_str()).await;
        }
    }

    /// Remove every entry.
    pub async fn clear_all(&self) {
        self.inner.entries.invalidate_all();
        self.inner.entries.run_pending_tasks().await;
    }

    async fn valid_entry(&self, key: &str) -> Option<CacheEntry> {
        let entry = self.inner.entries.get(key).await?;
        entry
            .is_valid_at(self.inner.clock.now_millis())
            .then_some(entry)
    }

    async fn store<T>(&self, key: &str, ttl: Duration, data: T)
    where
        T: Send + Sync + 'static,
    {
        let entry = CacheEntry {
            data: Arc::new(data),
            timestamp: self.inner.clock.now_millis(),
            ttl_ms: i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX),
        };
        self.inner.entries.insert(key.to_owned(), entry).await;
    }
}
