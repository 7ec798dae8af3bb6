//! Stale-while-revalidate resource cache.
//!
//! Entries are keyed by [`CacheKey`]. For each key there is at most one
//! in-flight fetch; readers arriving while it runs, or within the dedupe window
//! after it settled, share its result. Every subscriber of a key observes the
//! same [`Snapshot`] through a `watch` channel.
//!
//! Ordering: each fetch gets a sequence number and only the most recently
//! issued fetch of a key may update the entry. A result that settles after a
//! newer fetch (or a local [`set_data`](ResourceCache::set_data)) was issued is
//! discarded.
//!
//! Fetches run on spawned tasks and always complete. Dropping a [`Resource`]
//! only stops observing; the entry is still updated.
//!
//! Entries with no subscriber, no fetch in flight and no data younger than
//! their dedupe window are evicted whenever a key is registered.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::watch;
use tokio::time::Instant;

use super::error::FetchError;
use crate::types::CacheKey;

type Fetcher = Arc<dyn Fn() -> BoxFuture<'static, Result<Value, FetchError>> + Send + Sync>;
type SharedFetch = Shared<BoxFuture<'static, Result<Arc<Value>, FetchError>>>;

/// Per-key revalidation policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheOptions {
    pub revalidate_on_focus: bool,
    pub revalidate_on_reconnect: bool,
    pub revalidate_on_mount: bool,
    pub deduping_interval: Duration,
    /// Off by default.
    pub retry_on_error: bool,
    pub error_retry_count: u32,
    pub error_retry_interval: Duration,
}

impl Default for CacheOptions {
    fn default() -> Self {
        Self {
            revalidate_on_focus: false,
            revalidate_on_reconnect: true,
            revalidate_on_mount: true,
            deduping_interval: Duration::from_secs(60),
            retry_on_error: false,
            error_retry_count: 3,
            error_retry_interval: Duration::from_secs(5),
        }
    }
}

impl CacheOptions {
    #[must_use]
    pub fn with_revalidate_on_focus(mut self, enabled: bool) -> Self {
        self.revalidate_on_focus = enabled;
        self
    }

    #[must_use]
    pub fn with_revalidate_on_reconnect(mut self, enabled: bool) -> Self {
        self.revalidate_on_reconnect = enabled;
        self
    }

    #[must_use]
    pub fn with_revalidate_on_mount(mut self, enabled: bool) -> Self {
        self.revalidate_on_mount = enabled;
        self
    }

    #[must_use]
    pub fn with_deduping_interval(mut self, interval: Duration) -> Self {
        self.deduping_interval = interval;
        self
    }

    #[must_use]
    pub fn with_retry(mut self, count: u32, interval: Duration) -> Self {
        self.retry_on_error = true;
        self.error_retry_count = count;
        self.error_retry_interval = interval;
        self
    }
}

/// Observable state of one cache entry.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    pub data: Option<Arc<Value>>,
    pub error: Option<FetchError>,
    pub is_validating: bool,
    pub last_fetched_at: Option<Instant>,
}

impl Snapshot {
    fn outcome(&self) -> Result<Arc<Value>, FetchError> {
        match &self.error {
            Some(e) => Err(e.clone()),
            None => Ok(self.data.clone().unwrap_or_else(|| Arc::new(Value::Null))),
        }
    }
}

/// Typed view of a [`Snapshot`] for rendering.
#[derive(Debug, Clone)]
pub struct ResourceState<T> {
    pub data: Option<T>,
    pub error: Option<FetchError>,
    /// No data yet and a fetch is running.
    pub is_loading: bool,
    pub is_validating: bool,
}

impl<T> ResourceState<T> {
    /// The session is gone; the UI should send the user to the login page.
    #[must_use]
    pub fn requires_login(&self) -> bool {
        self.error.as_ref().is_some_and(FetchError::is_unauthenticated)
    }
}

struct Entry {
    state: watch::Sender<Snapshot>,
    fetcher: Option<Fetcher>,
    options: CacheOptions,
    inflight: Option<(u64, SharedFetch)>,
    /// Sequence of the last issued fetch or local write; only it may settle.
    latest_seq: u64,
}

impl Entry {
    fn new() -> Self {
        let (state, _) = watch::channel(Snapshot::default());
        Self {
            state,
            fetcher: None,
            options: CacheOptions::default(),
            inflight: None,
            latest_seq: 0,
        }
    }

    fn has_subscribers(&self) -> bool {
        self.state.receiver_count() > 0
    }

    fn is_evictable(&self) -> bool {
        !self.has_subscribers()
            && self.inflight.is_none()
            && self
                .state
                .borrow()
                .last_fetched_at
                .is_none_or(|at| at.elapsed() >= self.options.deduping_interval)
    }
}

enum Pending {
    InFlight(SharedFetch),
    Settled(Result<Arc<Value>, FetchError>),
}

impl Pending {
    async fn wait(self) -> Result<Arc<Value>, FetchError> {
        match self {
            Self::InFlight(fetch) => fetch.await,
            Self::Settled(result) => result,
        }
    }
}

#[derive(Default)]
struct CacheInner {
    entries: Mutex<HashMap<CacheKey, Entry>>,
    /// Cache-wide so a recreated entry never reuses a sequence still in flight.
    seq: AtomicU64,
}

impl CacheInner {
    fn issue(&self) -> u64 {
        self.seq.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn settle(&self, key: &CacheKey, seq: u64, result: &Result<Arc<Value>, FetchError>) {
        let mut entries = self.entries.lock();
        let Some(entry) = entries.get_mut(key) else {
            return;
        };

        if entry.inflight.as_ref().is_some_and(|(s, _)| *s == seq) {
            entry.inflight = None;
        }
        let is_validating = entry.inflight.is_some();
        let latest = seq == entry.latest_seq;

        if !latest {
            tracing::debug!(key = %key, seq, "Discarding result of superseded fetch");
        }

        entry.state.send_modify(|snapshot| {
            snapshot.is_validating = is_validating;
            if !latest {
                return;
            }
            match result {
                Ok(data) => {
                    snapshot.data = Some(data.clone());
                    snapshot.error = None;
                }
                // Stale-on-error: keep whatever data we had.
                Err(e) => snapshot.error = Some(e.clone()),
            }
            snapshot.last_fetched_at = Some(Instant::now());
        });
    }
}

/// Process-wide resource cache. Cheap to clone; clones share entries.
///
/// Must be used from within a tokio runtime: fetches are spawned.
#[derive(Clone, Default)]
pub struct ResourceCache {
    inner: Arc<CacheInner>,
}

impl ResourceCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to `key`, registering `fetcher` and `options` for it.
    ///
    /// On mount the entry is revalidated (subject to the dedupe window) unless
    /// `revalidate_on_mount` is off.
    pub fn use_resource<F, Fut>(
        &self,
        key: impl Into<CacheKey>,
        fetcher: F,
        options: CacheOptions,
    ) -> Resource
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, FetchError>> + Send + 'static,
    {
        let key = key.into();
        let revalidate = options.revalidate_on_mount;
        let state = self.register(&key, fetcher, options);
        if revalidate {
            // Result is delivered through the watch channel.
            let _ = self.revalidate(&key, false);
        }
        Resource {
            key,
            state,
            cache: self.clone(),
        }
    }

    /// Read `key` once, sharing any in-flight or fresh result.
    pub async fn read<F, Fut>(
        &self,
        key: impl Into<CacheKey>,
        fetcher: F,
        options: CacheOptions,
    ) -> Result<Arc<Value>, FetchError>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, FetchError>> + Send + 'static,
    {
        let key = key.into();
        drop(self.register(&key, fetcher, options));
        match self.revalidate(&key, false) {
            Some(pending) => pending.wait().await,
            None => Err(FetchError::Transport(format!("no fetcher for {key}"))),
        }
    }

    /// Force a fresh fetch of `key`, bypassing the dedupe window.
    ///
    /// Returns `None` if no fetcher was ever registered for `key`.
    pub async fn mutate(&self, key: &CacheKey) -> Option<Result<Arc<Value>, FetchError>> {
        let pending = self.revalidate(key, true)?;
        Some(pending.wait().await)
    }

    /// Replace the cached data locally without fetching.
    ///
    /// Any fetch in flight for `key` is superseded and its result discarded.
    pub fn set_data(&self, key: impl Into<CacheKey>, data: Value) {
        let key = key.into();
        let mut entries = self.inner.entries.lock();
        let entry = entries.entry(key).or_insert_with(Entry::new);
        entry.latest_seq = self.inner.issue();
        let data = Arc::new(data);
        entry.state.send_modify(|snapshot| {
            snapshot.data = Some(data);
            snapshot.error = None;
            snapshot.last_fetched_at = Some(Instant::now());
        });
    }

    /// Mark `key` stale. Subscribed keys are refetched right away; the others
    /// are refetched on their next read.
    ///
    /// A fetch in flight for `key` is superseded: neither its result nor a
    /// later read joining it can resurface data from before the invalidation.
    pub fn invalidate(&self, key: &CacheKey) {
        self.reset(key, false);
    }

    /// Like [`invalidate`](Self::invalidate), but also drops the cached data
    /// and error so no subscriber keeps showing them.
    pub fn clear(&self, key: &CacheKey) {
        self.reset(key, true);
    }

    /// Evict entries nobody observes whose data is past its dedupe window.
    ///
    /// Returns the number of entries removed.
    pub fn prune(&self) -> usize {
        let mut entries = self.inner.entries.lock();
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_evictable());
        let evicted = before - entries.len();
        if evicted > 0 {
            tracing::debug!(evicted, "Evicted idle cache entries");
        }
        evicted
    }

    /// [`invalidate`](Self::invalidate) every key whose path starts with `prefix`.
    ///
    /// Returns the number of keys invalidated.
    pub fn invalidate_prefix(&self, prefix: &str) -> usize {
        let keys = self.keys_where(|key, _| key.path().starts_with(prefix));
        for key in &keys {
            self.invalidate(key);
        }
        keys.len()
    }

    /// Window regained focus: revalidate subscribed keys that opted in.
    pub fn on_focus(&self) {
        for key in self.keys_where(|_, e| e.has_subscribers() && e.options.revalidate_on_focus) {
            let _ = self.revalidate(&key, false);
        }
    }

    /// Network came back: revalidate subscribed keys that opted in.
    pub fn on_reconnect(&self) {
        for key in self.keys_where(|_, e| e.has_subscribers() && e.options.revalidate_on_reconnect) {
            let _ = self.revalidate(&key, false);
        }
    }

    fn reset(&self, key: &CacheKey, clear_data: bool) {
        let refetch = {
            let mut entries = self.inner.entries.lock();
            let Some(entry) = entries.get_mut(key) else {
                return;
            };
            entry.latest_seq = self.inner.issue();
            entry.inflight = None;
            entry.state.send_modify(|snapshot| {
                if clear_data {
                    snapshot.data = None;
                    snapshot.error = None;
                }
                snapshot.last_fetched_at = None;
                snapshot.is_validating = false;
            });
            entry.has_subscribers()
        };
        if refetch {
            let _ = self.revalidate(key, true);
        }
    }

    #[must_use]
    pub fn snapshot(&self, key: &CacheKey) -> Option<Snapshot> {
        self.inner
            .entries
            .lock()
            .get(key)
            .map(|e| e.state.borrow().clone())
    }

    fn keys_where(&self, pred: impl Fn(&CacheKey, &Entry) -> bool) -> Vec<CacheKey> {
        self.inner
            .entries
            .lock()
            .iter()
            .filter(|(k, e)| pred(k, e))
            .map(|(k, _)| k.clone())
            .collect()
    }

    fn register<F, Fut>(
        &self,
        key: &CacheKey,
        fetcher: F,
        options: CacheOptions,
    ) -> watch::Receiver<Snapshot>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, FetchError>> + Send + 'static,
    {
        self.prune();
        let fetcher: Fetcher = Arc::new(move || fetcher().boxed());
        let mut entries = self.inner.entries.lock();
        let entry = entries.entry(key.clone()).or_insert_with(Entry::new);
        entry.fetcher = Some(fetcher);
        entry.options = options;
        entry.state.subscribe()
    }

    /// Reuse the in-flight or fresh result of `key`, or start a fetch.
    fn revalidate(&self, key: &CacheKey, force: bool) -> Option<Pending> {
        let mut entries = self.inner.entries.lock();
        let entry = entries.get_mut(key)?;

        if !force {
            if let Some((_, fetch)) = &entry.inflight {
                tracing::debug!(key = %key, "Joining in-flight fetch");
                return Some(Pending::InFlight(fetch.clone()));
            }
            let fresh = {
                let snapshot = entry.state.borrow();
                snapshot
                    .last_fetched_at
                    .filter(|at| at.elapsed() < entry.options.deduping_interval)
                    .map(|_| snapshot.outcome())
            };
            if let Some(outcome) = fresh {
                tracing::debug!(key = %key, "Serving deduplicated result");
                return Some(Pending::Settled(outcome));
            }
        }

        self.start_fetch(key, entry).map(Pending::InFlight)
    }

    fn start_fetch(&self, key: &CacheKey, entry: &mut Entry) -> Option<SharedFetch> {
        let fetcher = entry.fetcher.clone()?;
        let options = entry.options.clone();
        let seq = self.inner.issue();
        entry.latest_seq = seq;

        tracing::debug!(key = %key, seq, "Starting fetch");

        let inner = self.inner.clone();
        let owned_key = key.clone();
        let fetch = async move {
            let result = fetch_with_retry(&fetcher, &options, &owned_key)
                .await
                .map(Arc::new);
            inner.settle(&owned_key, seq, &result);
            result
        }
        .boxed()
        .shared();

        entry.inflight = Some((seq, fetch.clone()));
        entry.state.send_modify(|snapshot| snapshot.is_validating = true);
        tokio::spawn(fetch.clone());
        Some(fetch)
    }
}

async fn fetch_with_retry(
    fetcher: &Fetcher,
    options: &CacheOptions,
    key: &CacheKey,
) -> Result<Value, FetchError> {
    let mut attempt = 0;
    loop {
        match fetcher().await {
            Ok(value) => return Ok(value),
            Err(e) if should_retry(&e, options, attempt) => {
                attempt += 1;
                tracing::debug!(key = %key, attempt, error = %e, "Retrying failed fetch");
                tokio::time::sleep(options.error_retry_interval).await;
            }
            Err(e) => {
                tracing::debug!(key = %key, error = %e, "Fetch failed");
                return Err(e);
            }
        }
    }
}

fn should_retry(error: &FetchError, options: &CacheOptions, attempt: u32) -> bool {
    options.retry_on_error
        && attempt < options.error_retry_count
        && !matches!(error, FetchError::Unauthenticated | FetchError::NotFound(_))
}

/// One subscriber's handle on a cache key.
pub struct Resource {
    key: CacheKey,
    state: watch::Receiver<Snapshot>,
    cache: ResourceCache,
}

impl Resource {
    #[must_use]
    pub fn key(&self) -> &CacheKey {
        &self.key
    }

    #[must_use]
    pub fn snapshot(&self) -> Snapshot {
        self.state.borrow().clone()
    }

    /// Current state with the raw JSON data.
    #[must_use]
    pub fn state(&self) -> ResourceState<Arc<Value>> {
        let snapshot = self.state.borrow();
        ResourceState {
            is_loading: snapshot.data.is_none() && snapshot.is_validating,
            data: snapshot.data.clone(),
            error: snapshot.error.clone(),
            is_validating: snapshot.is_validating,
        }
    }

    /// Current state decoded as `T`. A decode failure is reported as the error.
    #[must_use]
    pub fn data<T: DeserializeOwned>(&self) -> ResourceState<T> {
        let raw = self.state();
        let (data, error) = match raw.data.as_deref().map(T::deserialize) {
            Some(Ok(data)) => (Some(data), raw.error),
            Some(Err(e)) => (None, Some(FetchError::from(e))),
            None => (None, raw.error),
        };
        ResourceState {
            data,
            error,
            is_loading: raw.is_loading,
            is_validating: raw.is_validating,
        }
    }

    /// Wait for the next update. Returns `false` once the cache is gone.
    pub async fn changed(&mut self) -> bool {
        self.state.changed().await.is_ok()
    }

    /// Wait until no fetch is running for this key and return the state.
    pub async fn settled(&mut self) -> ResourceState<Arc<Value>> {
        // An error here means the entry was dropped; the last state still stands.
        let _ = self.state.wait_for(|s| !s.is_validating).await;
        self.state()
    }

    /// Force a refetch of this key.
    pub async fn mutate(&self) -> Option<Result<Arc<Value>, FetchError>> {
        self.cache.mutate(&self.key).await
    }
}
