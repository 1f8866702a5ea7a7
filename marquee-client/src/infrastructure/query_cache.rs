//! Keyed query cache
//!
//! Read results are cached per [`QueryKey`] until a mutation invalidates the
//! key (or, when configured, until they age out). Every key carries an epoch
//! that `invalidate` bumps; a fetch remembers the epoch it started under and
//! only populates the cache if no invalidation happened meanwhile, so a slow
//! read that raced a write can never resurrect pre-write data.

use std::any::Any;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use marquee_config::CacheConfig;
use tracing::{debug, trace, warn};

/// Hierarchical cache key, e.g. `["favorites", "<user id>"]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueryKey(Vec<String>);

impl QueryKey {
    pub fn new<I, S>(parts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(parts.into_iter().map(Into::into).collect())
    }

    pub fn parts(&self) -> &[String] {
        &self.0
    }

    pub fn starts_with(&self, prefix: &QueryKey) -> bool {
        self.0.starts_with(&prefix.0)
    }
}

impl fmt::Display for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]", self.0.join(", "))
    }
}

struct Cached {
    data: Arc<dyn Any + Send + Sync>,
    fetched_at: Instant,
}

#[derive(Default)]
struct Entry {
    epoch: u64,
    cached: Option<Cached>,
}

pub struct QueryCache {
    entries: DashMap<QueryKey, Entry>,
    stale_after: Option<Duration>,
}

impl QueryCache {
    pub fn new() -> Self {
        Self::with_stale_after(None)
    }

    pub fn with_stale_after(stale_after: Option<Duration>) -> Self {
        Self {
            entries: DashMap::new(),
            stale_after,
        }
    }

    pub fn from_config(config: &CacheConfig) -> Self {
        Self::with_stale_after(config.stale_after)
    }

    /// Fresh cached value for `key`, if any.
    pub fn get<T>(&self, key: &QueryKey) -> Option<Arc<T>>
    where
        T: Send + Sync + 'static,
    {
        let data = {
            let entry = self.entries.get(key)?;
            let cached = entry.cached.as_ref()?;
            if let Some(limit) = self.stale_after
                && cached.fetched_at.elapsed() >= limit
            {
                trace!(%key, "cached value is stale");
                return None;
            }
            cached.data.clone()
        };
        match data.downcast::<T>() {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(%key, "cached value has a different type than requested");
                None
            }
        }
    }

    /// Return the cached value or run `fetcher` and cache its result.
    ///
    /// Errors are never cached.
    pub async fn fetch<T, E, F, Fut>(&self, key: &QueryKey, fetcher: F) -> Result<Arc<T>, E>
    where
        T: Send + Sync + 'static,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if let Some(hit) = self.get::<T>(key) {
            trace!(%key, "query cache hit");
            return Ok(hit);
        }

        let epoch = self.current_epoch(key);
        trace!(%key, epoch, "query cache miss");
        let value = Arc::new(fetcher().await?);
        self.store(key, epoch, value.clone());
        Ok(value)
    }

    /// Run `mutation` and, only if it succeeds, invalidate `invalidates`.
    pub async fn mutate<T, E, Fut>(&self, invalidates: &QueryKey, mutation: Fut) -> Result<T, E>
    where
        Fut: Future<Output = Result<T, E>>,
    {
        let output = mutation.await?;
        self.invalidate(invalidates);
        Ok(output)
    }

    /// Drop the cached value for `key` and fence off in-flight fetches.
    pub fn invalidate(&self, key: &QueryKey) {
        if let Some(mut entry) = self.entries.get_mut(key) {
            entry.epoch += 1;
            entry.cached = None;
            debug!(%key, epoch = entry.epoch, "query invalidated");
        }
    }

    /// Invalidate every key under `prefix`.
    pub fn invalidate_prefix(&self, prefix: &QueryKey) {
        for mut entry in self.entries.iter_mut() {
            if entry.key().starts_with(prefix) {
                entry.epoch += 1;
                entry.cached = None;
            }
        }
        debug!(%prefix, "queries invalidated by prefix");
    }

    pub fn len(&self) -> usize {
        self.entries
            .iter()
            .filter(|entry| entry.cached.is_some())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn current_epoch(&self, key: &QueryKey) -> u64 {
        self.entries.entry(key.clone()).or_default().epoch
    }

    fn store<T>(&self, key: &QueryKey, epoch: u64, value: Arc<T>)
    where
        T: Send + Sync + 'static,
    {
        let mut entry = self.entries.entry(key.clone()).or_default();
        if entry.epoch != epoch {
            debug!(%key, started = epoch, now = entry.epoch, "discarding fetch that raced an invalidation");
            return;
        }
        entry.cached = Some(Cached {
            data: value,
            fetched_at: Instant::now(),
        });
    }
}

impl Default for QueryCache {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for QueryCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryCache")
            .field("entries", &self.entries.len())
            .field("stale_after", &self.stale_after)
            .finish()
    }
}
