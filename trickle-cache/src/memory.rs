//! In-memory resource cache.
//!
//! Entries live in a `RwLock<HashMap>`; fetches in flight live in a separate
//! map keyed by resource, each holding a [`Shared`] future that every caller
//! for that key awaits. Fetches run on their own task, so a caller that stops
//! waiting never cancels work other callers depend on.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::future::{BoxFuture, FutureExt, Shared};
use tokio::sync::broadcast;
use tokio::time::Instant;
use tracing::{debug, trace, warn};
use trickle_core::{
    CacheConfig, CacheEntry, CacheEvent, FetchError, ResourceDescriptor, ResourceKey,
};

use crate::entry::StoredEntry;
use crate::subscription::CacheSubscription;
use crate::traits::{CacheStats, ResourceCache};

type SharedFetch = Shared<BoxFuture<'static, Result<(), FetchError>>>;

/// A fetch in flight. `slot` identifies this particular fetch so a finished
/// task never removes a newer fetch for the same key.
struct InFlight {
    slot: u64,
    fetch: SharedFetch,
}

struct Inner<T> {
    config: CacheConfig,
    entries: RwLock<HashMap<ResourceKey, StoredEntry<T>>>,
    inflight: Mutex<HashMap<ResourceKey, InFlight>>,
    next_slot: AtomicU64,
    events: broadcast::Sender<CacheEvent<T>>,
    hits: AtomicU64,
    fetches: AtomicU64,
    coalesced: AtomicU64,
    failures: AtomicU64,
}

impl<T> Inner<T> {
    fn read_entries(&self) -> RwLockReadGuard<'_, HashMap<ResourceKey, StoredEntry<T>>> {
        self.entries.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_entries(&self) -> RwLockWriteGuard<'_, HashMap<ResourceKey, StoredEntry<T>>> {
        self.entries.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_inflight(&self) -> MutexGuard<'_, HashMap<ResourceKey, InFlight>> {
        self.inflight.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn release_slot(&self, key: &ResourceKey, slot: u64) {
        let mut inflight = self.lock_inflight();
        if inflight.get(key).is_some_and(|f| f.slot == slot) {
            inflight.remove(key);
        }
    }

    fn broadcast(&self, event: CacheEvent<T>) {
        let event_type = event.event_type();
        match self.events.send(event) {
            Ok(receiver_count) => {
                debug!(
                    event_type = event_type,
                    receivers = receiver_count,
                    "Broadcast cache event"
                );
            }
            Err(_) => {
                trace!(event_type = event_type, "No subscribers for cache event");
            }
        }
    }
}

impl<T: Clone> Inner<T> {
    fn store(&self, key: ResourceKey, data: T, freshness: Duration) {
        {
            let mut entries = self.write_entries();
            entries.insert(
                key.clone(),
                StoredEntry::new(data.clone(), Instant::now(), freshness),
            );
        }
        self.broadcast(CacheEvent::Updated { key, data });
    }
}

/// Removes the in-flight slot when the fetch task ends, including by panic.
struct SlotGuard<T> {
    inner: Arc<Inner<T>>,
    key: ResourceKey,
    slot: u64,
}

impl<T> Drop for SlotGuard<T> {
    fn drop(&mut self) {
        self.inner.release_slot(&self.key, self.slot);
    }
}

async fn run_fetch<T: Clone>(
    inner: Arc<Inner<T>>,
    descriptor: ResourceDescriptor<T>,
    slot: u64,
) -> Result<(), FetchError> {
    let key = descriptor.key().clone();
    let _guard = SlotGuard {
        inner: Arc::clone(&inner),
        key: key.clone(),
        slot,
    };

    debug!(key = %key, slot = slot, "Fetching resource");
    match descriptor.fetch().await {
        Ok(data) => {
            let freshness = descriptor
                .freshness()
                .unwrap_or(inner.config.default_freshness);
            inner.store(key, data, freshness);
            Ok(())
        }
        Err(e) => {
            inner.failures.fetch_add(1, Ordering::Relaxed);
            warn!(key = %key, error = %e, "Resource fetch failed");
            Err(e)
        }
    }
}

/// Shared in-memory cache with change events and request coalescing.
///
/// Cloning is cheap; clones share the same entries and event channel.
///
/// ```ignore
/// let cache = MemoryCache::new(CacheConfig::default());
/// cache.materialize(&descriptor).await?;
/// let entry = cache.lookup(descriptor.key());
/// ```
pub struct MemoryCache<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for MemoryCache<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> std::fmt::Debug for MemoryCache<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryCache")
            .field("config", &self.inner.config)
            .field("entries", &self.inner.read_entries().len())
            .field("in_flight", &self.inner.lock_inflight().len())
            .finish()
    }
}

impl<T> MemoryCache<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Create a cache. A zero event capacity is raised to one.
    pub fn new(config: CacheConfig) -> Self {
        let (events, _rx) = broadcast::channel(config.event_capacity.max(1));
        Self {
            inner: Arc::new(Inner {
                config,
                entries: RwLock::new(HashMap::new()),
                inflight: Mutex::new(HashMap::new()),
                next_slot: AtomicU64::new(0),
                events,
                hits: AtomicU64::new(0),
                fetches: AtomicU64::new(0),
                coalesced: AtomicU64::new(0),
                failures: AtomicU64::new(0),
            }),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.inner.config
    }

    /// Write data directly and notify subscribers.
    pub fn set_data(&self, key: ResourceKey, data: T, freshness: Duration) {
        self.inner.store(key, data, freshness);
    }

    /// Mark an entry stale without touching its data.
    ///
    /// Returns false if the key is not cached.
    pub fn invalidate(&self, key: &ResourceKey) -> bool {
        let found = {
            let mut entries = self.inner.write_entries();
            match entries.get_mut(key) {
                Some(entry) => {
                    entry.invalidated = true;
                    true
                }
                None => false,
            }
        };
        if found {
            self.inner
                .broadcast(CacheEvent::Invalidated { key: key.clone() });
        }
        found
    }

    /// Drop an entry. Returns false if the key is not cached.
    pub fn remove(&self, key: &ResourceKey) -> bool {
        let removed = self.inner.write_entries().remove(key).is_some();
        if removed {
            self.inner.broadcast(CacheEvent::Removed { key: key.clone() });
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.inner.read_entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read_entries().is_empty()
    }

    /// Number of live subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.inner.events.receiver_count()
    }

    /// Number of fetches currently running.
    pub fn in_flight_count(&self) -> usize {
        self.inner.lock_inflight().len()
    }

    fn is_fresh(&self, key: &ResourceKey) -> bool {
        let now = Instant::now();
        self.inner
            .read_entries()
            .get(key)
            .is_some_and(|entry| !entry.is_stale(now))
    }

    /// Join the fetch in flight for this key, or start one.
    fn join_or_start(&self, descriptor: &ResourceDescriptor<T>) -> SharedFetch {
        let key = descriptor.key();
        let mut inflight = self.inner.lock_inflight();

        if let Some(existing) = inflight.get(key) {
            self.inner.coalesced.fetch_add(1, Ordering::Relaxed);
            trace!(key = %key, slot = existing.slot, "Joining in-flight fetch");
            return existing.fetch.clone();
        }

        let slot = self.inner.next_slot.fetch_add(1, Ordering::Relaxed);
        self.inner.fetches.fetch_add(1, Ordering::Relaxed);

        // The slot is inserted before this lock is released, so the task
        // cannot clear it early.
        let handle = tokio::spawn(run_fetch(
            Arc::clone(&self.inner),
            descriptor.clone(),
            slot,
        ));
        let fetch = async move {
            match handle.await {
                Ok(result) => result,
                Err(join_error) => Err(FetchError::Aborted {
                    reason: join_error.to_string(),
                }),
            }
        }
        .boxed()
        .shared();

        inflight.insert(
            key.clone(),
            InFlight {
                slot,
                fetch: fetch.clone(),
            },
        );
        fetch
    }
}

impl<T> Default for MemoryCache<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new(CacheConfig::default())
    }
}

#[async_trait]
impl<T> ResourceCache<T> for MemoryCache<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn lookup(&self, key: &ResourceKey) -> Option<CacheEntry<T>> {
        let now = Instant::now();
        self.inner.read_entries().get(key).map(|entry| entry.view(now))
    }

    fn subscribe(&self) -> CacheSubscription<T> {
        CacheSubscription::new(self.inner.events.subscribe())
    }

    async fn materialize(&self, descriptor: &ResourceDescriptor<T>) -> Result<(), FetchError> {
        if self.is_fresh(descriptor.key()) {
            self.inner.hits.fetch_add(1, Ordering::Relaxed);
            trace!(key = %descriptor.key(), "Entry fresh, skipping fetch");
            return Ok(());
        }
        let fetch = self.join_or_start(descriptor);
        fetch.await
    }

    fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.inner.hits.load(Ordering::Relaxed),
            fetches: self.inner.fetches.load(Ordering::Relaxed),
            coalesced: self.inner.coalesced.load(Ordering::Relaxed),
            failures: self.inner.failures.load(Ordering::Relaxed),
            entry_count: self.len() as u64,
        }
    }
}
