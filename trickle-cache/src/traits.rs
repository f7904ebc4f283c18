//! Cache abstraction consumed by the loader.
//!
//! The loader never performs I/O itself. It reads entries back through
//! [`ResourceCache::lookup`], listens for changes through
//! [`ResourceCache::subscribe`] and asks the cache to make data available
//! through [`ResourceCache::materialize`].

use async_trait::async_trait;
use trickle_core::{CacheEntry, FetchError, ResourceDescriptor, ResourceKey};

use crate::subscription::CacheSubscription;

/// Shared, observable resource cache.
///
/// Implementations are shared across many loaders (`Arc<dyn ResourceCache<T>>`)
/// and are the only party that mutates entries.
///
/// # Implementation Requirements
///
/// - `lookup()` must not block on I/O
/// - `materialize()` must coalesce concurrent calls for the same key
/// - a successful `materialize()` must be preceded by an `Updated` event for
///   every live subscription, unless the entry was already fresh
/// - a failed fetch must leave any previous entry untouched
#[async_trait]
pub trait ResourceCache<T>: Send + Sync + 'static
where
    T: Clone + Send + Sync + 'static,
{
    /// Point lookup. Returns the cached data and its staleness, if present.
    fn lookup(&self, key: &ResourceKey) -> Option<CacheEntry<T>>;

    /// Subscribe to change events. Dropping the subscription unsubscribes.
    fn subscribe(&self) -> CacheSubscription<T>;

    /// Ensure fresh data exists for the descriptor's key.
    ///
    /// Resolves immediately when the entry is already fresh. Otherwise runs
    /// the descriptor's fetch (or joins one already in flight for the same
    /// key) and resolves once the entry has been written.
    async fn materialize(&self, descriptor: &ResourceDescriptor<T>) -> Result<(), FetchError>;

    /// Usage counters.
    fn stats(&self) -> CacheStats;
}

/// Statistics about cache usage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Materializations answered by an already fresh entry.
    pub hits: u64,
    /// Materializations that started a fetch.
    pub fetches: u64,
    /// Materializations that joined a fetch already in flight.
    pub coalesced: u64,
    /// Fetches that resolved with an error.
    pub failures: u64,
    /// Number of entries currently in cache.
    pub entry_count: u64,
}

impl CacheStats {
    /// Calculate the hit rate (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.fetches + self.coalesced;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hit_rate_empty() {
        assert_eq!(CacheStats::default().hit_rate(), 0.0);
    }

    #[test]
    fn test_hit_rate_counts_coalesced_as_misses() {
        let stats = CacheStats {
            hits: 2,
            fetches: 1,
            coalesced: 1,
            failures: 0,
            entry_count: 3,
        };
        assert!((stats.hit_rate() - 0.5).abs() < f64::EPSILON);
    }
}
