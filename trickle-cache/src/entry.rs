//! Stored cache entries and their freshness rules.

use std::time::Duration;
use tokio::time::Instant;
use trickle_core::CacheEntry;

/// An entry as held by the cache.
///
/// An entry is stale once it has been explicitly invalidated or once its
/// freshness window has elapsed since it was written. A zero window makes
/// the entry stale as soon as it lands.
#[derive(Debug, Clone)]
pub struct StoredEntry<T> {
    pub data: T,
    pub fetched_at: Instant,
    pub freshness: Duration,
    pub invalidated: bool,
}

impl<T> StoredEntry<T> {
    pub fn new(data: T, fetched_at: Instant, freshness: Duration) -> Self {
        Self {
            data,
            fetched_at,
            freshness,
            invalidated: false,
        }
    }

    pub fn is_stale(&self, now: Instant) -> bool {
        self.invalidated || now.saturating_duration_since(self.fetched_at) >= self.freshness
    }

    /// Time since the entry was written.
    pub fn age(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.fetched_at)
    }
}

impl<T: Clone> StoredEntry<T> {
    /// Lookup view at `now`.
    pub fn view(&self, now: Instant) -> CacheEntry<T> {
        CacheEntry {
            data: self.data.clone(),
            is_stale: self.is_stale(now),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_entry_goes_stale_after_window() {
        let entry = StoredEntry::new("a", Instant::now(), Duration::from_secs(60));
        assert!(!entry.is_stale(Instant::now()));

        tokio::time::advance(Duration::from_secs(59)).await;
        assert!(!entry.view(Instant::now()).is_stale);
        assert_eq!(entry.age(Instant::now()), Duration::from_secs(59));

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(entry.is_stale(Instant::now()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_window_is_immediately_stale() {
        let entry = StoredEntry::new(1, Instant::now(), Duration::ZERO);
        assert!(entry.is_stale(Instant::now()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalidated_entry_is_stale() {
        let mut entry = StoredEntry::new(1, Instant::now(), Duration::from_secs(60));
        entry.invalidated = true;
        let view = entry.view(Instant::now());
        assert_eq!(view.data, 1);
        assert!(view.is_stale);
    }
}
