//! TRICKLE Test Utilities
//!
//! Centralized test infrastructure for the TRICKLE workspace:
//! - Proptest generators for keys, key lists and completion orders
//! - Gated fetchers whose completion is released by the test
//! - Counting fetchers that resolve on their own
//! - Tracing setup for test output

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

// Re-export core types for convenience
pub use trickle_core::{
    CacheConfig, FetchError, LoadError, LoadSnapshot, LoadState, LoaderConfig,
    ResourceDescriptor, ResourceKey,
};

// ============================================================================
// TRACING
// ============================================================================

/// Install a fmt subscriber that writes through the test harness.
///
/// Honors `RUST_LOG`; defaults to
/// `trickle_loader=debug,trickle_cache=debug,warn`. Safe to call from every
/// test.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("trickle_loader=debug,trickle_cache=debug,warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}

// ============================================================================
// FIXTURES
// ============================================================================

/// `n` distinct path keys: `/devices/0`, `/devices/1`, ...
pub fn device_keys(n: usize) -> Vec<ResourceKey> {
    (0..n)
        .map(|i| ResourceKey::path(format!("/devices/{}", i)))
        .collect()
}

type CallCounts = Arc<Mutex<HashMap<ResourceKey, usize>>>;

fn bump(calls: &CallCounts, key: &ResourceKey) {
    let mut calls = calls.lock().unwrap_or_else(PoisonError::into_inner);
    *calls.entry(key.clone()).or_insert(0) += 1;
}

fn count(calls: &CallCounts, key: &ResourceKey) -> usize {
    calls
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .get(key)
        .copied()
        .unwrap_or(0)
}

fn total(calls: &CallCounts) -> usize {
    calls
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .values()
        .sum()
}

// ============================================================================
// GATED FETCHES
// ============================================================================

type Gate<T> = watch::Sender<Option<Result<T, FetchError>>>;

/// Fetches that stay pending until the test releases them.
///
/// Every descriptor built for a key waits on that key's gate. Releasing a
/// gate resolves every waiting fetch for the key, and later fetches resolve
/// immediately with the same result until [`FetchGate::reset`] is called.
///
/// ```ignore
/// let gate = FetchGate::new();
/// let a = gate.descriptor(ResourceKey::path("/a"));
/// loader.reconcile(vec![a]).await?;
/// gate.release(&ResourceKey::path("/a"), Ok(1));
/// ```
pub struct FetchGate<T> {
    gates: Arc<Mutex<HashMap<ResourceKey, Gate<T>>>>,
    calls: CallCounts,
}

impl<T> Clone for FetchGate<T> {
    fn clone(&self) -> Self {
        Self {
            gates: Arc::clone(&self.gates),
            calls: Arc::clone(&self.calls),
        }
    }
}

impl<T> Default for FetchGate<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T> FetchGate<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            gates: Arc::new(Mutex::new(HashMap::new())),
            calls: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn with_gate<R>(
        gates: &Mutex<HashMap<ResourceKey, Gate<T>>>,
        key: &ResourceKey,
        f: impl FnOnce(&Gate<T>) -> R,
    ) -> R {
        let mut gates = gates.lock().unwrap_or_else(PoisonError::into_inner);
        let gate = gates
            .entry(key.clone())
            .or_insert_with(|| watch::channel(None).0);
        f(gate)
    }

    /// A descriptor whose fetch waits on this gate.
    pub fn descriptor(&self, key: ResourceKey) -> ResourceDescriptor<T> {
        let gates = Arc::clone(&self.gates);
        let calls = Arc::clone(&self.calls);
        let gate_key = key.clone();

        ResourceDescriptor::new(key, move || {
            bump(&calls, &gate_key);
            let mut rx = Self::with_gate(&gates, &gate_key, |gate| gate.subscribe());
            async move {
                match rx.wait_for(Option::is_some).await {
                    Ok(released) => released.clone().unwrap_or_else(|| {
                        Err(FetchError::Aborted {
                            reason: "gate reset".to_string(),
                        })
                    }),
                    Err(_) => Err(FetchError::Aborted {
                        reason: "gate dropped".to_string(),
                    }),
                }
            }
        })
    }

    /// Resolve every pending and future fetch for `key` with `result`.
    pub fn release(&self, key: &ResourceKey, result: Result<T, FetchError>) {
        Self::with_gate(&self.gates, key, |gate| {
            gate.send_replace(Some(result));
        });
    }

    /// Close the gate again so later fetches wait.
    pub fn reset(&self, key: &ResourceKey) {
        Self::with_gate(&self.gates, key, |gate| {
            gate.send_replace(None);
        });
    }

    /// Number of times a fetch for `key` was started.
    pub fn calls(&self, key: &ResourceKey) -> usize {
        count(&self.calls, key)
    }

    pub fn total_calls(&self) -> usize {
        total(&self.calls)
    }
}

// ============================================================================
// COUNTING FETCHES
// ============================================================================

/// Builds self-resolving descriptors and counts how often each key fetches.
#[derive(Clone, Default)]
pub struct CountingFetcher {
    calls: CallCounts,
}

impl CountingFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolves immediately with `value`.
    pub fn ready<T>(&self, key: ResourceKey, value: T) -> ResourceDescriptor<T>
    where
        T: Clone + Send + Sync + 'static,
    {
        let calls = Arc::clone(&self.calls);
        let counted = key.clone();
        ResourceDescriptor::new(key, move || {
            bump(&calls, &counted);
            let value = value.clone();
            async move { Ok(value) }
        })
    }

    /// Resolves with `value` after `delay` (tokio time, so pausable).
    pub fn delayed<T>(&self, key: ResourceKey, value: T, delay: Duration) -> ResourceDescriptor<T>
    where
        T: Clone + Send + Sync + 'static,
    {
        let calls = Arc::clone(&self.calls);
        let counted = key.clone();
        ResourceDescriptor::new(key, move || {
            bump(&calls, &counted);
            let value = value.clone();
            async move {
                tokio::time::sleep(delay).await;
                Ok(value)
            }
        })
    }

    /// Rejects immediately with `error`.
    pub fn failing<T>(&self, key: ResourceKey, error: FetchError) -> ResourceDescriptor<T>
    where
        T: Send + 'static,
    {
        let calls = Arc::clone(&self.calls);
        let counted = key.clone();
        ResourceDescriptor::new(key, move || {
            bump(&calls, &counted);
            let error = error.clone();
            async move { Err(error) }
        })
    }

    /// Number of times a fetch for `key` was started.
    pub fn calls(&self, key: &ResourceKey) -> usize {
        count(&self.calls, key)
    }

    pub fn total_calls(&self) -> usize {
        total(&self.calls)
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    use super::*;
    use proptest::prelude::*;

    /// Generate a path-style key such as `["/devices/12"]`.
    pub fn arb_path_key() -> impl Strategy<Value = ResourceKey> {
        "/[a-z]{1,8}/[0-9]{1,3}".prop_map(ResourceKey::path)
    }

    /// Generate between `min` and `max` distinct keys, in arbitrary order.
    pub fn arb_distinct_keys(min: usize, max: usize) -> impl Strategy<Value = Vec<ResourceKey>> {
        prop::collection::hash_set(arb_path_key(), min..=max)
            .prop_map(|keys| keys.into_iter().collect::<Vec<_>>())
            .prop_shuffle()
    }

    /// Generate a key list that may repeat keys.
    pub fn arb_key_list(max: usize) -> impl Strategy<Value = Vec<ResourceKey>> {
        prop::collection::vec(0usize..4, 0..=max).prop_map(|ids| {
            ids.into_iter()
                .map(|id| ResourceKey::path(format!("/shared/{}", id)))
                .collect()
        })
    }

    /// Generate a permutation of `0..len`.
    pub fn arb_completion_order(len: usize) -> impl Strategy<Value = Vec<usize>> {
        Just((0..len).collect::<Vec<_>>()).prop_shuffle()
    }

    /// Generate a distinct key list together with a completion order for it.
    pub fn arb_keys_and_order(max: usize) -> impl Strategy<Value = (Vec<ResourceKey>, Vec<usize>)> {
        arb_distinct_keys(1, max).prop_flat_map(|keys| {
            let len = keys.len();
            (Just(keys), arb_completion_order(len))
        })
    }

    /// Generate a valid loader configuration.
    pub fn arb_loader_config() -> impl Strategy<Value = LoaderConfig> {
        (1u64..1000, any::<bool>()).prop_map(|(ms, leading)| {
            LoaderConfig::new()
                .with_update_throttle(Duration::from_millis(ms))
                .with_leading_edge(leading)
        })
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_gate_holds_until_released() {
        let gate: FetchGate<u32> = FetchGate::new();
        let key = ResourceKey::path("/a");
        let descriptor = gate.descriptor(key.clone());

        let pending = tokio::spawn(descriptor.fetch());
        tokio::task::yield_now().await;
        assert!(!pending.is_finished());
        assert_eq!(gate.calls(&key), 1);

        gate.release(&key, Ok(5));
        assert_eq!(pending.await.unwrap(), Ok(5));

        // released gates answer later fetches immediately
        assert_eq!(descriptor.fetch().await, Ok(5));
        assert_eq!(gate.total_calls(), 2);
    }

    #[tokio::test]
    async fn test_gate_release_error() {
        let gate: FetchGate<u32> = FetchGate::new();
        let key = ResourceKey::path("/missing");
        gate.release(&key, Err(FetchError::NotFound));
        assert_eq!(
            gate.descriptor(key).fetch().await,
            Err(FetchError::NotFound)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_counting_fetcher() {
        let fetcher = CountingFetcher::new();
        let a = ResourceKey::path("/a");
        let b = ResourceKey::path("/b");

        assert_eq!(fetcher.ready(a.clone(), 1).fetch().await, Ok(1));
        let start = tokio::time::Instant::now();
        assert_eq!(
            fetcher
                .delayed(b.clone(), 2, Duration::from_millis(100))
                .fetch()
                .await,
            Ok(2)
        );
        assert!(start.elapsed() >= Duration::from_millis(100));

        let failing: ResourceDescriptor<u32> = fetcher.failing(a.clone(), FetchError::NotFound);
        assert_eq!(failing.fetch().await, Err(FetchError::NotFound));

        assert_eq!(fetcher.calls(&a), 2);
        assert_eq!(fetcher.calls(&b), 1);
        assert_eq!(fetcher.total_calls(), 3);
    }

    #[test]
    fn test_device_keys_are_distinct() {
        let keys = device_keys(3);
        assert_eq!(keys.len(), 3);
        assert_ne!(keys[0], keys[1]);
        assert_eq!(keys[2], ResourceKey::path("/devices/2"));
    }
}
