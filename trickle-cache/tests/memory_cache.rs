//! MemoryCache behavior through the ResourceCache trait.

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use proptest::prelude::*;
use tokio::time::{advance, sleep, timeout};
use trickle_cache::{MemoryCache, ResourceCache};
use trickle_core::{CacheConfig, CacheEvent, FetchError, ResourceKey};
use trickle_test_utils::{CountingFetcher, FetchGate};

#[tokio::test]
async fn test_concurrent_materializations_coalesce() {
    let cache: MemoryCache<u32> = MemoryCache::default();
    let gate = FetchGate::new();
    let key = ResourceKey::path("/a");
    let descriptor = gate.descriptor(key.clone());

    let waiters: Vec<_> = (0..4)
        .map(|_| {
            let cache = cache.clone();
            let descriptor = descriptor.clone();
            tokio::spawn(async move { cache.materialize(&descriptor).await })
        })
        .collect();
    while cache.stats().coalesced < 3 {
        tokio::task::yield_now().await;
    }
    assert_eq!(cache.in_flight_count(), 1);

    gate.release(&key, Ok(9u32));
    for waiter in join_all(waiters).await {
        assert_eq!(waiter.unwrap(), Ok(()));
    }

    assert_eq!(gate.calls(&key), 1);
    let stats = cache.stats();
    assert_eq!(stats.fetches, 1);
    assert_eq!(stats.coalesced, 3);
    assert_eq!(cache.lookup(&key).map(|e| e.data), Some(9));
}

#[tokio::test]
async fn test_update_event_precedes_completion() {
    let cache = MemoryCache::default();
    let mut sub = cache.subscribe();
    let fetcher = CountingFetcher::new();
    let descriptor = fetcher.ready(ResourceKey::path("/a"), "A");

    cache.materialize(&descriptor).await.unwrap();

    // already buffered by the time materialize resolved
    assert_eq!(
        sub.try_recv(),
        Some(CacheEvent::Updated {
            key: ResourceKey::path("/a"),
            data: "A"
        })
    );
}

#[tokio::test]
async fn test_failed_fetch_keeps_previous_entry() {
    let cache = MemoryCache::default();
    let fetcher = CountingFetcher::new();
    let key = ResourceKey::path("/a");
    cache.set_data(key.clone(), "old", Duration::ZERO);
    let mut sub = cache.subscribe();

    let result = cache
        .materialize(&fetcher.failing(key.clone(), FetchError::failed("503")))
        .await;

    assert_eq!(result, Err(FetchError::failed("503")));
    let entry = cache.lookup(&key).unwrap();
    assert_eq!(entry.data, "old");
    assert!(entry.is_stale);
    assert_eq!(sub.try_recv(), None);
    assert_eq!(cache.stats().failures, 1);
    assert_eq!(cache.in_flight_count(), 0);
}

#[tokio::test]
async fn test_failed_fetch_can_be_retried() {
    let cache: MemoryCache<u32> = MemoryCache::default();
    let gate = FetchGate::new();
    let key = ResourceKey::path("/a");
    let descriptor = gate.descriptor(key.clone());

    gate.release(&key, Err(FetchError::NotFound));
    assert_eq!(
        cache.materialize(&descriptor).await,
        Err(FetchError::NotFound)
    );

    gate.release(&key, Ok(1u32));
    assert_eq!(cache.materialize(&descriptor).await, Ok(()));
    assert_eq!(gate.calls(&key), 2);
}

#[tokio::test(start_paused = true)]
async fn test_entry_expires_after_freshness_window() {
    let cache = MemoryCache::default();
    let fetcher = CountingFetcher::new();
    let key = ResourceKey::path("/a");
    let descriptor = fetcher
        .ready(key.clone(), 1u32)
        .with_freshness(Duration::from_secs(30));

    cache.materialize(&descriptor).await.unwrap();
    assert!(!cache.lookup(&key).unwrap().is_stale);

    advance(Duration::from_secs(10)).await;
    cache.materialize(&descriptor).await.unwrap();
    assert_eq!(fetcher.calls(&key), 1);

    advance(Duration::from_secs(20)).await;
    assert!(cache.lookup(&key).unwrap().is_stale);
    cache.materialize(&descriptor).await.unwrap();
    assert_eq!(fetcher.calls(&key), 2);
}

#[tokio::test(start_paused = true)]
async fn test_default_freshness_applies_without_descriptor_window() {
    let cache = MemoryCache::new(CacheConfig::new().with_default_freshness(Duration::from_secs(5)));
    let fetcher = CountingFetcher::new();
    let key = ResourceKey::path("/a");

    cache.materialize(&fetcher.ready(key.clone(), 1u32)).await.unwrap();
    assert!(!cache.lookup(&key).unwrap().is_stale);

    advance(Duration::from_secs(5)).await;
    assert!(cache.lookup(&key).unwrap().is_stale);
}

#[tokio::test(start_paused = true)]
async fn test_abandoned_waiter_does_not_cancel_fetch() {
    let cache = MemoryCache::default();
    let fetcher = CountingFetcher::new();
    let key = ResourceKey::path("/slow");
    let descriptor = fetcher.delayed(key.clone(), 5u32, Duration::from_millis(100));

    let abandoned = timeout(Duration::from_millis(10), cache.materialize(&descriptor)).await;
    assert!(abandoned.is_err());

    sleep(Duration::from_millis(200)).await;
    assert_eq!(cache.lookup(&key).map(|e| e.data), Some(5));
    assert_eq!(cache.in_flight_count(), 0);
}

#[tokio::test]
async fn test_shared_as_trait_object() {
    let cache: MemoryCache<u32> = MemoryCache::default();
    let shared: Arc<dyn ResourceCache<u32>> = Arc::new(cache.clone());
    let fetcher = CountingFetcher::new();

    shared
        .materialize(&fetcher.ready(ResourceKey::path("/a"), 3))
        .await
        .unwrap();
    assert_eq!(cache.len(), 1);
    assert_eq!(shared.lookup(&ResourceKey::path("/a")).map(|e| e.data), Some(3));
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// However many callers race for a key, exactly one fetch runs.
    #[test]
    fn prop_one_fetch_per_key(callers in 1usize..16, keys in 1usize..4) {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        rt.block_on(async {
            let cache: MemoryCache<u8> = MemoryCache::default();
            let gate = FetchGate::new();
            let paths: Vec<_> = (0..keys).map(|i| ResourceKey::path(format!("/k/{}", i))).collect();

            let mut waiters = Vec::new();
            for n in 0..callers {
                let cache = cache.clone();
                let descriptor = gate.descriptor(paths[n % keys].clone());
                waiters.push(tokio::spawn(async move { cache.materialize(&descriptor).await }));
            }
            loop {
                let stats = cache.stats();
                if (stats.fetches + stats.coalesced) as usize == callers {
                    break;
                }
                tokio::task::yield_now().await;
            }
            for path in &paths {
                gate.release(path, Ok(1u8));
            }
            for waiter in join_all(waiters).await {
                prop_assert_eq!(waiter.unwrap(), Ok(()));
            }

            let started = keys.min(callers);
            prop_assert_eq!(gate.total_calls(), started);
            let stats = cache.stats();
            prop_assert_eq!(stats.fetches as usize, started);
            prop_assert_eq!(stats.coalesced as usize, callers - started);
            Ok(())
        })?;
    }
}
