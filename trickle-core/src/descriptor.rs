//! Resource descriptors: what to load and how to fetch it.

use futures_util::future::{BoxFuture, FutureExt};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::error::FetchError;
use crate::identity::{DescriptorSetId, ResourceKey};

/// Boxed future returned by a descriptor's fetch operation.
pub type FetchFuture<T> = BoxFuture<'static, Result<T, FetchError>>;

/// Shared fetch operation. Transport details live entirely inside it.
pub type FetchFn<T> = Arc<dyn Fn() -> FetchFuture<T> + Send + Sync>;

/// A request specification: key, fetch operation and freshness window.
///
/// Descriptors are immutable once built and cheap to clone.
pub struct ResourceDescriptor<T> {
    key: ResourceKey,
    fetch: FetchFn<T>,
    freshness: Option<Duration>,
}

impl<T> ResourceDescriptor<T> {
    /// Create a descriptor that uses the cache's default freshness window.
    pub fn new<F, Fut>(key: ResourceKey, fetch: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, FetchError>> + Send + 'static,
        T: 'static,
    {
        Self {
            key,
            fetch: Arc::new(move || fetch().boxed()),
            freshness: None,
        }
    }

    /// Create a descriptor from an already shared fetch operation.
    pub fn from_fetch_fn(key: ResourceKey, fetch: FetchFn<T>) -> Self {
        Self {
            key,
            fetch,
            freshness: None,
        }
    }

    /// Set how long fetched data stays fresh.
    pub fn with_freshness(mut self, window: Duration) -> Self {
        self.freshness = Some(window);
        self
    }

    pub fn key(&self) -> &ResourceKey {
        &self.key
    }

    /// Freshness window, or `None` to defer to the cache default.
    pub fn freshness(&self) -> Option<Duration> {
        self.freshness
    }

    /// Start the fetch operation.
    pub fn fetch(&self) -> FetchFuture<T> {
        (self.fetch)()
    }
}

impl<T> Clone for ResourceDescriptor<T> {
    fn clone(&self) -> Self {
        Self {
            key: self.key.clone(),
            fetch: Arc::clone(&self.fetch),
            freshness: self.freshness,
        }
    }
}

impl<T> fmt::Debug for ResourceDescriptor<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceDescriptor")
            .field("key", &self.key)
            .field("freshness", &self.freshness)
            .finish_non_exhaustive()
    }
}

/// Identity of an ordered descriptor list.
pub fn descriptor_set_id<T>(descriptors: &[ResourceDescriptor<T>]) -> DescriptorSetId {
    DescriptorSetId::of(descriptors.iter().map(ResourceDescriptor::key))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn constant(path: &str, value: u32) -> ResourceDescriptor<u32> {
        ResourceDescriptor::new(ResourceKey::path(path), move || async move { Ok(value) })
    }

    #[tokio::test]
    async fn test_descriptor_fetch_runs_operation() {
        let descriptor = constant("/answer", 42);
        assert_eq!(descriptor.fetch().await, Ok(42));
        assert_eq!(descriptor.clone().fetch().await, Ok(42));
    }

    #[test]
    fn test_descriptor_freshness_builder() {
        let descriptor = constant("/a", 1);
        assert_eq!(descriptor.freshness(), None);

        let descriptor = descriptor.with_freshness(Duration::from_secs(300));
        assert_eq!(descriptor.freshness(), Some(Duration::from_secs(300)));
    }

    #[test]
    fn test_set_id_ignores_fetch_and_freshness() {
        let first = vec![constant("/a", 1), constant("/b", 2)];
        let rebuilt = vec![
            constant("/a", 10).with_freshness(Duration::from_secs(1)),
            constant("/b", 20),
        ];
        let reordered = vec![constant("/b", 2), constant("/a", 1)];

        assert_eq!(descriptor_set_id(&first), descriptor_set_id(&rebuilt));
        assert_ne!(descriptor_set_id(&first), descriptor_set_id(&reordered));
    }

    #[test]
    fn test_descriptor_debug_omits_fetch() {
        let debug = format!("{:?}", constant("/a", 1));
        assert!(debug.contains("ResourceDescriptor"));
        assert!(debug.contains("/a"));
    }
}
