//! TRICKLE Loader - Progressive Loading
//!
//! Turns an ordered list of resource descriptors into a stream of snapshots
//! that fill in as data arrives, while keeping result order equal to
//! descriptor order. The loader never fetches anything itself: it asks a
//! shared [`ResourceCache`](trickle_cache::ResourceCache) to materialize
//! entries and listens for the cache's change events.
//!
//! # Generations
//!
//! Every distinct descriptor set opens a new generation. Work issued for an
//! older generation is cancelled and its late results are ignored, so a
//! consumer that switches lists never sees data from the previous one.

mod driver;
pub mod generation;
pub mod loader;
pub mod throttle;

pub use generation::{Epoch, GenerationTracker};
pub use loader::ProgressiveLoader;
pub use throttle::ThrottledEmitter;

// Re-export the types consumers need alongside the loader.
pub use trickle_cache::{CacheStats, MemoryCache, ResourceCache};
pub use trickle_core::{
    CacheConfig, FetchError, LoadError, LoadSnapshot, LoadState, LoaderConfig, LoaderError,
    ResourceDescriptor, ResourceKey, ResultSet,
};
