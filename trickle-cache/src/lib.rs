//! TRICKLE Cache - Shared Resource Cache
//!
//! The [`ResourceCache`] trait is the only seam between a loader and the
//! data it shows. [`MemoryCache`] is the in-process implementation: keyed
//! entries with freshness windows, a broadcast channel of change events and
//! per-key coalescing of concurrent fetches.

pub mod entry;
pub mod memory;
pub mod subscription;
pub mod traits;

pub use entry::StoredEntry;
pub use memory::MemoryCache;
pub use subscription::CacheSubscription;
pub use traits::{CacheStats, ResourceCache};
