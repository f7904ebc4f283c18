//! Load state, result sets, snapshots and cache event types.

use std::ops::Index;

use crate::error::LoadError;
use crate::identity::ResourceKey;

/// Point-lookup view of a cache entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry<T> {
    pub data: T,
    pub is_stale: bool,
}

/// Change notifications pushed by a shared cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheEvent<T> {
    /// An entry now holds new, fresh data.
    Updated { key: ResourceKey, data: T },
    /// An entry was marked stale; its data is unchanged.
    Invalidated { key: ResourceKey },
    /// An entry was dropped from the cache.
    Removed { key: ResourceKey },
    /// The subscriber fell behind and `missed` events were discarded.
    Lagged { missed: u64 },
}

impl<T> CacheEvent<T> {
    pub fn key(&self) -> Option<&ResourceKey> {
        match self {
            Self::Updated { key, .. } | Self::Invalidated { key } | Self::Removed { key } => {
                Some(key)
            }
            Self::Lagged { .. } => None,
        }
    }

    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Updated { .. } => "updated",
            Self::Invalidated { .. } => "invalidated",
            Self::Removed { .. } => "removed",
            Self::Lagged { .. } => "lagged",
        }
    }
}

/// State of one position in a result set.
///
/// `stale` is true whenever there is no data or the cache reported the
/// entry as stale.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadState<T> {
    pub data: Option<T>,
    pub stale: bool,
}

impl<T> LoadState<T> {
    /// Nothing known yet.
    pub fn absent() -> Self {
        Self {
            data: None,
            stale: true,
        }
    }

    /// Freshly delivered data.
    pub fn fresh(data: T) -> Self {
        Self {
            data: Some(data),
            stale: false,
        }
    }

    /// Seed from a cache lookup; absence implies staleness.
    pub fn from_entry(entry: Option<CacheEntry<T>>) -> Self {
        match entry {
            Some(entry) => Self {
                data: Some(entry.data),
                stale: entry.is_stale,
            },
            None => Self::absent(),
        }
    }

    /// True when the position holds data the cache considers fresh.
    pub fn is_fetched(&self) -> bool {
        self.data.is_some() && !self.stale
    }

    /// True when this position must be materialized.
    pub fn needs_materialization(&self) -> bool {
        self.stale
    }
}

impl<T> Default for LoadState<T> {
    fn default() -> Self {
        Self::absent()
    }
}

/// Ordered load states, index-aligned with a descriptor list.
///
/// The set never grows or shrinks after construction; [`ResultSet::set`]
/// refuses out-of-range writes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultSet<T> {
    states: Vec<LoadState<T>>,
}

impl<T> ResultSet<T> {
    pub fn new(states: Vec<LoadState<T>>) -> Self {
        Self { states }
    }

    pub fn empty() -> Self {
        Self { states: Vec::new() }
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&LoadState<T>> {
        self.states.get(index)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, LoadState<T>> {
        self.states.iter()
    }

    /// Replace the state at `index`. Returns false if out of range.
    pub fn set(&mut self, index: usize, state: LoadState<T>) -> bool {
        match self.states.get_mut(index) {
            Some(slot) => {
                *slot = state;
                true
            }
            None => false,
        }
    }

    /// Number of positions holding fresh data.
    pub fn fetched_count(&self) -> usize {
        self.states.iter().filter(|s| s.is_fetched()).count()
    }

    /// Data at each position, in order.
    pub fn data(&self) -> impl Iterator<Item = Option<&T>> + '_ {
        self.states.iter().map(|s| s.data.as_ref())
    }

    pub fn as_slice(&self) -> &[LoadState<T>] {
        &self.states
    }

    pub fn into_vec(self) -> Vec<LoadState<T>> {
        self.states
    }
}

impl<T> Default for ResultSet<T> {
    fn default() -> Self {
        Self::empty()
    }
}

impl<T> Index<usize> for ResultSet<T> {
    type Output = LoadState<T>;

    fn index(&self, index: usize) -> &Self::Output {
        &self.states[index]
    }
}

impl<'a, T> IntoIterator for &'a ResultSet<T> {
    type Item = &'a LoadState<T>;
    type IntoIter = std::slice::Iter<'a, LoadState<T>>;

    fn into_iter(self) -> Self::IntoIter {
        self.states.iter()
    }
}

/// Consumer-visible state of a loader.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadSnapshot<T> {
    /// Most recent materialization failure in the current generation.
    pub error: Option<LoadError>,
    pub result_set: ResultSet<T>,
    /// True while any materialization of the current generation is unsettled.
    pub loading: bool,
    /// Number of descriptors.
    pub count: usize,
    /// Number of positions holding fresh data.
    pub fetched_count: usize,
}

impl<T> LoadSnapshot<T> {
    pub fn empty() -> Self {
        Self::from_parts(ResultSet::empty(), false, None)
    }

    /// Build a snapshot, deriving the counters from the result set.
    pub fn from_parts(result_set: ResultSet<T>, loading: bool, error: Option<LoadError>) -> Self {
        Self {
            error,
            count: result_set.len(),
            fetched_count: result_set.fetched_count(),
            result_set,
            loading,
        }
    }

    /// `(fetched, total)`, e.g. for a "Loading (3/5)" indicator.
    pub fn progress(&self) -> (usize, usize) {
        (self.fetched_count, self.count)
    }

    /// True once nothing is loading and every position is fresh.
    pub fn is_complete(&self) -> bool {
        !self.loading && self.fetched_count == self.count
    }
}

impl<T> Default for LoadSnapshot<T> {
    fn default() -> Self {
        Self::empty()
    }
}
