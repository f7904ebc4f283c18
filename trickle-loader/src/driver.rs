//! The loader's driver task.
//!
//! One task owns all loader state and multiplexes consumer commands, cache
//! events, materialization completions and the emitter timer. Every
//! completion carries the generation it was issued for and is dropped unless
//! that generation is still current.

use std::collections::BTreeSet;
use std::sync::Arc;

use futures_util::future::{BoxFuture, FutureExt};
use futures_util::stream::{FuturesUnordered, StreamExt};
use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};
use trickle_cache::{CacheSubscription, ResourceCache};
use trickle_core::{
    descriptor_set_id, CacheEvent, FetchError, Generation, LoadError, LoadSnapshot, LoadState,
    LoaderConfig, LoaderId, ResourceDescriptor, ResourceKey, ResultSet,
};

use crate::generation::{Epoch, GenerationTracker};
use crate::throttle::ThrottledEmitter;

pub(crate) enum Command<T> {
    Reconcile {
        descriptors: Vec<ResourceDescriptor<T>>,
        reply: oneshot::Sender<LoadSnapshot<T>>,
    },
}

/// Outcome of one materialization. `None` means its generation was
/// cancelled before the cache answered.
struct Settled {
    generation: Generation,
    index: usize,
    outcome: Option<Result<(), FetchError>>,
}

pub(crate) struct Driver<T> {
    id: LoaderId,
    cache: Arc<dyn ResourceCache<T>>,
    commands: mpsc::Receiver<Command<T>>,
    shutdown: CancellationToken,
    tracker: GenerationTracker,
    descriptors: Vec<ResourceDescriptor<T>>,
    result_set: ResultSet<T>,
    pending: BTreeSet<usize>,
    error: Option<LoadError>,
    subscription: Option<CacheSubscription<T>>,
    inflight: FuturesUnordered<BoxFuture<'static, Settled>>,
    emitter: ThrottledEmitter<LoadSnapshot<T>>,
}

async fn next_event<T: Clone>(
    subscription: &mut Option<CacheSubscription<T>>,
) -> Option<CacheEvent<T>> {
    match subscription {
        Some(subscription) => subscription.recv().await,
        None => std::future::pending().await,
    }
}

impl<T> Driver<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub(crate) fn new(
        id: LoaderId,
        cache: Arc<dyn ResourceCache<T>>,
        config: &LoaderConfig,
        commands: mpsc::Receiver<Command<T>>,
        snapshots: Arc<watch::Sender<LoadSnapshot<T>>>,
        shutdown: CancellationToken,
    ) -> Self {
        let emitter = ThrottledEmitter::new(
            config.update_throttle,
            config.leading_edge,
            move |snapshot| {
                snapshots.send_replace(snapshot);
            },
        );
        Self {
            id,
            cache,
            commands,
            tracker: GenerationTracker::new(shutdown.clone()),
            shutdown,
            descriptors: Vec::new(),
            result_set: ResultSet::empty(),
            pending: BTreeSet::new(),
            error: None,
            subscription: None,
            inflight: FuturesUnordered::new(),
            emitter,
        }
    }

    pub(crate) async fn run(mut self) {
        debug!(loader_id = %self.id, "Loader driver started");

        loop {
            tokio::select! {
                biased;

                _ = self.shutdown.cancelled() => break,

                command = self.commands.recv() => match command {
                    Some(Command::Reconcile { descriptors, reply }) => {
                        let snapshot = self.reconcile(descriptors);
                        // the caller may have stopped waiting
                        let _ = reply.send(snapshot);
                    }
                    None => break,
                },

                Some(settled) = self.inflight.next(), if !self.inflight.is_empty() => {
                    self.on_settled(settled);
                }

                event = next_event(&mut self.subscription) => match event {
                    Some(event) => self.on_event(event),
                    None => {
                        warn!(loader_id = %self.id, "Cache event channel closed");
                        self.subscription = None;
                    }
                },

                _ = self.emitter.fired() => {}
            }
        }

        self.teardown();
    }

    fn reconcile(&mut self, descriptors: Vec<ResourceDescriptor<T>>) -> LoadSnapshot<T> {
        let identity = descriptor_set_id(&descriptors);
        let Some(epoch) = self.tracker.advance(identity) else {
            trace!(
                loader_id = %self.id,
                generation = %self.tracker.current(),
                "Descriptor set unchanged"
            );
            return self.current_snapshot();
        };

        // Superseded materializations stay in `inflight`; their token is
        // cancelled so they settle as cancelled and are dropped there.
        self.subscription = None;
        self.pending.clear();
        self.error = None;
        self.descriptors = descriptors;

        if self.descriptors.is_empty() {
            self.result_set = ResultSet::empty();
            debug!(
                loader_id = %self.id,
                generation = %epoch.generation,
                "Empty descriptor set"
            );
            return self.publish();
        }

        // Subscribe before seeding so no update can fall in between.
        self.subscription = Some(self.cache.subscribe());
        let states = self
            .descriptors
            .iter()
            .map(|d| LoadState::from_entry(self.cache.lookup(d.key())))
            .collect();
        self.result_set = ResultSet::new(states);

        self.issue_materializations(&epoch);

        debug!(
            loader_id = %self.id,
            generation = %epoch.generation,
            count = self.descriptors.len(),
            pending = self.pending.len(),
            identity = %identity,
            "Opened generation"
        );
        self.publish()
    }

    fn issue_materializations(&mut self, epoch: &Epoch) {
        for (index, descriptor) in self.descriptors.iter().enumerate() {
            if !self.result_set[index].needs_materialization() {
                continue;
            }
            if epoch.token.is_cancelled() {
                break;
            }
            self.pending.insert(index);

            let cache = Arc::clone(&self.cache);
            let descriptor = descriptor.clone();
            let token = epoch.token.clone();
            let generation = epoch.generation;
            self.inflight.push(
                async move {
                    let outcome = tokio::select! {
                        _ = token.cancelled() => None,
                        result = cache.materialize(&descriptor) => Some(result),
                    };
                    Settled {
                        generation,
                        index,
                        outcome,
                    }
                }
                .boxed(),
            );
        }
    }

    fn on_settled(&mut self, settled: Settled) {
        if !self.tracker.is_current(settled.generation) {
            trace!(
                loader_id = %self.id,
                generation = %settled.generation,
                "Dropping settle from superseded generation"
            );
            return;
        }
        let Some(key) = self.descriptors.get(settled.index).map(|d| d.key().clone()) else {
            return;
        };
        self.pending.remove(&settled.index);

        match settled.outcome {
            Some(Ok(())) => {
                // Read back through the cache so the result does not depend
                // on whether the event or the completion arrived first.
                if let Some(entry) = self.cache.lookup(&key) {
                    self.splice(&key, entry.data);
                }
            }
            Some(Err(source)) => {
                warn!(
                    loader_id = %self.id,
                    generation = %settled.generation,
                    key = %key,
                    error = %source,
                    "Materialization failed"
                );
                self.error = Some(LoadError::Materialization { key, source });
            }
            None => {
                trace!(loader_id = %self.id, key = %key, "Materialization cancelled");
            }
        }

        if self.pending.is_empty() {
            debug!(
                loader_id = %self.id,
                generation = %settled.generation,
                fetched = self.result_set.fetched_count(),
                count = self.result_set.len(),
                "All materializations settled"
            );
        }
        self.publish();
    }

    fn on_event(&mut self, event: CacheEvent<T>) {
        match event {
            CacheEvent::Updated { key, data } => {
                if self.splice(&key, data) {
                    self.publish();
                } else {
                    trace!(loader_id = %self.id, key = %key, "Ignoring update for unknown key");
                }
            }
            CacheEvent::Lagged { missed } => {
                warn!(
                    loader_id = %self.id,
                    generation = %self.tracker.current(),
                    missed = missed,
                    "Resynchronising after lagged cache events"
                );
                self.resync();
                self.publish();
            }
            other => {
                trace!(
                    loader_id = %self.id,
                    event_type = other.event_type(),
                    "Ignoring cache event"
                );
            }
        }
    }

    /// Write fresh `data` into every position holding `key`.
    fn splice(&mut self, key: &ResourceKey, data: T) -> bool {
        let mut matched = false;
        for (index, descriptor) in self.descriptors.iter().enumerate() {
            if descriptor.key() == key {
                self.result_set.set(index, LoadState::fresh(data.clone()));
                matched = true;
            }
        }
        matched
    }

    /// Re-read every position from the cache. A position already holding
    /// fresh data stays fresh; the others take the cache's staleness.
    fn resync(&mut self) {
        for (index, descriptor) in self.descriptors.iter().enumerate() {
            if let Some(entry) = self.cache.lookup(descriptor.key()) {
                let stale = entry.is_stale && self.result_set[index].stale;
                self.result_set.set(
                    index,
                    LoadState {
                        data: Some(entry.data),
                        stale,
                    },
                );
            }
        }
    }

    fn current_snapshot(&self) -> LoadSnapshot<T> {
        LoadSnapshot::from_parts(
            self.result_set.clone(),
            !self.pending.is_empty(),
            self.error.clone(),
        )
    }

    /// Push the current state through the emitter and return it.
    fn publish(&mut self) -> LoadSnapshot<T> {
        let snapshot = self.current_snapshot();
        self.emitter.push(snapshot.clone());
        snapshot
    }

    fn teardown(&mut self) {
        self.tracker.teardown();
        self.subscription = None;
        self.emitter.cancel();
        self.inflight.clear();
        self.pending.clear();
        debug!(
            loader_id = %self.id,
            generation = %self.tracker.current(),
            "Loader torn down"
        );
    }
}
