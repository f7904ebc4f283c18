//! Consumer-facing loader handle.

use std::fmt;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};
use trickle_cache::ResourceCache;
use trickle_core::{LoadSnapshot, LoaderConfig, LoaderError, LoaderId, ResourceDescriptor};

use crate::driver::{Command, Driver};

const COMMAND_CAPACITY: usize = 16;

/// Progressive loader for an ordered list of descriptors.
///
/// Results are exposed in descriptor order as they arrive, with
/// notifications to watchers throttled to one per `update_throttle`. All
/// state lives on a driver task spawned by [`ProgressiveLoader::new`];
/// dropping the handle tears the driver down.
///
/// ```ignore
/// let loader = ProgressiveLoader::new(cache, LoaderConfig::default());
/// let first = loader.reconcile(descriptors).await?;
/// let mut updates = loader.watch();
/// while updates.changed().await.is_ok() {
///     let snapshot = updates.borrow_and_update().clone();
///     render(snapshot.progress());
/// }
/// ```
pub struct ProgressiveLoader<T> {
    id: LoaderId,
    config: LoaderConfig,
    commands: mpsc::Sender<Command<T>>,
    snapshots: Arc<watch::Sender<LoadSnapshot<T>>>,
    shutdown: CancellationToken,
    driver: Option<JoinHandle<()>>,
}

impl<T> ProgressiveLoader<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Create a loader over a shared cache and spawn its driver.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(cache: Arc<dyn ResourceCache<T>>, config: LoaderConfig) -> Self {
        let id = LoaderId::new();
        if let Err(e) = config.validate() {
            warn!(loader_id = %id, error = %e, "Loader config out of range");
        }
        let (commands, command_rx) = mpsc::channel(COMMAND_CAPACITY);
        let (snapshots, _rx) = watch::channel(LoadSnapshot::empty());
        let snapshots = Arc::new(snapshots);
        let shutdown = CancellationToken::new();

        let driver = Driver::new(
            id,
            cache,
            &config,
            command_rx,
            Arc::clone(&snapshots),
            shutdown.clone(),
        );
        let driver = tokio::spawn(driver.run());

        Self {
            id,
            config,
            commands,
            snapshots,
            shutdown,
            driver: Some(driver),
        }
    }

    /// Point the loader at `descriptors`.
    ///
    /// Returns the state right after seeding from the cache. An unchanged
    /// descriptor set starts no work and returns the current state.
    pub async fn reconcile(
        &self,
        descriptors: Vec<ResourceDescriptor<T>>,
    ) -> Result<LoadSnapshot<T>, LoaderError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(Command::Reconcile { descriptors, reply })
            .await
            .map_err(|_| LoaderError::Closed)?;
        response.await.map_err(|_| LoaderError::Closed)
    }

    /// Subscribe to throttled snapshots. The current value counts as seen.
    pub fn watch(&self) -> watch::Receiver<LoadSnapshot<T>> {
        self.snapshots.subscribe()
    }

    /// The last delivered snapshot.
    pub fn snapshot(&self) -> LoadSnapshot<T> {
        self.snapshots.borrow().clone()
    }
}

impl<T> ProgressiveLoader<T> {
    pub fn id(&self) -> LoaderId {
        self.id
    }

    pub fn config(&self) -> &LoaderConfig {
        &self.config
    }

    /// True once the driver has stopped.
    pub fn is_closed(&self) -> bool {
        self.commands.is_closed()
    }

    /// Stop the driver and wait for it to finish.
    ///
    /// Drops the cache subscription, discards any pending notification and
    /// makes every outstanding materialization inert.
    pub async fn teardown(mut self) {
        self.shutdown.cancel();
        if let Some(driver) = self.driver.take() {
            if let Err(e) = driver.await {
                error!(loader_id = %self.id, error = %e, "Loader driver terminated abnormally");
            }
        }
    }
}

impl<T> Drop for ProgressiveLoader<T> {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

impl<T> fmt::Debug for ProgressiveLoader<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProgressiveLoader")
            .field("id", &self.id)
            .field("config", &self.config)
            .field("closed", &self.commands.is_closed())
            .finish_non_exhaustive()
    }
}
