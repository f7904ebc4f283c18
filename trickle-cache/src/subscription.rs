//! Change-event subscription handle.

use tokio::sync::broadcast;
use tracing::warn;
use trickle_core::CacheEvent;

/// Receiver side of a cache's change events.
///
/// Dropping the subscription unsubscribes. A subscriber that falls behind
/// the channel capacity receives a single [`CacheEvent::Lagged`] in place of
/// the events it missed.
#[derive(Debug)]
pub struct CacheSubscription<T> {
    rx: broadcast::Receiver<CacheEvent<T>>,
}

impl<T: Clone> CacheSubscription<T> {
    pub fn new(rx: broadcast::Receiver<CacheEvent<T>>) -> Self {
        Self { rx }
    }

    /// Wait for the next event. Returns `None` once the cache is gone.
    ///
    /// Cancel-safe: dropping the future before it completes loses no event.
    pub async fn recv(&mut self) -> Option<CacheEvent<T>> {
        match self.rx.recv().await {
            Ok(event) => Some(event),
            Err(broadcast::error::RecvError::Lagged(missed)) => {
                warn!(missed = missed, "Cache subscriber lagged, events were dropped");
                Some(CacheEvent::Lagged { missed })
            }
            Err(broadcast::error::RecvError::Closed) => None,
        }
    }

    /// Take the next event if one is already buffered.
    pub fn try_recv(&mut self) -> Option<CacheEvent<T>> {
        match self.rx.try_recv() {
            Ok(event) => Some(event),
            Err(broadcast::error::TryRecvError::Lagged(missed)) => {
                warn!(missed = missed, "Cache subscriber lagged, events were dropped");
                Some(CacheEvent::Lagged { missed })
            }
            Err(_) => None,
        }
    }
}
