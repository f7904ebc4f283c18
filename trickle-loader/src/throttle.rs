//! Rate-limited delivery of the latest value.
//!
//! [`ThrottledEmitter`] holds at most one pending value. The owner pushes
//! values as they change and polls [`ThrottledEmitter::fired`] alongside its
//! other work; the trailing value is always delivered once the interval
//! elapses.

use std::pin::Pin;
use std::time::Duration;

use tokio::time::{sleep_until, Instant, Sleep};

type Deliver<V> = Box<dyn FnMut(V) + Send>;

/// Stand-in deadline for intervals too large to add to an `Instant`.
const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365 * 30);

fn deadline_after(base: Instant, interval: Duration) -> Instant {
    base.checked_add(interval)
        .or_else(|| base.checked_add(FAR_FUTURE))
        .unwrap_or(base)
}

pub struct ThrottledEmitter<V> {
    interval: Duration,
    leading: bool,
    pending: Option<V>,
    timer: Option<Pin<Box<Sleep>>>,
    last_delivery: Option<Instant>,
    deliver: Deliver<V>,
}

impl<V> ThrottledEmitter<V> {
    pub fn new(interval: Duration, leading: bool, deliver: impl FnMut(V) + Send + 'static) -> Self {
        Self {
            interval,
            leading,
            pending: None,
            timer: None,
            last_delivery: None,
            deliver: Box::new(deliver),
        }
    }

    /// Offer a new value.
    ///
    /// Delivered at once on the leading edge of a quiet period; otherwise
    /// kept as the pending value, replacing any older one.
    pub fn push(&mut self, value: V) {
        let now = Instant::now();
        let quiet = self
            .last_delivery
            .map_or(true, |last| now.saturating_duration_since(last) >= self.interval);

        if self.leading && self.timer.is_none() && quiet {
            self.emit(value, now);
            return;
        }

        self.pending = Some(value);
        if self.timer.is_none() {
            let deadline = match self.last_delivery {
                Some(last) if self.leading => deadline_after(last, self.interval),
                _ => deadline_after(now, self.interval),
            };
            self.timer = Some(Box::pin(sleep_until(deadline)));
        }
    }

    /// Completes when the timer elapses, after delivering the pending value.
    ///
    /// Never completes while no timer is armed. Cancel-safe.
    pub async fn fired(&mut self) {
        match self.timer.as_mut() {
            Some(timer) => timer.as_mut().await,
            None => std::future::pending::<()>().await,
        }
        self.timer = None;
        if let Some(value) = self.pending.take() {
            self.emit(value, Instant::now());
        }
    }

    /// Drop the pending value and disarm the timer.
    pub fn cancel(&mut self) {
        self.pending = None;
        self.timer = None;
    }

    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    fn emit(&mut self, value: V, now: Instant) {
        self.last_delivery = Some(now);
        (self.deliver)(value);
    }
}

impl<V> std::fmt::Debug for ThrottledEmitter<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThrottledEmitter")
            .field("interval", &self.interval)
            .field("leading", &self.leading)
            .field("pending", &self.pending.is_some())
            .field("armed", &self.timer.is_some())
            .finish()
    }
}
