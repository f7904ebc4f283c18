//! Generation tracking for descriptor sets.
//!
//! Each distinct descriptor set seen by a loader opens a new generation with
//! its own cancellation token, a child of the loader's shutdown token.
//! Opening a generation cancels the previous one.

use tokio_util::sync::CancellationToken;
use trickle_core::{DescriptorSetId, Generation};

/// A freshly opened generation.
#[derive(Debug, Clone)]
pub struct Epoch {
    pub generation: Generation,
    pub token: CancellationToken,
}

#[derive(Debug)]
pub struct GenerationTracker {
    root: CancellationToken,
    current: Generation,
    identity: Option<DescriptorSetId>,
    token: Option<CancellationToken>,
    torn_down: bool,
}

impl GenerationTracker {
    pub fn new(root: CancellationToken) -> Self {
        Self {
            root,
            current: Generation::ZERO,
            identity: None,
            token: None,
            torn_down: false,
        }
    }

    /// Open a new generation for `identity`.
    ///
    /// Returns `None` when `identity` is already the tracked set, or after
    /// teardown.
    pub fn advance(&mut self, identity: DescriptorSetId) -> Option<Epoch> {
        if self.torn_down || self.identity == Some(identity) {
            return None;
        }
        if let Some(previous) = self.token.take() {
            previous.cancel();
        }

        self.current = self.current.next();
        self.identity = Some(identity);
        let token = self.root.child_token();
        self.token = Some(token.clone());

        Some(Epoch {
            generation: self.current,
            token,
        })
    }

    /// True if work tagged with `generation` may still mutate state.
    pub fn is_current(&self, generation: Generation) -> bool {
        !self.torn_down
            && generation == self.current
            && self.token.as_ref().is_some_and(|t| !t.is_cancelled())
    }

    pub fn current(&self) -> Generation {
        self.current
    }

    pub fn identity(&self) -> Option<DescriptorSetId> {
        self.identity
    }

    /// Cancel the current generation and refuse any further ones.
    pub fn teardown(&mut self) {
        if let Some(token) = self.token.take() {
            token.cancel();
        }
        self.identity = None;
        self.torn_down = true;
    }

    pub fn is_torn_down(&self) -> bool {
        self.torn_down
    }
}
