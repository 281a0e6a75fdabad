//! ==============================================================================
//! cache.rs - shared latest-state snapshot
//! ==============================================================================
//!
//! this is the one structure written by the sampling loop and read by the
//! web server at the same time:
//! - sampling loop: update() after every successful decode
//! - web server:    snapshot() for /api/latest, subscribers via the hook
//!
//! the hook runs while the write lock is held, so subscribers receive
//! snapshots in update order and never a half-merged state.
//!
//! ==============================================================================

use std::sync::Arc;

use tokio::sync::RwLock;

use crate::clock::Clock;
use crate::domain::{LatestState, Reading};

/// callback receiving every post-merge snapshot
pub type BroadcastHook = Arc<dyn Fn(&LatestState) + Send + Sync>;

pub struct LatestStateCache {
    state: RwLock<LatestState>,
    clock: Arc<dyn Clock>,
    hook: Option<BroadcastHook>,
}

impl LatestStateCache {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            state: RwLock::new(LatestState::default()),
            clock,
            hook: None,
        }
    }

    pub fn with_hook(mut self, hook: BroadcastHook) -> Self {
        self.hook = Some(hook);
        self
    }

    /// merge the fields `partial` carries, stamp the update time and return
    /// the complete snapshot
    pub async fn update(&self, partial: &Reading) -> LatestState {
        let mut state = self.state.write().await;
        state.merge(partial);
        state.timestamp = Some(self.clock.now());

        let snapshot = state.clone();
        if let Some(hook) = &self.hook {
            hook(&snapshot);
        }
        snapshot
    }

    pub async fn snapshot(&self) -> LatestState {
        self.state.read().await.clone()
    }
}
