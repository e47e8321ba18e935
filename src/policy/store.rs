//! Process-wide policy snapshot.
//!
//! Requests evaluate against an `Arc<Policy>` taken from the store at the
//! start of the request. Reloads publish a whole new snapshot, so a reader
//! sees either the old policy or the new one, never a mix.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::RwLock;

use super::Policy;

/// Shared holder of the current policy
pub struct PolicyStore {
    current: RwLock<Arc<Policy>>,
    /// Number of snapshots published after the initial one
    generation: AtomicU64,
}

impl PolicyStore {
    /// Create a store holding `policy`
    pub fn new(policy: Policy) -> Self {
        Self {
            current: RwLock::new(Arc::new(policy)),
            generation: AtomicU64::new(0),
        }
    }

    /// The policy snapshot to use for one request
    pub async fn snapshot(&self) -> Arc<Policy> {
        self.current.read().await.clone()
    }

    /// Replace the current policy, returning the new generation
    pub async fn publish(&self, policy: Policy) -> u64 {
        *self.current.write().await = Arc::new(policy);
        self.generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Number of reloads published so far
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }
}
