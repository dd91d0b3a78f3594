//! Pool statistics types

use serde::Serialize;

use super::collection::{CollectionKey, PerCollection};

/// Counts for one connection collection
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CollectionStats {
    /// Every connection the collection owns, wherever it currently is
    pub total: usize,
    /// Ready to be handed out
    pub idle: usize,
    /// Checked out by callers
    pub in_use: usize,
    /// Disconnected, waiting for the maintenance loop
    pub broken: usize,
    /// Currently being pinged or reconnected
    pub maintaining: usize,
}

impl CollectionStats {
    /// Share of connections in use (0.0 to 1.0); 0.0 for an empty collection
    pub fn utilization(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.in_use as f64 / self.total as f64
        }
    }

    /// All connections are checked out
    pub fn is_exhausted(&self) -> bool {
        self.idle == 0 && self.total > 0
    }
}

/// Snapshot of a pool's state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    pub collections: PerCollection<CollectionStats>,
    /// Callers blocked in `acquire`
    pub waiting: usize,
    /// Async jobs queued in the executor
    pub queued_jobs: usize,
    /// Incremented by every `configure` and by `shutdown`
    pub generation: u64,
    pub closed: bool,
}

impl PoolStats {
    pub fn collection(&self, key: CollectionKey) -> &CollectionStats {
        self.collections.get(key)
    }

    pub fn total(&self) -> usize {
        self.collections.iter().map(|(_, stats)| stats.total).sum()
    }

    pub fn idle(&self) -> usize {
        self.collections.iter().map(|(_, stats)| stats.idle).sum()
    }

    pub fn in_use(&self) -> usize {
        self.collections.iter().map(|(_, stats)| stats.in_use).sum()
    }

    pub fn broken(&self) -> usize {
        self.collections.iter().map(|(_, stats)| stats.broken).sum()
    }
}
