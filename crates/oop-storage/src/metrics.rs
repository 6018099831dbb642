//! Storage metrics and statistics.

use std::sync::atomic::{AtomicU64, Ordering};

/// Point-in-time counters for one storage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StorageMetrics {
    /// Entries currently allocated.
    pub allocation_count: usize,
    /// Blocks currently in the active list.
    pub block_count: usize,
    /// Blocks allocated since the storage was created.
    pub blocks_allocated: u64,
    /// Empty blocks deleted since the storage was created.
    pub blocks_deleted: u64,
    /// Deletion passes that backed off because a concurrent iteration was active.
    pub deletions_inhibited: u64,
    /// Iteration passes constructed over this storage, both modes.
    pub passes_started: u64,
}

/// Monotonic counters backing [`StorageMetrics`].
#[derive(Debug, Default)]
pub(crate) struct StorageStats {
    blocks_allocated: AtomicU64,
    blocks_deleted: AtomicU64,
    deletions_inhibited: AtomicU64,
    passes_started: AtomicU64,
}

impl StorageStats {
    pub(crate) fn record_block_allocated(&self) {
        self.blocks_allocated.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_blocks_deleted(&self, count: usize) {
        self.blocks_deleted.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_deletion_inhibited(&self) {
        self.deletions_inhibited.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_pass_started(&self) {
        self.passes_started.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self, allocation_count: usize, block_count: usize) -> StorageMetrics {
        StorageMetrics {
            allocation_count,
            block_count,
            blocks_allocated: self.blocks_allocated.load(Ordering::Relaxed),
            blocks_deleted: self.blocks_deleted.load(Ordering::Relaxed),
            deletions_inhibited: self.deletions_inhibited.load(Ordering::Relaxed),
            passes_started: self.passes_started.load(Ordering::Relaxed),
        }
    }
}
