//! Storage tracing support.
//!
//! When the `tracing` feature is enabled, this module provides structured
//! tracing spans and events for iteration passes and block management.
//! Without the feature every function here compiles to nothing.

use std::sync::atomic::{AtomicU64, Ordering};

/// Stable identifier for one iteration pass.
///
/// Used to correlate the events of a single pass across worker threads.
/// Monotonically increasing, starting at 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PassId(pub u64);

static NEXT_PASS_ID: AtomicU64 = AtomicU64::new(1);

/// Generate the next unique pass ID.
pub(crate) fn next_pass_id() -> PassId {
    PassId(NEXT_PASS_ID.fetch_add(1, Ordering::Relaxed))
}

#[cfg(feature = "tracing")]
pub(crate) mod internal {
    use super::PassId;
    pub use tracing::Span;
    use tracing::{span, Level};

    /// Create a span covering one pass. Workers enter it while iterating.
    pub fn pass_span(storage: &str, concurrent: bool, pass_id: PassId) -> Span {
        span!(
            Level::DEBUG,
            "par_state",
            storage = storage,
            concurrent = concurrent,
            pass_id = pass_id.0
        )
    }

    pub fn log_iteration_started(pass_id: PassId, head_addr: usize) {
        tracing::debug!(pass_id = pass_id.0, head = head_addr, "iteration_started");
    }

    pub fn log_pass_end(pass_id: PassId, blocks_claimed: usize) {
        tracing::debug!(pass_id = pass_id.0, blocks_claimed, "pass_end");
    }

    pub fn log_block_allocated(storage: &str, block_count: usize) {
        tracing::trace!(storage = storage, block_count, "block_allocated");
    }

    pub fn log_empty_blocks_deleted(storage: &str, deleted: usize) {
        tracing::debug!(storage = storage, deleted, "empty_blocks_deleted");
    }

    pub fn log_deletion_inhibited(storage: &str) {
        tracing::debug!(storage = storage, "empty_block_deletion_inhibited");
    }
}

#[cfg(not(feature = "tracing"))]
#[allow(clippy::missing_const_for_fn)]
pub(crate) mod internal {
    use super::PassId;

    /// Stub span when tracing is disabled.
    #[derive(Debug, Clone)]
    pub struct Span;

    impl Span {
        pub fn in_scope<F: FnOnce() -> R, R>(&self, f: F) -> R {
            f()
        }
    }

    pub fn pass_span(_storage: &str, _concurrent: bool, _pass_id: PassId) -> Span {
        Span
    }

    pub fn log_iteration_started(_pass_id: PassId, _head_addr: usize) {}

    pub fn log_pass_end(_pass_id: PassId, _blocks_claimed: usize) {}

    pub fn log_block_allocated(_storage: &str, _block_count: usize) {}

    pub fn log_empty_blocks_deleted(_storage: &str, _deleted: usize) {}

    pub fn log_deletion_inhibited(_storage: &str) {}
}

pub(crate) use internal::*;
