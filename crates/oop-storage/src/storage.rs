//! Segmented storage of GC root slots.
//!
//! # Lock Ordering
//!
//! | Lock             | Guards                                                   |
//! |------------------|----------------------------------------------------------|
//! | `allocate_mutex` | active list membership, allocate list, allocation bits   |
//! | `active_mutex`   | publication of `active_head`, the concurrent iteration flag |
//!
//! `allocate_mutex` is always acquired before `active_mutex`. Iteration
//! states only ever take `active_mutex`, and only at construction and drop.
//!
//! # Concurrent Iteration
//!
//! New blocks are linked at the front of the active list and then published
//! as `active_head`. A concurrent iteration pins the head it first observes,
//! so the list it walks is stable: later blocks are in front of it and empty
//! block deletion backs off while `concurrent_iteration_active` is set. The
//! flag check and the unlinking of a block happen under `active_mutex`.

use std::collections::VecDeque;
use std::fmt;
use std::ptr::{self, NonNull};
use std::sync::atomic::{AtomicPtr, AtomicU64, AtomicUsize, Ordering};

use parking_lot::{Mutex, MutexGuard};

use crate::block::Block;
use crate::config::StorageConfig;
use crate::metrics::{StorageMetrics, StorageStats};
use crate::oop::{Oop, Slot};
use crate::tracing;

static NEXT_STORAGE_ID: AtomicU64 = AtomicU64::new(1);

struct AllocateState {
    /// Linked blocks with at least one free entry. Allocation takes the front.
    allocate_list: VecDeque<NonNull<Block>>,
}

pub(crate) struct ActiveState {
    pub(crate) concurrent_iteration_active: bool,
}

/// Owner's token for one allocated entry.
///
/// Give it back to [`OopStorage::release`] to free the entry. A handle that is
/// dropped instead keeps its entry allocated for the life of the storage.
#[must_use = "dropping a handle without releasing it leaks the entry"]
pub struct OopHandle {
    slot: NonNull<Slot>,
    owner_id: u64,
}

// SAFETY: the handle is only dereferenced through the owning storage, which
// synchronizes all access to the slot.
unsafe impl Send for OopHandle {}
unsafe impl Sync for OopHandle {}

impl OopHandle {
    /// Address of the entry, comparable with [`Entry::addr`](crate::Entry::addr).
    #[inline]
    #[must_use]
    pub fn addr(&self) -> usize {
        self.slot.as_ptr().addr()
    }
}

impl fmt::Debug for OopHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OopHandle")
            .field("addr", &format_args!("{:#x}", self.addr()))
            .field("owner_id", &self.owner_id)
            .finish()
    }
}

/// A block-structured container of root slots.
pub struct OopStorage {
    id: u64,
    config: StorageConfig,
    allocate_mutex: Mutex<AllocateState>,
    active_mutex: Mutex<ActiveState>,
    active_head: AtomicPtr<Block>,
    allocation_count: AtomicUsize,
    block_count: AtomicUsize,
    stats: StorageStats,
}

// SAFETY: the raw block pointers are owned by the storage. List structure is
// only changed under `allocate_mutex` (and `active_mutex` for the head), and
// all cross-thread reads go through atomics.
unsafe impl Send for OopStorage {}
unsafe impl Sync for OopStorage {}

impl OopStorage {
    #[must_use]
    pub fn new(config: StorageConfig) -> Self {
        Self {
            id: NEXT_STORAGE_ID.fetch_add(1, Ordering::Relaxed),
            config,
            allocate_mutex: Mutex::new(AllocateState {
                allocate_list: VecDeque::new(),
            }),
            active_mutex: Mutex::new(ActiveState {
                concurrent_iteration_active: false,
            }),
            active_head: AtomicPtr::new(ptr::null_mut()),
            allocation_count: AtomicUsize::new(0),
            block_count: AtomicUsize::new(0),
            stats: StorageStats::default(),
        }
    }

    #[must_use]
    pub fn with_name(name: &'static str) -> Self {
        Self::new(StorageConfig::new(name))
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.config.name
    }

    #[inline]
    pub const fn config(&self) -> &StorageConfig {
        &self.config
    }

    #[inline]
    pub fn allocation_count(&self) -> usize {
        self.allocation_count.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn block_count(&self) -> usize {
        self.block_count.load(Ordering::Relaxed)
    }

    pub fn metrics(&self) -> StorageMetrics {
        self.stats.snapshot(self.allocation_count(), self.block_count())
    }

    /// Whether a concurrent iteration state is currently alive.
    pub fn concurrent_iteration_active(&self) -> bool {
        self.active_mutex.lock().concurrent_iteration_active
    }

    /// Allocates an entry whose value is null.
    ///
    /// Returns `None` if a new block is needed and either the configured
    /// block limit has been reached or the system allocator fails.
    pub fn allocate(&self) -> Option<OopHandle> {
        let mut state = self.allocate_mutex.lock();
        let block = match state.allocate_list.front() {
            Some(&block) => block,
            None => {
                let block = self.link_new_block(&mut state)?;
                state.allocate_list.push_back(block);
                block
            }
        };

        // SAFETY: blocks on the allocate list are linked, hence alive.
        let block_ref = unsafe { block.as_ref() };
        let Some(slot) = block_ref.allocate_entry() else {
            unreachable!("full block on the allocate list");
        };
        if block_ref.is_full() {
            state.allocate_list.pop_front();
        }
        drop(state);

        self.allocation_count.fetch_add(1, Ordering::Relaxed);
        Some(OopHandle {
            slot: NonNull::from(slot),
            owner_id: self.id,
        })
    }

    /// Frees the entry behind `handle`, nulling its value.
    ///
    /// # Panics
    ///
    /// Panics if `handle` was allocated by a different storage.
    #[track_caller]
    pub fn release(&self, handle: OopHandle) {
        self.check_owner(&handle);
        let mut state = self.allocate_mutex.lock();
        // SAFETY: the handle owns an allocated entry of this storage, so its
        // block cannot have been deleted.
        let slot = unsafe { handle.slot.as_ref() };
        let block = Block::containing(slot);
        let block_ref = unsafe { block.as_ref() };
        debug_assert_eq!(block_ref.owner_id(), self.id);
        if block_ref.release_entry(block_ref.index_of(slot)) {
            state.allocate_list.push_back(block);
        }
        drop(state);
        self.allocation_count.fetch_sub(1, Ordering::Relaxed);
    }

    /// Reads the value of the entry behind `handle`.
    ///
    /// # Panics
    ///
    /// Panics if `handle` was allocated by a different storage.
    #[track_caller]
    pub fn get(&self, handle: &OopHandle) -> Option<Oop> {
        self.slot(handle).load()
    }

    /// Writes the value of the entry behind `handle`.
    ///
    /// # Panics
    ///
    /// Panics if `handle` was allocated by a different storage.
    #[track_caller]
    pub fn set(&self, handle: &OopHandle, value: Option<Oop>) {
        self.slot(handle).store(value);
    }

    /// Deletes empty blocks while mutators may be running.
    ///
    /// Backs off as soon as it observes a live concurrent iteration; the
    /// blocks examined before that point stay deleted. Returns the number of
    /// blocks deleted.
    pub fn delete_empty_blocks_concurrent(&self) -> usize {
        self.delete_empty_blocks_impl(true)
    }

    /// Deletes every empty block. Exclusive access rules out any iteration.
    pub fn delete_empty_blocks(&mut self) -> usize {
        self.delete_empty_blocks_impl(false)
    }

    fn delete_empty_blocks_impl(&self, respect_iteration: bool) -> usize {
        let mut state = self.allocate_mutex.lock();
        let mut deleted = 0;
        let mut cursor = self.active_head.load(Ordering::Acquire);

        while let Some(block) = NonNull::new(cursor) {
            // SAFETY: linked blocks are alive while `allocate_mutex` is held.
            let block_ref = unsafe { block.as_ref() };
            cursor = block_ref.next_ptr();
            if !block_ref.is_empty() {
                continue;
            }

            {
                let active = self.active_mutex.lock();
                if respect_iteration && active.concurrent_iteration_active {
                    self.stats.record_deletion_inhibited();
                    tracing::log_deletion_inhibited(self.name());
                    break;
                }
                self.unlink(block_ref);
            }

            state.allocate_list.retain(|&candidate| candidate != block);
            // SAFETY: unlinked under both mutexes; no pass can reach it.
            unsafe { Block::release(block) };
            self.block_count.fetch_sub(1, Ordering::Relaxed);
            deleted += 1;
        }
        drop(state);

        if deleted > 0 {
            self.stats.record_blocks_deleted(deleted);
            tracing::log_empty_blocks_deleted(self.name(), deleted);
        }
        deleted
    }

    /// Allocates a block and publishes it as the new list head.
    fn link_new_block(&self, _state: &mut AllocateState) -> Option<NonNull<Block>> {
        if self
            .config
            .max_blocks
            .is_some_and(|max| self.block_count() >= max)
        {
            return None;
        }

        let block = Block::allocate(self.id)?;
        let old_head = self.active_head.load(Ordering::Acquire);
        // SAFETY: `block` is fresh; `old_head` is linked and we hold
        // `allocate_mutex`, so neither can be freed underneath us.
        unsafe {
            block.as_ref().set_next(old_head);
            if let Some(old_head) = NonNull::new(old_head) {
                old_head.as_ref().set_prev(block.as_ptr());
            }
        }

        {
            let _active = self.active_mutex.lock();
            self.active_head.store(block.as_ptr(), Ordering::Release);
        }

        let block_count = self.block_count.fetch_add(1, Ordering::Relaxed) + 1;
        self.stats.record_block_allocated();
        tracing::log_block_allocated(self.name(), block_count);
        Some(block)
    }

    /// Removes `block` from the active list. Both mutexes must be held.
    fn unlink(&self, block: &Block) {
        let prev = block.prev_ptr();
        let next = block.next_ptr();
        match NonNull::new(prev) {
            // SAFETY: neighbours of a linked block are linked.
            Some(prev) => unsafe { prev.as_ref() }.set_next(next),
            None => self.active_head.store(next, Ordering::Release),
        }
        if let Some(next) = NonNull::new(next) {
            unsafe { next.as_ref() }.set_prev(prev);
        }
    }

    #[track_caller]
    fn check_owner(&self, handle: &OopHandle) {
        assert_eq!(
            handle.owner_id,
            self.id,
            "handle {:#x} does not belong to storage {}",
            handle.addr(),
            self.name(),
        );
    }

    #[track_caller]
    fn slot<'a>(&'a self, handle: &'a OopHandle) -> &'a Slot {
        self.check_owner(handle);
        // SAFETY: an unreleased handle keeps its block non-empty, so the block
        // is still linked and alive for as long as `self` is borrowed.
        unsafe { handle.slot.as_ref() }
    }

    pub(crate) const fn stats(&self) -> &StorageStats {
        &self.stats
    }

    pub(crate) fn active_head(&self) -> *mut Block {
        self.active_head.load(Ordering::Acquire)
    }

    pub(crate) fn lock_active(&self) -> MutexGuard<'_, ActiveState> {
        self.active_mutex.lock()
    }
}

impl Default for OopStorage {
    fn default() -> Self {
        Self::new(StorageConfig::default())
    }
}

impl fmt::Debug for OopStorage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OopStorage")
            .field("name", &self.name())
            .field("allocation_count", &self.allocation_count())
            .field("block_count", &self.block_count())
            .finish_non_exhaustive()
    }
}

impl Drop for OopStorage {
    fn drop(&mut self) {
        let mut cursor = *self.active_head.get_mut();
        while let Some(block) = NonNull::new(cursor) {
            // SAFETY: exclusive access; every linked block is freed exactly once.
            unsafe {
                cursor = block.as_ref().next_ptr();
                Block::release(block);
            }
        }
    }
}
