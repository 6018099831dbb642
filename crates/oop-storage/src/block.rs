//! Fixed-capacity blocks of slots, the unit of claiming during parallel
//! iteration.
//!
//! A block is 1024-byte aligned so the owning block of any slot can be
//! recovered by masking the slot's address.

#![allow(clippy::cast_possible_truncation)]

use std::alloc::{self, Layout};
use std::mem;
use std::ptr::{self, NonNull};
use std::sync::atomic::{AtomicPtr, AtomicU64, Ordering};

use crate::oop::Slot;

/// Number of slots per block; one bit per slot in the allocation bitmask.
pub const BLOCK_SIZE: usize = u64::BITS as usize;

pub(crate) const BLOCK_ALIGNMENT: usize = 1024;

const FULL: u64 = u64::MAX;

#[repr(C, align(1024))]
pub struct Block {
    slots: [Slot; BLOCK_SIZE],
    allocated_bitmask: AtomicU64,
    owner_id: u64,
    /// Toward older blocks (the list tail).
    next: AtomicPtr<Block>,
    /// Toward newer blocks (the list head).
    prev: AtomicPtr<Block>,
}

const _: () = assert!(mem::size_of::<Block>() == BLOCK_ALIGNMENT);
const _: () = assert!(mem::align_of::<Block>() == BLOCK_ALIGNMENT);

impl Block {
    /// Allocates an empty, unlinked block owned by storage `owner_id`.
    ///
    /// Returns `None` if the system allocator fails.
    pub(crate) fn allocate(owner_id: u64) -> Option<NonNull<Self>> {
        let layout = Layout::new::<Self>();
        // SAFETY: `Block` has a non-zero size.
        let raw = unsafe { alloc::alloc(layout).cast::<Self>() };
        let block = NonNull::new(raw)?;
        // SAFETY: `block` is freshly allocated with the layout of `Block`.
        unsafe {
            block.as_ptr().write(Self {
                slots: [const { Slot::null() }; BLOCK_SIZE],
                allocated_bitmask: AtomicU64::new(0),
                owner_id,
                next: AtomicPtr::new(ptr::null_mut()),
                prev: AtomicPtr::new(ptr::null_mut()),
            });
        }
        Some(block)
    }

    /// Frees a block obtained from [`Block::allocate`].
    ///
    /// # Safety
    ///
    /// `block` must be unlinked and no reference to it may outlive this call.
    pub(crate) unsafe fn release(block: NonNull<Self>) {
        // SAFETY: allocated by the global allocator with `Layout::new::<Block>()`,
        // which is exactly what `Box` uses for `Block`.
        drop(unsafe { Box::from_raw(block.as_ptr()) });
    }

    /// Returns the block containing `slot`.
    #[inline]
    pub(crate) fn containing(slot: &Slot) -> NonNull<Self> {
        let base = ptr::from_ref(slot)
            .map_addr(|addr| addr & !(BLOCK_ALIGNMENT - 1))
            .cast::<Self>()
            .cast_mut();
        // SAFETY: every `Slot` lives inside a `Block`, whose address is non-null.
        unsafe { NonNull::new_unchecked(base) }
    }

    #[inline]
    pub(crate) const fn owner_id(&self) -> u64 {
        self.owner_id
    }

    #[cfg(test)]
    pub(crate) fn slot(&self, index: usize) -> &Slot {
        &self.slots[index]
    }

    #[inline]
    pub(crate) fn index_of(&self, slot: &Slot) -> usize {
        let offset = slot.addr() - self.slots.as_ptr().addr();
        debug_assert!(offset % mem::size_of::<Slot>() == 0, "misaligned slot");
        offset / mem::size_of::<Slot>()
    }

    #[inline]
    pub(crate) fn bitmask(&self) -> u64 {
        self.allocated_bitmask.load(Ordering::Acquire)
    }

    #[inline]
    pub(crate) fn is_empty(&self) -> bool {
        self.bitmask() == 0
    }

    #[inline]
    pub(crate) fn is_full(&self) -> bool {
        self.bitmask() == FULL
    }

    #[cfg(test)]
    pub(crate) fn allocation_count(&self) -> usize {
        self.bitmask().count_ones() as usize
    }

    /// Claims the lowest free entry. Callers hold the storage's allocate mutex.
    pub(crate) fn allocate_entry(&self) -> Option<&Slot> {
        let bits = self.allocated_bitmask.load(Ordering::Relaxed);
        if bits == FULL {
            return None;
        }
        let index = (!bits).trailing_zeros() as usize;
        let slot = &self.slots[index];
        debug_assert!(slot.is_null(), "free entry holds a value");
        self.allocated_bitmask.store(bits | (1 << index), Ordering::Release);
        Some(slot)
    }

    /// Nulls and frees the entry at `index`. Returns whether the block was full
    /// before the release. Callers hold the storage's allocate mutex.
    pub(crate) fn release_entry(&self, index: usize) -> bool {
        let bit = 1u64 << index;
        self.slots[index].store(None);
        let old = self.allocated_bitmask.fetch_and(!bit, Ordering::Release);
        debug_assert!(old & bit != 0, "releasing a free entry");
        old == FULL
    }

    /// Applies `f` to every allocated entry, in slot order, stopping early if
    /// `f` returns `false`. The set of entries is a snapshot taken on entry.
    pub(crate) fn iterate<F>(&self, mut f: F) -> bool
    where
        F: FnMut(&Slot) -> bool,
    {
        let mut bits = self.bitmask();
        while bits != 0 {
            let index = bits.trailing_zeros() as usize;
            if !f(&self.slots[index]) {
                return false;
            }
            bits &= bits - 1;
        }
        true
    }

    #[inline]
    pub(crate) fn next_ptr(&self) -> *mut Self {
        self.next.load(Ordering::Acquire)
    }

    #[inline]
    pub(crate) fn set_next(&self, next: *mut Self) {
        self.next.store(next, Ordering::Release);
    }

    #[inline]
    pub(crate) fn prev_ptr(&self) -> *mut Self {
        self.prev.load(Ordering::Acquire)
    }

    #[inline]
    pub(crate) fn set_prev(&self, prev: *mut Self) {
        self.prev.store(prev, Ordering::Release);
    }
}
