//! Parallel, and optionally concurrent, iteration over a storage.
//!
//! Parallel iteration is for the exclusive use of the collector. A pass is one
//! [`ParState`]; every participating worker calls [`ParState::iterate`] (or an
//! adapter built on it) through a shared reference. Each call repeatedly
//! claims a block that no worker has processed yet and applies the handler to
//! every allocated entry of that block, until no blocks remain.
//!
//! # Concurrent Iteration
//!
//! At most one concurrent `ParState` can exist at a time for a given storage.
//! It sets the storage's `concurrent_iteration_active` flag on construction
//! and clears it on drop, both under `active_mutex`; empty block deletion does
//! nothing while the flag is set.
//!
//! The first worker to start iterating pins the storage's current head. Blocks
//! allocated later are linked in front of it and are not examined by the pass.
//! Allocation and release may still change the entries of pinned blocks at any
//! time, so a concurrent handler must accept that an entry's value can appear,
//! disappear, or change while it is looking at it. An entry's value is null
//! whenever it is not in use.
//!
//! # Safepoint Iteration
//!
//! A safepoint `ParState` borrows the storage exclusively: no allocation,
//! release or deletion can overlap it, and no flag is involved. Only the
//! `ParState<AtSafepoint, Mutable>` instantiation offers `weak_oops_do`, since
//! pre-filtering by the iteration layer is unsound when mutators can change an
//! entry between the filter and the handler. `weak_oops_do_if_alive` also
//! clears dead entries itself, which a const pass must never do.

use std::fmt;
use std::marker::PhantomData;
use std::ptr::{self, NonNull};

#[cfg(loom)]
use loom::sync::atomic::{AtomicPtr, AtomicUsize, Ordering};
#[cfg(not(loom))]
use std::sync::atomic::{AtomicPtr, AtomicUsize, Ordering};

use crossbeam::utils::CachePadded;

use crate::block::Block;
use crate::closures::{
    AlwaysTrueFn, EntryFn, IfAliveFn, IsAliveClosure, OopClosure, OopFn, SkipNullFn,
};
use crate::entry::{Access, Entry, Mutable};
use crate::oop::Slot;
use crate::storage::OopStorage;
use crate::tracing::{self, PassId};

mod private {
    pub trait Sealed {}
}

/// Whether a pass runs alongside mutators.
pub trait Concurrency: private::Sealed + Send + Sync + 'static {
    const CONCURRENT: bool;
}

/// The pass runs concurrently with allocation and release.
#[derive(Debug, Clone, Copy)]
pub enum Concurrent {}

/// The pass runs with mutators stopped.
#[derive(Debug, Clone, Copy)]
pub enum AtSafepoint {}

impl private::Sealed for Concurrent {}
impl private::Sealed for AtSafepoint {}

impl Concurrency for Concurrent {
    const CONCURRENT: bool = true;
}

impl Concurrency for AtSafepoint {
    const CONCURRENT: bool = false;
}

/// Cursor value before any worker has started the pass. Blocks are 1024-byte
/// aligned, so no block lives at this address.
const NOT_STARTED: usize = 1;

#[inline]
fn not_started() -> *mut Block {
    ptr::without_provenance_mut(NOT_STARTED)
}

/// Claiming state shared by every [`ParState`] instantiation.
pub(crate) struct BasicParState<'s> {
    storage: &'s OopStorage,
    next_block: CachePadded<AtomicPtr<Block>>,
    concurrent: bool,
    blocks_claimed: AtomicUsize,
    pass_id: PassId,
    span: tracing::Span,
}

impl<'s> BasicParState<'s> {
    #[track_caller]
    pub(crate) fn new(storage: &'s OopStorage, concurrent: bool) -> Self {
        if concurrent {
            Self::update_iteration_state(storage, true);
        }
        storage.stats().record_pass_started();
        let pass_id = tracing::next_pass_id();
        Self {
            storage,
            next_block: CachePadded::new(AtomicPtr::new(not_started())),
            concurrent,
            blocks_claimed: AtomicUsize::new(0),
            pass_id,
            span: tracing::pass_span(storage.name(), concurrent, pass_id),
        }
    }

    #[track_caller]
    fn update_iteration_state(storage: &OopStorage, value: bool) {
        let mut active = storage.lock_active();
        if value {
            assert!(
                !active.concurrent_iteration_active,
                "{}: a concurrent iteration is already active",
                storage.name(),
            );
        } else {
            debug_assert!(active.concurrent_iteration_active);
        }
        active.concurrent_iteration_active = value;
    }

    /// Pins the starting block for the pass. Idempotent; the first caller wins.
    fn ensure_iteration_started(&self) {
        if self.next_block.load(Ordering::Acquire).addr() != NOT_STARTED {
            return;
        }
        let head = self.storage.active_head();
        if self
            .next_block
            .compare_exchange(not_started(), head, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            tracing::log_iteration_started(self.pass_id, head.addr());
        }
    }

    /// Takes the next unprocessed block, or `None` once the pass is exhausted.
    fn claim_next_block(&self) -> Option<&Block> {
        let mut next = self.next_block.load(Ordering::Acquire);
        debug_assert_ne!(next.addr(), NOT_STARTED, "claiming before the pass started");
        loop {
            let block = NonNull::new(next)?;
            // SAFETY: blocks reachable from the pinned head stay linked for the
            // whole pass: deletion is inhibited (concurrent) or excluded by the
            // exclusive borrow (safepoint).
            let block = unsafe { &*block.as_ptr() };
            match self.next_block.compare_exchange_weak(
                next,
                block.next_ptr(),
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    self.blocks_claimed.fetch_add(1, Ordering::Relaxed);
                    return Some(block);
                }
                Err(current) => next = current,
            }
        }
    }

    pub(crate) fn iterate<F>(&self, f: F)
    where
        F: FnMut(&Slot),
    {
        let mut atf = AlwaysTrueFn::new(f);
        self.span.in_scope(|| {
            self.ensure_iteration_started();
            while let Some(block) = self.claim_next_block() {
                block.iterate(|slot| atf.call(slot));
            }
        });
    }

    pub(crate) fn blocks_claimed(&self) -> usize {
        self.blocks_claimed.load(Ordering::Relaxed)
    }
}

impl Drop for BasicParState<'_> {
    fn drop(&mut self) {
        tracing::log_pass_end(self.pass_id, self.blocks_claimed.load(Ordering::Relaxed));
        if self.concurrent {
            Self::update_iteration_state(self.storage, false);
        }
    }
}

/// One parallel iteration pass over an [`OopStorage`].
///
/// `C` is [`Concurrent`] if the pass runs alongside mutators and
/// [`AtSafepoint`] otherwise. `A` is [`Const`](crate::Const) if handlers only
/// read entries and [`Mutable`] if they may write them.
///
/// The null-skipping adapters only exist at a safepoint:
///
/// ```compile_fail
/// use oop_storage::{Concurrent, Entry, Mutable, OopClosure, OopStorage, ParState};
///
/// struct Noop;
/// impl OopClosure<Mutable> for Noop {
///     fn do_oop(&mut self, _: Entry<'_, Mutable>) {}
/// }
///
/// let storage = OopStorage::default();
/// ParState::<Concurrent, Mutable>::new(&storage).weak_oops_do(&mut Noop);
/// ```
///
/// and a const pass hands out read-only entries:
///
/// ```compile_fail
/// use oop_storage::{AtSafepoint, Const, OopStorage, ParState};
///
/// let mut storage = OopStorage::default();
/// ParState::<AtSafepoint, Const>::new(&mut storage).iterate(|entry| entry.clear());
/// ```
pub struct ParState<'s, C: Concurrency, A: Access> {
    basic: BasicParState<'s>,
    _marker: PhantomData<fn() -> (C, A)>,
}

impl<'s, A: Access> ParState<'s, Concurrent, A> {
    /// Starts a concurrent pass, inhibiting empty block deletion until drop.
    ///
    /// # Panics
    ///
    /// Panics if another concurrent pass over `storage` is alive.
    #[track_caller]
    pub fn new(storage: &'s OopStorage) -> Self {
        Self {
            basic: BasicParState::new(storage, Concurrent::CONCURRENT),
            _marker: PhantomData,
        }
    }
}

impl<'s, A: Access> ParState<'s, AtSafepoint, A> {
    /// Starts a safepoint pass over an exclusively borrowed storage.
    pub fn new(storage: &'s mut OopStorage) -> Self {
        Self {
            basic: BasicParState::new(storage, AtSafepoint::CONCURRENT),
            _marker: PhantomData,
        }
    }
}

impl<C: Concurrency, A: Access> ParState<'_, C, A> {
    /// Claims blocks until none remain, calling `f` on each allocated entry of
    /// every claimed block.
    ///
    /// Call from any number of workers; each processes a disjoint set of
    /// blocks. Concurrent passes must expect an entry's value to change at any
    /// time.
    pub fn iterate<F>(&self, mut f: F)
    where
        F: FnMut(Entry<'_, A>),
    {
        self.basic.iterate(|slot| f(Entry::new(slot)));
    }

    /// [`iterate`](Self::iterate) with a visitor object.
    pub fn oops_do<Cl>(&self, cl: &mut Cl)
    where
        Cl: OopClosure<A> + ?Sized,
    {
        let mut f = OopFn::new(cl);
        self.iterate(|entry| f.call(entry));
    }

    /// Whether mutators may run alongside this pass.
    #[inline]
    pub const fn is_concurrent(&self) -> bool {
        C::CONCURRENT
    }

    /// Whether handlers of this pass are limited to reading entries.
    #[inline]
    pub const fn is_const(&self) -> bool {
        A::IS_CONST
    }

    /// The storage this pass walks.
    #[inline]
    pub const fn storage(&self) -> &OopStorage {
        self.basic.storage
    }

    /// Blocks claimed so far by all workers.
    #[inline]
    pub fn blocks_claimed(&self) -> usize {
        self.basic.blocks_claimed()
    }

    /// Identifier correlating this pass's log events.
    #[inline]
    pub const fn pass_id(&self) -> PassId {
        self.basic.pass_id
    }
}

impl ParState<'_, AtSafepoint, Mutable> {
    /// Visits every entry whose value is non-null.
    pub fn weak_oops_do<Cl>(&self, cl: &mut Cl)
    where
        Cl: OopClosure<Mutable> + ?Sized,
    {
        let mut f = SkipNullFn::new(OopFn::new(cl));
        self.iterate(|entry| f.call(entry));
    }

    /// Visits every entry whose value is non-null and alive according to
    /// `is_alive`, and clears every entry whose value is dead. Neither closure
    /// is invoked for null entries; `cl` is not invoked for dead ones.
    pub fn weak_oops_do_if_alive<I, Cl>(&self, is_alive: &mut I, cl: &mut Cl)
    where
        I: IsAliveClosure + ?Sized,
        Cl: OopClosure<Mutable> + ?Sized,
    {
        let mut f = IfAliveFn::new(is_alive, OopFn::new(cl));
        self.iterate(|entry| f.call(entry));
    }
}

impl<C: Concurrency, A: Access> fmt::Debug for ParState<'_, C, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParState")
            .field("storage", &self.storage().name())
            .field("concurrent", &self.is_concurrent())
            .field("const", &self.is_const())
            .field("blocks_claimed", &self.blocks_claimed())
            .finish()
    }
}
