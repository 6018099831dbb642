//! Access markers and the per-slot view handed to iteration handlers.

use std::fmt;
use std::marker::PhantomData;

use crate::oop::{Oop, Slot};

mod private {
    pub trait Sealed {}
}

/// Whether a pass may write to the entries it visits.
pub trait Access: private::Sealed + Send + Sync + 'static {
    const IS_CONST: bool;
}

/// The pass treats the storage as read-only.
#[derive(Debug, Clone, Copy)]
pub enum Const {}

/// The pass may write the entries it visits.
#[derive(Debug, Clone, Copy)]
pub enum Mutable {}

impl private::Sealed for Const {}
impl private::Sealed for Mutable {}

impl Access for Const {
    const IS_CONST: bool = true;
}

impl Access for Mutable {
    const IS_CONST: bool = false;
}

/// One allocated entry, as seen by a handler during a pass.
///
/// During a concurrent pass the value may change at any time, including
/// between two `load`s in the same handler invocation.
pub struct Entry<'a, A> {
    slot: &'a Slot,
    _access: PhantomData<A>,
}

impl<A> Clone for Entry<'_, A> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<A> Copy for Entry<'_, A> {}

impl<'a, A: Access> Entry<'a, A> {
    #[inline]
    pub(crate) const fn new(slot: &'a Slot) -> Self {
        Self {
            slot,
            _access: PhantomData,
        }
    }

    #[inline]
    #[must_use]
    pub fn load(self) -> Option<Oop> {
        self.slot.load()
    }

    #[inline]
    #[must_use]
    pub fn is_null(self) -> bool {
        self.slot.is_null()
    }

    /// Address of the entry itself, comparable with [`OopHandle::addr`](crate::OopHandle::addr).
    #[inline]
    #[must_use]
    pub fn addr(self) -> usize {
        self.slot.addr()
    }
}

impl Entry<'_, Mutable> {
    /// Overwrites the value.
    ///
    /// A concurrent handler racing with `release` should prefer
    /// [`compare_exchange`](Self::compare_exchange), so that a released entry
    /// is never given a value again.
    #[inline]
    pub fn store(self, value: Oop) {
        self.slot.store(Some(value));
    }

    #[inline]
    pub fn clear(self) {
        self.slot.store(None);
    }

    /// Replaces the value only if it is still `current`.
    ///
    /// # Errors
    ///
    /// Returns the value actually found if it was not `current`.
    #[inline]
    pub fn compare_exchange(self, current: Oop, new: Option<Oop>) -> Result<Oop, Option<Oop>> {
        self.slot.compare_exchange(current, new)
    }
}

impl<A: Access> fmt::Debug for Entry<'_, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Entry")
            .field("addr", &format_args!("{:#x}", self.addr()))
            .field("value", &self.load())
            .field("const", &A::IS_CONST)
            .finish()
    }
}
