//! Heap references and the atomic slots that hold them.
//!
//! - `Oop`: a non-null reference into the managed heap (single word)
//! - `Slot`: an atomic cell holding either null or an `Oop`

use std::fmt;
use std::ptr::{self, NonNull};
use std::sync::atomic::{AtomicPtr, Ordering};

/// A non-null reference into the managed heap.
///
/// The storage never dereferences an `Oop`; it only moves the address around.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct Oop(NonNull<u8>);

// SAFETY: An `Oop` is an opaque address token. The storage never reads
// through it, so sharing it between threads cannot cause a data race.
unsafe impl Send for Oop {}
unsafe impl Sync for Oop {}

impl Oop {
    /// Wraps a non-null heap pointer.
    #[inline]
    #[must_use]
    pub const fn new(ptr: NonNull<u8>) -> Self {
        Self(ptr)
    }

    /// Wraps a raw pointer, returning `None` for null.
    #[inline]
    #[must_use]
    pub fn from_ptr(ptr: *mut u8) -> Option<Self> {
        NonNull::new(ptr).map(Self)
    }

    /// Returns the raw heap pointer.
    #[inline]
    #[must_use]
    pub const fn as_ptr(self) -> *mut u8 {
        self.0.as_ptr()
    }

    /// Returns the address of the referent.
    #[inline]
    #[must_use]
    pub fn addr(self) -> usize {
        self.0.as_ptr().addr()
    }
}

impl fmt::Debug for Oop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Oop({:#x})", self.addr())
    }
}

/// A reference-sized storage location.
///
/// A slot that is not in use always holds null. Slots are only ever created
/// inside a [`Block`](crate::block::Block).
#[repr(transparent)]
pub struct Slot {
    value: AtomicPtr<u8>,
}

impl Slot {
    #[inline]
    pub(crate) const fn null() -> Self {
        Self {
            value: AtomicPtr::new(ptr::null_mut()),
        }
    }

    /// Reads the current value.
    #[inline]
    pub fn load(&self) -> Option<Oop> {
        Oop::from_ptr(self.value.load(Ordering::Acquire))
    }

    #[inline]
    pub fn is_null(&self) -> bool {
        self.value.load(Ordering::Acquire).is_null()
    }

    #[inline]
    pub(crate) fn store(&self, value: Option<Oop>) {
        let raw = value.map_or(ptr::null_mut(), Oop::as_ptr);
        self.value.store(raw, Ordering::Release);
    }

    #[inline]
    pub(crate) fn compare_exchange(
        &self,
        current: Oop,
        new: Option<Oop>,
    ) -> Result<Oop, Option<Oop>> {
        let raw = new.map_or(ptr::null_mut(), Oop::as_ptr);
        self.value
            .compare_exchange(current.as_ptr(), raw, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| current)
            .map_err(Oop::from_ptr)
    }

    /// The address of the slot itself, not of its referent.
    #[inline]
    pub fn addr(&self) -> usize {
        ptr::from_ref(self).addr()
    }
}

impl fmt::Debug for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Slot")
            .field("addr", &format_args!("{:#x}", self.addr()))
            .field("value", &self.load())
            .finish()
    }
}
