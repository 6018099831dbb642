//! Visitor traits and the adapters that turn them into per-entry handlers.

use crate::entry::{Access, Entry, Mutable};
use crate::oop::{Oop, Slot};

/// A visitor applied to entries by [`ParState::oops_do`](crate::ParState::oops_do)
/// and the `weak_oops_do` family.
///
/// During a concurrent pass the entry's value may change at any time.
pub trait OopClosure<A: Access> {
    fn do_oop(&mut self, entry: Entry<'_, A>);
}

/// Decides whether a referent is still reachable.
pub trait IsAliveClosure {
    fn do_object_b(&mut self, obj: Oop) -> bool;
}

impl<F> IsAliveClosure for F
where
    F: FnMut(Oop) -> bool,
{
    #[inline]
    fn do_object_b(&mut self, obj: Oop) -> bool {
        self(obj)
    }
}

/// Internal handler protocol shared by the adapters below.
pub(crate) trait EntryFn<A: Access> {
    fn call(&mut self, entry: Entry<'_, A>);
}

/// Adapts an [`OopClosure`] to a handler.
pub(crate) struct OopFn<'c, C: ?Sized> {
    cl: &'c mut C,
}

impl<'c, C: ?Sized> OopFn<'c, C> {
    pub(crate) fn new(cl: &'c mut C) -> Self {
        Self { cl }
    }
}

impl<A: Access, C: OopClosure<A> + ?Sized> EntryFn<A> for OopFn<'_, C> {
    #[inline]
    fn call(&mut self, entry: Entry<'_, A>) {
        self.cl.do_oop(entry);
    }
}

/// Skips entries whose value is null.
pub(crate) struct SkipNullFn<F> {
    f: F,
}

impl<F> SkipNullFn<F> {
    pub(crate) const fn new(f: F) -> Self {
        Self { f }
    }
}

impl<A: Access, F: EntryFn<A>> EntryFn<A> for SkipNullFn<F> {
    #[inline]
    fn call(&mut self, entry: Entry<'_, A>) {
        if !entry.is_null() {
            self.f.call(entry);
        }
    }
}

/// Skips null entries and clears entries whose referent is not alive.
pub(crate) struct IfAliveFn<'c, I: ?Sized, F> {
    is_alive: &'c mut I,
    f: F,
}

impl<'c, I: ?Sized, F> IfAliveFn<'c, I, F> {
    pub(crate) fn new(is_alive: &'c mut I, f: F) -> Self {
        Self { is_alive, f }
    }
}

impl<I, F> EntryFn<Mutable> for IfAliveFn<'_, I, F>
where
    I: IsAliveClosure + ?Sized,
    F: EntryFn<Mutable>,
{
    #[inline]
    fn call(&mut self, entry: Entry<'_, Mutable>) {
        if let Some(obj) = entry.load() {
            if self.is_alive.do_object_b(obj) {
                self.f.call(entry);
            } else {
                entry.clear();
            }
        }
    }
}

/// Wrapper for an iteration handler; ignores the handler result and always
/// continues the block scan.
pub(crate) struct AlwaysTrueFn<F> {
    f: F,
}

impl<F: FnMut(&Slot)> AlwaysTrueFn<F> {
    pub(crate) const fn new(f: F) -> Self {
        Self { f }
    }

    #[inline]
    pub(crate) fn call(&mut self, slot: &Slot) -> bool {
        (self.f)(slot);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ptr;

    fn oop(addr: usize) -> Oop {
        Oop::from_ptr(ptr::without_provenance_mut(addr)).unwrap()
    }

    #[derive(Default)]
    struct Recorder {
        seen: Vec<Option<Oop>>,
    }

    impl OopClosure<Mutable> for Recorder {
        fn do_oop(&mut self, entry: Entry<'_, Mutable>) {
            self.seen.push(entry.load());
        }
    }

    fn slots(values: &[Option<usize>]) -> Vec<Slot> {
        values
            .iter()
            .map(|value| {
                let slot = Slot::null();
                slot.store(value.map(oop));
                slot
            })
            .collect()
    }

    #[test]
    fn oop_fn_forwards_every_entry() {
        let slots = slots(&[None, Some(0x10)]);
        let mut recorder = Recorder::default();
        let mut f = OopFn::new(&mut recorder);
        for slot in &slots {
            EntryFn::<Mutable>::call(&mut f, Entry::new(slot));
        }
        assert_eq!(recorder.seen, vec![None, Some(oop(0x10))]);
    }

    #[test]
    fn skip_null_fn_drops_null_entries() {
        let slots = slots(&[None, Some(0x10), None, Some(0x20)]);
        let mut recorder = Recorder::default();
        let mut f = SkipNullFn::new(OopFn::new(&mut recorder));
        for slot in &slots {
            EntryFn::<Mutable>::call(&mut f, Entry::new(slot));
        }
        assert_eq!(recorder.seen, vec![Some(oop(0x10)), Some(oop(0x20))]);
    }

    #[test]
    fn if_alive_fn_clears_dead_entries() {
        let slots = slots(&[None, Some(0x10), Some(0x20)]);
        let mut asked = Vec::new();
        let mut is_alive = |obj: Oop| {
            asked.push(obj);
            obj != oop(0x10)
        };
        let mut recorder = Recorder::default();
        let mut f = IfAliveFn::new(&mut is_alive, OopFn::new(&mut recorder));
        for slot in &slots {
            EntryFn::<Mutable>::call(&mut f, Entry::new(slot));
        }
        drop(f);
        assert_eq!(recorder.seen, vec![Some(oop(0x20))]);
        assert_eq!(asked, vec![oop(0x10), oop(0x20)]);
        assert!(slots[0].is_null());
        assert!(slots[1].is_null());
        assert_eq!(slots[2].load(), Some(oop(0x20)));
    }

    #[test]
    fn always_true_fn_never_stops() {
        let slot = Slot::null();
        let mut calls = 0;
        let mut atf = AlwaysTrueFn::new(|_: &Slot| calls += 1);
        assert!(atf.call(&slot));
        assert!(atf.call(&slot));
        drop(atf);
        assert_eq!(calls, 2);
    }
}
