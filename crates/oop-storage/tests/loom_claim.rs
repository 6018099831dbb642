//! Loom tests for block claiming.
//!
//! These tests verify that racing workers partition the pinned block list.
//! The claim cursor switches to loom atomics under `--cfg loom`:
//!
//! ```text
//! RUSTFLAGS="--cfg loom" cargo test --release --test loom_claim
//! ```

#![cfg(loom)]

use std::collections::HashSet;
use std::sync::Arc;

use oop_storage::{Concurrent, Const, OopHandle, OopStorage, ParState, BLOCK_SIZE};

const BLOCKS: usize = 2;

fn leak_filled_storage() -> (&'static OopStorage, Vec<OopHandle>) {
    let storage: &'static OopStorage = Box::leak(Box::new(OopStorage::with_name("loom")));
    let handles = (0..BLOCKS * BLOCK_SIZE)
        .map(|_| storage.allocate().unwrap())
        .collect();
    (storage, handles)
}

/// Two workers race to claim blocks; every entry is visited by exactly one.
#[test]
fn test_two_workers_partition_blocks() {
    loom::model(|| {
        let (storage, handles) = leak_filled_storage();
        let state = Arc::new(ParState::<Concurrent, Const>::new(storage));

        let workers: Vec<_> = (0..2)
            .map(|_| {
                let state = Arc::clone(&state);
                loom::thread::spawn(move || {
                    let mut seen = Vec::new();
                    state.iterate(|entry| seen.push(entry.addr()));
                    seen
                })
            })
            .collect();
        let per_worker: Vec<Vec<usize>> =
            workers.into_iter().map(|w| w.join().unwrap()).collect();

        let total: usize = per_worker.iter().map(Vec::len).sum();
        let union: HashSet<usize> = per_worker.into_iter().flatten().collect();
        let expected: HashSet<usize> = handles.iter().map(OopHandle::addr).collect();
        assert_eq!(total, BLOCKS * BLOCK_SIZE);
        assert_eq!(union, expected);
        assert_eq!(state.blocks_claimed(), BLOCKS);

        drop(Arc::into_inner(state));
        assert!(!storage.concurrent_iteration_active());
        for handle in handles {
            storage.release(handle);
        }
        // SAFETY: the pass is gone and no other reference to the leaked
        // storage remains.
        drop(unsafe { Box::from_raw(std::ptr::from_ref(storage).cast_mut()) });
    });
}

/// A worker that starts after the other exhausted the pass claims nothing.
#[test]
fn test_late_worker_finds_pass_exhausted() {
    loom::model(|| {
        let (storage, handles) = leak_filled_storage();
        let state = Arc::new(ParState::<Concurrent, Const>::new(storage));

        let first = loom::thread::spawn({
            let state = Arc::clone(&state);
            move || {
                let mut count = 0;
                state.iterate(|_| count += 1);
                count
            }
        });
        let first_count = first.join().unwrap();

        let second = loom::thread::spawn({
            let state = Arc::clone(&state);
            move || {
                let mut count = 0;
                state.iterate(|_| count += 1);
                count
            }
        });
        let second_count = second.join().unwrap();

        assert_eq!(first_count, BLOCKS * BLOCK_SIZE);
        assert_eq!(second_count, 0);

        drop(Arc::into_inner(state));
        for handle in handles {
            storage.release(handle);
        }
        // SAFETY: as above.
        drop(unsafe { Box::from_raw(std::ptr::from_ref(storage).cast_mut()) });
    });
}
