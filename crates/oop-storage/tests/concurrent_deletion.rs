//! Empty block deletion alongside concurrent iteration and mutators.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use crossbeam_queue::SegQueue;

use oop_storage::{Concurrent, Const, OopHandle, OopStorage, ParState, BLOCK_SIZE};

fn empty_blocks(storage: &OopStorage, blocks: usize) {
    let handles: Vec<OopHandle> = (0..blocks * BLOCK_SIZE)
        .map(|_| storage.allocate().unwrap())
        .collect();
    for handle in handles {
        storage.release(handle);
    }
}

#[test]
fn test_deletion_thread_observes_iteration_lifecycle() {
    let storage = OopStorage::with_name("lifecycle");
    empty_blocks(&storage, 2);
    assert_eq!(storage.block_count(), 2);

    let state = ParState::<Concurrent, Const>::new(&storage);
    std::thread::scope(|scope| {
        scope
            .spawn(|| {
                assert!(storage.concurrent_iteration_active());
                assert_eq!(storage.delete_empty_blocks_concurrent(), 0);
            })
            .join()
            .unwrap();
    });
    assert_eq!(storage.block_count(), 2);
    assert!(storage.metrics().deletions_inhibited >= 1);
    drop(state);

    std::thread::scope(|scope| {
        let deleted = scope
            .spawn(|| storage.delete_empty_blocks_concurrent())
            .join()
            .unwrap();
        assert_eq!(deleted, 2);
    });
    assert_eq!(storage.block_count(), 0);
    assert_eq!(storage.metrics().blocks_deleted, 2);
}

#[test]
fn test_deletion_never_races_a_running_pass() {
    let storage = OopStorage::default();
    let kept: Vec<OopHandle> = (0..4 * BLOCK_SIZE)
        .map(|_| storage.allocate().unwrap())
        .collect();
    empty_blocks(&storage, 3);
    let blocks_before = storage.block_count();

    let state = ParState::<Concurrent, Const>::new(&storage);
    let done = AtomicBool::new(false);
    let visited = AtomicUsize::new(0);
    std::thread::scope(|scope| {
        scope.spawn(|| {
            while !done.load(Ordering::Acquire) {
                assert_eq!(storage.delete_empty_blocks_concurrent(), 0);
                std::thread::yield_now();
            }
        });
        let workers: Vec<_> = (0..2)
            .map(|_| {
                scope.spawn(|| {
                    state.iterate(|_| {
                        visited.fetch_add(1, Ordering::Relaxed);
                    });
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }
        done.store(true, Ordering::Release);
    });
    drop(state);

    assert_eq!(visited.load(Ordering::Relaxed), 4 * BLOCK_SIZE);
    assert_eq!(storage.block_count(), blocks_before);
    assert!(storage.delete_empty_blocks_concurrent() >= 1);

    for handle in kept {
        storage.release(handle);
    }
}

/// A producer allocates, a consumer releases, and a third thread keeps
/// deleting empty blocks. Handles in flight must stay usable.
#[test]
fn test_deletion_alongside_allocate_and_release() {
    const HANDLES: usize = 5_000;

    let mut storage = OopStorage::default();
    let queue = SegQueue::new();
    let released = AtomicUsize::new(0);
    std::thread::scope(|scope| {
        scope.spawn(|| {
            for _ in 0..HANDLES {
                queue.push(storage.allocate().unwrap());
            }
        });
        scope.spawn(|| {
            while released.load(Ordering::Acquire) < HANDLES {
                match queue.pop() {
                    Some(handle) => {
                        assert_eq!(storage.get(&handle), None);
                        storage.release(handle);
                        released.fetch_add(1, Ordering::Release);
                    }
                    None => std::thread::yield_now(),
                }
            }
        });
        scope.spawn(|| {
            while released.load(Ordering::Acquire) < HANDLES {
                storage.delete_empty_blocks_concurrent();
            }
        });
    });

    assert_eq!(storage.allocation_count(), 0);
    storage.delete_empty_blocks();
    assert_eq!(storage.block_count(), 0);
}
