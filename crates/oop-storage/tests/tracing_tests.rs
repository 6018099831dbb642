//! Integration tests for the tracing feature.
//!
//! These tests install a capturing subscriber and check that passes and
//! block management emit their events.

#![cfg(feature = "tracing")]

use std::io;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing_subscriber::fmt;

use oop_storage::{AtSafepoint, Concurrent, Const, OopStorage, ParState};

#[derive(Clone, Default)]
struct Capture(Arc<Mutex<Vec<u8>>>);

impl Capture {
    fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock()).into_owned()
    }
}

impl io::Write for Capture {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

fn capture<R>(f: impl FnOnce() -> R) -> (R, String) {
    let capture = Capture::default();
    let writer = capture.clone();
    let subscriber = fmt()
        .with_max_level(tracing::Level::TRACE)
        .with_ansi(false)
        .with_writer(move || writer.clone())
        .finish();
    let result = tracing::subscriber::with_default(subscriber, f);
    (result, capture.contents())
}

#[test]
fn test_concurrent_pass_emits_start_and_end() {
    let storage = OopStorage::with_name("traced-roots");
    let handle = storage.allocate().unwrap();

    let (pass_id, output) = capture(|| {
        let state = ParState::<Concurrent, Const>::new(&storage);
        state.iterate(|_| {});
        state.pass_id()
    });

    assert!(output.contains("iteration_started"), "{output}");
    assert!(output.contains("pass_end"), "{output}");
    assert!(output.contains("blocks_claimed=1"), "{output}");
    assert!(output.contains(&format!("pass_id={}", pass_id.0)), "{output}");
    assert!(output.contains("traced-roots"), "{output}");
    storage.release(handle);
}

#[test]
fn test_block_management_events() {
    let (storage, output) = capture(|| {
        let storage = OopStorage::with_name("blocks");
        let handle = storage.allocate().unwrap();
        storage.release(handle);

        let state = ParState::<Concurrent, Const>::new(&storage);
        assert_eq!(storage.delete_empty_blocks_concurrent(), 0);
        drop(state);
        assert_eq!(storage.delete_empty_blocks_concurrent(), 1);
        storage
    });

    assert!(output.contains("block_allocated"), "{output}");
    assert!(output.contains("empty_block_deletion_inhibited"), "{output}");
    assert!(output.contains("empty_blocks_deleted"), "{output}");
    assert_eq!(storage.block_count(), 0);
}

#[test]
fn test_unstarted_pass_still_reports_end() {
    let mut storage = OopStorage::default();
    let ((), output) = capture(|| {
        drop(ParState::<AtSafepoint, Const>::new(&mut storage));
    });

    assert!(!output.contains("iteration_started"), "{output}");
    assert!(output.contains("pass_end"), "{output}");
    assert!(output.contains("blocks_claimed=0"), "{output}");
}
