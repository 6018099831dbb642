//! Segmented storage for garbage collector roots, with parallel iteration.
//!
//! `oop-storage` provides an [`OopStorage`]: a doubly-linked list of
//! fixed-size blocks of reference slots, used by a collector to hold
//! root-like pointers into its managed heap. The collector walks it with a
//! [`ParState`], which hands out whole blocks to any number of worker threads
//! so that each block is processed by exactly one of them.
//!
//! # Pass Modes
//!
//! A pass is typed by two markers:
//!
//! - [`Concurrent`] or [`AtSafepoint`]: whether mutators may allocate and
//!   release entries while the pass runs. A safepoint pass borrows the
//!   storage mutably, so the compiler rules out mutator activity.
//! - [`Const`] or [`Mutable`]: whether handlers may write the entries they
//!   visit.
//!
//! Every pass offers [`ParState::iterate`] and [`ParState::oops_do`]. Only
//! `ParState<AtSafepoint, Mutable>` adds the pre-filtering
//! [`weak_oops_do`](ParState::weak_oops_do) and
//! [`weak_oops_do_if_alive`](ParState::weak_oops_do_if_alive).
//!
//! # Quick Start
//!
//! ```
//! use std::ptr::NonNull;
//! use std::sync::atomic::{AtomicUsize, Ordering};
//!
//! use oop_storage::{Concurrent, Const, Oop, OopStorage, ParState};
//!
//! let storage = OopStorage::with_name("global-roots");
//! let mut object = 0u64;
//! let handle = storage.allocate().expect("allocation");
//! storage.set(&handle, Some(Oop::new(NonNull::from(&mut object).cast())));
//!
//! let visited = AtomicUsize::new(0);
//! let state = ParState::<Concurrent, Const>::new(&storage);
//! std::thread::scope(|scope| {
//!     for _ in 0..2 {
//!         scope.spawn(|| {
//!             state.iterate(|entry| {
//!                 if entry.load().is_some() {
//!                     visited.fetch_add(1, Ordering::Relaxed);
//!                 }
//!             });
//!         });
//!     }
//! });
//! drop(state);
//!
//! assert_eq!(visited.load(Ordering::Relaxed), 1);
//! storage.release(handle);
//! ```
//!
//! # Thread Safety
//!
//! `OopStorage` and `ParState` are `Send + Sync`. Workers share a pass by
//! reference; each brings its own handler.

#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_panics_doc)]

mod block;
mod closures;
mod config;
mod entry;
mod metrics;
mod oop;
mod par_state;
mod storage;
mod tracing;

pub use block::BLOCK_SIZE;
pub use closures::{IsAliveClosure, OopClosure};
pub use config::{StorageConfig, DEFAULT_STORAGE_NAME};
pub use entry::{Access, Const, Entry, Mutable};
pub use metrics::StorageMetrics;
pub use oop::Oop;
pub use par_state::{AtSafepoint, Concurrency, Concurrent, ParState};
pub use storage::{OopHandle, OopStorage};
pub use tracing::PassId;
