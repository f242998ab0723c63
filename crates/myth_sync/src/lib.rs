//! Low-level synchronization primitives and concurrent data structures used by
//! the scheduler: spinlocks, a bounded MPMC array queue, an unbounded
//! block-linked queue, exponential backoff, and a one-shot flag.
//!
//! Adapted down from a game-engine utility crate's `no_std`/wasm-portable
//! layer to a plain `std` crate: the runtime always runs on real OS threads,
//! so the wasm/no_std indirection the original carried does not apply here.

pub mod thread;
pub mod utils;

pub use utils::{ArrayQueue, Backoff, CachePadded, Futex, FutexGuard, ListQueue, OnceFlag, SpinLock, SpinLockGuard};
