//! Chunked collections used by the scheduler core.
//!
//! - [`BlockList`]: a FIFO queue implemented as a linked list of fixed-size
//!   blocks, used for a task group's list of spawned fiber handles (insertion
//!   order must be preserved for `wait()`).
//!
//! Adapted down from a game-engine utility crate's hash-container and
//! `no_std`/wasm layer to the one piece the scheduler actually needs; see
//! `DESIGN.md` at the workspace root for what was dropped and why.

mod block_list;

pub use block_list::BlockList;
