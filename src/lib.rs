//! `myth` is a user-space M:N fiber runtime: a fixed pool of OS threads, one
//! pinned per CPU, multiplexing a much larger population of lightweight,
//! cooperatively-scheduled fibers with a work-stealing scheduler.
//!
//! Its whole purpose is divide-and-conquer task parallelism where spawning a
//! task should cost close to a function call: recursive algorithms
//! (Fibonacci, merge sort, tree reductions), embarrassingly-parallel
//! fan-out/fan-in, and anything else shaped like "spawn a handful of
//! children, wait for all of them".
//!
//! # Quick start
//!
//! ```
//! use myth::RuntimeBuilder;
//!
//! fn fib(n: u64) -> u64 {
//!     if n < 2 {
//!         return n;
//!     }
//!     let mut a = 0;
//!     let mut b = 0;
//!     myth::scope(|group| {
//!         group.run(|| a = fib(n - 1));
//!         group.run(|| b = fib(n - 2));
//!     });
//!     a + b
//! }
//!
//! let mut runtime = RuntimeBuilder::new().workers(4).build().unwrap();
//! let result = runtime.block_on(|| fib(20));
//! assert_eq!(result, 6765);
//! ```
//!
//! # Programming surface
//!
//! - [`RuntimeBuilder`] / [`Runtime`] - construct the worker pool and drive
//!   a root closure to completion via [`Runtime::block_on`].
//! - [`scope`] - open a fork/join [`TaskGroup`]: [`TaskGroup::run`] spawns a
//!   child fiber, [`TaskGroup::run_if`] conditionally spawns or runs inline,
//!   [`TaskGroup::wait`] joins everything spawned since the last `wait`.
//! - [`join`] / [`yield_now`] - the low-level primitives a `TaskGroup` is
//!   itself built on, for code that wants to manage fiber handles directly.
//! - [`Runtime::set_steal_func`] - swap the victim-selection policy
//!   ([`StealPolicy`]) at runtime; [`UniformRandom`] is the default.
//!
//! # What this crate is not
//!
//! There is no preemption (a fiber runs until it yields, joins, or spawns
//! with the default work-first policy), no cross-process scheduling, no
//! fairness guarantee across fibers, and no deterministic ordering across
//! runs - see the crate-level docs on [`myth_rt`] for the full invariants.
//!
//! I/O multiplexing, malloc interception, blocking-syscall interception and
//! profiling/DAG recording are deliberately out of scope for the core;
//! they are external collaborators that would be built against
//! [`join`]/[`yield_now`]/the steal-function hook, not inside it.

pub use myth_rt::{
    DEFAULT_QUEUE_CAPACITY, DEFAULT_SCHEDULER_STACK_SIZE, DEFAULT_STACK_ALLOC_UNIT, DEFAULT_STACK_SIZE, FiberId, JoinHandle, Runtime,
    RuntimeBuilder, RuntimeConfig, RuntimeError, StatsSnapshot, StealPolicy, TaskGroup, UniformRandom, WorkerStats, join, scope, yield_now,
};
