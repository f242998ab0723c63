//! The myth scheduler core: fibers, a work-stealing runnable deque, the
//! per-worker scheduler loop, join synchronization and the task-group
//! fork/join façade, assembled behind a single [`Runtime`].
//!
//! A [`Runtime`] is built from a [`RuntimeBuilder`] (or `RuntimeBuilder`'s
//! `Default`) and driven with [`Runtime::block_on`], which pins one OS
//! thread per worker, runs a root closure to completion as a fiber, and
//! tears the pool back down before returning that closure's result. Inside
//! the closure (and anything it calls, transitively), [`scope`] opens a
//! fork/join scope, [`join`] and [`yield_now`] are the low-level primitives
//! it and the scope's [`TaskGroup`] are built on.
//!
//! ```no_run
//! let sum = myth_rt::RuntimeBuilder::new().workers(4).build().unwrap().block_on(|| {
//!     myth_rt::scope(|group| {
//!         let mut total = 0usize;
//!         for _ in 0..4 {
//!             group.run(|| { /* ... */ });
//!         }
//!         group.wait();
//!         total += 1;
//!         total
//!     })
//! });
//! assert_eq!(sum, 1);
//! ```

mod affinity;
mod config;
mod deque;
mod error;
mod fiber;
mod join;
mod rng;
mod stats;
mod steal;
mod task_group;
mod topology;
mod worker;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};

use crossbeam_deque::Stealer;
use myth_fiber::Stack;
use myth_sync::ListQueue;

pub use config::{
    DEFAULT_QUEUE_CAPACITY, DEFAULT_SCHEDULER_STACK_SIZE, DEFAULT_STACK_ALLOC_UNIT, DEFAULT_STACK_SIZE, RuntimeBuilder, RuntimeConfig,
};
pub use error::RuntimeError;
pub use fiber::{FiberId, JoinHandle};
pub use join::{join, yield_now};
pub use stats::{StatsSnapshot, WorkerStats};
pub use steal::{StealPolicy, UniformRandom};
pub use task_group::{TaskGroup, scope};

use crate::fiber::{FiberHandle, FiberOutcome};
use crate::steal::StealHandle;
use crate::worker::Worker;

/// Re-exported so [`fatal!`]'s expansion (which names `$crate::tracing`)
/// resolves both from inside this crate and from any crate that invokes it.
#[doc(hidden)]
pub use tracing;

/// A constructed, not-yet-started pool of workers: the product of
/// [`RuntimeBuilder::build`]. No OS thread is spawned until
/// [`Runtime::block_on`] runs; until then this just holds the resolved
/// configuration and each worker's pre-wired deque, stack pool and RNG.
pub struct Runtime {
    config: RuntimeConfig,
    shutdown: Arc<AtomicBool>,
    stats: Vec<Arc<WorkerStats>>,
    steal_handle: StealHandle,
    workers: Vec<Worker>,
}

impl RuntimeBuilder {
    /// Resolves this builder against the environment and platform defaults,
    /// then constructs every worker's deque, stack pool and peer-stealer
    /// wiring. Spawns no OS threads - those start only inside
    /// [`Runtime::block_on`].
    pub fn build(self) -> Result<Runtime, RuntimeError> {
        Runtime::from_config(self.resolve()?)
    }
}

impl Runtime {
    /// Builds a runtime from `MYTH_WORKERS`/`MYTH_CPU_HIERARCHY`/
    /// `MYTH_PROB_FILE` and platform defaults. Shorthand for
    /// `RuntimeBuilder::new().build()`.
    pub fn new() -> Result<Self, RuntimeError> {
        RuntimeBuilder::new().build()
    }

    /// Number of workers this runtime was built with.
    pub fn worker_count(&self) -> usize {
        self.config.workers
    }

    /// Per-worker profiling counters, snapshotted at call time, rank order.
    pub fn stats(&self) -> Vec<StatsSnapshot> {
        self.stats.iter().map(|s| s.snapshot()).collect()
    }

    /// Atomically swaps the scheduler's victim-selection policy for every
    /// worker in this pool, returning the one it replaced (§6's
    /// `set_steal_func(fn) -> previous_fn` hook). Every worker picks up the
    /// new policy on its very next steal attempt; a steal already in flight
    /// finishes against whichever policy it already loaded - there is no
    /// global pause while the swap takes effect.
    pub fn set_steal_func(&self, policy: impl StealPolicy + 'static) -> Arc<Box<dyn StealPolicy>> {
        self.steal_handle.set(Box::new(policy))
    }

    fn from_config(config: RuntimeConfig) -> Result<Self, RuntimeError> {
        let n = config.workers;
        let shutdown = Arc::new(AtomicBool::new(false));
        let stats: Vec<Arc<WorkerStats>> = (0..n).map(|_| Arc::new(WorkerStats::default())).collect();
        let remote_free: Vec<Arc<ListQueue<Stack>>> = (0..n).map(|_| Arc::new(ListQueue::default())).collect();
        let steal_handle = Self::build_steal_handle(&config)?;

        let mut workers: Vec<Worker> = (0..n)
            .map(|rank| {
                Worker::new(
                    rank,
                    n,
                    config.stack_size,
                    config.stack_alloc_unit,
                    config.queue_capacity,
                    steal_handle.clone(),
                    remote_free.clone(),
                    Arc::clone(&stats[rank]),
                    Arc::clone(&shutdown),
                )
            })
            .collect();

        // Every worker needs every peer's stealer before any of them starts
        // running - the barrier to operational state the lifecycle design
        // calls for is exactly this: wiring finishes here, on the thread
        // that will become worker 0, strictly before `block_on` spawns the
        // rest.
        let stealers: Vec<Stealer<FiberHandle>> = workers.iter().map(|w| w.deque().stealer()).collect();
        for worker in &mut workers {
            worker.set_peers(stealers.clone());
        }

        Ok(Self { config, shutdown, stats, steal_handle, workers })
    }

    #[cfg(feature = "topology")]
    fn build_steal_handle(config: &RuntimeConfig) -> Result<StealHandle, RuntimeError> {
        let table = topology::ProbTable::build(&config.topology, config.workers)?;
        Ok(StealHandle::new(Box::new(steal::TopologyWeighted(table))))
    }

    /// Without the `topology` feature the weighted policy and its table
    /// construction aren't compiled in at all; any configured topology
    /// source is simply unused; every worker steals uniformly at random.
    #[cfg(not(feature = "topology"))]
    fn build_steal_handle(_config: &RuntimeConfig) -> Result<StealHandle, RuntimeError> {
        Ok(StealHandle::new(Box::new(UniformRandom)))
    }

    /// Installs the calling thread as worker 0, pins and starts every other
    /// worker on its own OS thread, runs `f` to completion as the root
    /// fiber, then signals shutdown, joins every worker, and returns `f`'s
    /// result.
    ///
    /// `f` runs inside a fiber dispatched by the scheduler, so it (and
    /// anything it calls, transitively) may use [`scope`], [`join`], and
    /// [`yield_now`] freely - exactly as any other fiber body would.
    ///
    /// # Panics
    ///
    /// Propagates a panic that escapes `f` to the caller of `block_on`,
    /// after every worker has shut down cleanly. Aborts the process (via
    /// [`fatal!`]) if a worker thread itself panics instead of returning
    /// from its run loop - that is an invariant violation, not a user error.
    pub fn block_on<F, R>(&mut self, f: F) -> R
    where
        F: FnOnce() -> R + Send,
        R: Send,
    {
        let mut worker0 = self.workers.remove(0);
        let rest = std::mem::take(&mut self.workers);
        let thread_name = self.config.thread_name.clone();
        let shutdown = Arc::clone(&self.shutdown);

        let output: Arc<Mutex<Option<R>>> = Arc::new(Mutex::new(None));
        let output_for_body = Arc::clone(&output);

        // The work-first discipline guarantees every fiber `f` spawns
        // (transitively, through nested `scope`s) has already been joined
        // by the time `f` returns here - `TaskGroup::wait`/`scope` block
        // until their own children are DONE. So signalling shutdown right
        // after `f` returns, rather than waiting for some separate
        // termination-detection pass, is sound: nothing is still running
        // anywhere in the pool at that point.
        let body: Box<dyn FnOnce() + Send> = Box::new(move || {
            let result = f();
            *output_for_body.lock().unwrap_or_else(PoisonError::into_inner) = Some(result);
            shutdown.store(true, Ordering::Release);
        });

        let (root_handle, root_join) = worker0.create_fiber(body, Some(Box::from("root")));
        worker0.enqueue(root_handle);

        let scheduler_stack_size = self.config.scheduler_stack_size;
        let threads: Vec<std::thread::JoinHandle<()>> = rest
            .into_iter()
            .map(|mut worker| {
                let rank = worker.rank();
                std::thread::Builder::new()
                    .name(format!("{thread_name}-{rank}"))
                    .stack_size(scheduler_stack_size)
                    .spawn(move || {
                        affinity::pin_to_cpu(rank);
                        worker.run();
                    })
                    .unwrap_or_else(|err| crate::fatal!("failed to spawn myth worker thread {rank}: {err}"))
            })
            .collect();

        affinity::pin_to_cpu(0);
        worker0.run();

        for thread in threads {
            if thread.join().is_err() {
                crate::fatal!("a myth worker thread panicked instead of returning from its run loop");
            }
        }

        // `worker0.run()` only returned after observing `shutdown`, which
        // the root fiber's body sets strictly after it (and every fiber it
        // transitively spawned) has reached ZOMBIE and fired its completion
        // cell - so this is never a race, just a read of an already-DONE
        // cell.
        match root_join.0.completion().take_done_outcome() {
            FiberOutcome::Completed => {}
            FiberOutcome::Panicked(payload) => std::panic::resume_unwind(payload),
        }

        Arc::try_unwrap(output)
            .unwrap_or_else(|_| crate::fatal!("root fiber's output cell is still shared after shutdown"))
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner)
            .expect("root fiber completed without storing a result")
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[test]
    fn block_on_returns_the_closure_result() {
        let mut runtime = RuntimeBuilder::new().workers(2).build().unwrap();
        let result = runtime.block_on(|| 1 + 1);
        assert_eq!(result, 2);
    }

    #[test]
    fn block_on_runs_a_fork_join_scope() {
        let mut runtime = RuntimeBuilder::new().workers(4).build().unwrap();
        let total = runtime.block_on(|| {
            let counter = AtomicUsize::new(0);
            scope(|group| {
                for _ in 0..8 {
                    group.run(|| {
                        counter.fetch_add(1, Ordering::Relaxed);
                    });
                }
            });
            counter.load(Ordering::Relaxed)
        });
        assert_eq!(total, 8);
    }

    #[test]
    fn single_worker_never_steals() {
        let mut runtime = RuntimeBuilder::new().workers(1).build().unwrap();
        let result = runtime.block_on(|| {
            scope(|group| {
                group.run(|| {});
                group.run(|| {});
            });
            42
        });
        assert_eq!(result, 42);
        assert_eq!(runtime.stats()[0].steal_attempts, 0);
    }

    /// `set_steal_func` (§6's `set_steal_func(fn) -> previous_fn` hook)
    /// pins every steal attempt on a custom policy and hands back the
    /// policy it replaced.
    #[test]
    fn set_steal_func_pins_a_custom_victim_and_returns_the_previous_policy() {
        struct AlwaysVictimZero;
        impl StealPolicy for AlwaysVictimZero {
            fn choose_victim(&self, _rank: usize, _workers: usize, _draw: u32) -> usize {
                0
            }
        }

        let runtime = RuntimeBuilder::new().workers(4).build().unwrap();
        let previous = runtime.set_steal_func(AlwaysVictimZero);
        assert_eq!(previous.choose_victim(1, 4, 123), previous.choose_victim(1, 4, 123));

        let mut runtime = runtime;
        let total = runtime.block_on(|| {
            let counter = AtomicUsize::new(0);
            scope(|group| {
                for _ in 0..16 {
                    group.run(|| {
                        counter.fetch_add(1, Ordering::Relaxed);
                    });
                }
            });
            counter.load(Ordering::Relaxed)
        });
        assert_eq!(total, 16);
    }

    #[test]
    #[should_panic(expected = "boom")]
    fn block_on_propagates_a_root_panic() {
        let mut runtime = RuntimeBuilder::new().workers(2).build().unwrap();
        runtime.block_on(|| -> () {
            panic!("boom");
        });
    }
}
