//! The worker: one OS thread pinned to one CPU, owning a runnable deque, a
//! scheduler stack, stack pools, RNG state and the profiling counters. Runs
//! the `pop -> steal -> back off -> dispatch` loop described in the fiber
//! model's scheduling section.
//!
//! A worker's state is thread-local by construction: it is built on, and
//! only ever touched from, the OS thread that runs it. The one exception is
//! its [`RunnableDeque`]'s [`crossbeam_deque::Stealer`] half and its
//! remote-free stack queue, both designed for cross-thread access.

#![expect(unsafe_code, reason = "raw context-switch pointers into the scheduler and fiber contexts")]

use std::cell::{Cell, RefCell, UnsafeCell};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crossbeam_deque::Stealer;
use myth_fiber::{Context, Stack};
use myth_sync::{Backoff, ListQueue};

use crate::deque::{self, RunnableDeque};
use crate::fiber::{FiberHandle, FiberInner, FiberState};
use crate::rng::Rng;
use crate::stats::WorkerStats;
use crate::steal::StealHandle;

thread_local! {
    static CURRENT: Cell<*mut Worker> = const { Cell::new(std::ptr::null_mut()) };
}

/// Per-worker state. Lives on the run-loop's own call frame for the entire
/// lifetime of the worker thread; never moved or shared by reference across
/// threads (its [`Stealer`] and remote-free queue clones are the only parts
/// other workers touch).
pub(crate) struct Worker {
    rank: usize,
    workers: usize,
    deque: RunnableDeque,
    peers: Vec<Stealer<FiberHandle>>,
    remote_free: Vec<Arc<ListQueue<Stack>>>,
    steal_handle: StealHandle,
    rng: Rng,
    stats: Arc<WorkerStats>,
    stack_pool: RefCell<Vec<Stack>>,
    stack_size: usize,
    stack_alloc_unit: usize,
    /// The run loop's own context; every fiber this worker dispatches
    /// switches back into this, never into another worker's.
    scheduler_context: UnsafeCell<Context>,
    /// Holds the physical fiber currently dispatched, if any. Emptied by
    /// [`take_current_fiber`] before a fiber suspends itself (yield/join);
    /// still `Some` on return from `switch` in [`Worker::dispatch`] means the
    /// fiber ran to completion instead.
    current_fiber: RefCell<Option<FiberHandle>>,
    /// A parent continuation [`switch_to_child`](Worker::switch_to_child) has
    /// suspended but not yet made stealable. Flushed onto the deque by
    /// [`flush_pending_parent_push`] as the first action of the child's
    /// trampoline, once the switch that suspended it has actually completed.
    pending_parent_push: RefCell<Option<FiberHandle>>,
    /// The runtime's single shutdown flag, shared by every worker. Set from
    /// outside this worker's own thread once the root fiber completes, so
    /// it has to be atomic rather than the `Cell` the rest of this
    /// otherwise thread-local struct uses.
    shutdown: Arc<AtomicBool>,
}

impl Worker {
    #[expect(clippy::too_many_arguments, reason = "assembled once at startup from resolved config")]
    pub(crate) fn new(
        rank: usize,
        workers: usize,
        stack_size: usize,
        stack_alloc_unit: usize,
        queue_capacity: usize,
        steal_handle: StealHandle,
        remote_free: Vec<Arc<ListQueue<Stack>>>,
        stats: Arc<WorkerStats>,
        shutdown: Arc<AtomicBool>,
    ) -> Self {
        Self {
            rank,
            workers,
            deque: RunnableDeque::new(queue_capacity, Arc::clone(&stats)),
            peers: Vec::new(),
            remote_free,
            steal_handle,
            rng: Rng::seeded(rank),
            stats,
            stack_pool: RefCell::new(Vec::new()),
            stack_size,
            stack_alloc_unit,
            scheduler_context: UnsafeCell::new(Context::blank()),
            current_fiber: RefCell::new(None),
            pending_parent_push: RefCell::new(None),
            shutdown,
        }
    }

    pub(crate) fn rank(&self) -> usize {
        self.rank
    }

    pub(crate) fn deque(&self) -> &RunnableDeque {
        &self.deque
    }

    pub(crate) fn stats(&self) -> &WorkerStats {
        &self.stats
    }

    /// Installs this worker's peer stealers. Called once, after every
    /// worker in the pool has been constructed (each needs every other's
    /// deque before any of them starts running).
    pub(crate) fn set_peers(&mut self, peers: Vec<Stealer<FiberHandle>>) {
        self.peers = peers;
    }

    pub(crate) fn request_shutdown(&self) {
        self.shutdown.store(true, Ordering::Release);
    }

    /// The shared-state handle of whichever fiber is currently dispatched on
    /// this worker. Cloning an `Arc` is cheap and sidesteps tying the
    /// returned reference's lifetime to the `RefCell` borrow.
    pub(crate) fn fiber_inner(&self) -> Arc<FiberInner> {
        let guard = self.current_fiber.borrow();
        Arc::clone(&guard.as_ref().expect("no fiber currently dispatched on this worker").0.shared)
    }

    /// Installs `self` as the thread-local current worker and runs its
    /// scheduler loop until shutdown is requested and its deque and every
    /// peer appear drained. Must be called at most once, from the thread
    /// that owns this worker.
    pub(crate) fn run(&mut self) {
        CURRENT.with(|cell| {
            assert!(cell.get().is_null(), "a worker is already installed on this thread");
            cell.set(self as *mut Worker);
        });

        let mut idle = Backoff::new();
        loop {
            if let Some(fiber) = self.deque.pop_bottom() {
                idle = Backoff::new();
                self.dispatch(fiber);
                continue;
            }

            self.drain_remote_free();

            if let Some(fiber) = self.steal_once() {
                idle = Backoff::new();
                self.dispatch(fiber);
                continue;
            }

            if self.shutdown.load(Ordering::Acquire) {
                break;
            }
            idle.snooze();
        }

        CURRENT.with(|cell| cell.set(std::ptr::null_mut()));
    }

    /// One victim-selection attempt: asks the steal policy for a rank, takes
    /// from its deque's thief side. Never retries against a second victim -
    /// a miss here just means the caller backs off and tries again later.
    fn steal_once(&self) -> Option<FiberHandle> {
        if self.workers <= 1 {
            return None;
        }
        self.stats.record_steal_attempt();
        let draw = self.rng.next_u31();
        let victim = self.steal_handle.choose_victim(self.rank, self.workers, draw);
        let found = deque::take_top(&self.peers[victim]);
        if found.is_some() {
            self.stats.record_steal_hit();
        }
        found
    }

    /// Switches onto `fiber`'s context and back. On return, the fiber has
    /// either suspended itself (already removed from `current_fiber` and
    /// re-enqueued or parked by `yield_now`/`join`) or run to completion
    /// (still sitting in `current_fiber`, with `finished` set); either way
    /// `post_dispatch` settles it.
    fn dispatch(&self, fiber: FiberHandle) {
        *self.current_fiber.borrow_mut() = Some(fiber);
        self.fiber_inner().mark_running();

        let fiber_ctx: *const Context = {
            let guard = self.current_fiber.borrow();
            &guard.as_ref().expect("just installed").0.context as *const Context
        };
        // SAFETY: `scheduler_context` is this thread's own run-loop context,
        // written once above and never touched concurrently; `fiber_ctx`
        // points into the `Box<Fiber>` held in `current_fiber`, which this
        // function keeps alive (by not dropping its borrow's target) for the
        // whole switch - the fiber reads and writes through that same
        // pointer via `worker::current()` while it runs.
        unsafe {
            myth_fiber::switch(&mut *self.scheduler_context.get(), &*fiber_ctx);
        }

        self.post_dispatch();
    }

    fn post_dispatch(&self) {
        let Some(mut handle) = self.current_fiber.borrow_mut().take() else {
            // The fiber suspended itself (yield_now/join already removed it).
            return;
        };

        let Some(outcome) = handle.0.finished.take() else {
            crate::fatal!("dispatch resumed with a fiber neither suspended nor finished");
        };

        handle.0.shared.set_state(FiberState::Zombie);
        let owner_rank = handle.0.shared.owner_rank();
        let stack = handle.0.take_stack();
        self.reclaim_stack(stack, owner_rank);

        if let Some(waiter) = handle.0.shared.completion().complete(outcome) {
            waiter.0.shared.set_state(FiberState::Ready);
            self.deque.push_bottom(waiter);
        }
    }

    /// Allocates a fiber's stack: drains this worker's remote-free queue
    /// first (lazily reclaiming stacks freed by stolen fibers elsewhere),
    /// then the local free list, then refills the list in one batch from the
    /// system allocator on a double miss.
    pub(crate) fn alloc_stack(&self) -> Stack {
        self.drain_remote_free();
        if let Some(stack) = self.stack_pool.borrow_mut().pop() {
            return stack;
        }

        let mut pool = self.stack_pool.borrow_mut();
        for _ in 0..self.stack_alloc_unit.saturating_sub(1) {
            match Stack::new(self.stack_size) {
                Ok(stack) => pool.push(stack),
                Err(err) => crate::fatal!("stack allocation failed: {err}"),
            }
        }
        drop(pool);

        Stack::new(self.stack_size).unwrap_or_else(|err| crate::fatal!("stack allocation failed: {err}"))
    }

    fn reclaim_stack(&self, stack: Stack, owner_rank: usize) {
        if owner_rank == self.rank {
            self.stack_pool.borrow_mut().push(stack);
        } else {
            self.remote_free[owner_rank].push(stack);
        }
    }

    fn drain_remote_free(&self) {
        let own = &self.remote_free[self.rank];
        let mut pool = self.stack_pool.borrow_mut();
        while let Some(stack) = own.pop() {
            pool.push(stack);
        }
    }

    /// Builds a new fiber's stack, descriptor and initial context. Does not
    /// make it runnable by itself - the caller either [`enqueue`]s it (the
    /// "created by a worker" half of the fiber lifecycle for a fiber that
    /// isn't run immediately) or hands it to [`switch_to_child`] for the
    /// work-first policy.
    ///
    /// [`enqueue`]: Worker::enqueue
    /// [`switch_to_child`]: Worker::switch_to_child
    pub(crate) fn create_fiber(&self, body: Box<dyn FnOnce() + Send>, annotation: Option<Box<str>>) -> (FiberHandle, crate::fiber::JoinHandle) {
        let stack = self.alloc_stack();
        let (handle, join) = crate::fiber::spawn(stack, body, annotation, self.rank);
        self.stats.record_spawn();
        (handle, join)
    }

    /// Pushes an already-built fiber onto this worker's own deque, READY to
    /// be picked up by the normal scheduler loop (locally or by a thief).
    pub(crate) fn enqueue(&self, handle: FiberHandle) {
        self.deque.push_bottom(handle);
    }

    /// The work-first / switch-after-create optimization: suspends the
    /// calling fiber - currently RUNNING, installed as `current_fiber` - and
    /// switches directly into `child`'s context without passing back through
    /// the scheduler stack. Returns once something later dispatches this
    /// continuation again, whether locally or after being stolen.
    ///
    /// The parent is *not* pushed onto the deque here: until the switch
    /// below actually runs, its saved context is still whatever stale value
    /// it had before (for a brand-new fiber, the trampoline's initial entry
    /// context) - stealable this early, a thief could dispatch it against
    /// that stale context and re-enter the trampoline a second time. Instead
    /// the parent is handed to [`flush_pending_parent_push`], which `child`'s
    /// trampoline calls as its very first action, strictly after the switch
    /// below has saved the parent's real context.
    ///
    /// Must be called from within a fiber's body, on the worker that
    /// currently has it installed as `current_fiber` - i.e. exactly the
    /// context [`crate::task_group::TaskGroup::run`] calls it from.
    pub(crate) fn switch_to_child(&self, child: FiberHandle) {
        let parent_ctx: *mut Context = {
            let mut slot = self.current_fiber.borrow_mut();
            let mut parent = slot.take().expect("switch_to_child called with no fiber running");
            let ctx = &mut parent.0.context as *mut Context;
            parent.0.shared.mark_suspended(FiberState::Ready);
            *self.pending_parent_push.borrow_mut() = Some(parent);
            ctx
        };

        let child_ctx: *const Context = {
            child.0.shared.mark_running();
            let mut slot = self.current_fiber.borrow_mut();
            *slot = Some(child);
            &slot.as_ref().expect("just installed").0.context as *const Context
        };

        // SAFETY: `parent_ctx` points into the boxed `Fiber` parked in
        // `pending_parent_push` - moved there, not reallocated, so the
        // address stays valid for as long as the fiber it names isn't
        // dropped, which happens only after it is eventually dispatched and
        // reaches ZOMBIE. `child_ctx` points into the boxed `Fiber` now held
        // in `current_fiber`, kept alive by this function not dropping that
        // borrow's target for the whole switch. Resumes here once some
        // worker later switches back into `parent_ctx`, at which point
        // `current_fiber` again holds this fiber.
        unsafe {
            myth_fiber::switch(&mut *parent_ctx, &*child_ctx);
        }
    }
}

/// Pushes this worker's deferred parent continuation onto its deque, if one
/// is pending. Called exactly once, as the first action of a freshly
/// dispatched child's [`crate::fiber::fiber_trampoline`]: by the time that
/// trampoline starts running, the `switch` in [`Worker::switch_to_child`]
/// that suspended the parent has already completed (a context switch saves
/// `from` strictly before it resumes `to`), so pushing here can never expose
/// a thief to a parent context that hasn't been saved yet.
pub(crate) fn flush_pending_parent_push() {
    let worker = current();
    if let Some(parent) = worker.pending_parent_push.borrow_mut().take() {
        worker.deque.push_bottom(parent);
    }
}

/// Fetches the worker installed on the calling thread. Fatal off a worker
/// thread - every public entry point that reaches here (spawn, join, yield)
/// only makes sense while running inside the scheduler.
pub(crate) fn current() -> &'static Worker {
    let ptr = CURRENT.with(Cell::get);
    if ptr.is_null() {
        crate::fatal!("myth scheduler operation attempted off a worker thread");
    }
    // SAFETY: `ptr` was installed by `Worker::run` for the duration of this
    // thread's run loop and cleared only after it returns; every caller
    // reachable from here (a fiber body, or the run loop itself) executes
    // strictly within that window.
    unsafe { &*ptr }
}

/// Returns `true` if the calling thread currently has a worker installed.
pub(crate) fn is_worker_thread() -> bool {
    !CURRENT.with(Cell::get).is_null()
}

pub(crate) fn take_current_fiber() -> FiberHandle {
    current().current_fiber.borrow_mut().take().expect("no fiber currently dispatched on this worker")
}

pub(crate) fn retake_current_fiber(handle: FiberHandle) {
    let mut slot = current().current_fiber.borrow_mut();
    assert!(slot.is_none(), "a fiber is already installed as current");
    *slot = Some(handle);
}

/// Switches from the currently-running fiber's context back onto this
/// worker's scheduler stack, resuming [`Worker::dispatch`] at the point it
/// switched away. Returns once the scheduler dispatches this fiber again.
///
/// Takes the fiber's context pointer rather than re-deriving it from
/// `current_fiber`: by the time a caller is ready to block (having already
/// moved its own handle into a deque or a join cell's waiter slot, so that
/// whatever wakes it can find it), `current_fiber` itself is empty. The
/// pointer stays valid regardless - moving a `FiberHandle` moves its `Box`'s
/// pointer, never the heap allocation it names.
///
/// # Safety
///
/// `fiber_ctx` must point at the `Context` of the fiber currently running on
/// this thread, captured before that fiber's handle moved anywhere a thief
/// or another worker could dispatch it from - this function does not
/// itself keep that `Fiber` alive.
pub(crate) unsafe fn switch_to_scheduler(fiber_ctx: *mut Context) {
    let worker = current();
    // SAFETY: forwarded from this function's own contract; `scheduler_context`
    // is this worker's own context, alive for the thread's whole lifetime.
    unsafe {
        myth_fiber::switch(&mut *fiber_ctx, &*worker.scheduler_context.get());
    }
}

/// The calling (worker) thread's scheduler context, the context every fiber
/// it dispatches switches back into. Used by the fiber entry trampoline to
/// hand control back after the entry closure returns or panics.
pub(crate) fn current_scheduler_context() -> &'static Context {
    let worker = current();
    // SAFETY: the scheduler context is written once, before `run`'s loop
    // starts, and is only ever switched into, never mutated, afterward.
    unsafe { &*worker.scheduler_context.get() }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_a_worker_thread_by_default() {
        assert!(!is_worker_thread());
    }
}
