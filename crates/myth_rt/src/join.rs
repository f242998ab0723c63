//! The completion cell and the low-level join/yield operations built on it.
//!
//! Built on [`myth_sync::SpinLock`] rather than a hand-rolled lock-free CAS
//! cell: the deque above already has a lock-free option and a "locked,
//! adequate and simple" fallback that's the preferred default, and a join
//! cell is off the hot path often enough (one CAS-equivalent per spawn, not
//! per scheduling decision) that the same tradeoff applies here.

use std::sync::Arc;

use myth_sync::SpinLock;

use crate::fiber::{FiberHandle, FiberOutcome, FiberState};
use crate::worker;

enum CellState {
    Pending { waiter: Option<FiberHandle> },
    Done { outcome: FiberOutcome },
}

pub(crate) struct CompletionCell {
    state: SpinLock<CellState>,
}

/// What installing a waiter on a cell resolved to.
pub(crate) enum Registration {
    /// The target had already completed; the waiter never blocks.
    AlreadyDone(FiberOutcome, FiberHandle),
    /// The waiter is now installed; the caller should park.
    Blocked,
}

impl CompletionCell {
    pub fn new() -> Self {
        Self { state: SpinLock::new(CellState::Pending { waiter: None }) }
    }

    /// Installs `waiter` into the single waiter slot, unless the target is
    /// already done. Fatal if a waiter is already installed - the
    /// task-group discipline guarantees at most one join per fiber, so a
    /// second installation attempt is a caller bug, not a race to tolerate.
    pub fn register_waiter(&self, waiter: FiberHandle) -> Registration {
        let mut guard = self.state.lock();
        match std::mem::replace(&mut *guard, CellState::Pending { waiter: None }) {
            CellState::Pending { waiter: None } => {
                *guard = CellState::Pending { waiter: Some(waiter) };
                Registration::Blocked
            }
            CellState::Pending { waiter: Some(_) } => {
                crate::fatal!("join: a waiter is already installed on this fiber");
            }
            CellState::Done { outcome } => {
                *guard = CellState::Done { outcome: FiberOutcome::Completed };
                Registration::AlreadyDone(outcome, waiter)
            }
        }
    }

    /// Fires the cell: stores `outcome`, transitions to DONE, and returns
    /// any waiter that was installed (now READY, to be re-enqueued by the
    /// caller). Fatal if the cell was already DONE - a fiber can only
    /// terminate once.
    pub fn complete(&self, outcome: FiberOutcome) -> Option<FiberHandle> {
        let mut guard = self.state.lock();
        let waiter = match &mut *guard {
            CellState::Pending { waiter } => waiter.take(),
            CellState::Done { .. } => crate::fatal!("fiber completed twice"),
        };
        *guard = CellState::Done { outcome };
        waiter
    }

    /// Retrieves the outcome of a cell known to be DONE (the caller was
    /// just woken by [`CompletionCell::complete`], so this always holds).
    pub fn take_done_outcome(&self) -> FiberOutcome {
        let mut guard = self.state.lock();
        match std::mem::replace(&mut *guard, CellState::Done { outcome: FiberOutcome::Completed }) {
            CellState::Done { outcome } => outcome,
            CellState::Pending { .. } => crate::fatal!("join: woken before completion cell reached DONE"),
        }
    }
}

/// Blocks the calling fiber until `target` terminates, then returns its
/// outcome. Panics (propagating the child's panic payload) if the target's
/// entry point panicked, matching the task-group discipline of propagating
/// a user error to its unique waiter.
///
/// # Panics
///
/// Panics if called from outside a worker's dispatch loop (there is no
/// fiber to block), and re-raises the joined fiber's panic payload, if any.
pub fn join(target: crate::fiber::JoinHandle) {
    propagate(join_raw(target));
}

/// The non-propagating half of [`join`]: blocks until `target` terminates
/// and hands back its raw outcome instead of resuming a panic payload
/// immediately. [`crate::task_group::TaskGroup::wait`] needs this - it must
/// join every child, continuing past a panicking one, before resuming any
/// captured panic, so that no child is ever left running with a dangling
/// borrow into an unwinding parent frame.
pub(crate) fn join_raw(target: crate::fiber::JoinHandle) -> FiberOutcome {
    let mut waiter = current_fiber_handle();
    // Captured before `waiter` is handed to `register_waiter`: on the
    // `Blocked` path the handle moves into the target's waiter slot and is
    // gone from this worker's `current_fiber` for as long as the target
    // keeps running, possibly on another worker entirely. Neither the shared
    // state nor the raw context pointer needs `current_fiber` to still hold
    // the fiber - only the address, which a move never changes.
    let shared = Arc::clone(&waiter.0.shared);
    let fiber_ctx = &mut waiter.0.context as *mut myth_fiber::Context;

    match target.0.completion().register_waiter(waiter) {
        Registration::AlreadyDone(outcome, waiter) => {
            worker::retake_current_fiber(waiter);
            outcome
        }
        Registration::Blocked => {
            shared.mark_suspended(FiberState::Blocked);
            // SAFETY: `fiber_ctx` was captured above, before `waiter` moved
            // into the completion cell's waiter slot; the address stays
            // valid (only the owning `Box`'s pointer moves). Resumes here
            // once `CompletionCell::complete` wakes this fiber by pushing it
            // back onto a deque and `Worker::dispatch` marks it RUNNING
            // again.
            unsafe {
                worker::switch_to_scheduler(fiber_ctx);
            }
            target.0.completion().take_done_outcome()
        }
    }
}

/// Voluntarily relinquishes the worker, giving other runnable fibers (its
/// own stolen continuation included) a chance to run. Returns once this
/// fiber is dispatched again.
pub fn yield_now() {
    let worker = worker::current();
    let mut handle = worker::take_current_fiber();
    handle.0.shared.mark_suspended(FiberState::Ready);
    let fiber_ctx = &mut handle.0.context as *mut myth_fiber::Context;
    worker.deque().push_bottom(handle);
    // SAFETY: `fiber_ctx` was captured before `handle` moved onto the
    // deque; the address stays valid (only the owning `Box`'s pointer
    // moves). Resumes here once the scheduler dispatches it again, which
    // marks it RUNNING.
    unsafe {
        worker::switch_to_scheduler(fiber_ctx);
    }
}

fn current_fiber_handle() -> FiberHandle {
    worker::take_current_fiber()
}

fn propagate(outcome: FiberOutcome) {
    if let FiberOutcome::Panicked(payload) = outcome {
        std::panic::resume_unwind(payload);
    }
}
