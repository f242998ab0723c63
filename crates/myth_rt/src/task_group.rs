//! The fork/join façade: batch-spawn children into a group, then join them
//! all at once.
//!
//! A [`TaskGroup`] owns a [`BlockList`] of pending [`JoinHandle`]s, in
//! insertion order - the order `wait()` joins in, amortizing the list's own
//! growth the way the chunked list is built to. Reset at every `wait()`,
//! bounding it to the scope between two `wait()` calls.
//!
//! Not thread-safe across fibers: a group is constructed and driven by one
//! fiber, which is also the only fiber ever blocked inside its `wait()`.

#![expect(unsafe_code, reason = "lifetime-extends borrowed closures into the boxed fiber body the worker loop owns")]

use std::marker::PhantomData;
use std::mem;
use std::panic::AssertUnwindSafe;

use myth_collections::BlockList;

use crate::fiber::{FiberOutcome, JoinHandle};
use crate::join::join_raw;
use crate::worker;

/// A fork/join scope: everything spawned through it via [`TaskGroup::run`] is
/// guaranteed to have completed by the time [`scope`] returns, so borrows
/// into the enclosing fiber's stack frame (lifetime `'env`) are sound for
/// the spawned closures (lifetime `'scope`, `'scope: 'env` would be backwards
/// - see the `scope` function for how the bound actually works).
pub struct TaskGroup<'scope, 'env: 'scope> {
    pending: BlockList<JoinHandle>,
    // Invariant over both lifetimes, matching the fork/join scope pattern
    // this is grounded on: a `TaskGroup` must not be usable with a shorter
    // or longer 'scope/'env than the one it was handed to `scope`'s body
    // with.
    scope: PhantomData<&'scope mut &'scope ()>,
    env: PhantomData<&'env mut &'env ()>,
}

impl<'scope, 'env> TaskGroup<'scope, 'env> {
    fn new() -> Self {
        Self { pending: BlockList::new(), scope: PhantomData, env: PhantomData }
    }

    /// Spawns `body` as a child fiber of the group, applying the mandatory
    /// work-first policy: the calling fiber's own continuation is pushed
    /// onto the current worker's deque (becoming stealable) and the worker
    /// switches directly into the child, bypassing the scheduler stack.
    /// Returns once the child (or whatever stole the parent's continuation
    /// in the meantime) lets this fiber run again.
    pub fn run<F>(&mut self, body: F)
    where
        F: FnOnce() + Send + 'scope,
    {
        self.run_named(None, body);
    }

    /// Same as [`TaskGroup::run`], with an annotation string attached to the
    /// child fiber for diagnostics (see [`crate::fiber::JoinHandle::annotation`]).
    pub fn run_named<F>(&mut self, annotation: Option<Box<str>>, body: F)
    where
        F: FnOnce() + Send + 'scope,
    {
        let boxed: Box<dyn FnOnce() + Send + 'scope> = Box::new(body);

        // SAFETY: the only way to observe `'scope` end is through `wait()`
        // returning or `scope()`'s trailing `wait()` - both drive every
        // fiber spawned through this group to completion, joining it on
        // this same fiber, before giving control back past that point. The
        // closure (and everything it borrows with lifetime `'scope`) is
        // therefore fully run before `'scope` could possibly end, even
        // though nothing in the `Box<dyn FnOnce() + Send>` type `Worker`
        // deals in expresses that to the compiler.
        let boxed: Box<dyn FnOnce() + Send + 'static> = unsafe { mem::transmute(boxed) };

        let worker = worker::current();
        let (child, join) = worker.create_fiber(boxed, annotation);
        self.pending.push_back(join);
        worker.switch_to_child(child);
    }

    /// If `cond` is true, behaves like [`TaskGroup::run`]. Otherwise runs
    /// `body` inline on the calling fiber - no fiber is created, and no
    /// creation is recorded in [`crate::stats::WorkerStats`].
    pub fn run_if<F>(&mut self, cond: bool, body: F)
    where
        F: FnOnce() + Send + 'scope,
    {
        if cond {
            self.run(body);
        } else {
            body();
        }
    }

    /// Joins every fiber spawned since construction or the previous `wait()`,
    /// in insertion order, then resets the pending list so the group can be
    /// reused for another batch of spawns.
    ///
    /// If more than one child panicked, every child is still joined (so none
    /// is ever left running past this call with a dangling borrow into an
    /// unwinding stack), and the first captured panic is the one resumed.
    pub fn wait(&mut self) {
        let mut first_panic = None;
        while let Some(join) = self.pending.pop_front() {
            if let FiberOutcome::Panicked(payload) = join_raw(join) {
                if first_panic.is_none() {
                    first_panic = Some(payload);
                }
            }
        }

        if let Some(payload) = first_panic {
            std::panic::resume_unwind(payload);
        }
    }

    /// Number of children spawned since construction or the last `wait()`
    /// that have not yet been joined.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }
}

/// Runs `body` with a fresh [`TaskGroup`], guaranteeing every fiber spawned
/// into it has completed before this function returns - the fork/join scope
/// a fiber enters to fan out work and collect it back.
///
/// Mirrors `std::thread::scope`'s shape: `body` receives a group whose
/// `'scope` lifetime only the closures passed to [`TaskGroup::run`] need to
/// outlive, while still being free to borrow from the calling fiber's stack
/// frame (`'env`).
pub fn scope<'env, F, R>(body: F) -> R
where
    F: for<'scope> FnOnce(&'scope mut TaskGroup<'scope, 'env>) -> R,
{
    let mut group: TaskGroup<'env, 'env> = TaskGroup::new();

    // SAFETY: this safety comment applies to the reference transmuted to
    // `'env` here. `group` lives for this entire function call, and every
    // fiber spawned through the reference handed to `body` is joined by the
    // `wait()` below before this function returns - so nothing derived from
    // `body`'s borrow of `group` can outlive the region that borrow is
    // actually used in, even though the type says `'env`. `group` itself is
    // never named again directly until after this transmuted borrow's only
    // use (the call into `body`) has completed.
    let group_ref: &'env mut TaskGroup<'env, 'env> = unsafe { mem::transmute(&mut group) };
    let result = std::panic::catch_unwind(AssertUnwindSafe(move || body(group_ref)));

    group.wait();

    match result {
        Ok(result) => result,
        Err(payload) => std::panic::resume_unwind(payload),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[test]
    fn group_starts_empty() {
        let group: TaskGroup<'_, '_> = TaskGroup::new();
        assert_eq!(group.pending(), 0);
    }

    #[test]
    fn run_if_false_executes_inline_without_a_group() {
        // `run_if`'s inline path never touches the worker machinery, so it
        // is exercisable without a running scheduler, unlike `run`/`wait`
        // (covered end-to-end in `tests/task_group.rs`).
        let count = AtomicUsize::new(0);
        let mut group: TaskGroup<'_, '_> = TaskGroup::new();
        group.run_if(false, || {
            count.fetch_add(1, Ordering::Relaxed);
        });
        assert_eq!(count.load(Ordering::Relaxed), 1);
        assert_eq!(group.pending(), 0);
    }
}
