//! Fiber descriptors.
//!
//! A fiber is split into two parts with different ownership: [`FiberInner`]
//! (shared, `Arc`-held by both the physical fiber and whoever wants to join
//! it - the completion cell, the identity, the annotation) and [`Fiber`]
//! itself (the heavyweight, exclusively-owned part: the stack and the
//! saved machine context). The split exists because a fiber's physical
//! resources move between a worker's deque, a thief's hands, and the
//! currently-running slot, while a joiner needs to keep asking "is it done
//! yet?" without owning any of that.

#![expect(unsafe_code, reason = "raw context-switch pointers into the boxed fiber the worker loop owns")]

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};

use myth_fiber::{Context, Stack};

use crate::join::CompletionCell;

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Unique, process-lifetime fiber identifier.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct FiberId(u64);

impl FiberId {
    fn next() -> Self {
        Self(NEXT_ID.fetch_add(1, Ordering::Relaxed))
    }

    #[cfg(test)]
    pub(crate) fn for_test(id: u64) -> Self {
        Self(id)
    }
}

/// A fiber's position in its state machine (see module docs for the
/// transitions). Informational: the protocol that actually drives
/// scheduling decisions is the combination of [`CompletionCell`] state and
/// which collection (a deque, a waiter slot, "currently running") the
/// fiber's handle physically sits in.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[repr(u8)]
pub enum FiberState {
    Ready = 0,
    Running = 1,
    Blocked = 2,
    Zombie = 3,
    Free = 4,
}

impl FiberState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Ready,
            1 => Self::Running,
            2 => Self::Blocked,
            3 => Self::Zombie,
            _ => Self::Free,
        }
    }
}

/// The outcome stored in a fiber's completion cell: either it ran to
/// completion, or a panic escaped its entry point (propagated to the
/// unique waiter exactly once).
pub enum FiberOutcome {
    Completed,
    Panicked(Box<dyn Any + Send + 'static>),
}

/// Shared fiber state: what a joiner needs without owning the fiber's
/// physical resources.
pub(crate) struct FiberInner {
    id: FiberId,
    state: AtomicU8,
    /// CAS-guarded "running" flag: double-set would mean this fiber is
    /// RUNNING on two workers at once (the at-most-one-runner property).
    running: AtomicU8,
    completion: CompletionCell,
    annotation: Option<Box<str>>,
    /// Rank of the worker that allocated this fiber's stack. A stolen fiber
    /// that completes elsewhere frees its stack back to this worker via the
    /// remote-free queue rather than the local free list.
    owner_rank: usize,
}

impl FiberInner {
    fn new(annotation: Option<Box<str>>, owner_rank: usize) -> Self {
        Self {
            id: FiberId::next(),
            state: AtomicU8::new(FiberState::Ready as u8),
            running: AtomicU8::new(0),
            completion: CompletionCell::new(),
            annotation,
            owner_rank,
        }
    }

    pub fn id(&self) -> FiberId {
        self.id
    }

    pub(crate) fn owner_rank(&self) -> usize {
        self.owner_rank
    }

    pub fn state(&self) -> FiberState {
        FiberState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn annotation(&self) -> Option<&str> {
        self.annotation.as_deref()
    }

    pub(crate) fn set_state(&self, state: FiberState) {
        self.state.store(state as u8, Ordering::Release);
    }

    /// Marks the fiber RUNNING. Fatal if it was already marked RUNNING -
    /// the at-most-one-runner invariant does not tolerate a double-dispatch.
    pub(crate) fn mark_running(&self) {
        if self.running.swap(1, Ordering::AcqRel) != 0 {
            crate::fatal!("fiber {:?} dispatched while already running", self.id);
        }
        self.set_state(FiberState::Running);
    }

    pub(crate) fn mark_suspended(&self, state: FiberState) {
        self.running.store(0, Ordering::Release);
        self.set_state(state);
    }

    pub(crate) fn completion(&self) -> &CompletionCell {
        &self.completion
    }
}

/// The physical fiber: stack, saved machine context, and (until first run)
/// its entry closure. Moves between a worker's deque, a thief, and whatever
/// slot currently has it dispatched; never shared.
pub(crate) struct Fiber {
    pub(crate) shared: Arc<FiberInner>,
    pub(crate) context: Context,
    /// `None` only after [`Fiber::take_stack`] has reclaimed it, which
    /// happens strictly after the fiber has reached ZOMBIE.
    stack: Option<Stack>,
    body: Option<Box<dyn FnOnce() + Send>>,
    /// Set by [`fiber_trampoline`] immediately before switching back to the
    /// scheduler for the last time; read by the dispatcher's post-dispatch
    /// step to decide whether to re-enqueue (still READY) or collect
    /// (ZOMBIE).
    pub(crate) finished: Option<FiberOutcome>,
}

/// Deque element / waiter-slot payload: the physical fiber, movable across
/// threads. Crossbeam's deque requires `Send`; every field of [`Fiber`] is
/// `Send` (a [`Context`] owns no shared state, a [`Stack`] is exclusively
/// owned memory), so this derives automatically.
pub struct FiberHandle(pub(crate) Box<Fiber>);

/// A joinable handle to a spawned fiber, independent of wherever its
/// physical resources currently are.
#[derive(Clone)]
pub struct JoinHandle(pub(crate) Arc<FiberInner>);

impl JoinHandle {
    pub fn id(&self) -> FiberId {
        self.0.id()
    }

    pub fn annotation(&self) -> Option<&str> {
        self.0.annotation()
    }
}

/// Builds a fiber's stack, descriptor, and initial context, ready to be
/// pushed onto a deque. Does not run it.
pub(crate) fn spawn(
    stack: Stack,
    body: Box<dyn FnOnce() + Send>,
    annotation: Option<Box<str>>,
    owner_rank: usize,
) -> (FiberHandle, JoinHandle) {
    let shared = Arc::new(FiberInner::new(annotation, owner_rank));
    let mut boxed = Box::new(Fiber {
        shared: Arc::clone(&shared),
        context: Context::blank(),
        stack: Some(stack),
        body: Some(body),
        finished: None,
    });

    let self_ptr = (&mut *boxed) as *mut Fiber as usize;
    let stack_ref = boxed.stack.as_ref().expect("stack just set");
    // SAFETY: `boxed.stack` outlives every switch into this context (it is
    // reclaimed only after the fiber reaches ZOMBIE, i.e. after its last
    // switch back to its dispatching worker); `fiber_trampoline` never
    // returns.
    boxed.context = unsafe { Context::new(stack_ref, fiber_trampoline, self_ptr) };

    (FiberHandle(boxed), JoinHandle(shared))
}

impl Fiber {
    /// Reclaims this fiber's stack once it has reached ZOMBIE, for return to
    /// a worker's free list or remote-free queue.
    pub(crate) fn take_stack(&mut self) -> Stack {
        self.stack.take().expect("fiber stack already reclaimed")
    }
}

/// First code to run on a freshly-dispatched fiber's stack. Cooperates with
/// [`crate::worker::Worker::dispatch`], which retains ownership of the
/// `Fiber` this trampoline is handed a raw pointer to for the entire time
/// the fiber is running - the pointer stays valid because dispatch's own
/// stack frame, not this trampoline, is what owns the `Box<Fiber>`.
unsafe extern "C" fn fiber_trampoline(arg: usize) -> ! {
    // The switch that landed us here has, by definition, already saved
    // whoever suspended themselves to start us - safe to make that
    // continuation stealable only now, never before the switch below ran.
    crate::worker::flush_pending_parent_push();

    // SAFETY: `arg` is the address of the `Fiber` dispatch() is holding for
    // us, stable for as long as this fiber is running (see `spawn` above).
    let fiber = unsafe { &mut *(arg as *mut Fiber) };

    let body = fiber.body.take().expect("fiber trampoline invoked more than once");
    let outcome = match std::panic::catch_unwind(AssertUnwindSafe(body)) {
        Ok(()) => FiberOutcome::Completed,
        Err(payload) => FiberOutcome::Panicked(payload),
    };
    fiber.finished = Some(outcome);

    // SAFETY: every fiber is created with a scheduler context to switch
    // back into (see `crate::worker::Worker::dispatch`); that context
    // outlives this call because the worker owning it is still on its own
    // call stack, one frame up the context-switch chain.
    unsafe {
        myth_fiber::switch(&mut fiber.context, crate::worker::current_scheduler_context());
    }

    unreachable!("a zombie fiber's context is never switched back into")
}

#[cfg(test)]
impl FiberHandle {
    pub(crate) fn for_test(id: FiberId) -> Self {
        use myth_fiber::Stack;

        let shared = Arc::new(FiberInner { id, ..FiberInner::new(None, 0) });
        let boxed = Box::new(Fiber {
            shared,
            context: Context::blank(),
            stack: Some(Stack::new(16 * 1024).expect("test stack allocation")),
            body: None,
            finished: None,
        });
        Self(boxed)
    }

    pub(crate) fn id(&self) -> FiberId {
        self.0.shared.id()
    }
}
