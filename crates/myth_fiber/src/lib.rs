//! Stackful fiber primitives: stack allocation and raw machine-context
//! switching.
//!
//! This crate is deliberately tiny and mechanical. It owns the single
//! unsafe boundary in the myth runtime - saving and restoring a machine
//! register set - and nothing else. Scheduling, work stealing, and fiber
//! lifecycle live in `myth_rt`, built entirely in safe code on top of
//! [`Context`] and [`switch`].

mod arch;
pub mod stack;

pub use arch::EntryFn;
pub use stack::{Stack, MIN_STACK_SIZE};

/// A saved machine context: either a fiber's (produced by [`Context::new`])
/// or a worker's own scheduling loop (produced by [`Context::blank`]).
pub struct Context(arch::RawContext);

impl Context {
    /// A context with no saved state yet, for code that is *currently
    /// running* and has not been switched away from before. The first
    /// [`switch`] that names this context as `from` fills it in.
    pub fn blank() -> Self {
        Context(arch::blank_context())
    }

    /// Lays out `stack` so that switching into the returned context starts
    /// executing `entry(arg)`.
    ///
    /// # Safety
    ///
    /// `stack` must remain alive and must not back any other live `Context`
    /// for as long as the returned context might still be switched into.
    /// `entry` must never return normally - a fiber ends by calling back
    /// into the scheduler that started it, not by falling off the end of
    /// its entry function.
    pub unsafe fn new(stack: &Stack, entry: EntryFn, arg: usize) -> Self {
        // SAFETY: forwarded from this function's own contract.
        Context(unsafe { arch::init_context(stack, entry, arg) })
    }
}

/// Saves the current machine state into `from` and resumes `to`, returning
/// only once some other `switch` call later names `from` as its target.
///
/// # Safety
///
/// `from` must describe the context of the code making this call (so that
/// resuming it later actually resumes here); `to` must have been produced
/// by [`Context::new`] or [`Context::blank`] and must not be concurrently
/// switched into from another thread.
pub unsafe fn switch(from: &mut Context, to: &Context) {
    // SAFETY: forwarded from this function's own contract.
    unsafe { arch::switch_context(&mut from.0, &to.0) }
}
