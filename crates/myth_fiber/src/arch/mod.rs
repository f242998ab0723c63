//! Architecture/platform dispatch for the single unsafe boundary in this
//! crate: initializing a fiber's machine context and switching to/from it.
//!
//! Every backend implements the same three operations:
//!
//! - `blank_context()` — a context object with no saved state, used for a
//!   worker's scheduler stack before its first switch *away* (the switch
//!   itself fills it in).
//! - `init_context(stack, entry, arg)` — lays out `stack` so that switching
//!   into the returned context starts executing `entry(arg)`.
//! - `switch_context(from, to)` — save the current machine state into `from`,
//!   load `to`, and resume there. Returns when some other `switch_context`
//!   targets `from` again.
//!
//! `EntryFn` never returns normally - the entry trampoline each backend
//! installs calls the user body, then switches back to the scheduler
//! context itself - so callers must not rely on `switch_context` returning
//! after a fiber's `entry` function returns.

use crate::stack::Stack;

pub type EntryFn = unsafe extern "C" fn(usize) -> !;

cfg_if::cfg_if! {
    if #[cfg(windows)] {
        mod windows;
        pub(crate) use windows::RawContext;
        pub(crate) use windows::{blank_context, init_context, switch_context};
    } else if #[cfg(all(unix, target_arch = "x86_64"))] {
        mod x86_64;
        pub(crate) use x86_64::RawContext;
        pub(crate) use x86_64::{blank_context, init_context, switch_context};
    } else if #[cfg(all(unix, target_arch = "aarch64"))] {
        mod aarch64;
        pub(crate) use aarch64::RawContext;
        pub(crate) use aarch64::{blank_context, init_context, switch_context};
    } else if #[cfg(unix)] {
        mod unix_fallback;
        pub(crate) use unix_fallback::RawContext;
        pub(crate) use unix_fallback::{blank_context, init_context, switch_context};
    } else {
        compile_error!("myth_fiber has no context-switch backend for this target");
    }
}

#[cfg_attr(windows, allow(unused))]
pub(crate) type StackRef<'a> = &'a Stack;
