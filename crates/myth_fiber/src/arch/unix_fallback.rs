//! Context switch backend for Unix targets other than x86-64 and aarch64:
//! POSIX `ucontext`. Slower than the hand-rolled register switches (every
//! `swapcontext` is a full signal-mask save/restore), kept as a portable
//! fallback so the crate still builds on less common Unix architectures
//! rather than failing to compile at all.
#![expect(unsafe_code, reason = "the sole unsafe boundary: raw machine context switch")]

use std::ffi::c_void;
use std::mem::MaybeUninit;

use libc::ucontext_t;

use crate::arch::EntryFn;
use crate::stack::Stack;

pub(crate) struct RawContext {
    ctx: Box<ucontext_t>,
}

pub(crate) fn blank_context() -> RawContext {
    // SAFETY: zero-initialized `ucontext_t` is only ever used as the `from`
    // side of a `swapcontext`, which fills it in before it is read.
    let ctx = unsafe { MaybeUninit::<ucontext_t>::zeroed().assume_init() };
    RawContext { ctx: Box::new(ctx) }
}

struct EntryArgs {
    entry: EntryFn,
    arg: usize,
}

/// # Safety
/// `stack` must outlive every switch into the returned context.
pub(crate) unsafe fn init_context(stack: &Stack, entry: EntryFn, arg: usize) -> RawContext {
    let mut ctx: ucontext_t = unsafe { MaybeUninit::zeroed().assume_init() };
    // SAFETY: populates `ctx` with the calling thread's signal mask and link
    // fields so `makecontext` only needs to override the stack and entry.
    unsafe {
        libc::getcontext(&mut ctx);
    }

    ctx.uc_stack.ss_sp = stack.bottom() as *mut c_void;
    ctx.uc_stack.ss_size = stack.size();
    ctx.uc_stack.ss_flags = 0;
    // A fiber's entry function diverges (`-> !`); there is nothing valid to
    // return to, so no link context.
    ctx.uc_link = std::ptr::null_mut();

    let args = Box::into_raw(Box::new(EntryArgs { entry, arg })) as usize;
    let hi = (args >> 32) as u32;
    let lo = args as u32;

    // SAFETY: `trampoline`'s two-`u32`-argument signature matches the two
    // integer varargs passed here; `ucontext_t::uc_stack` was just set to a
    // valid, exclusively-owned stack region.
    unsafe {
        libc::makecontext(&mut ctx, std::mem::transmute::<extern "C" fn(u32, u32), extern "C" fn()>(trampoline), 2, hi, lo);
    }

    RawContext { ctx: Box::new(ctx) }
}

/// # Safety
/// `from` must be a valid, exclusively-owned context slot for the calling
/// fiber/scheduler stack; `to` must have been produced by [`init_context`] or
/// previously saved into by a `switch_context` targeting it.
pub(crate) unsafe fn switch_context(from: *mut RawContext, to: *const RawContext) {
    // SAFETY: both pointers reference live `RawContext`s owned by the
    // caller for the duration of the call, per the function's contract.
    unsafe {
        let from_ctx: *mut ucontext_t = &mut *(*from).ctx;
        let to_ctx: *const ucontext_t = &*(*to).ctx;
        libc::swapcontext(from_ctx, to_ctx);
    }
}

extern "C" fn trampoline(hi: u32, lo: u32) {
    let args_ptr = (((hi as usize) << 32) | lo as usize) as *mut EntryArgs;
    // SAFETY: `args_ptr` was produced by `Box::into_raw` in `init_context`
    // and is reclaimed exactly once, on first entry into this trampoline.
    let EntryArgs { entry, arg } = *unsafe { Box::from_raw(args_ptr) };
    // SAFETY: `entry` is the fiber's entry point, never returns.
    unsafe {
        entry(arg);
    }
}
