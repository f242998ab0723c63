//! Context switch backend for Windows: the native Win32 Fiber API.
//!
//! Windows has no portable way to hand the OS an arbitrary memory region as
//! a stack and ask it to execute on top of it (the SysV/AAPCS64 backends in
//! this crate do exactly that via raw register switches), so rather than
//! reimplementing `SwitchToFiber`'s bookkeeping by hand this backend defers
//! to it directly: every [`RawContext`] wraps a real Win32 fiber handle.
#![expect(unsafe_code, reason = "the sole unsafe boundary: raw machine context switch")]

use std::ffi::c_void;
use std::ptr;

use windows_sys::Win32::System::Threading::{
    ConvertThreadToFiber, CreateFiberEx, DeleteFiber, SwitchToFiber,
};

use crate::arch::EntryFn;
use crate::stack::Stack;

pub(crate) struct RawContext {
    handle: *mut c_void,
    /// `false` for the fiber created by converting the worker's own thread
    /// (there is no handle to delete, the thread owns it); `true` for a
    /// fiber created with `CreateFiberEx`, which this context must delete.
    owns_handle: bool,
}

// SAFETY: a Win32 fiber handle is just an opaque identifier; `Stack`'s
// `Send` impl already covers the actual stack memory.
unsafe impl Send for RawContext {}

pub(crate) fn blank_context() -> RawContext {
    // SAFETY: converts the calling OS thread into a fiber so it has a
    // handle `SwitchToFiber` can later switch back to. Safe to call once
    // per worker thread, which is the only place `blank_context` is used.
    let handle = unsafe { ConvertThreadToFiber(ptr::null_mut()) };
    RawContext { handle: handle as *mut c_void, owns_handle: false }
}

struct EntryArgs {
    entry: EntryFn,
    arg: usize,
}

/// # Safety
/// `stack` must outlive every switch into the returned context.
pub(crate) unsafe fn init_context(stack: &Stack, entry: EntryFn, arg: usize) -> RawContext {
    let boxed = Box::new(EntryArgs { entry, arg });
    let params = Box::into_raw(boxed).cast::<c_void>();

    // SAFETY: `fiber_proc` matches `LPFIBER_START_ROUTINE`'s ABI; `params`
    // is reclaimed exactly once, inside `fiber_proc`, on first entry.
    let handle = unsafe { CreateFiberEx(stack.size(), stack.size(), 0, Some(fiber_proc), params) };

    RawContext { handle: handle as *mut c_void, owns_handle: true }
}

/// # Safety
/// `from` is unused: `SwitchToFiber` transparently saves the calling
/// fiber's full machine state, there is nothing this backend needs to
/// stash into `from` itself. `to` must be a live fiber handle.
pub(crate) unsafe fn switch_context(_from: *mut RawContext, to: *const RawContext) {
    // SAFETY: `to` points at a valid `RawContext` produced by this module.
    let handle = unsafe { (*to).handle };
    // SAFETY: `handle` is a live fiber handle owned by `to`.
    unsafe {
        SwitchToFiber(handle);
    }
}

impl Drop for RawContext {
    fn drop(&mut self) {
        if self.owns_handle && !self.handle.is_null() {
            // SAFETY: `handle` was created by `CreateFiberEx` in `init_context`
            // and is not currently running (a fiber cannot delete itself).
            unsafe {
                DeleteFiber(self.handle);
            }
        }
    }
}

unsafe extern "system" fn fiber_proc(params: *mut c_void) {
    // SAFETY: `params` was produced by `Box::into_raw` in `init_context` and
    // is passed back here exactly once.
    let EntryArgs { entry, arg } = *unsafe { Box::from_raw(params.cast::<EntryArgs>()) };
    // SAFETY: `entry` never returns; this satisfies `LPFIBER_START_ROUTINE`'s
    // requirement that the procedure not return either.
    unsafe { entry(arg) }
}
