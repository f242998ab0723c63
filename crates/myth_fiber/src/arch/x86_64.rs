//! x86-64 (System V ABI) context switch: Linux and macOS.
//!
//! Only the callee-saved registers the SysV ABI requires a function to
//! preserve across a call are part of the saved context (`rsp`, `rbp`, `rbx`,
//! `r12`-`r15`); everything else is caller-saved and does not need to survive
//! a `switch_context`.
#![expect(unsafe_code, reason = "the sole unsafe boundary: raw machine context switch")]

use core::arch::naked_asm;

use crate::arch::EntryFn;
use crate::stack::Stack;

#[repr(C)]
#[derive(Default)]
pub(crate) struct RawContext {
    rsp: usize,
    rbp: usize,
    rbx: usize,
    r12: usize,
    r13: usize,
    r14: usize,
    r15: usize,
}

pub(crate) fn blank_context() -> RawContext {
    RawContext::default()
}

/// # Safety
/// `stack` must outlive every switch into the returned context.
pub(crate) unsafe fn init_context(stack: &Stack, entry: EntryFn, arg: usize) -> RawContext {
    // `stack.top()` is page-aligned, hence 16-byte aligned. Reserve the top
    // 16 bytes for the trampoline's return-address slot so that, after
    // `switch_context`'s `ret` pops it, RSP sits at the same alignment a
    // normal `call` would have left it at.
    let sp_final = stack.top() - 16;

    // SAFETY: `sp_final` is within the stack's mapped, writable region.
    unsafe {
        (sp_final as *mut usize).write(entry_trampoline as usize);
    }

    RawContext {
        rsp: sp_final,
        rbp: 0,
        rbx: 0,
        // Smuggled through callee-saved slots rather than the stack: the
        // trampoline reads them straight out of r12/r13 on first resume.
        r12: entry as usize,
        r13: arg,
        r14: 0,
        r15: 0,
    }
}

/// # Safety
/// `from` must be a valid, exclusively-owned context slot for the calling
/// fiber/scheduler stack; `to` must have been produced by [`init_context`] or
/// previously saved into by a `switch_context` targeting it.
pub(crate) unsafe fn switch_context(from: *mut RawContext, to: *const RawContext) {
    // SAFETY: inline assembly implementing the documented register-save
    // contract; `from`/`to` validity is the caller's responsibility.
    unsafe {
        core::arch::asm!(
            "mov [rdi + 0x00], rsp",
            "mov [rdi + 0x08], rbp",
            "mov [rdi + 0x10], rbx",
            "mov [rdi + 0x18], r12",
            "mov [rdi + 0x20], r13",
            "mov [rdi + 0x28], r14",
            "mov [rdi + 0x30], r15",

            "mov rsp, [rsi + 0x00]",
            "mov rbp, [rsi + 0x08]",
            "mov rbx, [rsi + 0x10]",
            "mov r12, [rsi + 0x18]",
            "mov r13, [rsi + 0x20]",
            "mov r14, [rsi + 0x28]",
            "mov r15, [rsi + 0x30]",

            "ret",
            in("rdi") from,
            in("rsi") to,
            options(noreturn),
        )
    }
}

/// First code to run on a freshly-initialized fiber stack. Reached via `ret`
/// inside `switch_context`, not a normal call, so it must never return.
#[unsafe(naked)]
unsafe extern "C" fn entry_trampoline() -> ! {
    // SAFETY: naked function body is pure assembly by construction.
    unsafe {
        naked_asm!(
            "mov rdi, r13", // arg, stashed by init_context
            "jmp r12",      // entry(arg), stashed by init_context; never returns
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::mem::size_of;

    #[test]
    fn raw_context_layout_is_plain_old_data() {
        assert_eq!(size_of::<RawContext>(), 7 * size_of::<usize>());
    }
}
