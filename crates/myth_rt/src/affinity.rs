//! CPU affinity pinning: binds the calling OS thread to a single CPU so a
//! worker's locality assumptions (its own deque, its own stack pool) hold
//! in practice, not just in theory.
//!
//! Best-effort outside Linux and Windows: there is no portable equivalent
//! of `sched_setaffinity` on every Unix the runtime might run on, so
//! [`pin_to_cpu`] degrades to a no-op there rather than a hard failure -
//! the scheduler's correctness never depends on pinning actually taking
//! effect, only its cache behavior does.

#![expect(unsafe_code, reason = "raw platform affinity syscalls/APIs")]

#[cfg(target_os = "linux")]
pub(crate) fn pin_to_cpu(cpu: usize) {
    // SAFETY: `set` is a stack-local `cpu_set_t` zeroed before use;
    // `sched_setaffinity` is called with pid 0, affecting only the calling
    // thread.
    unsafe {
        let mut set: libc::cpu_set_t = std::mem::zeroed();
        libc::CPU_ZERO(&mut set);
        libc::CPU_SET(cpu % libc::CPU_SETSIZE as usize, &mut set);
        if libc::sched_setaffinity(0, size_of::<libc::cpu_set_t>(), &set) != 0 {
            tracing::warn!(cpu, error = %std::io::Error::last_os_error(), "sched_setaffinity failed");
        }
    }
}

#[cfg(windows)]
pub(crate) fn pin_to_cpu(cpu: usize) {
    use windows_sys::Win32::System::Threading::{GetCurrentThread, SetThreadAffinityMask};

    let mask = 1usize << (cpu % usize::BITS as usize);
    // SAFETY: `GetCurrentThread` returns a valid pseudo-handle for the
    // calling thread, usable for the duration of this call.
    unsafe {
        if SetThreadAffinityMask(GetCurrentThread(), mask) == 0 {
            tracing::warn!(cpu, "SetThreadAffinityMask failed");
        }
    }
}

#[cfg(not(any(target_os = "linux", windows)))]
pub(crate) fn pin_to_cpu(_cpu: usize) {}
