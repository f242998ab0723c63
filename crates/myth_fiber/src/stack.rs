//! Fixed-size fiber stacks.
//!
//! On Unix, a stack is a private anonymous mapping with a guard page at the
//! low address, matching the approach used by most stackful-coroutine crates
//! (mmap + `mprotect(PROT_NONE)` on the guard page, rather than a bare `Vec`,
//! so a stack overflow faults instead of silently corrupting the heap).
//!
//! On Windows there is no portable way to hand an arbitrary memory region to
//! the OS as a fiber stack, so [`Stack`] there is a thin size marker and the
//! actual stack memory is owned by the Win32 fiber the context wraps (see
//! `arch::windows`); see `DESIGN.md` for the tradeoff.

#![expect(unsafe_code, reason = "mmap/mprotect-backed stack allocation")]

#[cfg(unix)]
mod imp {
    use std::io;

    /// Minimum stack size, matching common stackful-coroutine crates (4 KiB).
    pub const MIN_STACK_SIZE: usize = 4096;

    pub struct Stack {
        base: *mut u8,
        mmap_len: usize,
        usable: usize,
    }

    // SAFETY: the mapping is exclusively owned by one `Stack` at a time; the
    // fiber running on it is `!Send` in user code, but the stack memory
    // itself has no thread affinity.
    unsafe impl Send for Stack {}

    impl Stack {
        /// Allocates a new stack of at least `size` bytes, plus one guard page.
        pub fn new(size: usize) -> io::Result<Self> {
            let size = size.max(MIN_STACK_SIZE);
            let page = page_size();
            let mmap_len = (size + 2 * page - 1) & !(page - 1);

            // SAFETY: FFI call with valid arguments; checked for failure below.
            unsafe {
                let map_flags = libc::MAP_ANONYMOUS | libc::MAP_PRIVATE;
                let base = libc::mmap(std::ptr::null_mut(), mmap_len, libc::PROT_NONE, map_flags, -1, 0);
                if base == libc::MAP_FAILED {
                    return Err(io::Error::last_os_error());
                }

                // Leave the low page as an unreadable/unwritable guard page;
                // make the rest of the mapping usable.
                if libc::mprotect(base.cast::<u8>().add(page).cast(), mmap_len - page, libc::PROT_READ | libc::PROT_WRITE) != 0 {
                    let err = io::Error::last_os_error();
                    libc::munmap(base, mmap_len);
                    return Err(err);
                }

                Ok(Self { base: base.cast(), mmap_len, usable: mmap_len - page })
            }
        }

        /// Highest address of the usable region (where the stack starts,
        /// stacks grow down on every architecture this crate supports).
        pub(crate) fn top(&self) -> usize {
            self.base as usize + self.mmap_len
        }

        /// Lowest address of the usable region, i.e. just above the guard page.
        pub(crate) fn bottom(&self) -> usize {
            self.base as usize + self.mmap_len - self.usable
        }

        pub fn size(&self) -> usize {
            self.usable
        }
    }

    impl Drop for Stack {
        fn drop(&mut self) {
            // SAFETY: `base`/`mmap_len` describe the mapping created in `new`.
            unsafe {
                libc::munmap(self.base.cast(), self.mmap_len);
            }
        }
    }

    fn page_size() -> usize {
        // SAFETY: `sysconf` with a well-known name is always safe to call.
        let page = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
        usize::try_from(page).expect("page size fits in usize")
    }
}

#[cfg(windows)]
mod imp {
    use std::io;

    pub const MIN_STACK_SIZE: usize = 4096;

    /// On Windows the commit/reserve sizes are handed straight to
    /// `CreateFiberEx`; there is no separately-owned memory region to free
    /// list here, the OS owns the stack for the lifetime of the fiber object.
    pub struct Stack {
        size: usize,
    }

    unsafe impl Send for Stack {}

    impl Stack {
        pub fn new(size: usize) -> io::Result<Self> {
            Ok(Self { size: size.max(MIN_STACK_SIZE) })
        }

        pub fn size(&self) -> usize {
            self.size
        }
    }
}

pub use imp::{Stack, MIN_STACK_SIZE};

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn allocates_at_least_requested_size() {
        let stack = Stack::new(16 * 1024).unwrap();
        assert!(stack.size() >= 16 * 1024);
        assert!(stack.top() > stack.bottom());
    }

    #[test]
    fn enforces_minimum_size() {
        let stack = Stack::new(1).unwrap();
        assert!(stack.size() >= MIN_STACK_SIZE);
    }
}
