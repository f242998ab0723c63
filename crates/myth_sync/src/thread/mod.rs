//! Thin wrappers over `std::thread` facilities the scheduler needs.

pub use std::thread::sleep;

use core::num::NonZero;

/// Returns an estimate of the number of hardware threads available, falling
/// back to `1` if the platform can't report it.
///
/// We ensure that `result > 0`.
pub fn available_parallelism() -> NonZero<usize> {
    std::thread::available_parallelism().unwrap_or(NonZero::new(1).unwrap())
}
