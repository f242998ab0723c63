//! Configuration errors. Everything else that can go wrong in this crate -
//! deque overflow, a freed non-zombie fiber, a steal-table built from a
//! malformed descriptor used after all - is an invariant violation, and
//! invariant violations are fatal, never a `Result`. See [`crate::fatal`].

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can prevent [`crate::RuntimeBuilder::build`] from producing a
/// running [`crate::Runtime`].
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("MYTH_WORKERS={0:?} is not a positive integer")]
    InvalidWorkerCount(String),

    #[error("worker count must be at least 1")]
    ZeroWorkers,

    #[error("could not parse topology descriptor {0:?}: {1}")]
    InvalidTopologyDescriptor(String, String),

    #[error("could not read probability file {path}: {source}")]
    ProbFileIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed probability file {0:?}: {1}")]
    InvalidProbFile(PathBuf, String),
}

/// Aborts the process with a diagnostic. The only sanctioned response to an
/// invariant violation (deque overflow, double-free of a fiber descriptor,
/// a context switch targeting a fiber in the wrong state, ...): these
/// indicate a runtime bug or a misconfiguration too severe to run with, not
/// a condition calling code can meaningfully recover from.
#[macro_export]
macro_rules! fatal {
    ($($arg:tt)*) => {{
        $crate::tracing::error!($($arg)*);
        ::std::process::abort()
    }};
}
