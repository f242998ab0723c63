//! Runtime configuration: environment variables read at [`crate::Runtime`]
//! construction, with a builder for programmatic override. Mirrors the
//! shape of a thread-pool builder - a handful of optional knobs that fall
//! back to environment- or platform-derived defaults at `build()` time.

use std::path::PathBuf;

use crate::error::RuntimeError;
use crate::topology::TopologySource;

/// Default size of a fiber's own stack.
pub const DEFAULT_STACK_SIZE: usize = 16 * 1024;

/// Default size of a worker's scheduler stack (the stack the run loop and
/// victim selection execute on; never a user fiber's stack).
pub const DEFAULT_SCHEDULER_STACK_SIZE: usize = 1024 * 1024;

/// Default number of stacks allocated per worker free-list refill.
pub const DEFAULT_STACK_ALLOC_UNIT: usize = 128;

/// Default per-worker runnable-deque capacity. Overflow past this is fatal.
pub const DEFAULT_QUEUE_CAPACITY: usize = 4096;

const ENV_WORKERS: &str = "MYTH_WORKERS";
const ENV_CPU_HIERARCHY: &str = "MYTH_CPU_HIERARCHY";
const ENV_PROB_FILE: &str = "MYTH_PROB_FILE";

/// Resolved configuration for a [`crate::Runtime`].
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub(crate) workers: usize,
    pub(crate) stack_size: usize,
    pub(crate) scheduler_stack_size: usize,
    pub(crate) stack_alloc_unit: usize,
    pub(crate) queue_capacity: usize,
    pub(crate) thread_name: String,
    pub(crate) topology: TopologySource,
}

/// Builder for a [`crate::Runtime`].
///
/// Unset fields fall back to the environment (`MYTH_WORKERS`,
/// `MYTH_CPU_HIERARCHY`, `MYTH_PROB_FILE`) and then to platform defaults,
/// resolved at [`RuntimeBuilder::build`].
#[derive(Default)]
#[must_use]
pub struct RuntimeBuilder {
    workers: Option<usize>,
    stack_size: Option<usize>,
    scheduler_stack_size: Option<usize>,
    stack_alloc_unit: Option<usize>,
    queue_capacity: Option<usize>,
    thread_name: Option<String>,
    topology: Option<TopologySource>,
}

impl RuntimeBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of workers (one OS thread pinned per CPU, thread 0 being the
    /// caller). Overrides `MYTH_WORKERS` and the online-CPU-count default.
    pub fn workers(mut self, workers: usize) -> Self {
        self.workers = Some(workers);
        self
    }

    /// Overrides the default 16 KiB fiber stack size.
    pub fn stack_size(mut self, stack_size: usize) -> Self {
        self.stack_size = Some(stack_size);
        self
    }

    /// Overrides the default 1 MiB scheduler stack size - the OS stack each
    /// spawned worker thread runs its run loop and context switches on.
    /// Worker 0 runs on `block_on`'s caller thread instead of a spawned one,
    /// so this has no effect on it; that thread's stack size is whatever the
    /// process (or its own spawner) already gave it.
    pub fn scheduler_stack_size(mut self, size: usize) -> Self {
        self.scheduler_stack_size = Some(size);
        self
    }

    /// Overrides the number of stacks allocated per free-list refill.
    pub fn stack_alloc_unit(mut self, unit: usize) -> Self {
        self.stack_alloc_unit = Some(unit);
        self
    }

    /// Overrides the per-worker runnable-deque capacity.
    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = Some(capacity);
        self
    }

    /// Sets the worker thread name prefix (threads are named `{prefix}-{rank}`).
    pub fn thread_name(mut self, name: impl Into<String>) -> Self {
        self.thread_name = Some(name.into());
        self
    }

    /// Selects the topology-weighted victim-selection policy from an
    /// explicit descriptor string, overriding `MYTH_CPU_HIERARCHY`.
    pub fn topology_descriptor(mut self, descriptor: impl Into<String>) -> Self {
        self.topology = Some(TopologySource::Descriptor(descriptor.into()));
        self
    }

    /// Selects the topology-weighted victim-selection policy from a
    /// probability matrix file, overriding `MYTH_PROB_FILE`.
    pub fn topology_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.topology = Some(TopologySource::File(path.into()));
        self
    }

    /// Resolves every field against the environment and platform defaults.
    pub fn resolve(self) -> Result<RuntimeConfig, RuntimeError> {
        let workers = match self.workers {
            Some(workers) => workers,
            None => match std::env::var(ENV_WORKERS) {
                Ok(value) => value
                    .trim()
                    .parse::<usize>()
                    .map_err(|_| RuntimeError::InvalidWorkerCount(value.clone()))?,
                Err(_) => myth_sync::thread::available_parallelism().get(),
            },
        };
        if workers == 0 {
            return Err(RuntimeError::ZeroWorkers);
        }

        let topology = match self.topology {
            Some(source) => source,
            None => {
                if let Ok(path) = std::env::var(ENV_PROB_FILE) {
                    TopologySource::File(PathBuf::from(path))
                } else if let Ok(descriptor) = std::env::var(ENV_CPU_HIERARCHY) {
                    TopologySource::Descriptor(descriptor)
                } else {
                    TopologySource::Uniform
                }
            }
        };

        Ok(RuntimeConfig {
            workers,
            stack_size: self.stack_size.unwrap_or(DEFAULT_STACK_SIZE),
            scheduler_stack_size: self.scheduler_stack_size.unwrap_or(DEFAULT_SCHEDULER_STACK_SIZE),
            stack_alloc_unit: self.stack_alloc_unit.unwrap_or(DEFAULT_STACK_ALLOC_UNIT),
            queue_capacity: self.queue_capacity.unwrap_or(DEFAULT_QUEUE_CAPACITY),
            thread_name: self.thread_name.unwrap_or_else(|| "myth-worker".to_owned()),
            topology,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_workers_is_rejected() {
        let err = RuntimeBuilder::new().workers(0).resolve().unwrap_err();
        assert!(matches!(err, RuntimeError::ZeroWorkers));
    }

    #[test]
    fn explicit_workers_skips_env_and_parallelism() {
        let config = RuntimeBuilder::new().workers(3).resolve().unwrap();
        assert_eq!(config.workers, 3);
    }

    #[test]
    fn default_topology_is_uniform() {
        let config = RuntimeBuilder::new().workers(2).resolve().unwrap();
        assert!(matches!(config.topology, TopologySource::Uniform));
    }
}
