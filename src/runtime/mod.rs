//! A single runtime instance: one [`Scheduler`] plus the thread-local
//! plumbing ([`processor`]) that lets code running inside a coroutine
//! reach it without threading a reference through every call.

pub(crate) mod processor;
pub(crate) mod scheduler;

pub use scheduler::Scheduler;

use crate::options::RuntimeConfig;

/// An isolated coroutine runtime. Spawning, driving, and tearing down a
/// `Runtime` never touches any other instance's state, including one
/// running on another OS thread (spec.md §1's single-threaded-per-instance
/// Non-goal).
pub struct Runtime {
    scheduler: Scheduler,
}

impl Runtime {
    pub fn new(config: RuntimeConfig) -> Runtime {
        Runtime {
            scheduler: Scheduler::new(config),
        }
    }

    /// This instance's configuration.
    pub fn config(&self) -> &RuntimeConfig {
        self.scheduler.config()
    }

    /// Number of coroutines that have been spawned but not yet finished.
    pub fn live_count(&self) -> usize {
        self.scheduler.live_count()
    }

    /// Number of coroutines currently sitting in the ready queue,
    /// neither running nor parked (spec.md §11 debug/introspection).
    pub fn ready_len(&self) -> usize {
        self.scheduler.ready_len()
    }

    /// Spawn `entry` as the root coroutine and run the scheduler until
    /// every coroutine it transitively spawns has finished and both the
    /// timer heap and the I/O poller are empty (spec.md §6 `run`).
    pub fn run<F>(&mut self, entry: F)
    where
        F: FnOnce() + 'static,
    {
        let _guard = processor::enter(&mut self.scheduler);
        self.scheduler.spawn(entry, crate::options::Options::default());
        self.scheduler.run_until_idle();
    }

    /// Alias for [`Runtime::run`] kept for callers migrating from an
    /// async-flavored `block_on` naming convention; this runtime has no
    /// separate polling model to distinguish the two.
    pub fn block_on<F>(&mut self, entry: F)
    where
        F: FnOnce() + 'static,
    {
        self.run(entry)
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Runtime::new(RuntimeConfig::default())
    }
}
