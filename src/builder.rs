//! Spawn-time configuration (spec.md §11 supplemented feature,
//! mirroring `coio::Builder`).
//!
//! A thin, `std::thread::Builder`-shaped convenience layer over
//! [`crate::runtime::processor::spawn_opts`]; it introduces no new
//! scheduling primitive, just a friendlier way to fill in an
//! [`Options`].

use crate::error::RuntimeError;
use crate::options::Options;
use crate::runtime::processor;

/// Builds up [`Options`] for a single `spawn` call.
///
/// ```ignore
/// use arsenal_rt::Builder;
///
/// Builder::new()
///     .name("worker-0")
///     .stack_size(128 * 1024)
///     .spawn(|| { /* ... */ })
///     .unwrap();
/// ```
#[derive(Debug, Clone, Default)]
pub struct Builder {
    opts: Options,
}

impl Builder {
    pub fn new() -> Builder {
        Builder { opts: Options::new() }
    }

    /// Set the coroutine's stack size in bytes. Clamped to
    /// `[MIN_STACK_SIZE, MAX_STACK_SIZE]` at spawn time.
    pub fn stack_size(mut self, bytes: usize) -> Builder {
        self.opts.stack_size = bytes;
        self
    }

    /// Attach a name, surfaced by `Handle::debug_name()` in logs.
    pub fn name(mut self, name: impl Into<String>) -> Builder {
        self.opts.name = Some(name.into());
        self
    }

    /// Spawn `entry` with the accumulated options on the current
    /// thread's scheduler.
    pub fn spawn<F>(self, entry: F) -> Result<(), RuntimeError>
    where
        F: FnOnce() + 'static,
    {
        processor::spawn_opts(entry, self.opts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::Runtime;

    #[test]
    fn spawn_with_custom_stack_size_and_name() {
        Runtime::default().run(|| {
            Builder::new()
                .name("probe")
                .stack_size(32 * 1024)
                .spawn(|| {})
                .unwrap();
        });
    }
}
