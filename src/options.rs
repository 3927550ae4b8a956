//! Runtime and per-coroutine configuration.
//!
//! Mirrors the configuration table a caller can pass to `Runtime::new`:
//! `{ default_stack_size, share_stack, scheduler_policy, poller_backend,
//! panic_policy }`. `ARSENAL_STACK_SIZE` and `ARSENAL_PANIC_POLICY`
//! override the corresponding fields when set.

use std::env;

/// Default stack size for a coroutine that doesn't request one
/// explicitly.
pub const DEFAULT_STACK_SIZE: usize = 64 * 1024;
/// Smallest stack size the runtime will allocate.
pub const MIN_STACK_SIZE: usize = 2 * 1024;
/// Largest stack size the runtime will allocate.
pub const MAX_STACK_SIZE: usize = 8 * 1024 * 1024;

/// What the scheduler does with a coroutine that panics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PanicPolicy {
    /// Abort the process (the default). Matches the "fatal" handling
    /// most embedders of a green-thread runtime want: a panicking
    /// coroutine usually means a broken invariant, not an expected
    /// error path.
    Abort,
    /// Mark the coroutine finished, log the panic payload, and keep the
    /// scheduler running.
    Propagate,
}

/// Which stack allocation strategy a runtime instance uses. Chosen once
/// at `Runtime::new` and never mixed within that instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StackStrategy {
    /// One guarded, dedicated stack per coroutine. Higher memory use,
    /// no copying on switch. The default.
    Dedicated,
    /// A pool of shared physical stack regions; a coroutine's live bytes
    /// are copied in/out of a save buffer on every switch. Lower memory
    /// use, extra copy cost per switch.
    Shared,
}

/// Readiness-poller backend. `Auto` lets `mio` select the
/// platform-optimal multiplexer (epoll / kqueue / IOCP); the concrete
/// variants exist so a caller can assert the backend they expect is
/// actually available on the host, matching spec.md's `poller_backend`
/// config knob.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollerBackend {
    Auto,
    Epoll,
    Kqueue,
    Iocp,
}

impl PollerBackend {
    fn matches_host(self) -> bool {
        match self {
            PollerBackend::Auto => true,
            PollerBackend::Epoll => cfg!(target_os = "linux"),
            PollerBackend::Kqueue => cfg!(any(
                target_os = "macos",
                target_os = "ios",
                target_os = "freebsd",
                target_os = "netbsd",
                target_os = "openbsd",
                target_os = "dragonfly"
            )),
            PollerBackend::Iocp => cfg!(target_os = "windows"),
        }
    }
}

/// Ready-queue scheduling discipline. Only `Fifo` is implemented; the
/// field exists so the configuration surface matches spec.md's table
/// and so a future discipline has somewhere to plug in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerPolicy {
    Fifo,
}

/// Top-level configuration recognized at runtime initialization.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub default_stack_size: usize,
    pub share_stack: bool,
    pub scheduler_policy: SchedulerPolicy,
    pub poller_backend: PollerBackend,
    pub panic_policy: PanicPolicy,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        RuntimeConfig {
            default_stack_size: DEFAULT_STACK_SIZE,
            share_stack: false,
            scheduler_policy: SchedulerPolicy::Fifo,
            poller_backend: PollerBackend::Auto,
            panic_policy: PanicPolicy::Abort,
        }
    }
}

impl RuntimeConfig {
    /// Build the default configuration, then apply `ARSENAL_STACK_SIZE`
    /// and `ARSENAL_PANIC_POLICY` overrides from the environment, if
    /// present.
    pub fn from_env() -> Self {
        let mut cfg = RuntimeConfig::default();

        if let Ok(raw) = env::var("ARSENAL_STACK_SIZE") {
            if let Ok(bytes) = raw.parse::<usize>() {
                cfg.default_stack_size = bytes.clamp(MIN_STACK_SIZE, MAX_STACK_SIZE);
            } else {
                log::warn!("ARSENAL_STACK_SIZE={raw:?} is not a valid byte count, ignoring");
            }
        }

        if let Ok(raw) = env::var("ARSENAL_PANIC_POLICY") {
            match raw.to_ascii_lowercase().as_str() {
                "abort" => cfg.panic_policy = PanicPolicy::Abort,
                "propagate" => cfg.panic_policy = PanicPolicy::Propagate,
                other => log::warn!("ARSENAL_PANIC_POLICY={other:?} is not recognized, ignoring"),
            }
        }

        cfg
    }

    pub(crate) fn stack_strategy(&self) -> StackStrategy {
        if self.share_stack {
            StackStrategy::Shared
        } else {
            StackStrategy::Dedicated
        }
    }

    /// Panics (in debug builds) if `poller_backend` names a backend the
    /// host platform cannot provide.
    pub(crate) fn validate(&self) {
        debug_assert!(
            self.poller_backend.matches_host(),
            "poller_backend {:?} is not available on this platform",
            self.poller_backend
        );
        debug_assert!(
            self.default_stack_size >= MIN_STACK_SIZE && self.default_stack_size <= MAX_STACK_SIZE,
            "default_stack_size out of [{MIN_STACK_SIZE}, {MAX_STACK_SIZE}] range"
        );
    }
}

/// Per-coroutine spawn options, analogous to `std::thread::Builder`.
#[derive(Debug, Clone)]
pub struct Options {
    pub stack_size: usize,
    pub name: Option<String>,
}

impl Options {
    pub fn new() -> Options {
        Options {
            stack_size: DEFAULT_STACK_SIZE,
            name: None,
        }
    }

    pub(crate) fn clamped_stack_size(&self) -> usize {
        self.stack_size.clamp(MIN_STACK_SIZE, MAX_STACK_SIZE)
    }
}

impl Default for Options {
    fn default() -> Self {
        Options::new()
    }
}
