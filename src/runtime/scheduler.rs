//! The single-threaded ready-queue driver (spec.md §4.3).
//!
//! A `Scheduler` owns everything a runtime instance needs to decide
//! "what runs next": the ready FIFO, the timer heap, and the I/O
//! poller. It lives on the stack of whichever call drives it
//! (`Runtime::run`/`block_on`) and is reached from anywhere on that
//! same OS thread through `crate::runtime::processor`'s thread-local
//! pointer — never shared across threads, matching the Non-goal in
//! spec.md §1 ("multi-threaded work-stealing ... is single-threaded per
//! runtime instance").

use std::any::Any;
use std::collections::VecDeque;
use std::time::{Duration, Instant};

use crate::coroutine::stack::SharedStackPool;
use crate::coroutine::{Coroutine, Handle, State, YieldTag};
use crate::io::poller::Poller;
use crate::options::{PanicPolicy, RuntimeConfig, StackStrategy};
use crate::timer::TimerHeap;

/// A boxed, type-erased "what to do with this parked coroutine" action,
/// recorded by `processor::park_with` right before the switch out and
/// run by the scheduler right after the switch completes. See
/// `processor::park_with` for why this is a raw function-pointer shim
/// rather than a `Box<dyn FnOnce>` (the closure usually borrows
/// non-'static data living on the parking coroutine's own stack).
pub(crate) type ParkShim = fn(usize, &mut Scheduler, Handle);

pub struct Scheduler {
    ready: VecDeque<Handle>,
    pub(crate) current: Option<Handle>,
    pub(crate) pending_parked: Option<(ParkShim, usize, Handle)>,
    pub(crate) pending_panic: Option<Box<dyn Any + Send + 'static>>,
    timers: TimerHeap,
    poller: Poller,
    shared_pool: Option<SharedStackPool>,
    config: RuntimeConfig,
    live_count: usize,
}

impl Scheduler {
    pub fn new(config: RuntimeConfig) -> Scheduler {
        config.validate();
        let shared_pool = if config.share_stack {
            Some(SharedStackPool::new(config.default_stack_size))
        } else {
            None
        };
        Scheduler {
            ready: VecDeque::new(),
            current: None,
            pending_parked: None,
            pending_panic: None,
            timers: TimerHeap::new(),
            poller: Poller::new().unwrap_or_else(|e| crate::error::fatal(&format!("failed to create poller: {e}"))),
            shared_pool,
            config,
            live_count: 0,
        }
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn poller(&mut self) -> &mut Poller {
        &mut self.poller
    }

    pub fn timers(&mut self) -> &mut TimerHeap {
        &mut self.timers
    }

    pub fn ready_len(&self) -> usize {
        self.ready.len()
    }

    pub fn live_count(&self) -> usize {
        self.live_count
    }

    /// Push a coroutine onto the tail of the ready queue (spec.md §4.3
    /// `ready(handle)`).
    pub fn push_ready(&mut self, mut handle: Handle) {
        handle.set_state(State::Ready);
        self.ready.push_back(handle);
    }

    /// Build and enqueue a new coroutine, choosing dedicated or shared
    /// stacks per the strategy fixed at construction.
    pub fn spawn<F>(&mut self, entry: F, opts: crate::options::Options)
    where
        F: FnOnce() + 'static,
    {
        let handle = match (self.config.stack_strategy(), &self.shared_pool) {
            (StackStrategy::Shared, Some(pool)) => Coroutine::new_shared(pool, entry, &opts),
            _ => Coroutine::new_dedicated(entry, &opts),
        };
        self.live_count += 1;
        self.push_ready(handle);
    }

    /// Run one (ready queue -> timer -> poller) iteration of
    /// spec.md §4.3's algorithm. Returns `true` if the scheduler did any
    /// work (so the caller can keep looping) or `false` if it is idle.
    fn step(&mut self) -> bool {
        if let Some(handle) = self.ready.pop_front() {
            self.resume_current(handle);
            return true;
        }

        if self.timers.is_empty() && !self.poller.has_registrations() {
            return false;
        }

        let timeout = self.timers.next_deadline().map(|deadline| {
            let now = Instant::now();
            if deadline > now {
                deadline - now
            } else {
                Duration::ZERO
            }
        });

        if let Err(e) = self.poller.poll(timeout, &mut self.ready) {
            log::error!("poller error: {e}");
        }

        for woken in self.timers.drain_expired() {
            self.ready.push_back(woken);
        }

        true
    }

    /// Drain the ready queue, the timer heap, and the poller until all
    /// three are empty (spec.md §4.3 `run_until_idle`).
    pub fn run_until_idle(&mut self) {
        while self.step() {}
    }

    /// Switch into `handle`, running it until it suspends, parks, or
    /// finishes, then apply the corresponding scheduler bookkeeping.
    fn resume_current(&mut self, handle: Handle) {
        debug_assert!(self.current.is_none(), "a coroutine is already running");
        let uses_shared = handle.uses_shared_stack();
        if uses_shared {
            if let Some(pool) = &self.shared_pool {
                handle.restore_shared_image(pool);
            }
        }
        self.current = Some(handle);

        let tag = self
            .current
            .as_mut()
            .expect("current coroutine missing during resume")
            .resume(0);

        if uses_shared && !matches!(tag, YieldTag::Finished) {
            // Whichever branch below takes `current` back out does so
            // after this point, so the image on the physical stack is
            // still this coroutine's at the moment we copy it out.
            if let Some(h) = self.current.as_mut() {
                if let Some(pool) = &self.shared_pool {
                    h.save_shared_image(pool);
                }
            } else if let Some((_, _, h)) = self.pending_parked.as_mut() {
                if let Some(pool) = &self.shared_pool {
                    h.save_shared_image(pool);
                }
            }
        }

        match tag {
            YieldTag::Suspended => {
                let mut h = self.current.take().expect("current coroutine vanished");
                h.set_state(State::Suspended);
                self.ready.push_back(h);
            }
            YieldTag::Parked => {
                debug_assert!(
                    self.current.is_none(),
                    "park_with must take `current` before switching out"
                );
                let (shim, data, handle) = self
                    .pending_parked
                    .take()
                    .unwrap_or_else(|| crate::error::fatal("Parked tag with no pending park action"));
                shim(data, self, handle);
            }
            YieldTag::Finished => {
                let h = self.current.take().expect("current coroutine vanished");
                self.live_count -= 1;
                self.handle_finish(h);
            }
        }
    }

    fn handle_finish(&mut self, handle: Handle) {
        if let Some(payload) = self.pending_panic.take() {
            match self.config.panic_policy {
                PanicPolicy::Abort => {
                    log::error!(
                        "coroutine `{}` panicked; panic_policy=abort",
                        handle.debug_name()
                    );
                    drop(handle);
                    std::process::abort();
                }
                PanicPolicy::Propagate => {
                    let msg = panic_message(&payload);
                    log::warn!(
                        "coroutine `{}` panicked (propagated): {msg}",
                        handle.debug_name()
                    );
                }
            }
        }
        drop(handle);
    }

    /// The shared-stack pool, if this instance uses one.
    pub(crate) fn shared_pool(&self) -> Option<&SharedStackPool> {
        self.shared_pool.as_ref()
    }
}

fn panic_message(payload: &Box<dyn Any + Send + 'static>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "<non-string panic payload>".to_string()
    }
}
