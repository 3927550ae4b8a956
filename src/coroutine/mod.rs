//! Suspendable execution units with an owned or shared stack.
//!
//! A `Coroutine` is created in `Ready` state, registered once with a
//! [`crate::runtime::Scheduler`], and runs until it either falls off the
//! end of its entry closure (`Finished`) or suspends itself at one of
//! the points named in spec.md §5 (`yield_now`, a channel op, `select`,
//! a timer, or a non-blocking I/O wrapper hitting would-block).

pub mod stack;

use std::cell::RefCell;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};

use context::{Context, Transfer};

use crate::error;
use crate::options::Options;
use stack::{DedicatedStack, ShareStackImage, SharedStackPool};

/// Lifecycle state of a coroutine. Transitions only happen through the
/// scheduler or a primitive wakeup; any other transition is a bug
/// (spec.md §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Ready,
    Running,
    Suspended,
    /// Parked on a channel/select/timer/I/O waiter queue. Distinguished
    /// from `Suspended` (ready-queue eligible) so the processor knows
    /// not to requeue it itself — a registration callback decides where
    /// it goes (spec.md §4.4's waiter queues or §4.6's timer heap).
    Parked,
    Finished,
}

/// Tag carried on the switch out of a coroutine's trampoline — on every
/// intermediate yield and on the final one — telling the resumer what
/// to do next.
#[repr(usize)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum YieldTag {
    Suspended = 0,
    Parked = 1,
    Finished = 2,
}

impl YieldTag {
    fn from_usize(v: usize) -> YieldTag {
        match v {
            0 => YieldTag::Suspended,
            1 => YieldTag::Parked,
            2 => YieldTag::Finished,
            other => error::fatal(&format!("unknown yield tag {other}")),
        }
    }
}

/// Which physical stack memory a coroutine is using.
enum StackOwner {
    Dedicated(DedicatedStack),
    Shared { image: ShareStackImage, has_run: bool },
}

struct TrampolineInit {
    entry: Box<dyn FnOnce()>,
}

thread_local! {
    /// The context representing "the scheduler side of the switch that
    /// is currently suspended," set by the trampoline immediately after
    /// every inbound switch and consumed by whichever suspension
    /// primitive runs next inside the coroutine. This does not need to
    /// survive a share-stack memcpy because `Context` is a small opaque
    /// handle, not stack-resident data.
    static RETURN_CONTEXT: RefCell<Option<Context>> = const { RefCell::new(None) };
}

extern "C" fn trampoline(t: Transfer) -> ! {
    RETURN_CONTEXT.with(|rc| *rc.borrow_mut() = Some(t.context));

    let init = unsafe { Box::from_raw(t.data as *mut TrampolineInit) };
    let result = panic::catch_unwind(AssertUnwindSafe(|| (init.entry)()));

    if let Err(payload) = result {
        crate::runtime::processor::record_panic(payload);
    }

    switch_out(YieldTag::Finished);
    unreachable!("a finished coroutine must never be resumed");
}

/// Switch away from the currently running coroutine back to whoever
/// resumed it, tagged with `tag`. Returns once this coroutine is
/// resumed again (never, for `Finished`).
pub(crate) fn switch_out(tag: YieldTag) {
    crate::sync::spinlock::assert_no_lock_held_across_switch();
    let ctx = RETURN_CONTEXT
        .with(|rc| rc.borrow_mut().take())
        .unwrap_or_else(|| error::fatal("switch_out called with no return context"));
    let t = unsafe { ctx.resume(tag as usize) };
    RETURN_CONTEXT.with(|rc| *rc.borrow_mut() = Some(t.context));
}

/// A suspendable execution unit with an owned or shared stack, an entry
/// closure, and a lifecycle state (spec.md §3).
pub struct Coroutine {
    ctx: Option<Context>,
    /// Leaked pointer to this coroutine's `TrampolineInit`, consumed by
    /// the trampoline on first resume. `None` after the first resume.
    pending_init: Option<usize>,
    stack: StackOwner,
    state: State,
    name: Option<String>,
    id: u64,
}

/// Opaque handle to a registered coroutine.
pub type Handle = Box<Coroutine>;

static NEXT_ID: std::sync::atomic::AtomicU64 = std::sync::atomic::AtomicU64::new(1);

impl Coroutine {
    pub fn new_dedicated<F>(entry: F, opts: &Options) -> Handle
    where
        F: FnOnce() + 'static,
    {
        let stack = DedicatedStack::new(opts.clamped_stack_size());
        let ctx = unsafe { Context::new(stack.context_stack(), trampoline) };
        Self::build(ctx, StackOwner::Dedicated(stack), entry, opts)
    }

    pub fn new_shared<F>(pool: &SharedStackPool, entry: F, opts: &Options) -> Handle
    where
        F: FnOnce() + 'static,
    {
        let ctx = unsafe { Context::new(pool.context_stack(), trampoline) };
        Self::build(
            ctx,
            StackOwner::Shared {
                image: ShareStackImage::default(),
                has_run: false,
            },
            entry,
            opts,
        )
    }

    fn build<F>(ctx: Context, owner: StackOwner, entry: F, opts: &Options) -> Handle
    where
        F: FnOnce() + 'static,
    {
        let init = Box::new(TrampolineInit {
            entry: Box::new(entry),
        });
        let pending_init = Box::into_raw(init) as usize;

        Handle::new(Coroutine {
            ctx: Some(ctx),
            pending_init: Some(pending_init),
            stack: owner,
            state: State::Ready,
            name: opts.name.clone(),
            id: NEXT_ID.fetch_add(1, std::sync::atomic::Ordering::Relaxed),
        })
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub(crate) fn set_state(&mut self, s: State) {
        self.state = s;
    }

    pub fn debug_name(&self) -> String {
        match &self.name {
            Some(n) => n.clone(),
            None => format!("coroutine-{}", self.id),
        }
    }

    pub fn is_finished(&self) -> bool {
        self.state == State::Finished
    }

    pub(crate) fn uses_shared_stack(&self) -> bool {
        matches!(self.stack, StackOwner::Shared { .. })
    }

    /// Copy this coroutine's saved image onto the physical shared
    /// stack, if it has one and has run before. No-op for dedicated
    /// stacks.
    pub(crate) fn restore_shared_image(&self, pool: &SharedStackPool) {
        if let StackOwner::Shared { image, has_run } = &self.stack {
            if *has_run {
                pool.restore_from(&image.bytes);
            }
        }
    }

    /// Copy the live physical shared stack into this coroutine's save
    /// buffer. No-op for dedicated stacks.
    pub(crate) fn save_shared_image(&mut self, pool: &SharedStackPool) {
        if let StackOwner::Shared { image, has_run } = &mut self.stack {
            pool.save_into(&mut image.bytes);
            *has_run = true;
        }
    }

    /// Resume this coroutine. `wakeup_data` is delivered as the resume
    /// payload on every resume after the first; the first resume always
    /// carries the pointer to this coroutine's boxed entry closure.
    /// Returns the tag the coroutine switched out with.
    pub(crate) fn resume(&mut self, wakeup_data: usize) -> YieldTag {
        debug_assert!(!self.is_finished(), "cannot resume a finished coroutine");
        self.state = State::Running;

        let data = self.pending_init.take().unwrap_or(wakeup_data);
        let ctx = self
            .ctx
            .take()
            .unwrap_or_else(|| error::fatal("coroutine has no context to resume"));
        let t = unsafe { ctx.resume(data) };
        self.ctx = Some(t.context);
        YieldTag::from_usize(t.data)
    }
}

impl Drop for Coroutine {
    fn drop(&mut self) {
        // If this coroutine was spawned but never resumed even once,
        // reclaim the leaked init box instead of leaking it forever.
        if let Some(ptr) = self.pending_init.take() {
            unsafe {
                drop(Box::from_raw(ptr as *mut TrampolineInit));
            }
        }
    }
}

impl fmt::Debug for Coroutine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Coroutine(#{}, {:?})", self.id, self.state)
    }
}
