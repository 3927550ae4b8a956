// The MIT License (MIT)

// Copyright (c) 2015 Y. T. Chung <zonyitoo@gmail.com>

// Permission is hereby granted, free of charge, to any person obtaining a copy of
// this software and associated documentation files (the "Software"), to deal in
// the Software without restriction, including without limitation the rights to
// use, copy, modify, merge, publish, distribute, sublicense, and/or sell copies of
// the Software, and to permit persons to whom the Software is furnished to do so,
// subject to the following conditions:

// The above copyright notice and this permission notice shall be included in all
// copies or substantial portions of the Software.

// THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
// IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY, FITNESS
// FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE AUTHORS OR
// COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER LIABILITY, WHETHER
// IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING FROM, OUT OF OR IN
// CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS IN THE SOFTWARE.

//! Thread-local access point to the [`Scheduler`] driving this OS
//! thread, and the primitives (`yield_now`, `park_with`, `spawn`,
//! `sleep`) built directly on top of it.
//!
//! "Current coroutine" and "current scheduler" are per-runtime-instance
//! state; spec.md §9 asks for this to be expressed as an explicit
//! reference or thread-local, never a process-wide singleton. Each OS
//! thread that calls `Runtime::run` gets its own independent pointer
//! here, and two runtime instances never see each other's.

use std::any::Any;
use std::cell::Cell;

use crate::coroutine::{Handle, YieldTag};
use crate::error::RuntimeError;
use crate::options::Options;
use crate::runtime::scheduler::Scheduler;

thread_local! {
    static CURRENT: Cell<*mut Scheduler> = const { Cell::new(std::ptr::null_mut()) };
}

/// RAII guard installing `scheduler` as this thread's current scheduler
/// for the duration of the guard, restoring whatever was installed
/// before it on drop.
pub(crate) struct EnterGuard {
    previous: *mut Scheduler,
}

pub(crate) fn enter(scheduler: &mut Scheduler) -> EnterGuard {
    let previous = CURRENT.with(|c| c.replace(scheduler as *mut Scheduler));
    EnterGuard { previous }
}

impl Drop for EnterGuard {
    fn drop(&mut self) {
        CURRENT.with(|c| c.set(self.previous));
    }
}

/// Run `f` with mutable access to the current thread's scheduler.
pub(crate) fn with_scheduler<R>(f: impl FnOnce(&mut Scheduler) -> R) -> Result<R, RuntimeError> {
    let ptr = CURRENT.with(|c| c.get());
    if ptr.is_null() {
        return Err(RuntimeError::NoCoroutineContext);
    }
    // SAFETY: `ptr` was installed by `enter` and points at a `Scheduler`
    // that outlives every call on this thread until the matching
    // `EnterGuard` drops; single-threaded reentrant access is the
    // documented model (see module docs).
    Ok(f(unsafe { &mut *ptr }))
}

/// Whether a coroutine is currently running on this thread's scheduler.
pub fn is_in_coroutine() -> bool {
    with_scheduler(|s| s.current.is_some()).unwrap_or(false)
}

/// Spawn a new coroutine with default options on the current thread's
/// scheduler.
pub fn spawn<F>(entry: F) -> Result<(), RuntimeError>
where
    F: FnOnce() + 'static,
{
    spawn_opts(entry, Options::default())
}

/// Spawn a new coroutine with explicit [`Options`].
pub fn spawn_opts<F>(entry: F, opts: Options) -> Result<(), RuntimeError>
where
    F: FnOnce() + 'static,
{
    with_scheduler(|s| s.spawn(entry, opts))
}

/// Voluntarily give up the CPU; the coroutine is re-enqueued at the
/// tail of the ready queue and resumes once it cycles back around
/// (spec.md §4.3 `yield_now`).
pub fn yield_now() -> Result<(), RuntimeError> {
    require_coroutine()?;
    crate::coroutine::switch_out(YieldTag::Suspended);
    Ok(())
}

fn require_coroutine() -> Result<(), RuntimeError> {
    if with_scheduler(|s| s.current.is_some())? {
        Ok(())
    } else {
        Err(RuntimeError::NoCoroutineContext)
    }
}

/// Detach the running coroutine from the scheduler, run `f` with
/// exclusive access to the scheduler and the detached handle, and
/// switch out tagged `Parked`. `f` decides where the handle ends up
/// (a channel's waiter queue, the timer heap, an I/O registration).
///
/// `f` is generic rather than `Box<dyn FnOnce>` because it almost always
/// borrows data that lives on the parking coroutine's own stack (a
/// channel reference, a value being sent) and therefore isn't `'static`.
/// The closure is smuggled across the context switch as a raw function
/// pointer plus an opaque `usize`, exactly mirroring how a suspended
/// coroutine's register state is itself just bytes on its stack: the
/// lifetime is enforced by us calling the shim exactly once, synchronously,
/// immediately after the switch completes, never by the type system.
pub(crate) fn park_with<F>(f: F) -> Result<(), RuntimeError>
where
    F: FnOnce(&mut Scheduler, Handle),
{
    with_scheduler(|sched| {
        let handle = sched.current.take().ok_or(RuntimeError::NoCoroutineContext)?;
        let mut slot = Some(f);
        let data = &mut slot as *mut Option<F> as usize;
        sched.pending_parked = Some((shim::<F>, data, handle));
        Ok::<(), RuntimeError>(())
    })??;
    crate::coroutine::switch_out(YieldTag::Parked);
    Ok(())
}

fn shim<F>(data: usize, sched: &mut Scheduler, handle: Handle)
where
    F: FnOnce(&mut Scheduler, Handle),
{
    let f = unsafe { (*(data as *mut Option<F>)).take().expect("park shim invoked twice") };
    f(sched, handle);
}

/// Record a coroutine's panic payload for `Scheduler::handle_finish` to
/// act on per the configured [`crate::options::PanicPolicy`]. Called
/// from the coroutine trampoline, which has already caught the panic
/// with `catch_unwind` before returning control to the scheduler.
pub(crate) fn record_panic(payload: Box<dyn Any + Send + 'static>) {
    let _ = with_scheduler(|s| s.pending_panic = Some(payload));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::Runtime;

    // Scheduler::spawn() pushes new coroutines onto the tail of the
    // ready queue, so a coroutine that spawns several children before
    // yielding sees them run in the order it spawned them, only after
    // its own remaining work.
    #[test]
    fn processor_sched_order() {
        use std::cell::RefCell;
        use std::rc::Rc;

        let results = Rc::new(RefCell::new(Vec::new()));
        let expected = vec![0, 1, 2, 3, 99];

        let results_run = results.clone();
        Runtime::default().run(move || {
            let results = results_run.clone();
            results.borrow_mut().push(0);

            for i in 1..4 {
                let results = results.clone();
                spawn(move || {
                    results.borrow_mut().push(i);
                })
                .unwrap();
            }

            yield_now().unwrap();

            results.borrow_mut().push(99);
        });

        assert_eq!(*results.borrow(), expected);
    }
}
