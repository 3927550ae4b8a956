//! Multiplexing over channel operations and timeouts (spec.md §4.5
//! "Select").
//!
//! Two phases, exactly as described there: a shuffled non-blocking pass
//! over every case first, and only if none of them was ready does the
//! slow path allocate one waiter per case, link them all under a single
//! shared [`SelectTag`], and park for real.
//!
//! The surface is a small builder, [`Select`], in the shape of
//! `crossbeam-channel`'s two-phase `Select`/`SelectedOperation` split
//! rather than a `match`-like macro: build each case up front (it owns
//! its own outcome slot), register it, then `wait()` (or `try_wait()`
//! for a `default` arm) to learn which case's index won and retrieve
//! its value with that case's own `take()`.
//!
//! ```ignore
//! use std::time::Duration;
//! use arsenal_rt::channel::unbuffered;
//! use arsenal_rt::runtime::Runtime;
//! use arsenal_rt::select::{RecvCase, Select, TimeoutCase};
//!
//! Runtime::default().run(|| {
//!     let ch = unbuffered::<i32>();
//!     let recv_case = RecvCase::new(&ch);
//!     let timeout_case = TimeoutCase::new(Duration::from_millis(50));
//!
//!     let mut sel = Select::new();
//!     let recv_idx = sel.recv(&recv_case);
//!     let timeout_idx = sel.timeout(&timeout_case);
//!
//!     match sel.wait() {
//!         i if i == recv_idx => {
//!             let _ = recv_case.take();
//!         }
//!         i if i == timeout_idx => {
//!             let _ = timeout_case.take();
//!         }
//!         _ => unreachable!(),
//!     }
//! });
//! ```

use std::cell::RefCell;
use std::rc::Rc;
use std::time::{Duration, Instant};

use rand::seq::SliceRandom;

use crate::channel::buffered::{self, BufferedChannel};
use crate::channel::unbuffered::{self, Channel};
use crate::error::{RuntimeError, TryRecvError, TrySendError};
use crate::runtime::processor;
use crate::timer::{self, TimerChannel};
use crate::waiter::{shared_handle, RecvOutcome, RecvWaiter, RecvWaiterRef, SelectTag, SendOutcome, SendWaiter, SendWaiterRef, SharedHandle};

/// A source a [`RecvCase`] can be registered against. Implemented by
/// both channel flavors so [`Select`] doesn't care which kind of
/// channel a given case names.
pub trait RecvSource<T> {
    fn try_recv_now(&self) -> Result<T, TryRecvError>;
    fn register(&self, waiter: RecvWaiterRef<T>) -> bool;
    fn unlink(&self, waiter: &RecvWaiterRef<T>);
}

impl<T> RecvSource<T> for Channel<T> {
    fn try_recv_now(&self) -> Result<T, TryRecvError> {
        self.try_recv()
    }
    fn register(&self, waiter: RecvWaiterRef<T>) -> bool {
        unbuffered::register_recv(self, waiter)
    }
    fn unlink(&self, waiter: &RecvWaiterRef<T>) {
        unbuffered::unlink_recv(self, waiter)
    }
}

impl<T> RecvSource<T> for BufferedChannel<T> {
    fn try_recv_now(&self) -> Result<T, TryRecvError> {
        self.try_recv()
    }
    fn register(&self, waiter: RecvWaiterRef<T>) -> bool {
        buffered::register_recv(self, waiter)
    }
    fn unlink(&self, waiter: &RecvWaiterRef<T>) {
        buffered::unlink_recv(self, waiter)
    }
}

/// A destination a [`SendCase`] can be registered against.
pub trait SendSink<T> {
    fn try_send_now(&self, value: T) -> Result<(), TrySendError<T>>;
    fn register(&self, waiter: SendWaiterRef<T>) -> bool;
    fn unlink(&self, waiter: &SendWaiterRef<T>);
}

impl<T> SendSink<T> for Channel<T> {
    fn try_send_now(&self, value: T) -> Result<(), TrySendError<T>> {
        self.try_send(value)
    }
    fn register(&self, waiter: SendWaiterRef<T>) -> bool {
        unbuffered::register_send(self, waiter)
    }
    fn unlink(&self, waiter: &SendWaiterRef<T>) {
        unbuffered::unlink_send(self, waiter)
    }
}

impl<T> SendSink<T> for BufferedChannel<T> {
    fn try_send_now(&self, value: T) -> Result<(), TrySendError<T>> {
        self.try_send(value)
    }
    fn register(&self, waiter: SendWaiterRef<T>) -> bool {
        buffered::register_send(self, waiter)
    }
    fn unlink(&self, waiter: &SendWaiterRef<T>) {
        buffered::unlink_send(self, waiter)
    }
}

/// One case registered with a [`Select`], type-erased so every case
/// (regardless of the value type it carries) can sit in the same slice
/// while the select driver runs its two-phase algorithm. Extracting the
/// actual value is left to the concrete case type (`RecvCase::take`,
/// `SendCase::take`, `TimeoutCase::take`), which the caller still holds.
trait SelectCase {
    /// Attempt this case without suspending. Returns `true` if it
    /// resolved, with the result stashed for the caller to retrieve.
    fn try_now(&self) -> bool;
    /// Link this case's waiter under the select's shared tag and
    /// handle. Returns `true` if it resolved synchronously during
    /// registration (e.g. the channel was already closed, or a peer was
    /// already parked).
    fn register(&self, tag: &Rc<SelectTag>, handle: &SharedHandle) -> bool;
    /// Unlink this case's waiter, if it was ever linked. Safe to call
    /// unconditionally and more than once.
    fn unlink(&self);
    /// Whether this case's outcome has been populated, without
    /// consuming it. Used after a real wakeup to find which of the
    /// registered cases is the one that actually won.
    fn is_resolved(&self) -> bool;
}

/// A `recv(ch)` case built against `source`, registered with a
/// [`Select`] and interrogated with [`RecvCase::take`] once it wins.
pub struct RecvCase<'a, T, C: RecvSource<T>> {
    source: &'a C,
    waiter: RefCell<Option<RecvWaiterRef<T>>>,
    outcome: Rc<RefCell<Option<RecvOutcome<T>>>>,
}

impl<'a, T, C: RecvSource<T>> RecvCase<'a, T, C> {
    pub fn new(source: &'a C) -> RecvCase<'a, T, C> {
        RecvCase {
            source,
            waiter: RefCell::new(None),
            outcome: Rc::new(RefCell::new(None)),
        }
    }

    /// Consume the resolved outcome: `Some(value)` on a delivered send,
    /// `None` if the channel turned out closed. Only meaningful on the
    /// case `Select::wait` reported as the winner.
    pub fn take(&self) -> Option<T> {
        match self.outcome.borrow_mut().take() {
            Some(RecvOutcome::Value(v)) => Some(v),
            Some(RecvOutcome::Closed) | None => None,
        }
    }
}

impl<'a, T, C: RecvSource<T>> SelectCase for RecvCase<'a, T, C> {
    fn try_now(&self) -> bool {
        match self.source.try_recv_now() {
            Ok(v) => {
                *self.outcome.borrow_mut() = Some(RecvOutcome::Value(v));
                true
            }
            Err(TryRecvError::Closed) => {
                *self.outcome.borrow_mut() = Some(RecvOutcome::Closed);
                true
            }
            Err(TryRecvError::Empty) => false,
        }
    }

    fn register(&self, tag: &Rc<SelectTag>, handle: &SharedHandle) -> bool {
        let waiter: RecvWaiterRef<T> = Rc::new(RefCell::new(RecvWaiter {
            handle: handle.clone(),
            tag: tag.clone(),
            outcome: self.outcome.clone(),
        }));
        let resolved = self.source.register(waiter.clone());
        if !resolved {
            *self.waiter.borrow_mut() = Some(waiter);
        }
        resolved
    }

    fn unlink(&self) {
        if let Some(w) = self.waiter.borrow_mut().take() {
            self.source.unlink(&w);
        }
    }

    fn is_resolved(&self) -> bool {
        self.outcome.borrow().is_some()
    }
}

/// A `send(ch, value)` case built against `sink`, registered with a
/// [`Select`] and interrogated with [`SendCase::take`] once it wins.
pub struct SendCase<'a, T, C: SendSink<T>> {
    sink: &'a C,
    value: RefCell<Option<T>>,
    waiter: RefCell<Option<SendWaiterRef<T>>>,
    outcome: Rc<RefCell<Option<SendOutcome>>>,
}

impl<'a, T, C: SendSink<T>> SendCase<'a, T, C> {
    pub fn new(sink: &'a C, value: T) -> SendCase<'a, T, C> {
        SendCase {
            sink,
            value: RefCell::new(Some(value)),
            waiter: RefCell::new(None),
            outcome: Rc::new(RefCell::new(None)),
        }
    }

    /// Whether the send landed (as opposed to finding the channel
    /// closed). Only meaningful on the winning case.
    pub fn take(&self) -> bool {
        matches!(self.outcome.borrow_mut().take(), Some(SendOutcome::Sent))
    }
}

impl<'a, T, C: SendSink<T>> SelectCase for SendCase<'a, T, C> {
    fn try_now(&self) -> bool {
        let value = match self.value.borrow_mut().take() {
            Some(v) => v,
            None => return false,
        };
        match self.sink.try_send_now(value) {
            Ok(()) => {
                *self.outcome.borrow_mut() = Some(SendOutcome::Sent);
                true
            }
            Err(TrySendError::Closed(v)) => {
                *self.outcome.borrow_mut() = Some(SendOutcome::Closed);
                let _ = v;
                true
            }
            Err(TrySendError::Full(v)) => {
                *self.value.borrow_mut() = Some(v);
                false
            }
        }
    }

    fn register(&self, tag: &Rc<SelectTag>, handle: &SharedHandle) -> bool {
        let value = self.value.borrow_mut().take().expect("send case registered twice");
        let waiter: SendWaiterRef<T> = Rc::new(RefCell::new(SendWaiter {
            handle: handle.clone(),
            value: Some(value),
            tag: tag.clone(),
            outcome: self.outcome.clone(),
        }));
        let resolved = self.sink.register(waiter.clone());
        if !resolved {
            *self.waiter.borrow_mut() = Some(waiter);
        }
        resolved
    }

    fn unlink(&self) {
        if let Some(w) = self.waiter.borrow_mut().take() {
            self.sink.unlink(&w);
        }
    }

    fn is_resolved(&self) -> bool {
        self.outcome.borrow().is_some()
    }
}

/// A `timeout(d)` case, registered with a [`Select`] and interrogated
/// with [`TimeoutCase::take`] once it wins.
pub struct TimeoutCase {
    channel: TimerChannel,
    fired: RefCell<bool>,
}

impl TimeoutCase {
    pub fn new(d: Duration) -> TimeoutCase {
        TimeoutCase {
            channel: timer::after(d),
            fired: RefCell::new(false),
        }
    }

    /// The deadline that fired.
    pub fn take(&self) -> Instant {
        self.channel.deadline()
    }
}

impl SelectCase for TimeoutCase {
    fn try_now(&self) -> bool {
        if self.channel.try_recv().is_some() {
            *self.fired.borrow_mut() = true;
            true
        } else {
            false
        }
    }

    fn register(&self, tag: &Rc<SelectTag>, handle: &SharedHandle) -> bool {
        let won = self.channel.register(tag.clone(), handle.clone());
        if won {
            *self.fired.borrow_mut() = true;
        }
        won
    }

    // A losing timer entry is left in the timer heap: `drain_expired`
    // CASes the same shared tag before touching it, so once another
    // case has won it simply fires into nothing when its deadline
    // eventually passes.
    fn unlink(&self) {}

    fn is_resolved(&self) -> bool {
        *self.fired.borrow()
    }
}

/// Builds up a set of select cases and runs the two-phase algorithm
/// over them. A case is registered by reference: it owns its own
/// outcome slot, and the index handed back by `recv`/`send`/`timeout`
/// is what the caller compares `wait()`'s result against to find out
/// which one to read from.
#[derive(Default)]
pub struct Select<'a> {
    cases: Vec<&'a dyn SelectCase>,
}

impl<'a> Select<'a> {
    pub fn new() -> Select<'a> {
        Select { cases: Vec::new() }
    }

    /// Register a `recv(ch)` case, returning its index.
    pub fn recv<T, C: RecvSource<T>>(&mut self, case: &'a RecvCase<'a, T, C>) -> usize {
        self.cases.push(case);
        self.cases.len() - 1
    }

    /// Register a `send(ch, v)` case, returning its index.
    pub fn send<T, C: SendSink<T>>(&mut self, case: &'a SendCase<'a, T, C>) -> usize {
        self.cases.push(case);
        self.cases.len() - 1
    }

    /// Register a `timeout(d)` case, returning its index.
    pub fn timeout(&mut self, case: &'a TimeoutCase) -> usize {
        self.cases.push(case);
        self.cases.len() - 1
    }

    /// Run the fast path only; returns `None` if no case is ready yet
    /// rather than suspending. Backs a `select!`'s `default` arm.
    pub fn try_wait(&self) -> Option<usize> {
        try_run(&self.cases)
    }

    /// Block until exactly one registered case is ready, returning its
    /// index.
    pub fn wait(&self) -> usize {
        run(&self.cases).unwrap_or_else(|_| crate::error::fatal("select used with no running coroutine"))
    }
}

/// Run the two-phase select algorithm over `cases`, returning the index
/// of the winning one. Never returns `None` — the slow path always
/// blocks until one case wins if the fast path finds nothing ready.
fn run(cases: &[&dyn SelectCase]) -> Result<usize, RuntimeError> {
    let mut order: Vec<usize> = (0..cases.len()).collect();
    order.shuffle(&mut rand::thread_rng());

    for &i in &order {
        if cases[i].try_now() {
            return Ok(i);
        }
    }

    slow_path(cases)
}

/// Like [`run`], but returns `None` instead of blocking when no case is
/// ready.
fn try_run(cases: &[&dyn SelectCase]) -> Option<usize> {
    let mut order: Vec<usize> = (0..cases.len()).collect();
    order.shuffle(&mut rand::thread_rng());
    order.into_iter().find(|&i| cases[i].try_now())
}

fn slow_path(cases: &[&dyn SelectCase]) -> Result<usize, RuntimeError> {
    let tag = SelectTag::new();
    let sync_winner: RefCell<Option<usize>> = RefCell::new(None);
    let registered: RefCell<Vec<usize>> = RefCell::new(Vec::new());

    processor::park_with(|sched, handle| {
        let shared = shared_handle(handle);
        for (i, case) in cases.iter().enumerate() {
            if case.register(&tag, &shared) {
                *sync_winner.borrow_mut() = Some(i);
                break;
            }
            registered.borrow_mut().push(i);
        }
        if let Some(_winner) = *sync_winner.borrow() {
            for &i in registered.borrow().iter() {
                cases[i].unlink();
            }
            if let Some(h) = shared.borrow_mut().take() {
                sched.push_ready(h);
            }
        }
    })?;

    if let Some(i) = *sync_winner.borrow() {
        return Ok(i);
    }

    // Woken for real: exactly one registered case's tag CASed to `won`
    // and delivered its outcome. Find it, then unlink the rest (a no-op
    // for whichever of them already removed itself while delivering).
    debug_assert!(tag.is_won(), "select woke with no case reporting a win");
    let winner = registered
        .borrow()
        .iter()
        .copied()
        .find(|&i| cases[i].is_resolved())
        .expect("select woken with no registered case resolved");
    for &i in registered.borrow().iter() {
        if i != winner {
            cases[i].unlink();
        }
    }
    Ok(winner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::unbuffered::unbuffered;
    use crate::runtime::{processor, Runtime};
    use std::cell::RefCell as StdRefCell;
    use std::rc::Rc as StdRc;

    #[test]
    fn fast_path_picks_the_already_ready_case() {
        Runtime::default().run(|| {
            // `try_send` on an unbuffered channel only succeeds against an
            // already-parked receiver, so seed readiness on a buffered
            // channel instead — a one-slot buffer with a value already in
            // it is ready for `recv` without suspending.
            let empty = unbuffered::<i32>();
            let buffered = crate::channel::buffered::buffered::<i32>(1);
            buffered.try_send(7).unwrap();

            let case_empty = RecvCase::new(&empty);
            let case_buf = RecvCase::new(&buffered);

            let mut sel = Select::new();
            let idx_empty = sel.recv(&case_empty);
            let idx_buf = sel.recv(&case_buf);

            let winner = sel.wait();
            assert_eq!(winner, idx_buf);
            assert_eq!(case_buf.take(), Some(7));
            assert_ne!(winner, idx_empty);
        });
    }

    #[test]
    fn slow_path_wakes_on_a_later_send() {
        let ch = unbuffered::<&'static str>();
        let got = StdRc::new(StdRefCell::new(None));

        let ch_c = ch.clone();
        let got_c = got.clone();
        Runtime::default().run(move || {
            let ch_p = ch_c.clone();
            processor::spawn(move || {
                processor::yield_now().unwrap();
                ch_p.send("hello").unwrap();
            })
            .unwrap();

            let recv_case = RecvCase::new(&ch_c);
            let timeout_case = TimeoutCase::new(Duration::from_secs(5));
            let mut sel = Select::new();
            let recv_idx = sel.recv(&recv_case);
            let timeout_idx = sel.timeout(&timeout_case);

            let winner = sel.wait();
            assert_eq!(winner, recv_idx);
            assert_ne!(winner, timeout_idx);
            *got_c.borrow_mut() = recv_case.take();
        });

        assert_eq!(*got.borrow(), Some("hello"));
    }

    #[test]
    fn try_wait_returns_none_when_nothing_is_ready() {
        Runtime::default().run(|| {
            let ch = unbuffered::<i32>();
            let case = RecvCase::new(&ch);
            let mut sel = Select::new();
            sel.recv(&case);
            assert!(sel.try_wait().is_none());
        });
    }

    #[test]
    fn timeout_case_wins_when_nothing_else_arrives() {
        Runtime::default().run(|| {
            let ch = unbuffered::<i32>();
            let recv_case = RecvCase::new(&ch);
            let timeout_case = TimeoutCase::new(Duration::from_millis(0));
            let mut sel = Select::new();
            let recv_idx = sel.recv(&recv_case);
            let timeout_idx = sel.timeout(&timeout_case);

            let winner = sel.wait();
            assert_eq!(winner, timeout_idx);
            assert_ne!(winner, recv_idx);
        });
    }
}
