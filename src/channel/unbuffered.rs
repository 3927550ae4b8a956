//! Typed rendezvous channels (spec.md §3, §4.4 "Unbuffered").
//!
//! `send` only returns once a `recv` has taken the value, or the
//! channel closes out from under it; there is no buffer to smooth over
//! a timing mismatch between the two sides.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use crate::error::{RecvError, RuntimeError, TryRecvError, TrySendError};
use crate::runtime::processor;
use crate::sync::spinlock::Spinlock;
use crate::waiter::{
    pop_live, unlink, RecvOutcome, RecvWaiter, RecvWaiterRef, SelectTag, SendOutcome, SendWaiter, SendWaiterRef,
};

struct Inner<T> {
    closed: bool,
    senders: VecDeque<SendWaiterRef<T>>,
    receivers: VecDeque<RecvWaiterRef<T>>,
}

/// A typed, unbuffered rendezvous channel. Cloning shares the same
/// underlying queues and state — every clone refers to the same
/// channel, mirroring a handle rather than a value.
pub struct Channel<T> {
    inner: Rc<Spinlock<Inner<T>>>,
}

impl<T> Clone for Channel<T> {
    fn clone(&self) -> Self {
        Channel {
            inner: self.inner.clone(),
        }
    }
}

/// Create a new unbuffered channel (spec.md §6 `unbuffered<T>()`).
pub fn unbuffered<T>() -> Channel<T> {
    Channel {
        inner: Rc::new(Spinlock::new(Inner {
            closed: false,
            senders: VecDeque::new(),
            receivers: VecDeque::new(),
        })),
    }
}

enum SendAttempt<T> {
    Delivered,
    Park(T),
    Closed(T),
}

enum RecvAttempt<T> {
    Value(T),
    Closed,
    Park,
}

impl<T> Channel<T> {
    /// Send `value`, suspending the calling coroutine until a receiver
    /// takes it or the channel closes.
    pub fn send(&self, value: T) -> Result<(), RuntimeError> {
        match self.try_pair_send(value) {
            SendAttempt::Delivered => Ok(()),
            SendAttempt::Park(value) => self.park_send(value),
            SendAttempt::Closed(_) => Err(RuntimeError::SendOnClosed),
        }
    }

    /// Receive a value, suspending the calling coroutine until a sender
    /// offers one or the channel closes with nothing left to deliver.
    pub fn recv(&self) -> Result<T, RecvError> {
        match self.try_pair_recv() {
            RecvAttempt::Value(v) => Ok(v),
            RecvAttempt::Closed => Err(RecvError::Closed),
            RecvAttempt::Park => self.park_recv(),
        }
    }

    /// Non-suspending send: succeeds only if a receiver is already
    /// parked to take the value directly.
    pub fn try_send(&self, value: T) -> Result<(), TrySendError<T>> {
        match self.try_pair_send(value) {
            SendAttempt::Delivered => Ok(()),
            SendAttempt::Park(value) => Err(TrySendError::Full(value)),
            SendAttempt::Closed(value) => Err(TrySendError::Closed(value)),
        }
    }

    /// Non-suspending receive: succeeds only if a sender is already
    /// parked, or the channel is closed.
    pub fn try_recv(&self) -> Result<T, TryRecvError> {
        match self.try_pair_recv() {
            RecvAttempt::Value(v) => Ok(v),
            RecvAttempt::Closed => Err(TryRecvError::Closed),
            RecvAttempt::Park => Err(TryRecvError::Empty),
        }
    }

    /// Close the channel: wakes every parked receiver with the closed
    /// signal and every parked sender with `SendOnClosed`. Double close
    /// fails with `CloseOnClosed`.
    pub fn close(&self) -> Result<(), RuntimeError> {
        processor::with_scheduler(|sched| {
            let mut inner = self.inner.lock();
            if inner.closed {
                return Err(RuntimeError::CloseOnClosed);
            }
            inner.closed = true;
            let receivers = std::mem::take(&mut inner.receivers);
            let senders = std::mem::take(&mut inner.senders);
            drop(inner);

            for w in receivers {
                if !w.borrow().tag.try_win() {
                    continue;
                }
                let mut wb = w.borrow_mut();
                *wb.outcome.borrow_mut() = Some(RecvOutcome::Closed);
                let handle = wb.handle.borrow_mut().take().expect("recv waiter missing its handle");
                drop(wb);
                sched.push_ready(handle);
            }
            for w in senders {
                if !w.borrow().tag.try_win() {
                    continue;
                }
                let mut wb = w.borrow_mut();
                *wb.outcome.borrow_mut() = Some(SendOutcome::Closed);
                let handle = wb.handle.borrow_mut().take().expect("send waiter missing its handle");
                drop(wb);
                sched.push_ready(handle);
            }
            Ok(())
        })
        .unwrap_or_else(|_| crate::error::fatal("close called with no active runtime"))
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }

    /// An unbuffered channel is never full while open and has no
    /// content to count; exposed for API symmetry with `BufferedChannel`.
    pub fn len(&self) -> usize {
        0
    }

    pub fn cap(&self) -> usize {
        0
    }

    fn try_pair_send(&self, value: T) -> SendAttempt<T> {
        processor::with_scheduler(|sched| {
            let mut inner = self.inner.lock();
            if inner.closed {
                return SendAttempt::Closed(value);
            }
            if let Some(w) = pop_live(&mut inner.receivers) {
                drop(inner);
                let mut wb = w.borrow_mut();
                *wb.outcome.borrow_mut() = Some(RecvOutcome::Value(value));
                let handle = wb.handle.borrow_mut().take().expect("recv waiter missing its handle");
                drop(wb);
                sched.push_ready(handle);
                SendAttempt::Delivered
            } else {
                SendAttempt::Park(value)
            }
        })
        .unwrap_or_else(|_| crate::error::fatal("send called with no active runtime"))
    }

    fn try_pair_recv(&self) -> RecvAttempt<T> {
        processor::with_scheduler(|sched| {
            let mut inner = self.inner.lock();
            if let Some(w) = pop_live(&mut inner.senders) {
                drop(inner);
                let mut wb = w.borrow_mut();
                let value = wb.value.take().expect("send waiter missing its value");
                *wb.outcome.borrow_mut() = Some(SendOutcome::Sent);
                let handle = wb.handle.borrow_mut().take().expect("send waiter missing its handle");
                drop(wb);
                sched.push_ready(handle);
                return RecvAttempt::Value(value);
            }
            if inner.closed {
                return RecvAttempt::Closed;
            }
            RecvAttempt::Park
        })
        .unwrap_or_else(|_| crate::error::fatal("recv called with no active runtime"))
    }

    fn park_send(&self, value: T) -> Result<(), RuntimeError> {
        let inner = self.inner.clone();
        let outcome = Rc::new(RefCell::new(None));
        let outcome_wait = outcome.clone();
        processor::park_with(move |_sched, handle| {
            let waiter: SendWaiterRef<T> = Rc::new(RefCell::new(SendWaiter {
                handle: crate::waiter::shared_handle(handle),
                value: Some(value),
                tag: SelectTag::new(),
                outcome: outcome_wait,
            }));
            inner.lock().senders.push_back(waiter);
        })?;
        let result = match outcome.borrow_mut().take() {
            Some(SendOutcome::Sent) | None => Ok(()),
            Some(SendOutcome::Closed) => Err(RuntimeError::SendOnClosed),
        };
        result
    }

    fn park_recv(&self) -> Result<T, RecvError> {
        let inner = self.inner.clone();
        let outcome = Rc::new(RefCell::new(None));
        let outcome_wait = outcome.clone();
        processor::park_with(move |_sched, handle| {
            let waiter: RecvWaiterRef<T> = Rc::new(RefCell::new(RecvWaiter {
                handle: crate::waiter::shared_handle(handle),
                tag: SelectTag::new(),
                outcome: outcome_wait,
            }));
            inner.lock().receivers.push_back(waiter);
        })?;
        let result = match outcome.borrow_mut().take() {
            Some(RecvOutcome::Value(v)) => Ok(v),
            Some(RecvOutcome::Closed) | None => Err(RecvError::Closed),
        };
        result
    }
}

/// Register this channel's receive side as one `select` case. Returns
/// `true` if it resolved immediately (the waiter's outcome is already
/// set and its tag already won); otherwise the waiter has been linked
/// onto the channel's receiver queue and must be unlinked by the caller
/// if another case wins first.
pub(crate) fn register_recv<T>(ch: &Channel<T>, waiter: RecvWaiterRef<T>) -> bool {
    let mut inner = ch.inner.lock();
    if waiter.borrow().tag.is_won() {
        // Another of this select's cases already won; don't touch the
        // senders queue at all; `pop_live` irreversibly wins whatever it
        // pops, and we have nowhere live to give that win back to.
        return false;
    }
    if let Some(w) = pop_live(&mut inner.senders) {
        if !waiter.borrow().tag.try_win() {
            // Another of this select's cases won between the check above
            // and here; hand the value straight back to the sender's
            // queue position by re-waking it without delivering, and
            // bail out.
            inner.senders.push_front(w);
            return false;
        }
        drop(inner);
        let mut wb = w.borrow_mut();
        let value = wb.value.take().expect("send waiter missing its value");
        *wb.outcome.borrow_mut() = Some(SendOutcome::Sent);
        let handle = wb.handle.borrow_mut().take();
        drop(wb);
        if let Some(handle) = handle {
            let _ = processor::with_scheduler(|sched| sched.push_ready(handle));
        }
        *waiter.borrow().outcome.borrow_mut() = Some(RecvOutcome::Value(value));
        return true;
    }
    if inner.closed {
        if !waiter.borrow().tag.try_win() {
            return false;
        }
        drop(inner);
        *waiter.borrow().outcome.borrow_mut() = Some(RecvOutcome::Closed);
        return true;
    }
    inner.receivers.push_back(waiter);
    false
}

/// Register this channel's send side as one `select` case. Same
/// contract as [`register_recv`].
pub(crate) fn register_send<T>(ch: &Channel<T>, waiter: SendWaiterRef<T>) -> bool {
    let mut inner = ch.inner.lock();
    if inner.closed {
        if !waiter.borrow().tag.try_win() {
            return false;
        }
        drop(inner);
        *waiter.borrow().outcome.borrow_mut() = Some(SendOutcome::Closed);
        return true;
    }
    if waiter.borrow().tag.is_won() {
        // Same reasoning as `register_recv`: never pop (and irreversibly
        // win) a peer we already know we can't deliver to.
        return false;
    }
    if let Some(w) = pop_live(&mut inner.receivers) {
        if !waiter.borrow().tag.try_win() {
            inner.receivers.push_front(w);
            return false;
        }
        drop(inner);
        let value = waiter.borrow_mut().value.take().expect("send waiter missing its value");
        let mut wb = w.borrow_mut();
        *wb.outcome.borrow_mut() = Some(RecvOutcome::Value(value));
        let handle = wb.handle.borrow_mut().take();
        drop(wb);
        if let Some(handle) = handle {
            let _ = processor::with_scheduler(|sched| sched.push_ready(handle));
        }
        *waiter.borrow().outcome.borrow_mut() = Some(SendOutcome::Sent);
        return true;
    }
    inner.senders.push_back(waiter);
    false
}

pub(crate) fn unlink_recv<T>(ch: &Channel<T>, waiter: &RecvWaiterRef<T>) {
    unlink(&mut ch.inner.lock().receivers, waiter);
}

pub(crate) fn unlink_send<T>(ch: &Channel<T>, waiter: &SendWaiterRef<T>) {
    unlink(&mut ch.inner.lock().senders, waiter);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::Runtime;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    fn ping_pong_rendezvous() {
        let ping = unbuffered::<&'static str>();
        let pong = unbuffered::<&'static str>();
        let log = Rc::new(RefCell::new(Vec::new()));

        let ping_c = ping.clone();
        let pong_c = pong.clone();
        let log_c = log.clone();
        Runtime::default().run(move || {
            let ping_p = ping_c.clone();
            let pong_p = pong_c.clone();
            crate::runtime::processor::spawn(move || {
                ping_p.send("ping").unwrap();
                assert_eq!(pong_p.recv().unwrap(), "pong");
            })
            .unwrap();

            assert_eq!(ping_c.recv().unwrap(), "ping");
            log_c.borrow_mut().push("consumer-got-ping");
            pong_c.send("pong").unwrap();
        });

        assert_eq!(*log.borrow(), vec!["consumer-got-ping"]);
    }

    #[test]
    fn close_wakes_all_parked_receivers() {
        let ch = unbuffered::<i32>();
        let woken = Rc::new(RefCell::new(Vec::new()));

        Runtime::default().run(move || {
            for id in 0..3 {
                let ch = ch.clone();
                let woken = woken.clone();
                crate::runtime::processor::spawn(move || {
                    let err = ch.recv().unwrap_err();
                    assert_eq!(err, RecvError::Closed);
                    woken.borrow_mut().push(id);
                })
                .unwrap();
            }
            crate::runtime::processor::yield_now().unwrap();
            ch.close().unwrap();
            assert!(matches!(ch.close().unwrap_err(), RuntimeError::CloseOnClosed));
        });
    }

    #[test]
    fn send_on_closed_fails() {
        let ch = unbuffered::<i32>();
        Runtime::default().run(move || {
            ch.close().unwrap();
            assert!(matches!(ch.send(1).unwrap_err(), RuntimeError::SendOnClosed));
        });
    }
}
