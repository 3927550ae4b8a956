//! Bounded-buffer channels (spec.md §3 `BufferedChannel<T>`, §4.4
//! "Buffered").
//!
//! The same waiter-queue shape as [`crate::channel::unbuffered`], plus a
//! ring buffer of capacity N. The priority ordering on `send`/`recv` is
//! what keeps the three invariants (`receivers` non-empty ⇒ buffer
//! empty; `senders` non-empty ⇒ buffer full; `0 ≤ buffer.len ≤ N`) true
//! at every observable point.

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
    capacity: usize,
    buffer: VecDeque<T>,
    senders: VecDeque<SendWaiterRef<T>>,
    receivers: VecDeque<RecvWaiterRef<T>>,
}

/// A bounded FIFO channel with capacity `N ≥ 1`. Like [`super::unbuffered::Channel`],
/// cloning shares the same underlying state.
pub struct BufferedChannel<T> {
    inner: Rc<Spinlock<Inner<T>>>,
}

impl<T> Clone for BufferedChannel<T> {
    fn clone(&self) -> Self {
        BufferedChannel {
            inner: self.inner.clone(),
        }
    }
}

/// Create a new buffered channel (spec.md §6 `buffered<T>(cap)`).
/// `capacity` is clamped up to 1: a zero-capacity buffered channel has
/// no useful distinction from an unbuffered one, so this constructor
/// avoids the degenerate case instead of rejecting it.
pub fn buffered<T>(capacity: usize) -> BufferedChannel<T> {
    BufferedChannel {
        inner: Rc::new(Spinlock::new(Inner {
            closed: false,
            capacity: capacity.max(1),
            buffer: VecDeque::new(),
            senders: VecDeque::new(),
            receivers: VecDeque::new(),
        })),
    }
}

enum SendAttempt<T> {
    Delivered,
    Buffered,
    Park(T),
    Closed(T),
}

enum RecvAttempt<T> {
    Value(T),
    Closed,
    Park,
}

impl<T> BufferedChannel<T> {
    pub fn send(&self, value: T) -> Result<(), RuntimeError> {
        match self.try_pair_send(value) {
            SendAttempt::Delivered | SendAttempt::Buffered => Ok(()),
            SendAttempt::Park(value) => self.park_send(value),
            SendAttempt::Closed(_) => Err(RuntimeError::SendOnClosed),
        }
    }

    pub fn recv(&self) -> Result<T, RecvError> {
        match self.try_pair_recv() {
            RecvAttempt::Value(v) => Ok(v),
            RecvAttempt::Closed => Err(RecvError::Closed),
            RecvAttempt::Park => self.park_recv(),
        }
    }

    pub fn try_send(&self, value: T) -> Result<(), TrySendError<T>> {
        match self.try_pair_send(value) {
            SendAttempt::Delivered | SendAttempt::Buffered => Ok(()),
            SendAttempt::Park(value) => Err(TrySendError::Full(value)),
            SendAttempt::Closed(value) => Err(TrySendError::Closed(value)),
        }
    }

    pub fn try_recv(&self) -> Result<T, TryRecvError> {
        match self.try_pair_recv() {
            RecvAttempt::Value(v) => Ok(v),
            RecvAttempt::Closed => Err(TryRecvError::Closed),
            RecvAttempt::Park => Err(TryRecvError::Empty),
        }
    }

    /// Close the channel. Receivers drain whatever remains buffered
    /// before observing the closed signal (spec.md §4.4 "Close");
    /// parked senders are woken with `SendOnClosed` since there is no
    /// more room being promised to them.
    pub fn close(&self) -> Result<(), RuntimeError> {
        processor::with_scheduler(|sched| {
            let mut inner = self.inner.lock();
            if inner.closed {
                return Err(RuntimeError::CloseOnClosed);
            }
            inner.closed = true;

            // Parked receivers only exist while the buffer is empty
            // (the invariant in spec.md §3), so they can be woken with
            // the closed signal directly — there is nothing left to
            // hand them.
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

    pub fn len(&self) -> usize {
        self.inner.lock().buffer.len()
    }

    pub fn cap(&self) -> usize {
        self.inner.lock().capacity
    }

    /// `send`'s priority order (spec.md §4.4 "Buffered"): hand directly
    /// to a parked receiver if the buffer is empty, else enqueue if
    /// there's room, else park.
    fn try_pair_send(&self, value: T) -> SendAttempt<T> {
        processor::with_scheduler(|sched| {
            let mut inner = self.inner.lock();
            if inner.closed {
                return SendAttempt::Closed(value);
            }
            if inner.buffer.is_empty() {
                if let Some(w) = pop_live(&mut inner.receivers) {
                    drop(inner);
                    let mut wb = w.borrow_mut();
                    *wb.outcome.borrow_mut() = Some(RecvOutcome::Value(value));
                    let handle = wb.handle.borrow_mut().take().expect("recv waiter missing its handle");
                    drop(wb);
                    sched.push_ready(handle);
                    return SendAttempt::Delivered;
                }
            }
            if inner.buffer.len() < inner.capacity {
                inner.buffer.push_back(value);
                return SendAttempt::Buffered;
            }
            SendAttempt::Park(value)
        })
        .unwrap_or_else(|_| crate::error::fatal("send called with no active runtime"))
    }

    /// `recv`'s priority order (spec.md §4.4 "Buffered"): take the
    /// buffer head if any; if that frees a slot, feed it from a parked
    /// sender; else if the buffer is empty, pair directly with a parked
    /// sender; else park.
    fn try_pair_recv(&self) -> RecvAttempt<T> {
        processor::with_scheduler(|sched| {
            let mut inner = self.inner.lock();
            if let Some(value) = inner.buffer.pop_front() {
                if let Some(w) = pop_live(&mut inner.senders) {
                    let mut wb = w.borrow_mut();
                    let next = wb.value.take().expect("send waiter missing its value");
                    inner.buffer.push_back(next);
                    *wb.outcome.borrow_mut() = Some(SendOutcome::Sent);
                    let handle = wb.handle.borrow_mut().take().expect("send waiter missing its handle");
                    drop(wb);
                    sched.push_ready(handle);
                }
                return RecvAttempt::Value(value);
            }
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

pub(crate) fn register_recv<T>(ch: &BufferedChannel<T>, waiter: RecvWaiterRef<T>) -> bool {
    let mut inner = ch.inner.lock();
    if let Some(value) = inner.buffer.pop_front() {
        if !waiter.borrow().tag.try_win() {
            inner.buffer.push_front(value);
            return false;
        }
        let woken_sender = pop_live(&mut inner.senders).map(|w| {
            let mut wb = w.borrow_mut();
            let next = wb.value.take().expect("send waiter missing its value");
            inner.buffer.push_back(next);
            *wb.outcome.borrow_mut() = Some(SendOutcome::Sent);
            let handle = wb.handle.borrow_mut().take();
            handle
        });
        drop(inner);
        if let Some(Some(handle)) = woken_sender {
            let _ = processor::with_scheduler(|sched| sched.push_ready(handle));
        }
        *waiter.borrow().outcome.borrow_mut() = Some(RecvOutcome::Value(value));
        return true;
    }
    if waiter.borrow().tag.is_won() {
        // Another of this select's cases already won; don't touch the
        // senders queue at all; `pop_live` irreversibly wins whatever it
        // pops, and we have nowhere live to give that win back to.
        return false;
    }
    if let Some(w) = pop_live(&mut inner.senders) {
        if !waiter.borrow().tag.try_win() {
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
pub(crate) fn register_send<T>(ch: &BufferedChannel<T>, waiter: SendWaiterRef<T>) -> bool {
    let mut inner = ch.inner.lock();
    if inner.closed {
        if !waiter.borrow().tag.try_win() {
            return false;
        }
        drop(inner);
        *waiter.borrow().outcome.borrow_mut() = Some(SendOutcome::Closed);
        return true;
    }
    if inner.buffer.is_empty() {
        if waiter.borrow().tag.is_won() {
            // Same reasoning as `register_recv`: never pop (and
            // irreversibly win) a peer we already know we can't deliver
            // to.
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
    }
    if inner.buffer.len() < inner.capacity {
        if !waiter.borrow().tag.try_win() {
            return false;
        }
        let value = waiter.borrow_mut().value.take().expect("send waiter missing its value");
        inner.buffer.push_back(value);
        drop(inner);
        *waiter.borrow().outcome.borrow_mut() = Some(SendOutcome::Sent);
        return true;
    }
    inner.senders.push_back(waiter);
    false
}

pub(crate) fn unlink_recv<T>(ch: &BufferedChannel<T>, waiter: &RecvWaiterRef<T>) {
    unlink(&mut ch.inner.lock().receivers, waiter);
}

pub(crate) fn unlink_send<T>(ch: &BufferedChannel<T>, waiter: &SendWaiterRef<T>) {
    unlink(&mut ch.inner.lock().senders, waiter);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::Runtime;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    fn producer_consumer_sums_to_500500() {
        let ch = buffered::<i64>(4);
        let sum = Rc::new(RefCell::new(0i64));

        let ch_producer = ch.clone();
        let ch_consumer = ch.clone();
        let sum_consumer = sum.clone();
        Runtime::default().run(move || {
            crate::runtime::processor::spawn(move || {
                for i in 1..=1000i64 {
                    ch_producer.send(i).unwrap();
                }
                ch_producer.close().unwrap();
            })
            .unwrap();

            loop {
                match ch_consumer.recv() {
                    Ok(v) => *sum_consumer.borrow_mut() += v,
                    Err(RecvError::Closed) => break,
                    Err(e) => panic!("unexpected recv error: {e:?}"),
                }
            }
        });

        assert_eq!(*sum.borrow(), 500_500);
        assert!(ch.is_closed());
    }

    #[test]
    fn capacity_one_blocks_producer_until_drained() {
        let ch = buffered::<i32>(1);
        let order = Rc::new(RefCell::new(Vec::new()));

        let ch_p = ch.clone();
        let order_p = order.clone();
        Runtime::default().run(move || {
            crate::runtime::processor::spawn(move || {
                ch_p.send(1).unwrap();
                order_p.borrow_mut().push("sent-1");
                ch_p.send(2).unwrap();
                order_p.borrow_mut().push("sent-2");
            })
            .unwrap();

            crate::runtime::processor::yield_now().unwrap();
            assert_eq!(*order.borrow(), vec!["sent-1"]);
            assert_eq!(ch.recv().unwrap(), 1);
            assert_eq!(ch.recv().unwrap(), 2);
        });
    }
}
