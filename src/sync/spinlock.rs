//! Spinlocks and a ticket-ordered read-write lock.
//!
//! These are the locks that guard channel waiter queues, buffer state,
//! and the select-tag CAS site (spec.md §5 "Lock discipline"). Within a
//! single runtime instance they are never contended across cores — the
//! runtime is single-threaded per instance — but they are implemented
//! as real spinlocks so the same code stays correct if a future
//! multi-threaded runtime shares these structures, and so that
//! signal-handler-like reentrancy against the same thread is still
//! mutually exclusive. They must never be held across a context switch;
//! callers that violate this trip the `debug_assert!` in
//! [`assert_no_lock_held_across_switch`].

use std::cell::{Cell, UnsafeCell};
use std::hint;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

thread_local! {
    static HELD: Cell<u32> = const { Cell::new(0) };
}

fn enter_critical_section() {
    HELD.with(|h| h.set(h.get() + 1));
}

fn leave_critical_section() {
    HELD.with(|h| h.set(h.get() - 1));
}

/// Panics in debug builds if the current coroutine is about to switch
/// out while still holding one of this module's locks. Called from
/// `crate::coroutine::switch_out` on every suspension point (spec.md §5
/// "Lock discipline").
pub(crate) fn assert_no_lock_held_across_switch() {
    debug_assert_eq!(
        HELD.with(|h| h.get()),
        0,
        "a spinlock-guarded section is still held across a context switch"
    );
}

/// A test-and-test-and-set spinlock.
pub struct Spinlock<T> {
    locked: AtomicBool,
    data: UnsafeCell<T>,
}

unsafe impl<T: Send> Send for Spinlock<T> {}
unsafe impl<T: Send> Sync for Spinlock<T> {}

impl<T> Spinlock<T> {
    pub const fn new(value: T) -> Self {
        Spinlock {
            locked: AtomicBool::new(false),
            data: UnsafeCell::new(value),
        }
    }

    pub fn lock(&self) -> SpinlockGuard<'_, T> {
        loop {
            if !self.locked.swap(true, Ordering::Acquire) {
                enter_critical_section();
                return SpinlockGuard { lock: self };
            }
            while self.locked.load(Ordering::Relaxed) {
                hint::spin_loop();
            }
        }
    }

    /// Non-blocking acquire, used on the select fast path where a
    /// suspend is never acceptable.
    pub fn try_lock(&self) -> Option<SpinlockGuard<'_, T>> {
        if !self.locked.swap(true, Ordering::Acquire) {
            enter_critical_section();
            Some(SpinlockGuard { lock: self })
        } else {
            None
        }
    }

    pub fn get_mut(&mut self) -> &mut T {
        self.data.get_mut()
    }
}

pub struct SpinlockGuard<'a, T> {
    lock: &'a Spinlock<T>,
}

impl<T> Deref for SpinlockGuard<'_, T> {
    type Target = T;
    fn deref(&self) -> &T {
        unsafe { &*self.lock.data.get() }
    }
}

impl<T> DerefMut for SpinlockGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.lock.data.get() }
    }
}

impl<T> Drop for SpinlockGuard<'_, T> {
    fn drop(&mut self) {
        self.lock.locked.store(false, Ordering::Release);
        leave_critical_section();
    }
}

/// A FIFO ticket lock: acquires are served strictly in arrival order,
/// unlike the plain spinlock above which admits starvation under
/// contention. Used where `select`'s fairness guarantees would
/// otherwise be undermined by lock-acquisition order.
pub struct TicketLock<T> {
    next_ticket: AtomicUsize,
    now_serving: AtomicUsize,
    data: UnsafeCell<T>,
}

unsafe impl<T: Send> Send for TicketLock<T> {}
unsafe impl<T: Send> Sync for TicketLock<T> {}

impl<T> TicketLock<T> {
    pub const fn new(value: T) -> Self {
        TicketLock {
            next_ticket: AtomicUsize::new(0),
            now_serving: AtomicUsize::new(0),
            data: UnsafeCell::new(value),
        }
    }

    pub fn lock(&self) -> TicketGuard<'_, T> {
        let my_ticket = self.next_ticket.fetch_add(1, Ordering::Relaxed);
        while self.now_serving.load(Ordering::Acquire) != my_ticket {
            hint::spin_loop();
        }
        enter_critical_section();
        TicketGuard {
            lock: self,
            ticket: my_ticket,
        }
    }
}

pub struct TicketGuard<'a, T> {
    lock: &'a TicketLock<T>,
    ticket: usize,
}

impl<T> Deref for TicketGuard<'_, T> {
    type Target = T;
    fn deref(&self) -> &T {
        unsafe { &*self.lock.data.get() }
    }
}

impl<T> DerefMut for TicketGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.lock.data.get() }
    }
}

impl<T> Drop for TicketGuard<'_, T> {
    fn drop(&mut self) {
        self.lock.now_serving.store(self.ticket + 1, Ordering::Release);
        leave_critical_section();
    }
}

/// A reader-writer spinlock: any number of concurrent readers, or
/// exactly one writer, never both. Writers are given priority over new
/// readers to avoid writer starvation.
pub struct RwSpinlock<T> {
    // Even = unlocked or N readers (state/2 readers held).
    // Odd = a writer holds or is waiting for, the lock.
    state: AtomicUsize,
    data: UnsafeCell<T>,
}

const WRITER_BIT: usize = 1;
const READER_STEP: usize = 2;

unsafe impl<T: Send> Send for RwSpinlock<T> {}
unsafe impl<T: Send + Sync> Sync for RwSpinlock<T> {}

impl<T> RwSpinlock<T> {
    pub const fn new(value: T) -> Self {
        RwSpinlock {
            state: AtomicUsize::new(0),
            data: UnsafeCell::new(value),
        }
    }

    pub fn read(&self) -> RwSpinlockReadGuard<'_, T> {
        loop {
            let s = self.state.load(Ordering::Relaxed);
            if s & WRITER_BIT == 0
                && self
                    .state
                    .compare_exchange_weak(s, s + READER_STEP, Ordering::Acquire, Ordering::Relaxed)
                    .is_ok()
            {
                enter_critical_section();
                return RwSpinlockReadGuard { lock: self };
            }
            hint::spin_loop();
        }
    }

    pub fn write(&self) -> RwSpinlockWriteGuard<'_, T> {
        loop {
            if self
                .state
                .compare_exchange_weak(0, WRITER_BIT, Ordering::Acquire, Ordering::Relaxed)
                .is_ok()
            {
                enter_critical_section();
                return RwSpinlockWriteGuard { lock: self };
            }
            hint::spin_loop();
        }
    }
}

pub struct RwSpinlockReadGuard<'a, T> {
    lock: &'a RwSpinlock<T>,
}

impl<T> Deref for RwSpinlockReadGuard<'_, T> {
    type Target = T;
    fn deref(&self) -> &T {
        unsafe { &*self.lock.data.get() }
    }
}

impl<T> Drop for RwSpinlockReadGuard<'_, T> {
    fn drop(&mut self) {
        self.lock.state.fetch_sub(READER_STEP, Ordering::Release);
        leave_critical_section();
    }
}

pub struct RwSpinlockWriteGuard<'a, T> {
    lock: &'a RwSpinlock<T>,
}

impl<T> Deref for RwSpinlockWriteGuard<'_, T> {
    type Target = T;
    fn deref(&self) -> &T {
        unsafe { &*self.lock.data.get() }
    }
}

impl<T> DerefMut for RwSpinlockWriteGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.lock.data.get() }
    }
}

impl<T> Drop for RwSpinlockWriteGuard<'_, T> {
    fn drop(&mut self) {
        self.lock.state.store(0, Ordering::Release);
        leave_critical_section();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn spinlock_mutual_exclusion() {
        let lock = Arc::new(Spinlock::new(0usize));
        let mut handles = Vec::new();
        for _ in 0..8 {
            let lock = lock.clone();
            handles.push(thread::spawn(move || {
                for _ in 0..1000 {
                    *lock.lock() += 1;
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(*lock.lock(), 8000);
    }

    #[test]
    fn ticket_lock_fifo_progress() {
        let lock = Arc::new(TicketLock::new(Vec::new()));
        let mut handles = Vec::new();
        for i in 0..4 {
            let lock = lock.clone();
            handles.push(thread::spawn(move || {
                lock.lock().push(i);
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(lock.lock().len(), 4);
    }

    #[test]
    fn rw_spinlock_allows_concurrent_reads() {
        let lock = RwSpinlock::new(5);
        let a = lock.read();
        let b = lock.read();
        assert_eq!(*a, 5);
        assert_eq!(*b, 5);
    }
}
