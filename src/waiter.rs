//! Heap-allocated waiter records (spec.md §3, §9 "Heap-allocated waiter
//! records").
//!
//! A waiter outlives the stack frame that created it: a share-stack
//! coroutine's stack bytes get copied out from under it, and `select`
//! needs every case's waiter to survive independently of which one
//! ultimately wins. Both channel waiter queues and `select`'s slow path
//! share this module's types.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;
use std::sync::atomic::{AtomicU8, Ordering};

use crate::coroutine::Handle;

const UNSELECTED: u8 = 0;
const WON: u8 = 1;

/// A coroutine handle shared by every waiter record belonging to one
/// suspension. A plain `send`/`recv` only ever has one record pointing
/// at it; a `select` call has one per case (one or more channel
/// waiters plus, optionally, a timer entry), all sharing this same
/// cell so that whichever case's wakeup code runs first is the only
/// one that can ever take the handle back out.
pub(crate) type SharedHandle = Rc<RefCell<Option<Handle>>>;

pub(crate) fn shared_handle(handle: Handle) -> SharedHandle {
    Rc::new(RefCell::new(Some(handle)))
}

/// The atomic shared between every waiter record belonging to one
/// `select` call (spec.md §4.5, glossary "Select tag"). A plain
/// non-select `send`/`recv` still allocates one, sized for exactly one
/// waiter, so the pairing code never needs to distinguish the two
/// cases.
pub(crate) struct SelectTag(AtomicU8);

impl SelectTag {
    pub(crate) fn new() -> Rc<SelectTag> {
        Rc::new(SelectTag(AtomicU8::new(UNSELECTED)))
    }

    /// Claim this tag for the caller. The first caller across every
    /// waiter record sharing the tag wins; every later caller observes
    /// failure and must unlink its own waiter instead of delivering.
    pub(crate) fn try_win(&self) -> bool {
        self.0
            .compare_exchange(UNSELECTED, WON, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub(crate) fn is_won(&self) -> bool {
        self.0.load(Ordering::Acquire) == WON
    }
}

pub(crate) enum SendOutcome {
    Sent,
    Closed,
}

pub(crate) enum RecvOutcome<T> {
    Value(T),
    Closed,
}

/// A parked `send`: carries the value to deliver and the handle to wake
/// once it is taken.
pub(crate) struct SendWaiter<T> {
    pub handle: SharedHandle,
    pub value: Option<T>,
    pub tag: Rc<SelectTag>,
    pub outcome: Rc<RefCell<Option<SendOutcome>>>,
}

/// A parked `recv`: carries the slot the delivered value (or the closed
/// signal) is written into.
pub(crate) struct RecvWaiter<T> {
    pub handle: SharedHandle,
    pub tag: Rc<SelectTag>,
    pub outcome: Rc<RefCell<Option<RecvOutcome<T>>>>,
}

pub(crate) type SendWaiterRef<T> = Rc<RefCell<SendWaiter<T>>>;
pub(crate) type RecvWaiterRef<T> = Rc<RefCell<RecvWaiter<T>>>;

pub(crate) trait Tagged {
    fn tag(&self) -> &SelectTag;
}

impl<T> Tagged for SendWaiter<T> {
    fn tag(&self) -> &SelectTag {
        &self.tag
    }
}

impl<T> Tagged for RecvWaiter<T> {
    fn tag(&self) -> &SelectTag {
        &self.tag
    }
}

/// Pop the first waiter from `queue` whose tag can still be won,
/// discarding (but not waking) any already-resolved entries ahead of
/// it. A `select`'s slow path can leave losing waiters sitting in a
/// queue after another of its cases won first; this is where they get
/// swept out, preserving the FIFO order of every other waiter (spec.md
/// §5 "Ordering guarantees").
pub(crate) fn pop_live<W: Tagged>(queue: &mut VecDeque<Rc<RefCell<W>>>) -> Option<Rc<RefCell<W>>> {
    while let Some(w) = queue.pop_front() {
        if w.borrow().tag().try_win() {
            return Some(w);
        }
    }
    None
}

/// Remove `target` from `queue` by identity. Used by `select`'s slow
/// path to unlink a losing case's waiter, and by a waker to unlink a
/// waiter it is about to hand a value to (spec.md §4.5 "Cancellation",
/// §3 waiter record invariant).
pub(crate) fn unlink<W: Tagged>(queue: &mut VecDeque<Rc<RefCell<W>>>, target: &Rc<RefCell<W>>) {
    queue.retain(|w| !Rc::ptr_eq(w, target));
}
