//! Monotonic deadline-based wakeups (spec.md §3 "Timer entry", §4.6
//! "Timers").
//!
//! `sleep(d)` and `select`'s `timeout(d)` case both register an entry
//! here; `after(d)` wraps the same mechanism behind a channel-shaped
//! API that keeps reporting ready once it has fired.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::rc::Rc;
use std::time::{Duration, Instant};

use crate::error::RuntimeError;
use crate::runtime::processor;
use crate::waiter::{shared_handle, SelectTag, SharedHandle};

struct Entry {
    deadline: Instant,
    seq: u64,
    handle: SharedHandle,
    tag: Rc<SelectTag>,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.seq == other.seq
    }
}
impl Eq for Entry {}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed so `BinaryHeap` (a max-heap) behaves as a min-heap
        // keyed by deadline, ties broken by insertion order (spec.md
        // §4.3 "Timer ties broken by insertion order").
        other
            .deadline
            .cmp(&self.deadline)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// Min-heap of pending timer entries, keyed by absolute deadline.
pub struct TimerHeap {
    heap: BinaryHeap<Entry>,
    next_seq: u64,
}

impl TimerHeap {
    pub fn new() -> TimerHeap {
        TimerHeap {
            heap: BinaryHeap::new(),
            next_seq: 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// The soonest deadline still pending, if any.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.heap.peek().map(|e| e.deadline)
    }

    pub(crate) fn push(&mut self, deadline: Instant, handle: SharedHandle, tag: Rc<SelectTag>) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(Entry {
            deadline,
            seq,
            handle,
            tag,
        });
    }

    /// Pop every entry whose deadline has passed and return the
    /// coroutine handles to re-ready. An entry whose tag was already
    /// won by another case (a `select` timeout racing a channel
    /// pairing) contributes no handle — its slot was emptied by
    /// whoever won it.
    pub fn drain_expired(&mut self) -> Vec<crate::coroutine::Handle> {
        let now = Instant::now();
        let mut woken = Vec::new();
        while let Some(top) = self.heap.peek() {
            if top.deadline > now {
                break;
            }
            let entry = self.heap.pop().expect("heap peeked Some but pop failed");
            if entry.tag.try_win() {
                if let Some(handle) = entry.handle.borrow_mut().take() {
                    woken.push(handle);
                }
            }
        }
        woken
    }
}

impl Default for TimerHeap {
    fn default() -> Self {
        TimerHeap::new()
    }
}

/// Suspend the calling coroutine until `deadline`. Returns immediately
/// (without suspending) if `deadline` has already passed.
pub(crate) fn sleep_until(deadline: Instant) -> Result<(), RuntimeError> {
    if Instant::now() >= deadline {
        return Ok(());
    }
    processor::park_with(move |sched, handle| {
        sched.timers().push(deadline, shared_handle(handle), SelectTag::new());
    })
}

/// Suspend the calling coroutine for `d` (spec.md §4.6 `sleep(d)`).
pub fn sleep(d: Duration) -> Result<(), RuntimeError> {
    sleep_until(Instant::now() + d)
}

/// A receive-only value that becomes ready at `now + d` and stays ready
/// for every subsequent receive (spec.md §4.6 `after(d)`).
#[derive(Clone, Copy)]
pub struct TimerChannel {
    deadline: Instant,
}

/// Create a timer channel firing at `now + d` (spec.md §6 `after(d)`).
pub fn after(d: Duration) -> TimerChannel {
    TimerChannel {
        deadline: Instant::now() + d,
    }
}

impl TimerChannel {
    /// Receive the fire time, suspending until the deadline passes if it
    /// hasn't already.
    pub fn recv(&self) -> Result<Instant, RuntimeError> {
        sleep_until(self.deadline)?;
        Ok(self.deadline)
    }

    /// Non-suspending receive: ready only once the deadline has passed.
    pub fn try_recv(&self) -> Option<Instant> {
        if Instant::now() >= self.deadline {
            Some(self.deadline)
        } else {
            None
        }
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    pub(crate) fn register(&self, tag: Rc<SelectTag>, handle: SharedHandle) -> bool {
        if Instant::now() >= self.deadline {
            return tag.try_win();
        }
        let _ = processor::with_scheduler(|sched| {
            sched.timers().push(self.deadline, handle, tag);
        });
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::Runtime;

    #[test]
    fn zero_duration_sleep_fires_next_iteration() {
        Runtime::default().run(|| {
            sleep(Duration::from_millis(0)).unwrap();
        });
    }

    #[test]
    fn after_reports_ready_on_every_subsequent_recv() {
        Runtime::default().run(|| {
            let t = after(Duration::from_millis(0));
            t.recv().unwrap();
            assert!(t.try_recv().is_some());
            assert!(t.try_recv().is_some());
        });
    }
}
