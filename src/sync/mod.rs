//! Synchronization primitives: spinlocks/ticket/RW locks and lock-free
//! bounded queues (spec.md §2 component 4).

pub mod queue;
pub mod spinlock;
