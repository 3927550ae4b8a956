//! Stack allocation strategies.
//!
//! A runtime instance picks exactly one of `Dedicated` or `Shared` at
//! `Runtime::new` (spec.md §4.1) and never mixes them. Both strategies
//! install a guard page below the usable region so a stack overflow
//! faults immediately instead of silently corrupting adjacent memory.

use context::stack::{ProtectedFixedSizeStack, StackError};

use crate::error;
use crate::options::{MAX_STACK_SIZE, MIN_STACK_SIZE};

/// A dedicated, guarded stack owned by exactly one coroutine for its
/// whole lifetime.
pub struct DedicatedStack {
    inner: ProtectedFixedSizeStack,
}

impl DedicatedStack {
    pub fn new(size: usize) -> DedicatedStack {
        let size = size.clamp(MIN_STACK_SIZE, MAX_STACK_SIZE);
        match ProtectedFixedSizeStack::new(size) {
            Ok(inner) => DedicatedStack { inner },
            Err(StackError::ExceedsMaximumSize(_)) => {
                error::fatal("requested stack size exceeds the platform maximum")
            }
            Err(_) => error::fatal("failed to allocate a guarded coroutine stack"),
        }
    }

    pub fn context_stack(&self) -> &ProtectedFixedSizeStack {
        &self.inner
    }

    pub fn len(&self) -> usize {
        stack_len(&self.inner)
    }
}

fn stack_len(s: &ProtectedFixedSizeStack) -> usize {
    s.top() as usize - s.bottom() as usize
}

/// A physical stack region shared by every coroutine using
/// `StackStrategy::Shared`. Only one coroutine's bytes live on the
/// physical stack at a time; the rest are parked in their own save
/// buffers. Copies cover the whole physical region rather than a
/// precise high-water mark — correct, since an over-copy is always a
/// superset of the live bytes, but not the tightest possible bound.
pub struct SharedStackPool {
    physical: ProtectedFixedSizeStack,
}

impl SharedStackPool {
    pub fn new(size: usize) -> SharedStackPool {
        let size = size.clamp(MIN_STACK_SIZE, MAX_STACK_SIZE);
        match ProtectedFixedSizeStack::new(size) {
            Ok(inner) => SharedStackPool { physical: inner },
            Err(_) => error::fatal("failed to allocate the shared coroutine stack"),
        }
    }

    pub fn context_stack(&self) -> &ProtectedFixedSizeStack {
        &self.physical
    }

    pub fn len(&self) -> usize {
        stack_len(&self.physical)
    }

    fn base_ptr(&self) -> *mut u8 {
        // `Stack::bottom()` is the lowest usable address (the guard page
        // sits below it); that's also the start of the live region we
        // save/restore, since stacks grow down from `top()`.
        self.physical.bottom() as *mut u8
    }

    /// Copy the whole physical stack into `save`, growing it if needed.
    /// Called right before switching away from a share-stack coroutine.
    pub fn save_into(&self, save: &mut Vec<u8>) {
        let len = self.len();
        save.clear();
        save.resize(len, 0);
        unsafe {
            std::ptr::copy_nonoverlapping(self.base_ptr(), save.as_mut_ptr(), len);
        }
    }

    /// Copy a previously saved image back onto the physical stack.
    /// Called right before switching into a share-stack coroutine that
    /// has run before. A coroutine running for the first time has no
    /// saved image and this is skipped.
    pub fn restore_from(&self, save: &[u8]) {
        if save.is_empty() {
            return;
        }
        debug_assert_eq!(save.len(), self.len(), "saved share-stack image size mismatch");
        unsafe {
            std::ptr::copy_nonoverlapping(save.as_ptr(), self.base_ptr(), save.len());
        }
    }
}

/// Per-coroutine save buffer for the share-stack strategy. Empty until
/// the coroutine has been switched away from at least once.
#[derive(Default)]
pub struct ShareStackImage {
    pub bytes: Vec<u8>,
}
