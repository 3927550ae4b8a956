//! The readiness-based event loop (spec.md §2 component 8, §4.7 "Event
//! loop").
//!
//! Wraps `mio`'s platform multiplexer (epoll / kqueue / IOCP-equivalent,
//! chosen automatically by `mio` itself) behind the
//! `register/modify/deregister/poll` contract the scheduler drives when
//! the ready queue is empty.
//!
//! A registration is established once per socket and kept for the
//! socket's whole lifetime: re-suspending on the same fd re-arms the
//! existing registration through `modify` instead of registering it a
//! second time (`mio` rejects a double `register` on one source with
//! `AlreadyExists`). The socket wrapper is responsible for calling
//! `deregister` exactly once, when it is done with the fd (see
//! `io::net`'s `Drop` impls), which is also the point at which a
//! coroutine still parked on it — because another coroutine tore the fd
//! down first — is woken with `IoOutcome::Cancelled`.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::io;
use std::rc::Rc;
use std::time::Duration;

use mio::{Events, Interest, Token};
use slab::Slab;

use crate::coroutine::Handle;
use crate::waiter::{SelectTag, SharedHandle};

/// What woke a parked I/O registration: genuine readiness, or the
/// registration being torn down out from under it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum IoOutcome {
    Ready,
    Cancelled,
}

struct Waiting {
    handle: SharedHandle,
    tag: Rc<SelectTag>,
    outcome: Rc<RefCell<Option<IoOutcome>>>,
}

/// A registration slot, stable for the lifetime of the socket that owns
/// it. Holds a `Waiting` only while a coroutine is actually parked on
/// it; between suspensions (or before the first one) the slot is
/// occupied but empty, which is what lets `modify` re-arm it without
/// ever calling `registry().register()` twice on the same source.
enum Slot {
    Empty,
    Parked(Waiting),
}

/// An active interest registration. Returned by `register`, consumed by
/// `deregister`, re-armed by `modify`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Registration(Token);

pub struct Poller {
    poll: mio::Poll,
    events: Events,
    slots: Slab<Slot>,
}

impl Poller {
    pub fn new() -> io::Result<Poller> {
        Ok(Poller {
            poll: mio::Poll::new()?,
            events: Events::with_capacity(256),
            slots: Slab::new(),
        })
    }

    pub fn has_registrations(&self) -> bool {
        !self.slots.is_empty()
    }

    /// Register `source` for `interest` for the first time, parking
    /// `handle` (inside `tag`'s select case) until it fires or is
    /// cancelled. The returned `Registration` must be kept by the
    /// caller and passed to `modify` on every later suspension on the
    /// same source, and to `deregister` exactly once when done.
    pub(crate) fn register<S: mio::event::Source + ?Sized>(
        &mut self,
        source: &mut S,
        interest: Interest,
        handle: SharedHandle,
        tag: Rc<SelectTag>,
        outcome: Rc<RefCell<Option<IoOutcome>>>,
    ) -> io::Result<Registration> {
        let entry = self.slots.vacant_entry();
        let token = Token(entry.key());
        self.poll.registry().register(source, token, interest)?;
        entry.insert(Slot::Parked(Waiting { handle, tag, outcome }));
        Ok(Registration(token))
    }

    /// Re-arm an existing registration for another suspension: changes
    /// its interest set via `reregister` and replaces the parked waiter.
    /// Never touches the registry's token table, so a socket that
    /// suspends repeatedly keeps exactly one registration for its whole
    /// lifetime (spec.md §8 scenario 6's "one registration per
    /// connection" bound).
    pub(crate) fn modify<S: mio::event::Source + ?Sized>(
        &mut self,
        source: &mut S,
        registration: Registration,
        interest: Interest,
        handle: SharedHandle,
        tag: Rc<SelectTag>,
        outcome: Rc<RefCell<Option<IoOutcome>>>,
    ) -> io::Result<()> {
        self.poll.registry().reregister(source, registration.0, interest)?;
        if let Some(slot) = self.slots.get_mut(registration.0 .0) {
            *slot = Slot::Parked(Waiting { handle, tag, outcome });
        }
        Ok(())
    }

    /// Tear down a registration: remove it from the OS poller and the
    /// slot table. If a coroutine is still parked on it (the fd is being
    /// closed by something other than its own last wakeup), wake it with
    /// `IoOutcome::Cancelled` (spec.md §4.7 "Coroutines suspended on a
    /// registration whose fd is closed by another coroutine are woken
    /// with `IoError{Cancelled}`).
    pub(crate) fn deregister<S: mio::event::Source + ?Sized>(
        &mut self,
        source: &mut S,
        registration: Registration,
    ) -> io::Result<Option<Handle>> {
        let slot = self.slots.try_remove(registration.0 .0);
        self.poll.registry().deregister(source)?;
        Ok(slot.and_then(|s| wake_cancelled(s)))
    }

    /// Block for up to `timeout` (or indefinitely if `None`) waiting for
    /// readiness, pushing every woken handle onto `ready`. A
    /// registration with nobody currently parked on it (the socket has
    /// not suspended again since its last wakeup) simply has its event
    /// ignored — the slot stays put until the socket re-arms or
    /// deregisters it.
    pub fn poll(&mut self, timeout: Option<Duration>, ready: &mut VecDeque<Handle>) -> io::Result<()> {
        self.events.clear();
        match self.poll.poll(&mut self.events, timeout) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::Interrupted => return Ok(()),
            Err(e) => return Err(e),
        }
        for event in self.events.iter() {
            if let Some(slot) = self.slots.get_mut(event.token().0) {
                if let Slot::Parked(waiting) = slot {
                    if waiting.tag.try_win() {
                        *waiting.outcome.borrow_mut() = Some(IoOutcome::Ready);
                        if let Some(handle) = waiting.handle.borrow_mut().take() {
                            ready.push_back(handle);
                        }
                    }
                    *slot = Slot::Empty;
                }
            }
        }
        Ok(())
    }
}

fn wake_cancelled(slot: Slot) -> Option<Handle> {
    let Slot::Parked(waiting) = slot else {
        return None;
    };
    if waiting.tag.try_win() {
        *waiting.outcome.borrow_mut() = Some(IoOutcome::Cancelled);
        waiting.handle.borrow_mut().take()
    } else {
        None
    }
}
