//! Non-blocking socket wrappers (spec.md §4.7 "Non-blocking socket
//! wrappers").
//!
//! Each operation loops: attempt the syscall; on would-block, suspend
//! until the registration reports `interest`; on wakeup, retry — until
//! it observes the platform's would-block condition no more, per the
//! edge-triggered contract `mio` uses on Linux. A socket registers with
//! the poller at most once over its lifetime; every later suspension
//! re-arms that same registration (see `io::poller`), and dropping the
//! socket deregisters it.

use std::cell::RefCell;
use std::io::{self, Read as _, Write as _};
use std::net::SocketAddr;
use std::rc::Rc;

use mio::Interest;

use crate::error::IoErrorKind;
use crate::io::poller::{IoOutcome, Registration};
use crate::runtime::processor;
use crate::waiter::{shared_handle, SelectTag};

fn classify(e: io::Error) -> IoErrorKind {
    if e.kind() == io::ErrorKind::WouldBlock {
        IoErrorKind::WouldBlock
    } else {
        IoErrorKind::Other(e)
    }
}

/// Suspend the calling coroutine until `source` reports `interest`,
/// registering it with the poller the first time and re-arming the same
/// registration on every later call. Returns `Err(IoErrorKind::Cancelled)`
/// if the registration was torn down (by this socket's own `Drop`) while
/// still parked, which cannot happen from a normal read/write retry loop
/// but can if the coroutine driving it is itself being unwound.
fn block_until_ready<S: mio::event::Source + ?Sized>(
    source: &mut S,
    registration: &mut Option<Registration>,
    interest: Interest,
) -> Result<(), IoErrorKind> {
    let outcome = Rc::new(RefCell::new(None));
    let outcome_wait = outcome.clone();
    processor::park_with(|sched, handle| {
        let shared = shared_handle(handle);
        let tag = SelectTag::new();
        let result = match *registration {
            Some(reg) => sched.poller().modify(source, reg, interest, shared.clone(), tag, outcome_wait),
            None => sched
                .poller()
                .register(source, interest, shared.clone(), tag, outcome_wait)
                .map(|reg| *registration = Some(reg)),
        };
        if result.is_err() {
            if let Some(h) = shared.borrow_mut().take() {
                sched.push_ready(h);
            }
        }
    })
    .unwrap_or_else(|_| crate::error::fatal("I/O wrapper used with no running coroutine"));

    let result = match outcome.borrow_mut().take() {
        Some(IoOutcome::Cancelled) => Err(IoErrorKind::Cancelled),
        _ => Ok(()),
    };
    result
}

/// Deregister `registration` (if any), waking a still-parked coroutine
/// with `IoErrorKind::Cancelled`. Called from every socket wrapper's
/// `Drop`.
fn teardown<S: mio::event::Source + ?Sized>(source: &mut S, registration: Option<Registration>) {
    let Some(registration) = registration else {
        return;
    };
    // No scheduler on this thread means the runtime has already been
    // torn down; the OS reclaims the fd and its registration together,
    // so a failed `with_scheduler` here is not an error.
    let _ = processor::with_scheduler(|sched| match sched.poller().deregister(source, registration) {
        Ok(Some(handle)) => sched.push_ready(handle),
        Ok(None) => {}
        Err(e) => log::warn!("poller deregister failed: {e}"),
    });
}

/// A non-blocking TCP listener bound to one OS thread's runtime
/// instance; `accept` suspends the calling coroutine until a connection
/// is pending.
pub struct TcpListener {
    inner: mio::net::TcpListener,
    registration: Option<Registration>,
}

impl TcpListener {
    pub fn bind(addr: SocketAddr) -> io::Result<TcpListener> {
        Ok(TcpListener {
            inner: mio::net::TcpListener::bind(addr)?,
            registration: None,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.inner.local_addr()
    }

    /// Accept one connection, suspending until one is pending.
    pub fn accept(&mut self) -> Result<(TcpStream, SocketAddr), IoErrorKind> {
        loop {
            match self.inner.accept() {
                Ok((stream, addr)) => {
                    return Ok((
                        TcpStream {
                            inner: stream,
                            registration: None,
                        },
                        addr,
                    ))
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    block_until_ready(&mut self.inner, &mut self.registration, Interest::READABLE)?;
                }
                Err(e) => return Err(classify(e)),
            }
        }
    }
}

impl Drop for TcpListener {
    fn drop(&mut self) {
        teardown(&mut self.inner, self.registration.take());
    }
}

/// A non-blocking TCP stream.
pub struct TcpStream {
    inner: mio::net::TcpStream,
    registration: Option<Registration>,
}

impl TcpStream {
    /// Connect, suspending until the handshake completes or fails.
    pub fn connect(addr: SocketAddr) -> Result<TcpStream, IoErrorKind> {
        let mut inner = mio::net::TcpStream::connect(addr).map_err(classify)?;
        let mut registration = None;
        // Any failure from here on must deregister explicitly: `inner`
        // is still a bare `mio::net::TcpStream` until it is handed back
        // wrapped in a `TcpStream`, so its `Drop` impl won't run for us.
        if let Err(e) = block_until_ready(&mut inner, &mut registration, Interest::WRITABLE) {
            teardown(&mut inner, registration);
            return Err(e);
        }
        match inner.take_error() {
            Ok(None) => Ok(TcpStream { inner, registration }),
            Ok(Some(e)) => {
                teardown(&mut inner, registration);
                Err(classify(e))
            }
            Err(e) => {
                teardown(&mut inner, registration);
                Err(classify(e))
            }
        }
    }

    /// Read into `buf`, suspending on would-block. Returns `Ok(0)` (via
    /// `IoErrorKind::Eof`) once the peer has shut down its write half.
    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize, IoErrorKind> {
        loop {
            match self.inner.read(buf) {
                Ok(0) => return Err(IoErrorKind::Eof),
                Ok(n) => return Ok(n),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    block_until_ready(&mut self.inner, &mut self.registration, Interest::READABLE)?;
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(classify(e)),
            }
        }
    }

    /// Write all of `buf`, suspending on would-block, looping until
    /// every byte is accepted by the kernel's send buffer.
    pub fn write(&mut self, mut buf: &[u8]) -> Result<usize, IoErrorKind> {
        let total = buf.len();
        while !buf.is_empty() {
            match self.inner.write(buf) {
                Ok(0) => return Err(IoErrorKind::Eof),
                Ok(n) => buf = &buf[n..],
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    block_until_ready(&mut self.inner, &mut self.registration, Interest::WRITABLE)?;
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(classify(e)),
            }
        }
        Ok(total)
    }

    pub fn shutdown(&mut self, how: std::net::Shutdown) -> Result<(), IoErrorKind> {
        self.inner.shutdown(how).map_err(classify)
    }

    pub fn peer_addr(&self) -> io::Result<SocketAddr> {
        self.inner.peer_addr()
    }
}

impl Drop for TcpStream {
    fn drop(&mut self) {
        teardown(&mut self.inner, self.registration.take());
    }
}

/// A non-blocking UDP socket (spec.md §11 supplemented feature).
pub struct UdpSocket {
    inner: mio::net::UdpSocket,
    registration: Option<Registration>,
}

impl UdpSocket {
    pub fn bind(addr: SocketAddr) -> io::Result<UdpSocket> {
        Ok(UdpSocket {
            inner: mio::net::UdpSocket::bind(addr)?,
            registration: None,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.inner.local_addr()
    }

    pub fn send_to(&mut self, buf: &[u8], target: SocketAddr) -> Result<usize, IoErrorKind> {
        loop {
            match self.inner.send_to(buf, target) {
                Ok(n) => return Ok(n),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    block_until_ready(&mut self.inner, &mut self.registration, Interest::WRITABLE)?;
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(classify(e)),
            }
        }
    }

    pub fn recv_from(&mut self, buf: &mut [u8]) -> Result<(usize, SocketAddr), IoErrorKind> {
        loop {
            match self.inner.recv_from(buf) {
                Ok(result) => return Ok(result),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    block_until_ready(&mut self.inner, &mut self.registration, Interest::READABLE)?;
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(classify(e)),
            }
        }
    }
}

impl Drop for UdpSocket {
    fn drop(&mut self) {
        teardown(&mut self.inner, self.registration.take());
    }
}
