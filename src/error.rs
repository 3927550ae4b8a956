//! User-visible error taxonomy.
//!
//! Three kinds of failure exist in this runtime: user errors (calling an
//! operation outside of its contract), environmental errors (I/O and
//! poller failures), and fatal errors (stack overflow, invariant
//! violations). Only the first two are represented as values; fatal
//! errors abort the process at the point they are detected, since there
//! is no well-defined caller left to hand them to.

use std::fmt;
use std::io;

/// The kind of I/O failure observed by a non-blocking socket wrapper or
/// the event-loop poller itself.
#[derive(Debug)]
pub enum IoErrorKind {
    /// The syscall would have blocked; the caller should not see this
    /// directly; it is consumed internally to arm interest and suspend.
    WouldBlock,
    /// The coroutine's registration was torn down by another coroutine
    /// closing the underlying file descriptor.
    Cancelled,
    /// End of file / connection shutdown observed on a read.
    Eof,
    /// Any other OS-level error, carried verbatim.
    Other(io::Error),
}

impl fmt::Display for IoErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IoErrorKind::WouldBlock => write!(f, "would block"),
            IoErrorKind::Cancelled => write!(f, "registration cancelled"),
            IoErrorKind::Eof => write!(f, "end of file"),
            IoErrorKind::Other(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for IoErrorKind {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            IoErrorKind::Other(e) => Some(e),
            _ => None,
        }
    }
}

/// Errors returned by the core runtime primitives (spawn, channel
/// operations, I/O registration).
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    /// `send` was called on a channel that is already closed.
    #[error("send on a closed channel")]
    SendOnClosed,

    /// `close` was called on a channel that is already closed.
    #[error("channel already closed")]
    CloseOnClosed,

    /// A coroutine-only operation (`yield_now`, `send`, `recv`, `select`,
    /// `sleep`, I/O) was called with no coroutine currently running on
    /// this thread's scheduler.
    #[error("operation requires a running coroutine")]
    NoCoroutineContext,

    /// An I/O registration or non-blocking operation failed.
    #[error("io error: {0}")]
    Io(#[from] IoErrorKind),
}

/// Result alias used throughout the crate's public API.
pub type Result<T> = std::result::Result<T, RuntimeError>;

/// Failure returned by a blocking `recv()` on an unbuffered or buffered
/// channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum RecvError {
    /// The channel is closed and fully drained; no more values will ever
    /// arrive.
    #[error("receive on a closed and drained channel")]
    Closed,

    /// `recv` was called with no coroutine running on this thread's
    /// scheduler.
    #[error("operation requires a running coroutine")]
    NoCoroutineContext,
}

impl From<RuntimeError> for RecvError {
    fn from(e: RuntimeError) -> Self {
        match e {
            RuntimeError::NoCoroutineContext => RecvError::NoCoroutineContext,
            other => fatal(&format!("unexpected scheduler error in recv: {other}")),
        }
    }
}

/// Failure returned by the non-suspending `try_send`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TrySendError<T> {
    /// The channel is closed.
    #[error("send on a closed channel")]
    Closed(T),
    /// The channel (buffered or unbuffered) has no room for the value
    /// right now and no parked receiver to hand it to.
    #[error("channel full")]
    Full(T),
}

impl<T> TrySendError<T> {
    /// Recover the value that could not be sent.
    pub fn into_inner(self) -> T {
        match self {
            TrySendError::Closed(v) | TrySendError::Full(v) => v,
        }
    }
}

/// Failure returned by the non-suspending `try_recv`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum TryRecvError {
    /// The channel is closed and fully drained.
    #[error("receive on a closed and drained channel")]
    Closed,
    /// Nothing is available to receive right now.
    #[error("channel empty")]
    Empty,
}

/// Abort the process with a diagnostic. Used for conditions spec'd as
/// fatal: stack overflow, context-switch corruption, and debug-mode
/// invariant violations that must never be recovered from.
#[cold]
#[inline(never)]
pub fn fatal(msg: &str) -> ! {
    log::error!("fatal runtime error: {msg}");
    std::process::abort();
}
