// The MIT License (MIT)

// Copyright (c) 2015 Y. T. Chung <zonyitoo@gmail.com>

// Permission is hereby granted, free of charge, to any person obtaining a copy of
// this software and associated documentation files (the "Software"), to deal in
// the Software without restriction, including without limitation the rights to
// use, copy, modify, merge, publish, distribute, sublicense, and/or sell copies of
// the Software, and to permit persons to whom the Software is furnished to do so,
// subject to the following conditions:

// The above copyright notice and this permission notice shall be included in all
// copies or substantial portions of the Software.

// THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
// IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY, FITNESS
// FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE AUTHORS OR
// COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER LIABILITY, WHETHER
// IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING FROM, OUT OF OR IN
// CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS IN THE SOFTWARE.

//! A cooperative M:1 coroutine runtime: one OS thread drives many
//! stackful coroutines through an explicit scheduler, with typed
//! rendezvous/buffered channels, a two-phase `select`, monotonic
//! timers, and a readiness-based non-blocking I/O layer built on `mio`.
//!
//! Start with a [`Runtime`]:
//!
//! ```ignore
//! use arsenal_rt::Runtime;
//! use arsenal_rt::channel::unbuffered;
//!
//! let ch = unbuffered::<i32>();
//! let ch2 = ch.clone();
//! Runtime::default().run(move || {
//!     arsenal_rt::spawn(move || {
//!         ch2.send(42).unwrap();
//!     }).unwrap();
//!     assert_eq!(ch.recv().unwrap(), 42);
//! });
//! ```
//!
//! Every coroutine-only primitive (`spawn`, `yield_now`, channel ops,
//! `select`, `sleep`, the I/O wrappers) panics the calling thread's
//! scheduler lookup into `RuntimeError::NoCoroutineContext` if called
//! outside of a running [`Runtime`]; none of it is reachable from plain
//! thread code.

pub mod builder;
pub mod channel;
pub mod coroutine;
pub mod error;
pub mod io;
pub mod options;
pub mod runtime;
pub mod select;
pub mod sync;
pub mod timer;
pub(crate) mod waiter;

pub use builder::Builder;
pub use error::{RecvError, Result, RuntimeError, TryRecvError, TrySendError};
pub use options::{Options, RuntimeConfig};
pub use runtime::{processor::is_in_coroutine, processor::spawn, processor::yield_now, Runtime, Scheduler};
pub use timer::{after, sleep};
