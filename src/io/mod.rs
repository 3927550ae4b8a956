//! Non-blocking I/O: the readiness-based event loop plus the socket
//! wrappers built on top of it (spec.md §4.7).

pub(crate) mod poller;

mod net;

pub use net::{TcpListener, TcpStream, UdpSocket};
