//! Echo server acceptance demo (spec.md §8 scenario 6): a listener
//! coroutine accepts connections; each spawns a handler looping
//! `read` -> `write` until EOF. Demonstrates the core, not part of the
//! library surface.
//!
//! Run with `RUST_LOG=info cargo run --example echo_server -- 127.0.0.1:7070`.

use std::env;
use std::net::SocketAddr;
use std::sync::Once;

use arsenal_rt::io::{TcpListener, TcpStream};
use arsenal_rt::{spawn, Runtime};

static LOG_INIT: Once = Once::new();

fn init_logging() {
    LOG_INIT.call_once(|| {
        env_logger::init();
    });
}

fn handle_connection(mut stream: TcpStream) {
    let mut buf = [0u8; 4096];
    loop {
        match stream.read(&mut buf) {
            Ok(n) => {
                if stream.write(&buf[..n]).is_err() {
                    break;
                }
            }
            Err(_) => break,
        }
    }
}

fn main() {
    init_logging();

    let addr: SocketAddr = env::args()
        .nth(1)
        .unwrap_or_else(|| "127.0.0.1:7070".to_string())
        .parse()
        .expect("invalid listen address");

    Runtime::default().run(move || {
        let mut listener = TcpListener::bind(addr).expect("bind failed");
        log::info!("echo server listening on {addr}");
        loop {
            match listener.accept() {
                Ok((stream, peer)) => {
                    log::debug!("accepted connection from {peer}");
                    spawn(move || handle_connection(stream)).expect("spawn failed");
                }
                Err(e) => {
                    log::error!("accept failed: {e}");
                    break;
                }
            }
        }
    });
}
