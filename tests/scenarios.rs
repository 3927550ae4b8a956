//! Crate-level end-to-end scenarios, one per acceptance scenario named
//! in spec.md §8. Each constructs a `Runtime` and drives it to
//! completion with `run`/`block_on`.

use std::cell::RefCell;
use std::collections::HashSet;
use std::net::SocketAddr;
use std::rc::Rc;
use std::time::Duration;

use arsenal_rt::channel::buffered::buffered;
use arsenal_rt::channel::unbuffered::unbuffered;
use arsenal_rt::error::RecvError;
use arsenal_rt::io::{TcpListener, TcpStream};
use arsenal_rt::select::{RecvCase, Select, TimeoutCase};
use arsenal_rt::{spawn, sleep, Runtime};

/// Scenario 1: producer/consumer over a capacity-4 buffered channel.
/// One producer sends 1..=1000; one consumer sums them. Expected sum
/// 500500; channel ends non-closed from the consumer's point of view
/// until it observes the close; both coroutines finish.
#[test]
fn producer_consumer_buffered_channel() {
    let ch = buffered::<i64>(4);
    let sum = Rc::new(RefCell::new(0i64));

    let producer_ch = ch.clone();
    let consumer_ch = ch.clone();
    let consumer_sum = sum.clone();
    Runtime::default().run(move || {
        spawn(move || {
            for i in 1..=1000i64 {
                producer_ch.send(i).unwrap();
            }
            producer_ch.close().unwrap();
        })
        .unwrap();

        loop {
            match consumer_ch.recv() {
                Ok(v) => *consumer_sum.borrow_mut() += v,
                Err(RecvError::Closed) => break,
                Err(e) => panic!("unexpected recv error: {e:?}"),
            }
        }
    });

    assert_eq!(*sum.borrow(), 500_500);
    assert!(ch.is_closed());
}

/// Scenario 2: unbuffered rendezvous. Producer sends "ping" on one
/// channel; consumer receives it and sends "pong" back on a second.
#[test]
fn unbuffered_rendezvous_ping_pong() {
    let ping = unbuffered::<&'static str>();
    let pong = unbuffered::<&'static str>();
    let observed = Rc::new(RefCell::new(Vec::new()));

    let ping_root = ping.clone();
    let pong_root = pong.clone();
    let observed_root = observed.clone();
    Runtime::default().run(move || {
        let ping_child = ping_root.clone();
        let pong_child = pong_root.clone();
        spawn(move || {
            ping_child.send("ping").unwrap();
            assert_eq!(pong_child.recv().unwrap(), "pong");
        })
        .unwrap();

        assert_eq!(ping_root.recv().unwrap(), "ping");
        observed_root.borrow_mut().push("root-received-ping");
        pong_root.send("pong").unwrap();
    });

    assert_eq!(*observed.borrow(), vec!["root-received-ping"]);
}

/// Scenario 3: select over `recv(ch)` and `timeout(50ms)` with no
/// sender ever appearing. The timeout branch must win.
#[test]
fn select_with_timeout_when_nothing_arrives() {
    Runtime::default().run(|| {
        let ch = unbuffered::<i32>();
        let recv_case = RecvCase::new(&ch);
        let timeout_case = TimeoutCase::new(Duration::from_millis(50));

        let mut sel = Select::new();
        let recv_idx = sel.recv(&recv_case);
        let timeout_idx = sel.timeout(&timeout_case);

        let start = std::time::Instant::now();
        let winner = sel.wait();
        assert_eq!(winner, timeout_idx);
        assert_ne!(winner, recv_idx);
        assert!(start.elapsed() >= Duration::from_millis(50));
    });
}

/// Scenario 4: three coroutines parked on `recv(ch)`; a fourth closes
/// the channel. All three must wake, in FIFO order, each observing the
/// closed signal.
#[test]
fn close_wakes_all_parked_receivers_in_fifo_order() {
    let ch = unbuffered::<i32>();
    let wake_order = Rc::new(RefCell::new(Vec::new()));

    let ch_root = ch.clone();
    let wake_order_root = wake_order.clone();
    Runtime::default().run(move || {
        for id in 0..3 {
            let ch = ch_root.clone();
            let wake_order = wake_order_root.clone();
            spawn(move || {
                assert_eq!(ch.recv().unwrap_err(), RecvError::Closed);
                wake_order.borrow_mut().push(id);
            })
            .unwrap();
        }
        // Let all three park before closing.
        arsenal_rt::yield_now().unwrap();
        ch_root.close().unwrap();
    });

    assert_eq!(*wake_order.borrow(), vec![0, 1, 2]);
}

/// Scenario 5: fan-in via select over two buffered channels. Two
/// producers each send 100 items into their own channel; one consumer
/// selects-recv over both 200 times. Every item observed exactly once.
#[test]
fn fan_in_select_over_two_buffered_channels() {
    let a = buffered::<i32>(8);
    let b = buffered::<i32>(8);

    let a_p = a.clone();
    let b_p = b.clone();
    Runtime::default().run(move || {
        spawn(move || {
            for i in 0..100 {
                a_p.send(i).unwrap();
            }
        })
        .unwrap();
        spawn(move || {
            for i in 100..200 {
                b_p.send(i).unwrap();
            }
        })
        .unwrap();

        let mut seen: HashSet<i32> = HashSet::new();
        for _ in 0..200 {
            let case_a = RecvCase::new(&a);
            let case_b = RecvCase::new(&b);
            let mut sel = Select::new();
            let idx_a = sel.recv(&case_a);
            let idx_b = sel.recv(&case_b);
            let winner = sel.wait();
            let value = if winner == idx_a {
                case_a.take().unwrap()
            } else {
                assert_eq!(winner, idx_b);
                case_b.take().unwrap()
            };
            assert!(seen.insert(value), "duplicate value {value}");
        }

        assert_eq!(seen.len(), 200);
        for v in 0..200 {
            assert!(seen.contains(&v));
        }
    });
}

/// Scenario 6: I/O echo server. A listener coroutine accepts; each
/// connection gets a handler looping read -> write until EOF. Scaled
/// down from spec.md's 1,000 concurrent connections to keep the test
/// fast and deterministic, but exercises the same accept/spawn/read/
/// write/shutdown path.
#[test]
fn io_echo_server_serves_every_connection() {
    const CONNECTIONS: usize = 20;
    let served = Rc::new(RefCell::new(0usize));

    let served_root = served.clone();
    Runtime::default().run(move || {
        let mut listener = TcpListener::bind("127.0.0.1:0".parse().unwrap()).unwrap();
        let addr: SocketAddr = listener.local_addr().unwrap();

        spawn(move || {
            for _ in 0..CONNECTIONS {
                let (mut stream, _peer) = listener.accept().unwrap();
                let served = served_root.clone();
                spawn(move || {
                    let mut buf = [0u8; 64];
                    loop {
                        match stream.read(&mut buf) {
                            Ok(n) => {
                                stream.write(&buf[..n]).unwrap();
                            }
                            Err(_) => break,
                        }
                    }
                    *served.borrow_mut() += 1;
                })
                .unwrap();
            }
        })
        .unwrap();

        for id in 0..CONNECTIONS {
            spawn(move || {
                let mut stream = TcpStream::connect(addr).unwrap();
                let msg = format!("hello-{id}");
                stream.write(msg.as_bytes()).unwrap();
                let mut buf = [0u8; 64];
                let n = stream.read(&mut buf).unwrap();
                assert_eq!(&buf[..n], msg.as_bytes());
                stream.shutdown(std::net::Shutdown::Both).unwrap();
            })
            .unwrap();
        }
    });

    assert_eq!(*served.borrow(), CONNECTIONS);
}

/// Zero-duration `sleep` must fire on the scheduler's next iteration
/// rather than stalling (spec.md §8 "Boundary behaviors").
#[test]
fn zero_duration_sleep_does_not_stall_the_runtime() {
    Runtime::default().run(|| {
        sleep(Duration::from_millis(0)).unwrap();
    });
}
