//! Manual (non-criterion) throughput benchmark for the lock types in
//! `sync::spinlock`, matching the `harness = false` bench target coio
//! itself ships under the same name. Run with `cargo bench`.

use std::sync::Arc;
use std::thread;
use std::time::Instant;

use arsenal_rt::sync::spinlock::{RwSpinlock, Spinlock, TicketLock};

const ITERS_PER_THREAD: usize = 200_000;
const THREADS: usize = 4;

fn bench_spinlock() {
    let lock = Arc::new(Spinlock::new(0u64));
    let start = Instant::now();
    let handles: Vec<_> = (0..THREADS)
        .map(|_| {
            let lock = lock.clone();
            thread::spawn(move || {
                for _ in 0..ITERS_PER_THREAD {
                    *lock.lock() += 1;
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }
    let elapsed = start.elapsed();
    assert_eq!(*lock.lock(), (THREADS * ITERS_PER_THREAD) as u64);
    println!("Spinlock:   {:>10} incs in {:?} ({:.1} ns/inc)", THREADS * ITERS_PER_THREAD, elapsed, elapsed.as_nanos() as f64 / (THREADS * ITERS_PER_THREAD) as f64);
}

fn bench_ticket_lock() {
    let lock = Arc::new(TicketLock::new(0u64));
    let start = Instant::now();
    let handles: Vec<_> = (0..THREADS)
        .map(|_| {
            let lock = lock.clone();
            thread::spawn(move || {
                for _ in 0..ITERS_PER_THREAD {
                    *lock.lock() += 1;
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }
    let elapsed = start.elapsed();
    assert_eq!(*lock.lock(), (THREADS * ITERS_PER_THREAD) as u64);
    println!("TicketLock: {:>10} incs in {:?} ({:.1} ns/inc)", THREADS * ITERS_PER_THREAD, elapsed, elapsed.as_nanos() as f64 / (THREADS * ITERS_PER_THREAD) as f64);
}

fn bench_rw_spinlock_read_heavy() {
    let lock = Arc::new(RwSpinlock::new(0u64));
    {
        *lock.write() = 1;
    }
    let start = Instant::now();
    let handles: Vec<_> = (0..THREADS)
        .map(|_| {
            let lock = lock.clone();
            thread::spawn(move || {
                let mut sum = 0u64;
                for _ in 0..ITERS_PER_THREAD {
                    sum = sum.wrapping_add(*lock.read());
                }
                sum
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }
    let elapsed = start.elapsed();
    println!(
        "RwSpinlock: {:>10} reads in {:?} ({:.1} ns/read)",
        THREADS * ITERS_PER_THREAD,
        elapsed,
        elapsed.as_nanos() as f64 / (THREADS * ITERS_PER_THREAD) as f64
    );
}

fn main() {
    bench_spinlock();
    bench_ticket_lock();
    bench_rw_spinlock_read_heavy();
}
