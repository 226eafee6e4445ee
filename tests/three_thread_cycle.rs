//! A three-thread ring: T1→M1→T2→M2→T3→M3→T1.

mod common;

use common::{DETECT_TIMEOUT, Level, start_watch};
use std::sync::{Arc, Barrier};
use std::thread;

const MUTEXES: [usize; 3] = [0x1000, 0x2000, 0x3000];

#[test]
fn three_thread_ring_yields_length_three_cycles() {
    let harness = start_watch();
    for &mutex in &MUTEXES {
        harness.client.init_mutex(mutex, false);
    }

    let barrier = Arc::new(Barrier::new(3));
    for index in 0..3 {
        let client = harness.client.clone();
        let sync = Arc::clone(&barrier);
        thread::spawn(move || {
            assert_eq!(client.lock(MUTEXES[index]), 0);
            sync.wait();
            // Everyone then wants their neighbor's mutex; the ring closes.
            client.lock(MUTEXES[(index + 1) % 3]);
        });
    }

    let mut origins = Vec::new();
    for _ in 0..3 {
        let info = harness.expect_deadlock(DETECT_TIMEOUT);
        assert_eq!(
            info.cycle.len(),
            3,
            "ring of three must never be reported as a shorter cycle"
        );
        assert_eq!(info.cycle[2].owner_thread, info.origin_thread);
        origins.push(info.origin_thread);
    }

    // One cycle per start point: all three threads report, none twice.
    origins.sort_unstable();
    origins.dedup();
    assert_eq!(origins.len(), 3);
    assert_eq!(harness.sink.count(Level::Error, "MUTEX:Deadlock"), 3);
}
