//! One writer appends under a relay-style lock while readers traverse the
//! same buffer without locking.

use parking_lot::Mutex;
use relay_buffer::{AppendOnlyBuffer, BufferReader, Termination};
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

const VALUES: u64 = 1000;
const READERS: usize = 4;

/// Asserts `observed` is `1..=observed.len()`.
fn assert_prefix(observed: &[u64]) {
    for (i, v) in observed.iter().enumerate() {
        assert_eq!(*v, i as u64 + 1, "out-of-order value in {observed:?}");
    }
}

fn run_writer_with_readers(capacity: usize) {
    let buffer = Mutex::new(AppendOnlyBuffer::<u64>::new(capacity));
    let reader = buffer.lock().reader();
    let done = AtomicBool::new(false);

    thread::scope(|s| {
        for _ in 0..READERS {
            let reader = reader.clone();
            let done = &done;
            s.spawn(move || {
                let mut last_len = 0;
                loop {
                    let finished = done.load(Ordering::Acquire);
                    let mut observed = Vec::with_capacity(VALUES as usize);
                    reader.for_each(|v| observed.push(*v));

                    assert_prefix(&observed);
                    assert!(observed.len() >= last_len, "a traversal went backwards");
                    last_len = observed.len();

                    if finished {
                        assert_eq!(observed.len(), VALUES as usize);
                        break;
                    }
                }
            });
        }

        s.spawn(|| {
            for v in 1..=VALUES {
                buffer.lock().append(v);
                if v % 64 == 0 {
                    thread::yield_now();
                }
            }
            done.store(true, Ordering::Release);
        });
    });

    assert_eq!(buffer.lock().len(), VALUES as usize);
}

#[test]
fn readers_observe_ordered_prefixes_capacity_1() {
    run_writer_with_readers(1);
}

#[test]
fn readers_observe_ordered_prefixes_capacity_7() {
    run_writer_with_readers(7);
}

#[test]
fn readers_observe_ordered_prefixes_capacity_0() {
    run_writer_with_readers(0);
}

#[test]
fn scan_until_eventually_matches_last_value() {
    let mut buffer = AppendOnlyBuffer::<u64>::new(16);
    let reader: BufferReader<u64> = buffer.reader();

    thread::scope(|s| {
        s.spawn(|| {
            loop {
                let mut previous = 0;
                let outcome = reader.scan_until(|v| {
                    assert_eq!(*v, previous + 1);
                    previous = *v;
                    *v == VALUES
                });
                if outcome == Termination::Matched {
                    assert_eq!(previous, VALUES);
                    break;
                }
                thread::yield_now();
            }
        });

        s.spawn(|| {
            buffer.extend(1..=VALUES);
        });
    });
}

#[test]
fn references_stay_valid_while_writer_keeps_appending() {
    let mut buffer = AppendOnlyBuffer::<String>::new(4);
    buffer.extend((0..8).map(|i| format!("v{i}")));
    let reader = buffer.reader();

    thread::scope(|s| {
        s.spawn(|| {
            let first: Vec<&String> = reader.iter().take(8).collect();
            for _ in 0..100 {
                let again: Vec<&String> = reader.iter().take(8).collect();
                for (a, b) in first.iter().zip(&again) {
                    assert!(std::ptr::eq(*a, *b));
                }
            }
            assert_eq!(first[7], "v7");
        });

        s.spawn(|| {
            buffer.extend((8..2000).map(|i| format!("v{i}")));
        });
    });
}
