//! Writer/reader latency demo.
//!
//! A writer thread appends timestamped values while a reader thread keeps
//! re-traversing the buffer, measuring how long each value took to become
//! visible. Afterwards a late subscriber replays the whole history.
//!
//! Parameters come from the environment:
//!
//! - `RELAY_SEGMENT_CAPACITY` (default 256)
//! - `RELAY_VALUES` (default 20000)
//! - `RUST_LOG` (e.g. `relay_buffer=trace` to see segment allocation)

use parking_lot::Mutex;
use relay_buffer::{AppendOnlyBuffer, BufferConfig, BufferReader, Samples, mono_time_ns};
use std::thread;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Example payload stored in each slot.
#[derive(Clone, Copy, Debug)]
struct Stamp {
    seq_no: u64,
    timestamp: u64,
}

fn env_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    match std::env::var(name) {
        Ok(raw) => raw.parse().unwrap_or_else(|_| {
            warn!(name, raw, "ignoring unparsable value");
            default
        }),
        Err(_) => default,
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let config = BufferConfig::default().with_segment_capacity(env_or("RELAY_SEGMENT_CAPACITY", 256));
    let values: u64 = env_or("RELAY_VALUES", 20_000);

    let buffer = Mutex::new(config.build::<Stamp>()?);
    let reader = buffer.lock().reader();

    let mut visibility = thread::scope(|s| {
        let watcher = s.spawn(|| watch(&reader, values));
        for seq_no in 1..=values {
            let stamp = Stamp {
                seq_no,
                timestamp: mono_time_ns(),
            };
            buffer.lock().append(stamp);
        }
        watcher.join()
    })
    .map_err(|_| "reader thread panicked")?;

    match visibility.summary() {
        Some(summary) => info!(%summary, "append-to-visible latency (ns)"),
        None => warn!("no values observed"),
    }

    let mut replay = Samples::with_capacity(16);
    for _ in 0..16 {
        replay.record(late_subscriber(&buffer.lock().reader(), values));
    }
    if let Some(summary) = replay.summary() {
        info!(%summary, "full replay to a late subscriber (ns)");
    }

    let buffer = buffer.into_inner();
    info!(
        len = buffer.len(),
        segments = buffer.segment_count(),
        capacity = buffer.capacity(),
        "done"
    );
    Ok(())
}

/// Traverses until all `values` were seen, timing each newly visible value.
fn watch(reader: &BufferReader<Stamp>, values: u64) -> Samples {
    let mut samples = Samples::with_capacity(values as usize);
    let mut seen = 0u64;
    while seen < values {
        let mut index = 0u64;
        reader.for_each(|stamp| {
            index += 1;
            if index > seen {
                let now = mono_time_ns();
                debug_assert_eq!(stamp.seq_no, index);
                samples.record(now - stamp.timestamp);
            }
        });
        seen = seen.max(index);
        std::hint::spin_loop();
    }
    samples
}

/// Replays the whole history and returns how long it took.
fn late_subscriber(reader: &BufferReader<Stamp>, values: u64) -> u64 {
    let start = mono_time_ns();
    let mut count = 0u64;
    reader.for_each(|_| count += 1);
    let elapsed = mono_time_ns() - start;
    assert_eq!(count, values);
    elapsed
}
