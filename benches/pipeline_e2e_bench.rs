//! End-to-end benchmark: submit → worker pool → poll, one caller thread.

mod common;

use std::hint::black_box;
use std::time::{Duration, Instant};

use trie_fifo::request_flow;

const KEYS: u64 = 10_000;
const IN_FLIGHT: u64 = 256;
const TARGET_DURATION: Duration = Duration::from_secs(2);

fn main() {
    let pipeline = common::populated_pipeline(KEYS);
    pipeline.start(4).expect("start");

    let mut next_ud: u64 = 0;
    let mut outstanding: u64 = 0;
    let mut completed: u64 = 0;

    let mut pump = |until: Instant, completed: &mut u64| {
        while Instant::now() < until {
            while outstanding < IN_FLIGHT {
                let key = common::key(next_ud % KEYS);
                request_flow::submit_find_value(&pipeline, &key, common::VERSION, next_ud as u128)
                    .expect("submit");
                next_ud += 1;
                outstanding += 1;
            }
            for comp in pipeline.poll_completion_batch(IN_FLIGHT as usize) {
                black_box(comp.inline_value());
                outstanding -= 1;
                *completed += 1;
            }
        }
    };

    // Warm up
    let mut warm = 0;
    pump(Instant::now() + Duration::from_millis(300), &mut warm);

    let start = Instant::now();
    pump(start + TARGET_DURATION, &mut completed);
    let elapsed = start.elapsed();

    eprintln!("Pipeline (submit -> {KEYS}-key trie find -> poll), {IN_FLIGHT} in flight:");
    eprintln!("  {} completions in {:?} (sustained)", completed, elapsed);
    eprintln!(
        "  {:.0} req/s (over {:.1}s)",
        completed as f64 / elapsed.as_secs_f64(),
        elapsed.as_secs_f64()
    );
    let stats = pipeline.stats();
    eprintln!(
        "  submitted {} executed {} dropped {}",
        stats.submitted,
        stats.executed,
        stats.records_dropped()
    );

    pipeline.stop();
}
