use std::collections::HashMap;
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use trie_fifo::config::{DEFAULT_HISTORY_LENGTH, DEFAULT_WORKERS, PipelineConfig};
use trie_fifo::engine::Update;
use trie_fifo::memory_trie::MemoryTrie;
use trie_fifo::response_flow::{Collector, FindResult, TraverseEvent};
use trie_fifo::{Pipeline, ResultStatus, metrics, request_flow};

const VERSION: u64 = 1;
const TRAVERSE_LIMIT: u32 = 16;

#[derive(Parser)]
#[command(about = "Concurrent submit/poll stress driver for the trie pipeline")]
struct Args {
    /// Cooperative workers on the execution thread
    #[arg(short, long, default_value_t = DEFAULT_WORKERS)]
    workers: usize,

    /// Submitting threads
    #[arg(short, long, default_value_t = 8)]
    threads: usize,

    /// Requests submitted by each thread
    #[arg(short = 'n', long, default_value_t = 10_000)]
    requests_per_thread: u64,

    /// Keys committed before the run
    #[arg(short, long, default_value_t = 4096)]
    keys: u64,

    /// Every Nth key gets a value too large to inline (0 disables)
    #[arg(long, default_value_t = 16)]
    large_every: u64,

    /// Every Nth request is a prefix traversal (0 disables)
    #[arg(long, default_value_t = 64)]
    traverse_every: u64,

    /// Yield once per trie node, as a disk-backed engine would
    #[arg(long)]
    simulated_io: bool,

    /// Give up waiting for outstanding results after this many seconds
    #[arg(long, default_value_t = 120)]
    timeout_secs: u64,

    /// Debug logging
    #[arg(short, long)]
    verbose: bool,
}

/// What a request with a given user_data was, derived the same way on both sides.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Planned {
    Hit(u64),
    Miss,
    Traverse,
}

fn plan(args: &Args, thread_idx: u64, seq: u64) -> Planned {
    if args.traverse_every > 0 && seq % args.traverse_every == 0 {
        Planned::Traverse
    } else if seq % 7 == 3 {
        Planned::Miss
    } else {
        Planned::Hit((seq * 31 + thread_idx) % args.keys.max(1))
    }
}

fn user_data(thread_idx: u64, seq: u64) -> u128 {
    ((thread_idx as u128) << 64) | seq as u128
}

fn key_of(i: u64) -> Vec<u8> {
    format!("key-{i:08}").into_bytes()
}

fn value_of(args: &Args, i: u64) -> Vec<u8> {
    if args.large_every > 0 && i % args.large_every == 0 {
        vec![(i % 251) as u8; 1024]
    } else {
        format!("value-{i}").into_bytes()
    }
}

fn setup_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("trie_fifo=debug,warn")
    } else {
        EnvFilter::new("trie_fifo=info,warn")
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_names(true)
        .init();
}

#[derive(Default)]
struct Tally {
    terminals: HashMap<u128, u32>,
    traverse_items: u64,
    wrong: u64,
}

impl Tally {
    fn terminal(&mut self, user_data: u128) {
        *self.terminals.entry(user_data).or_default() += 1;
    }

    fn check_find(&mut self, args: &Args, result: &FindResult) {
        self.terminal(result.user_data);
        let planned = plan(args, (result.user_data >> 64) as u64, result.user_data as u64);
        let ok = match planned {
            Planned::Hit(i) => {
                result.status == ResultStatus::Ok && result.value == value_of(args, i)
            }
            Planned::Miss => result.status == ResultStatus::NotFound,
            Planned::Traverse => false,
        };
        if !ok {
            self.wrong += 1;
            warn!(user_data = %result.user_data, ?planned, status = ?result.status, "unexpected find result");
        }
    }

    fn check_traverse(&mut self, event: &TraverseEvent) {
        match event {
            TraverseEvent::Item { .. } => self.traverse_items += 1,
            TraverseEvent::End { user_data } => self.terminal(*user_data),
        }
    }

    fn duplicates(&self) -> usize {
        self.terminals.values().filter(|&&n| n > 1).count()
    }
}

fn run(args: &Args) -> trie_fifo::Result<bool> {
    let trie = MemoryTrie::with_history_length(DEFAULT_HISTORY_LENGTH)
        .with_simulated_io(args.simulated_io);
    let updates: Vec<_> = (0..args.keys)
        .map(|i| Update::put(key_of(i), value_of(args, i)))
        .collect();
    trie.commit(&updates, VERSION)?;
    let root = trie.root_hash(VERSION)?;
    info!(keys = args.keys, root = ?&root[..8], "trie populated");

    let pipeline = Pipeline::new(Arc::new(trie));
    pipeline.start_with(&PipelineConfig::with_workers(args.workers))?;

    let submitted = AtomicU64::new(0);
    let failed = AtomicU64::new(0);
    let finished = AtomicUsize::new(0);
    let mut tally = Tally::default();
    let started = Instant::now();

    thread::scope(|s| {
        for t in 0..args.threads as u64 {
            let pipeline = &pipeline;
            let (submitted, failed, finished) = (&submitted, &failed, &finished);
            s.spawn(move || {
                for seq in 0..args.requests_per_thread {
                    let ud = user_data(t, seq);
                    let outcome = match plan(args, t, seq) {
                        Planned::Hit(i) => {
                            request_flow::submit_find_value(pipeline, &key_of(i), VERSION, ud)
                        }
                        Planned::Miss => {
                            let key = format!("nokey-{seq}");
                            request_flow::submit_find_value(pipeline, key.as_bytes(), VERSION, ud)
                        }
                        Planned::Traverse => request_flow::submit_traverse(
                            pipeline,
                            b"key-0000",
                            VERSION,
                            TRAVERSE_LIMIT,
                            ud,
                        ),
                    };
                    match outcome {
                        Ok(()) => submitted.fetch_add(1, Ordering::Relaxed),
                        Err(e) => {
                            warn!(user_data = %ud, error = %e, "submit failed");
                            failed.fetch_add(1, Ordering::Relaxed)
                        }
                    };
                }
                finished.fetch_add(1, Ordering::Release);
            });
        }

        let deadline = started + Duration::from_secs(args.timeout_secs);
        let mut collector = Collector::new(&pipeline);
        let mut finds = Vec::new();
        let mut events = Vec::new();
        loop {
            finds.clear();
            events.clear();
            let polled = collector.poll_finds(&mut finds) + collector.poll_traversals(&mut events);
            for result in &finds {
                tally.check_find(args, result);
            }
            for event in &events {
                tally.check_traverse(event);
            }

            let done = finished.load(Ordering::Acquire) == args.threads;
            if done && tally.terminals.len() as u64 >= submitted.load(Ordering::Relaxed) {
                break;
            }
            if Instant::now() > deadline {
                error!("timed out waiting for results");
                break;
            }
            if polled == 0 {
                thread::yield_now();
            }
        }
    });

    let elapsed = started.elapsed();
    pipeline.stop();

    let submitted = submitted.load(Ordering::Relaxed);
    let missing = submitted.saturating_sub(tally.terminals.len() as u64);
    let duplicates = tally.duplicates();
    let stats = pipeline.stats();
    info!(
        submitted,
        submit_failed = failed.load(Ordering::Relaxed),
        terminals = tally.terminals.len(),
        traverse_items = tally.traverse_items,
        missing,
        duplicates,
        wrong = tally.wrong,
        dropped = stats.records_dropped(),
        elapsed_ms = elapsed.as_millis() as u64,
        req_per_sec = (submitted as f64 / elapsed.as_secs_f64()) as u64,
        "run complete"
    );

    Ok(missing == 0 && duplicates == 0 && tally.wrong == 0)
}

fn main() -> ExitCode {
    let args = Args::parse();
    setup_logging(args.verbose);
    metrics::spawn_reporter();

    match run(&args) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => {
            error!("delivery check failed");
            ExitCode::FAILURE
        }
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}
