//! Pipeline manager: owns the four channels and the worker pool.
//!
//! Channels live as long as the `Pipeline`. The worker pool exists between
//! `start` and `stop`; requests submitted while it is stopped wait in the
//! request channel for the next `start`. Dropping the pipeline stops the pool
//! and releases every record still queued.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::{self, JoinHandle};

use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use crate::config::PipelineConfig;
use crate::constants::MAX_KEY_LEN;
use crate::engine::TrieEngine;
use crate::error::{Error, Result};
use crate::metrics::{self, Channel};
use crate::records::{Completion, LargeValue, Request, RequestType};
use crate::worker::{self, Channels};

/// Always-on per-pipeline counters.
#[derive(Default)]
pub(crate) struct StatsCounters {
    pub(crate) submitted: AtomicU64,
    pub(crate) executed: AtomicU64,
    pub(crate) requests_rejected: AtomicU64,
    pub(crate) completions_dropped: AtomicU64,
    pub(crate) traversals_dropped: AtomicU64,
    pub(crate) large_values_dropped: AtomicU64,
    pub(crate) sentinels_failed: AtomicU64,
    pub(crate) stale_sentinels: AtomicU64,
}

impl StatsCounters {
    pub(crate) fn count_drop(&self, channel: Channel) {
        let counter = match channel {
            Channel::Request => &self.requests_rejected,
            Channel::Completion => &self.completions_dropped,
            Channel::Traverse => &self.traversals_dropped,
            Channel::LargeValue => &self.large_values_dropped,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> PipelineStats {
        PipelineStats {
            submitted: self.submitted.load(Ordering::Relaxed),
            executed: self.executed.load(Ordering::Relaxed),
            requests_rejected: self.requests_rejected.load(Ordering::Relaxed),
            completions_dropped: self.completions_dropped.load(Ordering::Relaxed),
            traversals_dropped: self.traversals_dropped.load(Ordering::Relaxed),
            large_values_dropped: self.large_values_dropped.load(Ordering::Relaxed),
            sentinels_failed: self.sentinels_failed.load(Ordering::Relaxed),
            stale_sentinels: self.stale_sentinels.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of a pipeline's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineStats {
    /// Requests accepted into the request channel.
    pub submitted: u64,
    /// Requests a worker dequeued and ran (sentinels excluded).
    pub executed: u64,
    /// Requests released at submission because they failed validation.
    pub requests_rejected: u64,
    pub completions_dropped: u64,
    pub traversals_dropped: u64,
    pub large_values_dropped: u64,
    /// Shutdown sentinels that could not be allocated; those workers exit on the flag.
    pub sentinels_failed: u64,
    /// Sentinels from an earlier pool generation discarded by a later one.
    pub stale_sentinels: u64,
}

impl PipelineStats {
    /// Outgoing records lost to allocation failure.
    pub fn records_dropped(&self) -> u64 {
        self.completions_dropped + self.traversals_dropped + self.large_values_dropped
    }
}

struct WorkerPool {
    handle: JoinHandle<()>,
    workers: usize,
    generation: u64,
}

/// Asynchronous request/completion pipeline over a trie engine.
pub struct Pipeline<E: TrieEngine> {
    engine: Arc<E>,
    channels: Arc<Channels>,
    pool: Mutex<Option<WorkerPool>>,
}

impl<E: TrieEngine> Pipeline<E> {
    pub fn new(engine: Arc<E>) -> Self {
        Self {
            engine,
            channels: Arc::new(Channels::new()),
            pool: Mutex::new(None),
        }
    }

    pub fn engine(&self) -> &Arc<E> {
        &self.engine
    }

    /// Start `num_workers` workers (clamped to `1..=MAX_WORKERS`). No-op if already running.
    pub fn start(&self, num_workers: usize) -> Result<()> {
        self.start_with(&PipelineConfig::with_workers(num_workers))
    }

    /// Blocks while a concurrent `stop` is joining the previous pool.
    pub fn start_with(&self, config: &PipelineConfig) -> Result<()> {
        let mut pool = self.pool.lock();
        if pool.is_some() {
            debug!("start ignored: pipeline already running");
            return Ok(());
        }

        let workers = config.effective_workers();
        let runtime = tokio::runtime::Builder::new_current_thread().build()?;
        let generation = self.channels.generation.fetch_add(1, Ordering::AcqRel) + 1;
        self.channels.running.store(true, Ordering::Release);

        let engine = Arc::clone(&self.engine);
        let channels = Arc::clone(&self.channels);
        let spawned = thread::Builder::new()
            .name(config.thread_name.clone())
            .spawn(move || {
                let local = tokio::task::LocalSet::new();
                local.block_on(&runtime, async move {
                    let tasks: Vec<_> = (0..workers)
                        .map(|id| {
                            tokio::task::spawn_local(worker::run(
                                id,
                                generation,
                                Arc::clone(&engine),
                                Arc::clone(&channels),
                            ))
                        })
                        .collect();
                    for task in tasks {
                        if let Err(e) = task.await {
                            error!(error = %e, "worker task failed");
                        }
                    }
                });
            });
        let handle = match spawned {
            Ok(handle) => handle,
            Err(e) => {
                self.channels.running.store(false, Ordering::Release);
                return Err(Error::Io(e));
            }
        };

        *pool = Some(WorkerPool {
            handle,
            workers,
            generation,
        });
        info!(workers, generation, "pipeline started");
        Ok(())
    }

    /// Stop the pool and wait for every worker to return. Safe to call repeatedly or before `start`.
    pub fn stop(&self) {
        // Held until the join completes so a concurrent start cannot steal this generation's sentinels.
        let mut guard = self.pool.lock();
        let Some(pool) = guard.take() else {
            return;
        };

        self.channels.running.store(false, Ordering::Release);
        for _ in 0..pool.workers {
            match self.channels.alloc.record::<Request>() {
                Ok(mut sentinel) => {
                    *sentinel = Request::shutdown(pool.generation);
                    self.channels.requests.enqueue(sentinel);
                }
                Err(e) => {
                    self.channels
                        .stats
                        .sentinels_failed
                        .fetch_add(1, Ordering::Relaxed);
                    warn!(bytes = e.bytes(), "shutdown sentinel allocation failed; relying on running flag");
                }
            }
        }

        if pool.handle.join().is_err() {
            error!(generation = pool.generation, "worker thread panicked");
        }
        info!(generation = pool.generation, "pipeline stopped");
    }

    /// Whether workers are accepting work. Turns false as soon as `stop` begins,
    /// without waiting for the workers to be joined.
    pub fn is_running(&self) -> bool {
        self.channels.running.load(Ordering::Acquire)
    }

    /// Allocate a zeroed request slot.
    pub fn alloc_request(&self) -> Result<Box<Request>> {
        Ok(self.channels.alloc.record::<Request>()?)
    }

    /// Allocate `count` request slots; fails as a whole if any allocation fails.
    pub fn alloc_request_batch(&self, count: usize) -> Result<Vec<Box<Request>>> {
        let mut out = Vec::new();
        out.try_reserve_exact(count).map_err(|_| Error::OutOfMemory {
            bytes: count * std::mem::size_of::<Box<Request>>(),
        })?;
        for _ in 0..count {
            out.push(self.alloc_request()?);
        }
        Ok(out)
    }

    /// Validate and enqueue a populated request. A rejected request is released.
    pub fn submit(&self, req: Box<Request>) -> Result<()> {
        if let Err(e) = validate(&req) {
            self.channels.stats.count_drop(Channel::Request);
            return Err(e);
        }
        self.enqueue(req);
        Ok(())
    }

    /// Submit every valid request; invalid ones are released, counted and logged.
    /// Returns how many were enqueued.
    pub fn submit_batch(&self, reqs: Vec<Box<Request>>) -> usize {
        let mut submitted = 0;
        for req in reqs {
            match validate(&req) {
                Ok(()) => {
                    self.enqueue(req);
                    submitted += 1;
                }
                Err(e) => {
                    self.channels.stats.count_drop(Channel::Request);
                    warn!(user_data = %req.user_data(), error = %e, "dropped invalid request from batch");
                }
            }
        }
        submitted
    }

    fn enqueue(&self, req: Box<Request>) {
        self.channels.requests.enqueue(req);
        self.channels.stats.submitted.fetch_add(1, Ordering::Relaxed);
        metrics::inc_requests_submitted();
    }

    pub fn poll_completion(&self) -> Option<Box<Completion>> {
        self.channels.completions.try_dequeue()
    }

    pub fn poll_completion_batch(&self, max: usize) -> Vec<Box<Completion>> {
        let mut out = Vec::new();
        self.channels.completions.dequeue_into(&mut out, max);
        out
    }

    pub fn poll_traverse(&self) -> Option<Box<Completion>> {
        self.channels.traversals.try_dequeue()
    }

    pub fn poll_traverse_batch(&self, max: usize) -> Vec<Box<Completion>> {
        let mut out = Vec::new();
        self.channels.traversals.dequeue_into(&mut out, max);
        out
    }

    pub fn poll_large_value(&self) -> Option<Box<LargeValue>> {
        self.channels.large_values.try_dequeue()
    }

    pub fn poll_large_value_batch(&self, max: usize) -> Vec<Box<LargeValue>> {
        let mut out = Vec::new();
        self.channels.large_values.dequeue_into(&mut out, max);
        out
    }

    /// Release a polled completion. Dropping the box does the same.
    pub fn release_completion(&self, comp: Box<Completion>) {
        drop(comp);
    }

    pub fn release_traverse(&self, comp: Box<Completion>) {
        drop(comp);
    }

    pub fn release_large_value(&self, value: Box<LargeValue>) {
        drop(value);
    }

    /// Scheduling hint: approximate number of requests not yet picked up.
    pub fn pending_requests(&self) -> usize {
        self.channels.requests.len_hint()
    }

    pub fn stats(&self) -> PipelineStats {
        self.channels.stats.snapshot()
    }

    #[cfg(test)]
    pub(crate) fn fail_next_allocations(&self, n: usize) {
        self.channels.alloc.fail_next(n);
    }
}

impl<E: TrieEngine> Drop for Pipeline<E> {
    fn drop(&mut self) {
        self.stop();
    }
}

fn validate(req: &Request) -> Result<()> {
    match req.op() {
        None if req.op == 0 => Err(Error::NullArgument("request operation is unset")),
        None => Err(Error::InvalidArgument(format!(
            "unknown request operation {}",
            req.op
        ))),
        Some(RequestType::Shutdown) => Err(Error::InvalidArgument(
            "shutdown requests are reserved for the pipeline".to_string(),
        )),
        Some(_) if req.key_len as usize > MAX_KEY_LEN => Err(Error::InvalidArgument(format!(
            "key length {} exceeds {MAX_KEY_LEN}",
            req.key_len
        ))),
        Some(_) => Ok(()),
    }
}
