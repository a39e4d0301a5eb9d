//! Worker side of the pipeline: request execution and the cooperative worker loop.
//!
//! All workers of one pool run as tasks on a single `current_thread` runtime.
//! A worker never blocks: with nothing to do it yields to its siblings, and an
//! engine read that suspends yields the same way.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use futures::FutureExt;
use tracing::{debug, warn};

use crate::alloc::{AllocError, RecordAllocator};
use crate::engine::{TrieEngine, TrieNode};
use crate::error::EngineError;
use crate::fifo::Fifo;
use crate::metrics::{self, Channel};
use crate::pipeline::StatsCounters;
use crate::protocol::split_user_data;
use crate::records::{Completion, LargeValue, Request, RequestType, ResultStatus};
use crate::traverse::TraverseAdapter;

/// State shared between the pipeline handle and its workers.
pub(crate) struct Channels {
    pub(crate) requests: Fifo<Request>,
    pub(crate) completions: Fifo<Completion>,
    pub(crate) traversals: Fifo<Completion>,
    pub(crate) large_values: Fifo<LargeValue>,
    pub(crate) alloc: RecordAllocator,
    pub(crate) stats: StatsCounters,
    pub(crate) running: AtomicBool,
    pub(crate) generation: AtomicU64,
}

impl Channels {
    pub(crate) fn new() -> Self {
        Self {
            requests: Fifo::new(Channel::Request),
            completions: Fifo::new(Channel::Completion),
            traversals: Fifo::new(Channel::Traverse),
            large_values: Fifo::new(Channel::LargeValue),
            alloc: RecordAllocator::new(),
            stats: StatsCounters::default(),
            running: AtomicBool::new(false),
            generation: AtomicU64::new(0),
        }
    }

    /// Allocate an outgoing record; a failure is counted against `channel` and logged.
    pub(crate) fn alloc_completion(
        &self,
        user_data: u128,
        status: ResultStatus,
        channel: Channel,
    ) -> Option<Box<Completion>> {
        match self.alloc.record::<Completion>() {
            Ok(mut comp) => {
                comp.set_header(user_data, status);
                Some(comp)
            }
            Err(e) => {
                self.record_dropped(channel, user_data, e);
                None
            }
        }
    }

    /// Put `value` on `comp`, inline when it fits, otherwise as a LargeValue
    /// record posted ahead of the completion. Returns false if the value could
    /// not be delivered.
    pub(crate) fn attach_value(&self, comp: &mut Completion, user_data: u128, value: &[u8]) -> bool {
        if comp.set_inline_value(value) {
            return true;
        }
        match self.alloc.payload(value) {
            Ok(data) => {
                let (user_data_lo, user_data_hi) = split_user_data(user_data);
                self.large_values.enqueue(Box::new(LargeValue {
                    user_data_lo,
                    user_data_hi,
                    len: data.len() as u32,
                    data,
                }));
                metrics::inc_posted(Channel::LargeValue);
                comp.mark_large_value();
                true
            }
            Err(e) => {
                self.record_dropped(Channel::LargeValue, user_data, e);
                false
            }
        }
    }

    pub(crate) fn post_completion(&self, comp: Box<Completion>) {
        self.completions.enqueue(comp);
        metrics::inc_posted(Channel::Completion);
    }

    pub(crate) fn post_traverse(&self, comp: Box<Completion>) {
        self.traversals.enqueue(comp);
        metrics::inc_posted(Channel::Traverse);
    }

    pub(crate) fn record_dropped(&self, channel: Channel, user_data: u128, err: AllocError) {
        self.stats.count_drop(channel);
        metrics::inc_records_dropped();
        warn!(?channel, user_data = %user_data, bytes = err.bytes(), "dropped record: allocation failed");
    }
}

/// Worker loop. Returns on a shutdown sentinel of its own generation or once
/// the running flag is cleared.
pub(crate) async fn run<E: TrieEngine>(
    id: usize,
    generation: u64,
    engine: Arc<E>,
    channels: Arc<Channels>,
) {
    debug!(worker = id, generation, "worker started");
    while channels.running.load(Ordering::Acquire) {
        let next = if channels.requests.is_probably_empty() {
            None
        } else {
            channels.requests.try_dequeue()
        };
        let Some(req) = next else {
            metrics::inc_idle_yields();
            tokio::task::yield_now().await;
            continue;
        };

        if req.op() == Some(RequestType::Shutdown) {
            if req.version == generation {
                debug!(worker = id, generation, "worker received shutdown");
                return;
            }
            channels.stats.stale_sentinels.fetch_add(1, Ordering::Relaxed);
            debug!(worker = id, stale = req.version, "discarded stale shutdown sentinel");
            continue;
        }

        let executed = AssertUnwindSafe(execute(&*engine, &channels, &req))
            .catch_unwind()
            .await;
        if executed.is_err() {
            warn!(worker = id, user_data = %req.user_data(), "request panicked outside the engine");
            post_terminal(&channels, &req);
        }
        channels.stats.executed.fetch_add(1, Ordering::Relaxed);
        metrics::inc_requests_executed();
    }
    debug!(worker = id, generation, "worker saw running flag cleared");
}

/// Run one request. Every path posts its terminal record (completion or
/// TraverseEnd) as its last step, so a panic means none was posted.
async fn execute<E: TrieEngine>(engine: &E, channels: &Channels, req: &Request) {
    match req.op() {
        Some(RequestType::FindValue) => execute_find(engine, channels, req, false).await,
        Some(RequestType::FindNode) => execute_find(engine, channels, req, true).await,
        Some(RequestType::Traverse) => execute_traverse(engine, channels, req).await,
        Some(RequestType::Shutdown) | None => {
            warn!(op = req.op, "request with unknown operation");
            post_terminal(channels, req);
        }
    }
}

/// Error completion, or TraverseEnd for a traversal.
fn post_terminal(channels: &Channels, req: &Request) {
    let user_data = req.user_data();
    if req.op() == Some(RequestType::Traverse) {
        if let Some(end) = channels.alloc_completion(user_data, ResultStatus::TraverseEnd, Channel::Traverse) {
            channels.post_traverse(end);
        }
    } else if let Some(comp) = channels.alloc_completion(user_data, ResultStatus::Error, Channel::Completion) {
        channels.post_completion(comp);
    }
}

/// Point lookup. Always posts exactly one completion unless its record cannot
/// be allocated.
pub(crate) async fn execute_find<E: TrieEngine>(
    engine: &E,
    channels: &Channels,
    req: &Request,
    with_node_data: bool,
) {
    let user_data = req.user_data();
    let outcome = AssertUnwindSafe(engine.find(req.key(), req.version))
        .catch_unwind()
        .await;

    let Some(mut comp) = channels.alloc_completion(user_data, ResultStatus::Error, Channel::Completion)
    else {
        return;
    };

    match outcome {
        Ok(Ok(Some(node))) => match node.value() {
            Some(value) => {
                if channels.attach_value(&mut comp, user_data, value) {
                    comp.status = ResultStatus::Ok as u8;
                    if with_node_data {
                        if let Ok(hash) = <[u8; 32]>::try_from(node.data()) {
                            comp.side_payload = hash;
                        }
                    }
                }
            }
            None => comp.status = ResultStatus::NotFound as u8,
        },
        Ok(Ok(None)) => comp.status = ResultStatus::NotFound as u8,
        Ok(Err(e)) => debug!(user_data = %user_data, error = %e, "find failed"),
        Err(_) => warn!(user_data = %user_data, "engine panicked during find"),
    }
    channels.post_completion(comp);
}

/// Prefix walk. Emits zero or more TraverseMore records and always finishes
/// with one TraverseEnd, whatever the engine does.
pub(crate) async fn execute_traverse<E: TrieEngine>(engine: &E, channels: &Channels, req: &Request) {
    let user_data = req.user_data();
    let limit = req.effective_traverse_limit();

    let walk = AssertUnwindSafe(async {
        let Some(start) = engine.find(req.key(), req.version).await? else {
            return Ok(0);
        };
        let mut adapter = TraverseAdapter::new(channels, user_data, req.key(), limit);
        engine
            .traverse(&start, &mut adapter, req.version, limit as usize)
            .await?;
        Ok::<_, EngineError>(adapter.emitted())
    })
    .catch_unwind()
    .await;

    match walk {
        Ok(Ok(emitted)) => debug!(user_data = %user_data, emitted, "traverse finished"),
        Ok(Err(e)) => debug!(user_data = %user_data, error = %e, "traverse ended early"),
        Err(_) => warn!(user_data = %user_data, "engine panicked during traverse"),
    }

    if let Some(end) = channels.alloc_completion(user_data, ResultStatus::TraverseEnd, Channel::Traverse) {
        channels.post_traverse(end);
    }
}
