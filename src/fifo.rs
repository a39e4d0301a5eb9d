//! Lock-free unbounded MPMC FIFO carrying heap-allocated records.
//!
//! Ownership moves one way per hop: the producer owns a `Box<T>` until
//! `enqueue` takes it, the queue owns it until a consumer's `try_dequeue`
//! returns it, and the consumer owns it until it drops (releases) it. The queue
//! never blocks either side and never applies backpressure.

use std::sync::atomic::{AtomicUsize, Ordering};

use crossbeam_queue::SegQueue;

use crate::metrics::{self, Channel};

pub struct Fifo<T> {
    queue: SegQueue<Box<T>>,
    channel: Channel,
    // Approximate; racing producers/consumers may observe it out of step with the queue.
    len_hint: AtomicUsize,
}

impl<T> Fifo<T> {
    pub fn new(channel: Channel) -> Self {
        Self {
            queue: SegQueue::new(),
            channel,
            len_hint: AtomicUsize::new(0),
        }
    }

    /// Append a record. Safe from any number of producer threads.
    pub fn enqueue(&self, node: Box<T>) {
        // Count before publishing so a racing consumer never decrements first.
        self.len_hint.fetch_add(1, Ordering::Relaxed);
        metrics::inc_occ(self.channel);
        self.queue.push(node);
    }

    /// Take the oldest record, if any. Safe from any number of consumer threads.
    pub fn try_dequeue(&self) -> Option<Box<T>> {
        let node = self.queue.pop()?;
        let _ = self
            .len_hint
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1));
        metrics::dec_occ(self.channel);
        Some(node)
    }

    /// Dequeue up to `max` records into `out`; returns how many were taken.
    pub fn dequeue_into(&self, out: &mut Vec<Box<T>>, max: usize) -> usize {
        let mut taken = 0;
        while taken < max {
            match self.try_dequeue() {
                Some(node) => {
                    out.push(node);
                    taken += 1;
                }
                None => break,
            }
        }
        taken
    }

    /// Scheduling hint only. A `true` may be stale by the time the caller acts on it.
    pub fn is_probably_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Approximate number of queued records.
    pub fn len_hint(&self) -> usize {
        self.len_hint.load(Ordering::Relaxed)
    }

    /// Release every queued record. Used at teardown; live producers may still race.
    pub fn drain(&self) -> usize {
        let mut released = 0;
        while self.try_dequeue().is_some() {
            released += 1;
        }
        released
    }
}

impl<T> Drop for Fifo<T> {
    fn drop(&mut self) {
        let released = self.drain();
        if released > 0 {
            tracing::debug!(channel = ?self.channel, released, "released undelivered records");
        }
    }
}
