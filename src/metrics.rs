//! Process-wide pipeline counters, compiled in with the `metrics` feature.
//!
//! Without the feature every hook is an empty inline function. Per-pipeline
//! drop counters live in `pipeline::PipelineStats` and are always on.

/// Which channel an occupancy gauge refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    Request,
    Completion,
    Traverse,
    LargeValue,
}

#[cfg(feature = "metrics")]
mod imp {
    use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
    use std::time::Duration;

    use super::Channel;

    // Throughput (cumulative)
    static REQUESTS_SUBMITTED: AtomicU64 = AtomicU64::new(0);
    static REQUESTS_EXECUTED: AtomicU64 = AtomicU64::new(0);
    static COMPLETIONS_POSTED: AtomicU64 = AtomicU64::new(0);
    static TRAVERSALS_POSTED: AtomicU64 = AtomicU64::new(0);
    static LARGE_VALUES_POSTED: AtomicU64 = AtomicU64::new(0);
    // Loss (cumulative)
    static RECORDS_DROPPED: AtomicU64 = AtomicU64::new(0);
    static ALLOC_FAILED: AtomicU64 = AtomicU64::new(0);
    // Workers: idle spins (stall = yield with an empty request queue)
    static IDLE_YIELDS: AtomicU64 = AtomicU64::new(0);
    // Gauges
    static REQ_OCC: AtomicUsize = AtomicUsize::new(0);
    static COMP_OCC: AtomicUsize = AtomicUsize::new(0);
    static TRAV_OCC: AtomicUsize = AtomicUsize::new(0);
    static LARGE_OCC: AtomicUsize = AtomicUsize::new(0);
    static REQ_MAX_OCC: AtomicUsize = AtomicUsize::new(0);
    static COMP_MAX_OCC: AtomicUsize = AtomicUsize::new(0);
    static TRAV_MAX_OCC: AtomicUsize = AtomicUsize::new(0);
    static LARGE_MAX_OCC: AtomicUsize = AtomicUsize::new(0);

    #[derive(Debug, Clone, Copy)]
    pub struct MetricsSnapshot {
        pub requests_submitted: u64,
        pub requests_executed: u64,
        pub completions_posted: u64,
        pub traversals_posted: u64,
        pub large_values_posted: u64,
        pub records_dropped: u64,
        pub alloc_failed: u64,
        pub idle_yields: u64,
        pub req_occ: usize,
        pub comp_occ: usize,
        pub trav_occ: usize,
        pub large_occ: usize,
        pub req_max_occ: usize,
        pub comp_max_occ: usize,
        pub trav_max_occ: usize,
        pub large_max_occ: usize,
    }

    fn gauges(channel: Channel) -> (&'static AtomicUsize, &'static AtomicUsize) {
        match channel {
            Channel::Request => (&REQ_OCC, &REQ_MAX_OCC),
            Channel::Completion => (&COMP_OCC, &COMP_MAX_OCC),
            Channel::Traverse => (&TRAV_OCC, &TRAV_MAX_OCC),
            Channel::LargeValue => (&LARGE_OCC, &LARGE_MAX_OCC),
        }
    }

    fn update_max(target: &AtomicUsize, value: usize) {
        let mut prev = target.load(Ordering::Relaxed);
        while value > prev {
            match target.compare_exchange_weak(prev, value, Ordering::Relaxed, Ordering::Relaxed) {
                Ok(_) => break,
                Err(next) => prev = next,
            }
        }
    }

    pub fn inc_occ(channel: Channel) {
        let (occ, max) = gauges(channel);
        let v = occ.fetch_add(1, Ordering::Relaxed).saturating_add(1);
        update_max(max, v);
    }

    /// Saturates at zero: a consumer may pop before a racing producer's
    /// increment lands.
    pub fn dec_occ(channel: Channel) {
        let _ = gauges(channel)
            .0
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1));
    }

    pub fn inc_requests_submitted() {
        REQUESTS_SUBMITTED.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_requests_executed() {
        REQUESTS_EXECUTED.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_posted(channel: Channel) {
        let counter = match channel {
            Channel::Completion => &COMPLETIONS_POSTED,
            Channel::Traverse => &TRAVERSALS_POSTED,
            Channel::LargeValue => &LARGE_VALUES_POSTED,
            Channel::Request => return,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_records_dropped() {
        RECORDS_DROPPED.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_alloc_failed() {
        ALLOC_FAILED.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_idle_yields() {
        IDLE_YIELDS.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot() -> MetricsSnapshot {
        MetricsSnapshot {
            requests_submitted: REQUESTS_SUBMITTED.load(Ordering::Relaxed),
            requests_executed: REQUESTS_EXECUTED.load(Ordering::Relaxed),
            completions_posted: COMPLETIONS_POSTED.load(Ordering::Relaxed),
            traversals_posted: TRAVERSALS_POSTED.load(Ordering::Relaxed),
            large_values_posted: LARGE_VALUES_POSTED.load(Ordering::Relaxed),
            records_dropped: RECORDS_DROPPED.load(Ordering::Relaxed),
            alloc_failed: ALLOC_FAILED.load(Ordering::Relaxed),
            idle_yields: IDLE_YIELDS.load(Ordering::Relaxed),
            req_occ: REQ_OCC.load(Ordering::Relaxed),
            comp_occ: COMP_OCC.load(Ordering::Relaxed),
            trav_occ: TRAV_OCC.load(Ordering::Relaxed),
            large_occ: LARGE_OCC.load(Ordering::Relaxed),
            req_max_occ: REQ_MAX_OCC.load(Ordering::Relaxed),
            comp_max_occ: COMP_MAX_OCC.load(Ordering::Relaxed),
            trav_max_occ: TRAV_MAX_OCC.load(Ordering::Relaxed),
            large_max_occ: LARGE_MAX_OCC.load(Ordering::Relaxed),
        }
    }

    pub fn spawn_reporter() {
        const INTERVAL_SECS: u64 = 10;
        std::thread::spawn(|| {
            let mut last = snapshot();
            loop {
                std::thread::sleep(Duration::from_secs(INTERVAL_SECS));
                let snap = snapshot();
                let submitted_d = snap
                    .requests_submitted
                    .saturating_sub(last.requests_submitted);
                let executed_d = snap
                    .requests_executed
                    .saturating_sub(last.requests_executed);
                let comp_d = snap
                    .completions_posted
                    .saturating_sub(last.completions_posted);
                let trav_d = snap
                    .traversals_posted
                    .saturating_sub(last.traversals_posted);
                let large_d = snap
                    .large_values_posted
                    .saturating_sub(last.large_values_posted);
                let dropped_d = snap.records_dropped.saturating_sub(last.records_dropped);
                let idle_d = snap.idle_yields.saturating_sub(last.idle_yields);
                let idle_pct = if idle_d + executed_d > 0 {
                    100.0 * (idle_d as f64 / (idle_d + executed_d) as f64)
                } else {
                    0.0
                };
                tracing::info!(
                    interval_secs = INTERVAL_SECS,
                    submitted = submitted_d,
                    executed = executed_d,
                    completions = comp_d,
                    traversals = trav_d,
                    large_values = large_d,
                    dropped = dropped_d,
                    alloc_failed = snap.alloc_failed,
                    idle_pct = (idle_pct * 10.0).round() / 10.0,
                    req_occ = snap.req_occ,
                    comp_occ = snap.comp_occ,
                    trav_occ = snap.trav_occ,
                    large_occ = snap.large_occ,
                    req_max = snap.req_max_occ,
                    comp_max = snap.comp_max_occ,
                    trav_max = snap.trav_max_occ,
                    large_max = snap.large_max_occ,
                    "metrics delta"
                );
                last = snap;
            }
        });
    }
}

#[cfg(not(feature = "metrics"))]
#[allow(dead_code)]
mod imp {
    use super::Channel;

    #[derive(Debug, Clone, Copy, Default)]
    pub struct MetricsSnapshot {
        pub requests_submitted: u64,
        pub requests_executed: u64,
        pub completions_posted: u64,
        pub traversals_posted: u64,
        pub large_values_posted: u64,
        pub records_dropped: u64,
        pub alloc_failed: u64,
        pub idle_yields: u64,
        pub req_occ: usize,
        pub comp_occ: usize,
        pub trav_occ: usize,
        pub large_occ: usize,
        pub req_max_occ: usize,
        pub comp_max_occ: usize,
        pub trav_max_occ: usize,
        pub large_max_occ: usize,
    }

    #[inline(always)]
    pub fn inc_occ(_: Channel) {}
    #[inline(always)]
    pub fn dec_occ(_: Channel) {}
    #[inline(always)]
    pub fn inc_requests_submitted() {}
    #[inline(always)]
    pub fn inc_requests_executed() {}
    #[inline(always)]
    pub fn inc_posted(_: Channel) {}
    #[inline(always)]
    pub fn inc_records_dropped() {}
    #[inline(always)]
    pub fn inc_alloc_failed() {}
    #[inline(always)]
    pub fn inc_idle_yields() {}
    pub fn snapshot() -> MetricsSnapshot {
        MetricsSnapshot::default()
    }
    pub fn spawn_reporter() {}
}

pub use imp::*;
