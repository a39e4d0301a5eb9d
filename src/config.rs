//! Worker pool sizing and operational configuration.
//!
//! Record-layout constants (key capacity, inline value size, sentinels) live in `constants`.

/// Workers started when the caller does not say otherwise.
pub const DEFAULT_WORKERS: usize = 4;

/// Upper bound on cooperatively scheduled workers sharing the execution thread.
pub const MAX_WORKERS: usize = 256;

/// Versions retained by the in-memory engine when no history length is given.
pub const DEFAULT_HISTORY_LENGTH: u64 = 40;

/// Name of the OS thread hosting the worker runtime.
pub const WORKER_THREAD_NAME: &str = "trie-fifo-workers";

const _: () = assert!(DEFAULT_WORKERS >= 1 && DEFAULT_WORKERS <= MAX_WORKERS);
const _: () = assert!(DEFAULT_HISTORY_LENGTH > 0);

/// Runtime knobs for [`Pipeline::start_with`](crate::pipeline::Pipeline::start_with).
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub num_workers: usize,
    pub thread_name: String,
}

impl PipelineConfig {
    pub fn with_workers(num_workers: usize) -> Self {
        Self {
            num_workers,
            ..Self::default()
        }
    }

    /// Worker count clamped to `1..=MAX_WORKERS`; zero means one worker.
    pub fn effective_workers(&self) -> usize {
        self.num_workers.clamp(1, MAX_WORKERS)
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            num_workers: DEFAULT_WORKERS,
            thread_name: WORKER_THREAD_NAME.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_workers_means_one() {
        assert_eq!(PipelineConfig::with_workers(0).effective_workers(), 1);
    }

    #[test]
    fn worker_count_is_capped() {
        assert_eq!(
            PipelineConfig::with_workers(MAX_WORKERS + 10).effective_workers(),
            MAX_WORKERS
        );
    }

    #[test]
    fn default_uses_named_thread() {
        let cfg = PipelineConfig::default();
        assert_eq!(cfg.effective_workers(), DEFAULT_WORKERS);
        assert_eq!(cfg.thread_name, WORKER_THREAD_NAME);
    }
}
