use std::time::Duration;

use crate::fetcher::{DEFAULT_BLOB_SIZE_LIMIT, DEFAULT_FETCH_CONCURRENCY};

/// Bounds and knobs for one ingestion run. Every fan-out in the stage graph
/// is capped by one of these numbers; nothing spawns unbounded work.
#[derive(Debug, Clone)]
pub struct PipelineTuning {
    pub fetch_concurrency: usize,
    pub parse_concurrency: usize,
    pub llm_concurrency: usize,
    pub embed_concurrency: usize,
    /// Files handled per bucket; a bucket is the smallest progress unit.
    pub bucket_size: usize,
    /// Progress writes are coalesced to at most one per interval.
    pub progress_interval: Duration,
    /// Most-imported files feeding the overview prompt.
    pub overview_top_k: usize,
    pub blob_size_limit: u64,
    /// Ceiling for one LLM call.
    pub llm_timeout: Duration,
}

impl Default for PipelineTuning {
    fn default() -> Self {
        Self {
            fetch_concurrency: DEFAULT_FETCH_CONCURRENCY,
            parse_concurrency: std::thread::available_parallelism()
                .map(std::num::NonZeroUsize::get)
                .unwrap_or(4),
            llm_concurrency: 6,
            embed_concurrency: 4,
            bucket_size: 100,
            progress_interval: Duration::from_millis(500),
            overview_top_k: 20,
            blob_size_limit: DEFAULT_BLOB_SIZE_LIMIT,
            llm_timeout: Duration::from_secs(60),
        }
    }
}
