use std::time::Duration;
use typed_builder::TypedBuilder;
use warranty_core::batch::DEFAULT_MAX_RETRIES;

/// Tuning knobs for the batch engine.
#[derive(Debug, Clone, TypedBuilder)]
pub struct EngineSettings {
    /// Size of the worker pool drawing candidates for one batch.
    #[builder(default = 4)]
    pub workers: usize,

    /// Resolved slots per commit. Each commit makes progress durable.
    #[builder(default = 250)]
    pub chunk_size: usize,

    /// Capacity of the bounded slot queue feeding the workers.
    #[builder(default = 1024)]
    pub queue_capacity: usize,

    /// Retry budget used when a batch request does not name one.
    #[builder(default = DEFAULT_MAX_RETRIES)]
    pub default_max_retries: u32,

    /// A batch is marked `failed` once failed slots exceed this share of
    /// the requested quantity.
    #[builder(default = 10)]
    pub failure_threshold_percent: u32,

    /// Base delay before retrying a chunk commit after a transient store
    /// error. Doubles on each attempt.
    #[builder(default = Duration::from_millis(50))]
    pub commit_backoff: Duration,

    /// Number of commit samples used to estimate the generation rate.
    #[builder(default = 8)]
    pub rate_window: usize,

    /// Mixed into the generator's entropy source so that two engines
    /// sharing a store draw from different code spaces.
    #[builder(default = 0)]
    pub worker_seed: u16,

    /// Deadline for each request-scoped service call.
    #[builder(default = Duration::from_secs(10))]
    pub request_timeout: Duration,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self::builder().build()
    }
}
