//! Worker configuration.

use std::time::Duration;

use verity_core::defaults;

/// Configuration for the queue consumer.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Ready partition key.
    pub ready_queue: String,
    /// In-processing partition key.
    pub processing_queue: String,
    /// Prefix of per-job retry counter keys.
    pub retry_key_prefix: String,
    /// Failed attempts after which a job is poisoned.
    pub max_job_retries: u32,
    /// Consecutive empty polls before the loop stops on its own.
    pub max_idle_polls: u32,
    /// Upper bound of one blocking lease poll.
    pub lease_timeout: Duration,
    /// Images per inference call.
    pub inference_batch_size: usize,
    /// Lifetime of the signed report URL.
    pub signed_url_ttl: Duration,
    /// First backoff delay after the queue backend becomes unreachable.
    pub reconnect_backoff: Duration,
    /// Backoff ceiling.
    pub reconnect_backoff_max: Duration,
    /// Optional deadline for one processing attempt.
    pub job_timeout: Option<Duration>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            ready_queue: defaults::READY_QUEUE.to_string(),
            processing_queue: defaults::PROCESSING_QUEUE.to_string(),
            retry_key_prefix: defaults::RETRY_KEY_PREFIX.to_string(),
            max_job_retries: defaults::MAX_JOB_RETRIES,
            max_idle_polls: defaults::MAX_IDLE_POLLS,
            lease_timeout: Duration::from_secs(defaults::LEASE_TIMEOUT_SECS),
            inference_batch_size: defaults::INFERENCE_BATCH_SIZE,
            signed_url_ttl: Duration::from_secs(defaults::SIGNED_URL_TTL_SECS),
            reconnect_backoff: Duration::from_millis(defaults::QUEUE_RECONNECT_BACKOFF_MS),
            reconnect_backoff_max: Duration::from_millis(defaults::QUEUE_RECONNECT_BACKOFF_MAX_MS),
            job_timeout: None,
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.parse::<T>().ok())
}

impl WorkerConfig {
    /// Create config from environment variables (with defaults).
    ///
    /// | Variable | Default | Description |
    /// |----------|---------|-------------|
    /// | `READY_QUEUE` | `task_queue` | Ready partition key |
    /// | `PROCESSING_QUEUE` | `task_queue:PROGRESSED` | In-processing partition key |
    /// | `RETRY_KEY_PREFIX` | `job_retry:` | Retry counter key prefix |
    /// | `MAX_JOB_RETRIES` | `5` | Failed attempts before a job is poisoned |
    /// | `MAX_IDLE_POLLS` | `5` | Consecutive empty polls before idle shutdown |
    /// | `LEASE_TIMEOUT_SECS` | `5` | Blocking lease poll timeout |
    /// | `INFERENCE_BATCH_SIZE` | `2` | Images per inference call |
    /// | `SIGNED_URL_TTL_SECS` | `86400` | Report link lifetime |
    /// | `QUEUE_RECONNECT_BACKOFF_MS` | `500` | Initial backoff when the queue is unreachable (doubles, max 30s) |
    /// | `JOB_TIMEOUT_SECS` | unset | Per-attempt deadline; unset disables it |
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(v) = std::env::var("READY_QUEUE") {
            config.ready_queue = v;
        }
        if let Ok(v) = std::env::var("PROCESSING_QUEUE") {
            config.processing_queue = v;
        }
        if let Ok(v) = std::env::var("RETRY_KEY_PREFIX") {
            config.retry_key_prefix = v;
        }
        if let Some(n) = env_parse::<u32>("MAX_JOB_RETRIES") {
            config.max_job_retries = n.max(1);
        }
        if let Some(n) = env_parse::<u32>("MAX_IDLE_POLLS") {
            config.max_idle_polls = n.max(1);
        }
        if let Some(secs) = env_parse::<u64>("LEASE_TIMEOUT_SECS") {
            config.lease_timeout = Duration::from_secs(secs.max(1));
        }
        if let Some(n) = env_parse::<usize>("INFERENCE_BATCH_SIZE") {
            config.inference_batch_size = n.max(1);
        }
        if let Some(secs) = env_parse::<u64>("SIGNED_URL_TTL_SECS") {
            config.signed_url_ttl = Duration::from_secs(secs);
        }
        if let Some(ms) = env_parse::<u64>("QUEUE_RECONNECT_BACKOFF_MS") {
            config.reconnect_backoff = Duration::from_millis(ms.max(1));
        }
        config.job_timeout = env_parse::<u64>("JOB_TIMEOUT_SECS")
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs);

        config
    }

    /// Use different partition keys.
    pub fn with_queues(mut self, ready: impl Into<String>, processing: impl Into<String>) -> Self {
        self.ready_queue = ready.into();
        self.processing_queue = processing.into();
        self
    }

    pub fn with_retry_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.retry_key_prefix = prefix.into();
        self
    }

    pub fn with_max_job_retries(mut self, n: u32) -> Self {
        self.max_job_retries = n.max(1);
        self
    }

    pub fn with_max_idle_polls(mut self, n: u32) -> Self {
        self.max_idle_polls = n.max(1);
        self
    }

    pub fn with_lease_timeout(mut self, timeout: Duration) -> Self {
        self.lease_timeout = timeout;
        self
    }

    pub fn with_inference_batch_size(mut self, n: usize) -> Self {
        self.inference_batch_size = n.max(1);
        self
    }

    pub fn with_reconnect_backoff(mut self, initial: Duration, max: Duration) -> Self {
        self.reconnect_backoff = initial;
        self.reconnect_backoff_max = max.max(initial);
        self
    }

    pub fn with_job_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.job_timeout = timeout;
        self
    }
}
