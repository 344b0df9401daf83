//! Centralized default constants for verity.
//!
//! **This module is the single source of truth** for shared default values.
//! Crates and the worker binary reference these constants instead of
//! defining their own magic numbers.

// =============================================================================
// QUEUE
// =============================================================================

/// Redis list holding jobs awaiting a worker (the ready partition).
pub const READY_QUEUE: &str = "task_queue";

/// Redis list holding leased jobs (the in-processing partition).
pub const PROCESSING_QUEUE: &str = "task_queue:PROGRESSED";

/// Prefix for per-job retry counter keys (`job_retry:<job_id>`).
pub const RETRY_KEY_PREFIX: &str = "job_retry:";

/// Default Redis connection URL.
pub const REDIS_URL: &str = "redis://localhost:6379";

// =============================================================================
// WORKER
// =============================================================================

/// Failed attempts after which a job is poisoned (marked FAILED for good).
pub const MAX_JOB_RETRIES: u32 = 5;

/// Consecutive empty polls after which an idle worker stops.
pub const MAX_IDLE_POLLS: u32 = 5;

/// Upper bound for a single blocking lease poll, in seconds.
pub const LEASE_TIMEOUT_SECS: u64 = 5;

/// Initial backoff after the queue backend becomes unreachable.
pub const QUEUE_RECONNECT_BACKOFF_MS: u64 = 500;

/// Cap for the exponential reconnect backoff.
pub const QUEUE_RECONNECT_BACKOFF_MAX_MS: u64 = 30_000;

/// Capacity of the worker event broadcast channel.
pub const EVENT_BUS_CAPACITY: usize = 256;

// =============================================================================
// INFERENCE
// =============================================================================

/// Images submitted per inference call.
pub const INFERENCE_BATCH_SIZE: usize = 2;

/// Probability at or above which an image is labelled AI generated.
pub const PREDICTION_THRESHOLD: f32 = 0.40;

/// Default inference server URL.
pub const INFERENCE_URL: &str = "http://localhost:8501";

/// Default model name sent to the inference server.
pub const INFERENCE_MODEL: &str = "ai_vs_real_cnn";

/// Inference request timeout in seconds.
pub const INFERENCE_TIMEOUT_SECS: u64 = 120;

// =============================================================================
// STORAGE
// =============================================================================

/// Bucket used for user uploads and reports.
pub const STORAGE_BUCKET: &str = "user-uploads";

/// Default object storage URL.
pub const STORAGE_URL: &str = "http://localhost:54321";

/// Signed report URL lifetime (24 hours).
pub const SIGNED_URL_TTL_SECS: u64 = 86_400;

/// File name given to rendered reports.
pub const REPORT_FILENAME: &str = "ai_image_report.pdf";

/// Storage request timeout in seconds.
pub const STORAGE_TIMEOUT_SECS: u64 = 60;

// =============================================================================
// NOTIFICATION
// =============================================================================

/// Resend API base URL.
pub const RESEND_URL: &str = "https://api.resend.com";

/// Sender for completion emails.
pub const EMAIL_FROM: &str = "AI Image Detection <onboarding@resend.dev>";

/// Subject line of completion emails.
pub const EMAIL_SUBJECT: &str = "Your AI Image Detection Report is Ready";

// =============================================================================
// DATABASE
// =============================================================================

/// Default database URL.
pub const DATABASE_URL: &str = "postgres://localhost/verity";
