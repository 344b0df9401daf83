//! Structured logging field name constants for verity.
//!
//! Every crate uses these names for tracing fields so log aggregation can
//! query by the same keys across subsystems.
//!
//! ## Log Level Contract
//!
//! | Level | Usage |
//! |-------|-------|
//! | ERROR | Poisoned jobs, logic errors, lost queue connectivity |
//! | WARN  | Failed attempts that will be retried, malformed entries |
//! | INFO  | Lifecycle events (startup, shutdown), job completions |
//! | DEBUG | Lease polls, pipeline steps, config choices |
//! | TRACE | Per-image iteration |

// ─── Identity fields ───────────────────────────────────────────────────────

/// Subsystem originating the log event.
/// Values: "jobs", "db", "queue", "storage", "inference", "notify"
pub const SUBSYSTEM: &str = "subsystem";

/// Component within a subsystem.
/// Examples: "consumer", "retry_policy", "shutdown", "pipeline", "pool"
pub const COMPONENT: &str = "component";

/// Logical operation name.
/// Examples: "lease_next", "run_once", "requeue", "poison"
pub const OPERATION: &str = "op";

// ─── Entity fields ─────────────────────────────────────────────────────────

/// Job identifier being processed.
pub const JOB_ID: &str = "job_id";

/// Owning user identifier.
pub const USER_ID: &str = "user_id";

/// Storage bucket being accessed.
pub const BUCKET: &str = "bucket";

/// Object path or prefix being accessed.
pub const OBJECT_PATH: &str = "path";

// ─── Measurement fields ────────────────────────────────────────────────────

/// Wall-clock duration in milliseconds.
pub const DURATION_MS: &str = "duration_ms";

/// Attempt number (value of the retry counter after a failure).
pub const ATTEMPT: &str = "attempt";

/// Consecutive empty polls observed by the shutdown controller.
pub const IDLE_POLLS: &str = "idle_polls";

/// Number of images in a manifest or batch.
pub const IMAGE_COUNT: &str = "image_count";

// ─── Outcome fields ────────────────────────────────────────────────────────

/// Error message when an operation fails.
pub const ERROR_MSG: &str = "error";
