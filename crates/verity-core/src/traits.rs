//! Core traits for verity's external collaborators.
//!
//! The worker core only talks to the outside world through these traits,
//! so every backend can be swapped for an in-memory double in tests.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;
use crate::models::*;

// =============================================================================
// QUEUE BACKEND
// =============================================================================

/// List-based work queue with an atomic pop-and-move primitive.
#[async_trait]
pub trait QueueBackend: Send + Sync {
    /// Atomically move the head of `ready` to the tail of `processing`,
    /// blocking up to `timeout` while `ready` is empty.
    ///
    /// Returns `Ok(None)` only for a genuinely empty queue. Connectivity
    /// problems are reported as [`crate::Error::Queue`].
    async fn lease_next(
        &self,
        ready: &str,
        processing: &str,
        timeout: Duration,
    ) -> Result<Option<String>>;

    /// Remove the first occurrence of `entry` from `list`.
    /// Returns whether anything was removed.
    async fn remove_entry(&self, list: &str, entry: &str) -> Result<bool>;

    /// Append `entry` to the tail of `list`.
    async fn push_tail(&self, list: &str, entry: &str) -> Result<()>;

    /// Remove `entry` from `processing` and append it to `ready` as one
    /// atomic step. The entry is never in both lists, nor in neither.
    ///
    /// Nothing is pushed when `entry` was not in `processing`; the return
    /// value says whether the move happened.
    async fn requeue(&self, processing: &str, ready: &str, entry: &str) -> Result<bool>;

    /// Increment a counter, creating it at 1 if absent.
    async fn incr_counter(&self, key: &str) -> Result<i64>;

    /// Delete a counter. Deleting an absent counter is not an error.
    async fn delete_counter(&self, key: &str) -> Result<()>;

    /// Current value of a counter, `None` if absent.
    async fn get_counter(&self, key: &str) -> Result<Option<i64>>;

    /// Number of entries in `list`.
    async fn list_len(&self, list: &str) -> Result<u64>;

    /// All entries of `list`, head first.
    async fn list_entries(&self, list: &str) -> Result<Vec<String>>;
}

// =============================================================================
// JOB RECORD STORE
// =============================================================================

/// Durable store of user-visible job records.
#[async_trait]
pub trait JobRecordStore: Send + Sync {
    /// Create a record in status QUEUED and return its identifier.
    async fn create_job(&self, user_id: &str) -> Result<String>;

    /// Set the status (and optionally the report location) of a job.
    ///
    /// Fails with [`crate::Error::Store`] when no record matched and with
    /// [`crate::Error::InvalidTransition`] when the record is terminal.
    async fn update_job_status(
        &self,
        job_id: &str,
        status: JobStatus,
        report_path: Option<&str>,
    ) -> Result<()>;

    /// Get a job record by identifier.
    async fn get_job(&self, job_id: &str) -> Result<Option<JobRecord>>;

    /// All jobs of a user, newest first.
    async fn list_jobs_for_user(&self, user_id: &str) -> Result<Vec<JobRecord>>;

    /// Delete a job record. Fails with [`crate::Error::Store`] when absent.
    async fn delete_job(&self, job_id: &str) -> Result<()>;
}

// =============================================================================
// OBJECT STORAGE
// =============================================================================

/// Bucket/path object storage.
#[async_trait]
pub trait ObjectStorage: Send + Sync {
    /// Download an object.
    async fn download(&self, bucket: &str, path: &str) -> Result<Vec<u8>>;

    /// Upload an object, overwriting any existing one at `path`.
    async fn upload(
        &self,
        bucket: &str,
        path: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<()>;

    /// Full paths of all objects directly under `prefix`.
    async fn list(&self, bucket: &str, prefix: &str) -> Result<Vec<String>>;

    /// Remove the given objects.
    async fn remove(&self, bucket: &str, paths: &[String]) -> Result<()>;

    /// Issue a time-limited download URL.
    async fn signed_url(&self, bucket: &str, path: &str, ttl: Duration) -> Result<String>;

    /// Delete every object under `prefix`, returning how many were removed.
    async fn list_and_delete(&self, bucket: &str, prefix: &str) -> Result<usize> {
        let paths = self.list(bucket, prefix).await?;
        if paths.is_empty() {
            return Ok(0);
        }
        self.remove(bucket, &paths).await?;
        Ok(paths.len())
    }
}

// =============================================================================
// INFERENCE
// =============================================================================

/// Image classifier (AI generated vs. real).
#[async_trait]
pub trait Classifier: Send + Sync {
    /// Classify a batch, returning one prediction per image in input order.
    async fn classify(&self, batch: &[PreparedImage]) -> Result<Vec<Prediction>>;

    /// Largest batch accepted by [`Classifier::classify`].
    fn max_batch_size(&self) -> usize;

    /// Get the model name being used.
    fn model_name(&self) -> &str;
}

// =============================================================================
// REPORTING & NOTIFICATION
// =============================================================================

/// Renders ordered results into a report artifact.
pub trait ReportRenderer: Send + Sync {
    fn render(&self, results: &[ImageResult]) -> Result<ReportArtifact>;
}

/// Delivers the completion notification.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send_notification(&self, address: &str, recipient_name: &str, url: &str)
        -> Result<()>;
}
