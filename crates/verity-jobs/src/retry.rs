//! Retry / poison policy.
//!
//! Owns the retry counter and the failure-path release of a lease. On each
//! failed attempt the counter is incremented; below the limit the original
//! entry is moved back to the ready tail, at the limit the job is marked
//! FAILED and dropped from the queue.

use tracing::{error, info, warn};

use verity_core::{Error, JobRecordStore, JobStatus, QueueBackend, Result};

use crate::config::WorkerConfig;

/// What the policy did with a failed attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Entry moved back to the ready tail.
    Requeued { attempt: u32 },
    /// Job marked FAILED and removed from the queue.
    Poisoned { attempts: u32 },
}

/// Retry policy bound to one pair of partitions.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    ready: String,
    processing: String,
    retry_key_prefix: String,
    max_retries: u32,
}

impl RetryPolicy {
    pub fn new(config: &WorkerConfig) -> Self {
        Self {
            ready: config.ready_queue.clone(),
            processing: config.processing_queue.clone(),
            retry_key_prefix: config.retry_key_prefix.clone(),
            max_retries: config.max_job_retries,
        }
    }

    pub fn counter_key(&self, job_id: &str) -> String {
        format!("{}{}", self.retry_key_prefix, job_id)
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Resolve a failed attempt of `job_id` whose lease is `entry`.
    ///
    /// Errors when the queue backend fails, or when the FAILED write fails
    /// for any reason other than the record already being terminal. The
    /// entry then stays in the in-processing partition for operator recovery,
    /// and since the counter is left at the limit the next failure poisons
    /// again.
    pub async fn on_failure(
        &self,
        queue: &dyn QueueBackend,
        store: &dyn JobRecordStore,
        job_id: &str,
        entry: &str,
    ) -> Result<RetryDecision> {
        let key = self.counter_key(job_id);
        let count = queue.incr_counter(&key).await?;
        let attempt = u32::try_from(count).unwrap_or(u32::MAX);

        if attempt >= self.max_retries {
            match store
                .update_job_status(job_id, JobStatus::Failed, None)
                .await
            {
                Ok(()) => {}
                Err(e) if e.is_logic_error() => {
                    error!(
                        subsystem = "jobs",
                        component = "retry",
                        job_id,
                        error = %e,
                        "Poisoned job already terminal; releasing entry"
                    );
                }
                Err(e) => {
                    error!(
                        subsystem = "jobs",
                        component = "retry",
                        job_id,
                        error = %e,
                        "Failed to mark poisoned job FAILED; entry left in processing"
                    );
                    return Err(e);
                }
            }
            queue.remove_entry(&self.processing, entry).await?;
            queue.delete_counter(&key).await?;

            error!(
                subsystem = "jobs",
                component = "retry",
                op = "poison",
                job_id,
                attempt,
                max_retries = self.max_retries,
                "Job permanently failed"
            );
            return Ok(RetryDecision::Poisoned { attempts: attempt });
        }

        let moved = queue.requeue(&self.processing, &self.ready, entry).await?;
        if !moved {
            warn!(
                subsystem = "jobs",
                component = "retry",
                job_id,
                "Entry was no longer leased; nothing requeued"
            );
        }
        info!(
            subsystem = "jobs",
            component = "retry",
            op = "requeue",
            job_id,
            attempt,
            max_retries = self.max_retries,
            "Job requeued for retry"
        );
        Ok(RetryDecision::Requeued { attempt })
    }

    /// Drop an entry that cannot be decoded. No record or counter exists
    /// for it, so only the lease is released.
    pub async fn poison_malformed(
        &self,
        queue: &dyn QueueBackend,
        entry: &str,
        cause: &Error,
    ) -> Result<()> {
        queue.remove_entry(&self.processing, entry).await?;
        error!(
            subsystem = "jobs",
            component = "retry",
            op = "poison_malformed",
            error = %cause,
            entry_len = entry.len(),
            "Malformed queue entry discarded"
        );
        Ok(())
    }

    /// Forget the failure history of a job. Deleting an absent counter is fine.
    pub async fn clear(&self, queue: &dyn QueueBackend, job_id: &str) -> Result<()> {
        queue.delete_counter(&self.counter_key(job_id)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use verity_db::memory::{InMemoryJobStore, InMemoryQueue, QueueOp};

    fn policy() -> RetryPolicy {
        RetryPolicy::new(&WorkerConfig::default())
    }

    #[tokio::test]
    async fn test_requeue_below_limit() {
        let queue = InMemoryQueue::new();
        let store = InMemoryJobStore::new();
        store.insert_with_id("J1", "u1");
        queue.seed("task_queue:PROGRESSED", ["entry"]);

        let decision = policy().on_failure(&queue, &store, "J1", "entry").await.unwrap();
        assert_eq!(decision, RetryDecision::Requeued { attempt: 1 });
        assert_eq!(queue.snapshot("task_queue"), vec!["entry"]);
        assert!(queue.snapshot("task_queue:PROGRESSED").is_empty());
        assert_eq!(queue.counter("job_retry:J1"), Some(1));
    }

    #[tokio::test]
    async fn test_poison_at_limit() {
        let queue = InMemoryQueue::new();
        let store = InMemoryJobStore::new();
        store.insert_with_id("J1", "u1");
        queue.seed("task_queue:PROGRESSED", ["entry"]);
        queue.set_counter("job_retry:J1", 4);

        let decision = policy().on_failure(&queue, &store, "J1", "entry").await.unwrap();
        assert_eq!(decision, RetryDecision::Poisoned { attempts: 5 });
        assert!(queue.snapshot("task_queue").is_empty());
        assert!(queue.snapshot("task_queue:PROGRESSED").is_empty());
        assert_eq!(queue.counter("job_retry:J1"), None);
        assert_eq!(store.record("J1").unwrap().status, JobStatus::Failed);
    }

    #[tokio::test]
    async fn test_poison_still_releases_when_record_is_terminal() {
        let queue = InMemoryQueue::new();
        let store = InMemoryJobStore::new();
        store.insert_with_id("J1", "u1");
        store.force_status("J1", JobStatus::Done);
        queue.seed("task_queue:PROGRESSED", ["entry"]);
        queue.set_counter("job_retry:J1", 4);

        let decision = policy().on_failure(&queue, &store, "J1", "entry").await.unwrap();
        assert_eq!(decision, RetryDecision::Poisoned { attempts: 5 });
        assert!(queue.snapshot("task_queue:PROGRESSED").is_empty());
        assert_eq!(store.record("J1").unwrap().status, JobStatus::Done);
    }

    #[tokio::test]
    async fn test_poison_keeps_entry_when_failed_write_errors() {
        let queue = InMemoryQueue::new();
        let store = InMemoryJobStore::new();
        store.insert_with_id("J1", "u1");
        store.force_status("J1", JobStatus::Progressed);
        queue.seed("task_queue:PROGRESSED", ["entry"]);
        queue.set_counter("job_retry:J1", 4);
        store.fail_next_updates(1);

        let err = policy()
            .on_failure(&queue, &store, "J1", "entry")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Store(_)));
        assert_eq!(queue.snapshot("task_queue:PROGRESSED"), vec!["entry"]);
        assert!(queue.snapshot("task_queue").is_empty());
        assert_eq!(queue.counter("job_retry:J1"), Some(5));
        assert_eq!(store.record("J1").unwrap().status, JobStatus::Progressed);

        // Store is back: the next failure poisons for good.
        let decision = policy().on_failure(&queue, &store, "J1", "entry").await.unwrap();
        assert_eq!(decision, RetryDecision::Poisoned { attempts: 6 });
        assert!(queue.snapshot("task_queue:PROGRESSED").is_empty());
        assert_eq!(queue.counter("job_retry:J1"), None);
        assert_eq!(store.record("J1").unwrap().status, JobStatus::Failed);
    }

    #[tokio::test]
    async fn test_requeue_failure_keeps_entry() {
        let queue = InMemoryQueue::new();
        let store = InMemoryJobStore::new();
        store.insert_with_id("J1", "u1");
        queue.seed("task_queue:PROGRESSED", ["entry"]);
        queue.fail_next(QueueOp::Requeue, 1);

        let err = policy()
            .on_failure(&queue, &store, "J1", "entry")
            .await
            .unwrap_err();
        assert!(err.is_queue_unavailable());
        assert_eq!(queue.snapshot("task_queue:PROGRESSED"), vec!["entry"]);
        assert!(queue.snapshot("task_queue").is_empty());
    }

    #[tokio::test]
    async fn test_poison_malformed_removes_lease() {
        let queue = InMemoryQueue::new();
        queue.seed("task_queue:PROGRESSED", ["not json"]);
        let cause = Error::MalformedEntry("expected value".to_string());

        policy().poison_malformed(&queue, "not json", &cause).await.unwrap();
        assert!(queue.snapshot("task_queue:PROGRESSED").is_empty());
        assert!(queue.snapshot("task_queue").is_empty());
    }
}
