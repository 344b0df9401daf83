//! Reliable queue consumer.
//!
//! A consumer leases one entry at a time by atomically moving it from the
//! ready partition to the in-processing partition, drives it through the
//! [`BatchProcessor`], and then releases the lease exactly once: by removal
//! on success, or through the [`RetryPolicy`] on failure. An entry whose
//! attempt was interrupted by a crash stays in the in-processing partition
//! until an operator recovers it.
//!
//! Any number of consumers may share one queue. Each is strictly
//! sequential: the next lease is only taken after the current attempt is
//! resolved.

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

use verity_core::defaults::EVENT_BUS_CAPACITY;
use verity_core::{
    Error, JobDescriptor, JobRecordStore, JobStatus, QueueBackend, Result,
};

use crate::config::WorkerConfig;
use crate::pipeline::BatchProcessor;
use crate::retry::{RetryDecision, RetryPolicy};
use crate::shutdown::{Backoff, ShutdownController, ShutdownSignal, StopReason};

/// Event emitted by the consumer.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerEvent {
    /// Worker started.
    WorkerStarted,
    /// An entry was leased and decoded.
    JobLeased { job_id: String },
    /// A job finished and its lease was released.
    JobCompleted { job_id: String, report_path: String },
    /// A failed attempt was put back on the ready partition.
    JobRequeued { job_id: String, attempt: u32 },
    /// A job exhausted its retries and was marked FAILED.
    JobPoisoned { job_id: String, attempts: u32 },
    /// An entry could not be decoded and was discarded.
    MalformedEntry { error: String },
    /// The queue backend could not be reached.
    QueueUnavailable { error: String, backoff_ms: u64 },
    /// Worker stopped.
    WorkerStopped { reason: StopReason },
}

/// How one leased entry was resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Completed { job_id: String },
    Requeued { job_id: String, attempt: u32 },
    Poisoned { job_id: String, attempts: u32 },
    Malformed,
    /// The lease could not be released because the queue backend failed;
    /// the entry remains in the in-processing partition.
    Unresolved { job_id: Option<String> },
}

/// Handle for controlling a running consumer.
pub struct WorkerHandle {
    signal: ShutdownSignal,
    event_rx: broadcast::Receiver<WorkerEvent>,
    task: JoinHandle<StopReason>,
}

impl WorkerHandle {
    /// Ask the consumer to stop before its next lease.
    pub fn shutdown(&self) {
        self.signal.trigger();
    }

    /// Get a receiver for worker events.
    pub fn events(&self) -> broadcast::Receiver<WorkerEvent> {
        self.event_rx.resubscribe()
    }

    /// Wait for the consumer to stop.
    pub async fn join(self) -> Result<StopReason> {
        self.task
            .await
            .map_err(|e| Error::Internal(format!("Worker task failed: {}", e)))
    }
}

/// Queue consumer with its injected backends.
pub struct QueueConsumer {
    queue: Arc<dyn QueueBackend>,
    store: Arc<dyn JobRecordStore>,
    processor: BatchProcessor,
    retry: RetryPolicy,
    config: WorkerConfig,
    event_tx: broadcast::Sender<WorkerEvent>,
}

impl QueueConsumer {
    pub fn new(
        queue: Arc<dyn QueueBackend>,
        store: Arc<dyn JobRecordStore>,
        processor: BatchProcessor,
        config: WorkerConfig,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(EVENT_BUS_CAPACITY);
        let processor = processor
            .with_batch_size(config.inference_batch_size)
            .with_signed_url_ttl(config.signed_url_ttl);
        Self {
            queue,
            store,
            processor,
            retry: RetryPolicy::new(&config),
            config,
            event_tx,
        }
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    /// Get a receiver for worker events.
    pub fn events(&self) -> broadcast::Receiver<WorkerEvent> {
        self.event_tx.subscribe()
    }

    fn emit(&self, event: WorkerEvent) {
        let _ = self.event_tx.send(event);
    }

    /// Spawn the loop and return a handle for control.
    pub fn start(self, signal: ShutdownSignal) -> WorkerHandle {
        let event_rx = self.event_tx.subscribe();
        let loop_signal = signal.clone();
        let task = tokio::spawn(async move { self.run(loop_signal).await });
        WorkerHandle {
            signal,
            event_rx,
            task,
        }
    }

    /// Lease the next entry, waiting up to the configured poll timeout.
    ///
    /// `Ok(None)` means the ready partition stayed empty for the whole poll.
    pub async fn lease_next(&self) -> Result<Option<String>> {
        self.queue
            .lease_next(
                &self.config.ready_queue,
                &self.config.processing_queue,
                self.config.lease_timeout,
            )
            .await
    }

    /// Run until the stop flag is set or the queue stays idle.
    ///
    /// The flag is only looked at between leases; a lease in progress and
    /// the attempt that follows always run to completion.
    #[instrument(skip_all, fields(subsystem = "jobs", component = "consumer"))]
    pub async fn run(&self, signal: ShutdownSignal) -> StopReason {
        let mut shutdown = ShutdownController::new(signal, self.config.max_idle_polls);
        let mut backoff = Backoff::new(
            self.config.reconnect_backoff,
            self.config.reconnect_backoff_max,
        );

        info!(
            ready = %self.config.ready_queue,
            processing = %self.config.processing_queue,
            max_job_retries = self.config.max_job_retries,
            max_idle_polls = self.config.max_idle_polls,
            lease_timeout_secs = self.config.lease_timeout.as_secs(),
            "Queue consumer started"
        );
        self.emit(WorkerEvent::WorkerStarted);

        let reason = loop {
            if let Some(reason) = shutdown.should_stop() {
                break reason;
            }

            match self.lease_next().await {
                Ok(Some(entry)) => {
                    shutdown.record_lease();
                    backoff.reset();
                    self.run_once(&entry).await;
                }
                Ok(None) => {
                    backoff.reset();
                    let idle_polls = shutdown.record_empty_poll();
                    debug!(
                        idle_polls,
                        max_idle_polls = self.config.max_idle_polls,
                        "No job available"
                    );
                }
                Err(e) => {
                    let delay = backoff.next_delay();
                    warn!(
                        error = %e,
                        backoff_ms = delay.as_millis() as u64,
                        "Queue backend unavailable, backing off"
                    );
                    self.emit(WorkerEvent::QueueUnavailable {
                        error: e.to_string(),
                        backoff_ms: delay.as_millis() as u64,
                    });
                    shutdown.signal().sleep_or_stop(delay).await;
                }
            }
        };

        info!(reason = %reason, "Queue consumer stopped");
        self.emit(WorkerEvent::WorkerStopped { reason });
        reason
    }

    /// Process one leased entry and release its lease.
    ///
    /// Never returns an error: every failure is resolved through the retry
    /// policy or, for an undecodable payload, by discarding the entry.
    pub async fn run_once(&self, entry: &str) -> JobOutcome {
        let job = match JobDescriptor::parse(entry) {
            Ok(job) => job,
            Err(e) => return self.discard_malformed(entry, e).await,
        };
        self.emit(WorkerEvent::JobLeased {
            job_id: job.job_id.clone(),
        });

        let start = Instant::now();
        match self.attempt(&job).await {
            Ok(report_path) => {
                info!(
                    job_id = %job.job_id,
                    user_id = %job.user_id,
                    duration_ms = start.elapsed().as_millis() as u64,
                    "Job completed"
                );
                if let Err(e) = self
                    .queue
                    .remove_entry(&self.config.processing_queue, entry)
                    .await
                {
                    error!(
                        job_id = %job.job_id,
                        error = %e,
                        "Failed to release completed job; entry left in processing"
                    );
                    return JobOutcome::Unresolved {
                        job_id: Some(job.job_id),
                    };
                }
                self.emit(WorkerEvent::JobCompleted {
                    job_id: job.job_id.clone(),
                    report_path,
                });
                JobOutcome::Completed { job_id: job.job_id }
            }
            Err(e) => {
                if e.is_logic_error() {
                    error!(job_id = %job.job_id, error = %e, "Job lifecycle violation");
                } else {
                    warn!(
                        job_id = %job.job_id,
                        error = %e,
                        duration_ms = start.elapsed().as_millis() as u64,
                        "Job attempt failed"
                    );
                }
                self.resolve_failure(&job.job_id, entry).await
            }
        }
    }

    /// Steps 1 to 8 of an attempt, bounded by the optional job deadline.
    async fn attempt(&self, job: &JobDescriptor) -> Result<String> {
        match self.config.job_timeout {
            Some(limit) => tokio::time::timeout(limit, self.process(job))
                .await
                .unwrap_or(Err(Error::Timeout(limit.as_secs()))),
            None => self.process(job).await,
        }
    }

    #[instrument(skip_all, fields(job_id = %job.job_id))]
    async fn process(&self, job: &JobDescriptor) -> Result<String> {
        // PROGRESSED is written before any side effect.
        self.store
            .update_job_status(&job.job_id, JobStatus::Progressed, None)
            .await?;

        let manifest = self.processor.load_manifest(job).await?;
        let results = self.processor.classify_images(job, &manifest).await?;
        let report_path = self.processor.publish_report(job, &results).await?;
        let url = self.processor.issue_link(job, &report_path).await?;

        self.store
            .update_job_status(&job.job_id, JobStatus::Done, Some(&report_path))
            .await?;
        self.retry.clear(self.queue.as_ref(), &job.job_id).await?;
        self.processor.notify(job, &url).await?;

        Ok(report_path)
    }

    async fn resolve_failure(&self, job_id: &str, entry: &str) -> JobOutcome {
        match self
            .retry
            .on_failure(self.queue.as_ref(), self.store.as_ref(), job_id, entry)
            .await
        {
            Ok(RetryDecision::Requeued { attempt }) => {
                self.emit(WorkerEvent::JobRequeued {
                    job_id: job_id.to_string(),
                    attempt,
                });
                JobOutcome::Requeued {
                    job_id: job_id.to_string(),
                    attempt,
                }
            }
            Ok(RetryDecision::Poisoned { attempts }) => {
                self.emit(WorkerEvent::JobPoisoned {
                    job_id: job_id.to_string(),
                    attempts,
                });
                JobOutcome::Poisoned {
                    job_id: job_id.to_string(),
                    attempts,
                }
            }
            Err(e) => {
                error!(
                    job_id,
                    error = %e,
                    "Retry policy could not resolve job; entry left in processing"
                );
                JobOutcome::Unresolved {
                    job_id: Some(job_id.to_string()),
                }
            }
        }
    }

    async fn discard_malformed(&self, entry: &str, cause: Error) -> JobOutcome {
        self.emit(WorkerEvent::MalformedEntry {
            error: cause.to_string(),
        });
        match self
            .retry
            .poison_malformed(self.queue.as_ref(), entry, &cause)
            .await
        {
            Ok(()) => JobOutcome::Malformed,
            Err(e) => {
                error!(error = %e, "Failed to discard malformed entry");
                JobOutcome::Unresolved { job_id: None }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use async_trait::async_trait;
    use verity_core::Notifier;
    use verity_db::memory::{InMemoryJobStore, InMemoryQueue, InMemoryStorage};
    use verity_inference::mock::MockClassifier;

    use crate::report::PdfReportRenderer;

    struct NullNotifier;

    #[async_trait]
    impl Notifier for NullNotifier {
        async fn send_notification(&self, _: &str, _: &str, _: &str) -> Result<()> {
            Ok(())
        }
    }

    fn consumer(queue: &InMemoryQueue, store: &InMemoryJobStore) -> QueueConsumer {
        let processor = BatchProcessor::new(
            Arc::new(InMemoryStorage::new()),
            Arc::new(MockClassifier::new()),
            Arc::new(PdfReportRenderer::new()),
            Arc::new(NullNotifier),
        );
        QueueConsumer::new(
            Arc::new(queue.clone()),
            Arc::new(store.clone()),
            processor,
            WorkerConfig::default(),
        )
    }

    #[tokio::test]
    async fn test_malformed_entry_discarded() {
        let queue = InMemoryQueue::new();
        let store = InMemoryJobStore::new();
        queue.seed("task_queue:PROGRESSED", ["{not json"]);
        let consumer = consumer(&queue, &store);
        let mut events = consumer.events();

        assert_eq!(consumer.run_once("{not json").await, JobOutcome::Malformed);
        assert!(queue.snapshot("task_queue:PROGRESSED").is_empty());
        assert!(queue.snapshot("task_queue").is_empty());
        assert!(matches!(
            events.try_recv().unwrap(),
            WorkerEvent::MalformedEntry { .. }
        ));
    }

    #[tokio::test]
    async fn test_missing_record_is_retried() {
        let queue = InMemoryQueue::new();
        let store = InMemoryJobStore::new();
        let entry = serde_json::json!({
            "job_id": "ghost",
            "user_id": "u1",
            "user_email": "u1@example.com",
            "bucket": "b",
            "input_prefix": "u1/ghost/input/",
            "manifest_path": "u1/ghost/manifest.json",
            "report_prefix": "u1/ghost/report/",
            "report_filename": "r.pdf",
            "created_at": "2026-01-05T10:15:30"
        })
        .to_string();
        queue.seed("task_queue:PROGRESSED", [entry.as_str()]);

        let outcome = consumer(&queue, &store).run_once(&entry).await;
        assert_eq!(
            outcome,
            JobOutcome::Requeued {
                job_id: "ghost".to_string(),
                attempt: 1
            }
        );
        assert_eq!(queue.snapshot("task_queue"), vec![entry]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_flag_set_before_start() {
        let queue = InMemoryQueue::new();
        let store = InMemoryJobStore::new();
        queue.seed("task_queue", ["{}"]);
        let signal = ShutdownSignal::new();
        signal.trigger();

        let reason = consumer(&queue, &store).run(signal).await;
        assert_eq!(reason, StopReason::Signal);
        assert_eq!(queue.lease_calls(), 0);
        assert_eq!(queue.snapshot("task_queue"), vec!["{}"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_handle_join_after_idle() {
        let queue = InMemoryQueue::new();
        let store = InMemoryJobStore::new();
        let handle = consumer(&queue, &store).start(ShutdownSignal::new());
        let reason = handle.join().await.unwrap();
        assert_eq!(reason, StopReason::Idle);
        assert_eq!(queue.lease_calls(), 5);
    }
}
