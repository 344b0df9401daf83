//! # verity-jobs
//!
//! Reliable job processing for verity.
//!
//! This crate provides:
//! - A queue consumer with at-least-once leasing over two list partitions
//! - Retry counting with a poison threshold
//! - The batch pipeline: manifest, classification, report, link, email
//! - Idle and signal-driven shutdown
//! - Worker events via a broadcast channel
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use verity_db::{Database, HttpObjectStorage, RedisQueue, StorageConfig};
//! use verity_inference::HttpClassifier;
//! use verity_jobs::{
//!     BatchProcessor, PdfReportRenderer, QueueConsumer, ResendNotifier, ShutdownSignal,
//!     WorkerConfig,
//! };
//!
//! let db = Database::connect("postgres://...").await?;
//! let queue = RedisQueue::connect("redis://localhost:6379").await?;
//! let processor = BatchProcessor::new(
//!     Arc::new(HttpObjectStorage::new(StorageConfig::from_env()?)?),
//!     Arc::new(HttpClassifier::from_env()?),
//!     Arc::new(PdfReportRenderer::new()),
//!     Arc::new(ResendNotifier::from_env()?),
//! );
//!
//! let consumer = QueueConsumer::new(
//!     Arc::new(queue),
//!     Arc::new(db.jobs.clone()),
//!     processor,
//!     WorkerConfig::from_env(),
//! );
//! let handle = consumer.start(ShutdownSignal::new());
//!
//! let mut events = handle.events();
//! while let Ok(event) = events.recv().await {
//!     println!("Event: {:?}", event);
//! }
//!
//! let reason = handle.join().await?;
//! ```

pub mod config;
pub mod consumer;
pub mod notify;
pub mod pipeline;
pub mod producer;
pub mod recovery;
pub mod report;
pub mod retry;
pub mod shutdown;

// Re-export core types
pub use verity_core::*;

pub use config::WorkerConfig;
pub use consumer::{JobOutcome, QueueConsumer, WorkerEvent, WorkerHandle};
pub use notify::{report_email_html, NotifierConfig, ResendNotifier};
pub use pipeline::BatchProcessor;
pub use producer::{descriptor_for, enqueue, submit_job, upload_inputs, EnqueueRequest};
pub use recovery::{queue_stats, recover_in_processing, QueueStats};
pub use report::{ai_percentage, PdfReportRenderer};
pub use retry::{RetryDecision, RetryPolicy};
pub use shutdown::{Backoff, ShutdownController, ShutdownSignal, StopReason};
