//! Operator tooling for the queue partitions.

use serde::Serialize;
use tracing::{info, warn};

use verity_core::{QueueBackend, Result};

use crate::config::WorkerConfig;

/// Lengths of both queue partitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub ready: u64,
    pub processing: u64,
}

pub async fn queue_stats(queue: &dyn QueueBackend, config: &WorkerConfig) -> Result<QueueStats> {
    Ok(QueueStats {
        ready: queue.list_len(&config.ready_queue).await?,
        processing: queue.list_len(&config.processing_queue).await?,
    })
}

/// Move every entry left in the in-processing partition back to the tail of
/// the ready partition.
///
/// Only safe while no consumer is running: a live consumer's lease would be
/// handed to a second consumer. Retry counters are left untouched, so a job
/// that keeps crashing its worker still reaches the poison threshold.
pub async fn recover_in_processing(
    queue: &dyn QueueBackend,
    config: &WorkerConfig,
) -> Result<usize> {
    let entries = queue.list_entries(&config.processing_queue).await?;
    let mut recovered = 0;

    for entry in &entries {
        if queue
            .requeue(&config.processing_queue, &config.ready_queue, entry)
            .await?
        {
            recovered += 1;
        } else {
            warn!(
                subsystem = "jobs",
                component = "recovery",
                "Entry disappeared from processing during recovery"
            );
        }
    }

    info!(
        subsystem = "jobs",
        component = "recovery",
        op = "recover",
        found = entries.len(),
        recovered,
        "Recovered in-processing entries"
    );
    Ok(recovered)
}
