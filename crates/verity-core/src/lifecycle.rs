//! Job lifecycle state machine.
//!
//! ```text
//! QUEUED ──► PROGRESSED ──► DONE
//!   │            │  ▲
//!   │            └──┘ (re-lease after requeue)
//!   │            │
//!   └────────────┴──► FAILED
//! ```
//!
//! Requeueing is not a state: the record stays PROGRESSED while a new queue
//! entry waits, and the next lease sets PROGRESSED again. DONE and FAILED are
//! terminal; any update attempt on them is a logic error.

use crate::error::{Error, Result};
use crate::models::JobStatus;

impl JobStatus {
    /// No further transitions are permitted.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Done | JobStatus::Failed)
    }

    /// Whether a record in this status may be updated to `next`.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        use JobStatus::*;
        match (self, next) {
            (Queued, Progressed) => true,
            (Progressed, Progressed) => true,
            (Progressed, Done) => true,
            // Poisoning may happen before PROGRESSED was ever written, e.g.
            // when every attempt failed at the status update itself.
            (Queued | Progressed, Failed) => true,
            _ => false,
        }
    }
}

/// Check a transition, returning [`Error::InvalidTransition`] when illegal.
pub fn validate_transition(job_id: &str, from: JobStatus, to: JobStatus) -> Result<()> {
    if from.can_transition_to(to) {
        Ok(())
    } else {
        Err(Error::InvalidTransition {
            job_id: job_id.to_string(),
            from,
            to,
        })
    }
}
