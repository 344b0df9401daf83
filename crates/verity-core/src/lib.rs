//! # verity-core
//!
//! Core types, traits, and abstractions for the verity image-analysis worker.
//!
//! This crate provides the job descriptor and record models, the job
//! lifecycle state machine, and the collaborator traits the worker core is
//! written against.

pub mod defaults;
pub mod error;
pub mod lifecycle;
pub mod logging;
pub mod models;
pub mod traits;

// Re-export commonly used types at crate root
pub use error::{Error, Result};
pub use lifecycle::validate_transition;
pub use models::*;
pub use traits::*;
