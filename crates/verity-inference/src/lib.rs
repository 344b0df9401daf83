//! # verity-inference
//!
//! Image classification backends for the verity worker.
//!
//! This crate provides:
//! - Image preparation (format detection from magic bytes)
//! - HTTP classifier for a TensorFlow Serving compatible model server
//! - Probability thresholding into labelled predictions
//! - Mock classifier (feature `mock`)
//!
//! # Example
//!
//! ```rust,no_run
//! use verity_inference::{prepare_image, HttpClassifier};
//! use verity_core::Classifier;
//!
//! #[tokio::main]
//! async fn main() {
//!     let classifier = HttpClassifier::from_env().unwrap();
//!     let image = prepare_image("a.png", std::fs::read("a.png").unwrap()).unwrap();
//!     let predictions = classifier.classify(&[image]).await.unwrap();
//!     println!("{:?}", predictions);
//! }
//! ```

pub mod client;
pub mod prediction;
pub mod prepare;

#[cfg(any(test, feature = "mock"))]
pub mod mock;

// Re-export core types
pub use verity_core::*;

pub use client::{ClassifierConfig, HttpClassifier};
pub use prediction::{ensure_valid_batch, from_probability, round_percent};
pub use prepare::prepare_image;
