//! Core data models for verity.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{Error, Result};

// =============================================================================
// JOB STATUS
// =============================================================================

/// User-visible status of a job record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum JobStatus {
    /// Created by the producer, waiting for a worker.
    Queued,
    /// Leased by a worker and being processed.
    Progressed,
    /// Report produced and delivered.
    Done,
    /// Retries exhausted.
    Failed,
}

impl JobStatus {
    /// Database / wire representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "QUEUED",
            JobStatus::Progressed => "PROGRESSED",
            JobStatus::Done => "DONE",
            JobStatus::Failed => "FAILED",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "QUEUED" => Ok(JobStatus::Queued),
            "PROGRESSED" => Ok(JobStatus::Progressed),
            "DONE" => Ok(JobStatus::Done),
            "FAILED" => Ok(JobStatus::Failed),
            other => Err(Error::InvalidInput(format!("Unknown job status: {}", other))),
        }
    }
}

// =============================================================================
// JOB DESCRIPTOR
// =============================================================================

/// The message carried on the queue.
///
/// Producers and consumers agree on this schema exactly. Unknown fields are
/// rejected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct JobDescriptor {
    pub job_id: String,
    pub user_id: String,
    pub user_email: String,
    pub bucket: String,
    pub input_prefix: String,
    pub manifest_path: String,
    pub report_prefix: String,
    pub report_filename: String,
    #[serde(
        serialize_with = "serialize_timestamp",
        deserialize_with = "deserialize_timestamp"
    )]
    pub created_at: DateTime<Utc>,
}

impl JobDescriptor {
    /// Decode and validate a raw queue entry.
    ///
    /// Every failure is reported as [`Error::MalformedEntry`].
    pub fn parse(entry: &str) -> Result<Self> {
        let descriptor: JobDescriptor = serde_json::from_str(entry)
            .map_err(|e| Error::MalformedEntry(e.to_string()))?;
        descriptor.validate()?;
        Ok(descriptor)
    }

    /// Serialize to the queue wire format.
    pub fn to_entry(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    fn validate(&self) -> Result<()> {
        let required = [
            ("job_id", &self.job_id),
            ("user_id", &self.user_id),
            ("user_email", &self.user_email),
            ("bucket", &self.bucket),
            ("input_prefix", &self.input_prefix),
            ("manifest_path", &self.manifest_path),
            ("report_prefix", &self.report_prefix),
            ("report_filename", &self.report_filename),
        ];
        for (field, value) in required {
            if value.trim().is_empty() {
                return Err(Error::MalformedEntry(format!("field `{}` is empty", field)));
            }
        }
        if !self.user_email.contains('@') {
            return Err(Error::MalformedEntry(format!(
                "field `user_email` is not an address: {}",
                self.user_email
            )));
        }
        Ok(())
    }

    /// Object path of an input image listed in the manifest.
    pub fn input_path(&self, file_name: &str) -> String {
        join_object_path(&self.input_prefix, file_name)
    }

    /// Object path the rendered report is uploaded to.
    pub fn report_path(&self) -> String {
        join_object_path(&self.report_prefix, &self.report_filename)
    }
}

/// Join a storage prefix and a name with exactly one separator.
pub fn join_object_path(prefix: &str, name: &str) -> String {
    let prefix = prefix.trim_end_matches('/');
    let name = name.trim_start_matches('/');
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", prefix, name)
    }
}

fn serialize_timestamp<S: Serializer>(
    value: &DateTime<Utc>,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_str(&value.to_rfc3339())
}

/// Accepts RFC 3339 and the offset-less ISO-8601 form producers emit.
fn deserialize_timestamp<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> std::result::Result<DateTime<Utc>, D::Error> {
    let raw = String::deserialize(deserializer)?;
    parse_timestamp(&raw).map_err(serde::de::Error::custom)
}

fn parse_timestamp(raw: &str) -> std::result::Result<DateTime<Utc>, String> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Ok(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .map(|naive| naive.and_utc())
        .map_err(|e| format!("invalid timestamp {:?}: {}", raw, e))
}

// =============================================================================
// JOB RECORD
// =============================================================================

/// Durable, user-visible record of a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub job_id: String,
    pub user_id: String,
    pub status: JobStatus,
    pub report_path: Option<String>,
    pub created_at: DateTime<Utc>,
}

// =============================================================================
// MANIFEST
// =============================================================================

/// Manifest uploaded next to the input images.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    /// Input file names, in submission order.
    pub images: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_images: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
}

impl Manifest {
    /// Parse manifest bytes downloaded from storage.
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let manifest: Manifest = serde_json::from_slice(bytes)?;
        if let Some(total) = manifest.total_images {
            if total != manifest.images.len() {
                return Err(Error::InvalidInput(format!(
                    "Manifest declares {} images but lists {}",
                    total,
                    manifest.images.len()
                )));
            }
        }
        Ok(manifest)
    }
}

// =============================================================================
// PREDICTIONS
// =============================================================================

/// Classification label for one image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Label {
    #[serde(rename = "AI Generated")]
    AiGenerated,
    #[serde(rename = "Real")]
    Real,
}

impl Label {
    pub fn as_str(&self) -> &'static str {
        match self {
            Label::AiGenerated => "AI Generated",
            Label::Real => "Real",
        }
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Model output for one image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub label: Label,
    /// Confidence in the label, as a percentage rounded to 2 decimals.
    pub confidence: f32,
}

/// A prediction paired with the image it belongs to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageResult {
    pub image: String,
    pub prediction: Prediction,
}

/// Image bytes prepared for submission to the classifier.
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedImage {
    pub name: String,
    pub mime_type: String,
    pub data: Vec<u8>,
}

/// Rendered report ready for upload.
#[derive(Debug, Clone, PartialEq)]
pub struct ReportArtifact {
    pub content_type: String,
    pub bytes: Vec<u8>,
}
