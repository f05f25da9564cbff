//! Job record: one row per extraction attempt.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    TextExtraction,
}

impl JobType {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobType::TextExtraction => "text_extraction",
        }
    }
}

impl FromStr for JobType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text_extraction" => Ok(JobType::TextExtraction),
            other => Err(format!("unknown job type '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Processing,
    Success,
    Failure,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Success => "success",
            JobStatus::Failure => "failure",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Success | JobStatus::Failure)
    }

    /// Transitions only move forward along `pending -> processing -> {success, failure}`.
    /// A pending job may fail directly (e.g. the attempt died before it started).
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Pending, JobStatus::Processing)
                | (JobStatus::Pending, JobStatus::Failure)
                | (JobStatus::Processing, JobStatus::Success)
                | (JobStatus::Processing, JobStatus::Failure)
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "processing" => Ok(JobStatus::Processing),
            "success" => Ok(JobStatus::Success),
            "failure" => Ok(JobStatus::Failure),
            other => Err(format!("unknown job status '{}'", other)),
        }
    }
}

/// Which extractor produced the committed text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExtractionMethod {
    /// Fast extractor tuned for digital-text PDFs.
    Primary,
    /// Slower layout-aware extractor.
    Secondary,
}

impl ExtractionMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExtractionMethod::Primary => "primary",
            ExtractionMethod::Secondary => "secondary",
        }
    }
}

impl fmt::Display for ExtractionMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result payload stored on a successful job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobResultPayload {
    pub method: ExtractionMethod,
    pub text_length: u64,
    pub page_count: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: String,
    /// Delivery handle shared by every attempt of one submission.
    pub chain_id: String,
    /// Retry counter at the time this attempt ran (0 for the first attempt).
    pub attempt: u32,
    pub job_type: JobType,
    pub status: JobStatus,
    pub document_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<JobResultPayload>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl Job {
    /// Creates a pending attempt record.
    pub fn new_attempt(
        id: String,
        chain_id: &str,
        attempt: u32,
        document_id: &str,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            chain_id: chain_id.to_string(),
            attempt,
            job_type: JobType::TextExtraction,
            status: JobStatus::Pending,
            document_id: document_id.to_string(),
            result: None,
            error_message: None,
            created_at: now,
            started_at: None,
            completed_at: None,
        }
    }
}
