use std::path::PathBuf;
use thiserror::Error;

use crate::db::DatabaseError;
use crate::model::{ExtractionStatus, JobStatus};

#[derive(Error, Debug)]
pub enum DocExtractError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Extraction error: {0}")]
    Extract(#[from] ExtractError),

    #[error("Synchronization error: {0}")]
    Sync(#[from] SyncError),

    #[error("Query error: {0}")]
    Query(#[from] QueryError),

    #[error("Submission error: {0}")]
    Submit(#[from] SubmitError),

    #[error("Worker error: {0}")]
    Worker(#[from] WorkerError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config JSON: {0}")]
    ParseJson(#[from] serde_json::Error),

    #[error("Config validation failed: {message}")]
    Validation { message: String },
}

/// Failures of a single extraction attempt.
///
/// [`crate::retry::FailureClass::of`] decides which of these are worth retrying.
#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("Source unreadable '{path}': {reason}")]
    SourceUnreadable { path: PathBuf, reason: String },

    #[error("Document '{0}' does not exist")]
    DocumentMissing(String),

    #[error("Transient extraction failure: {0}")]
    Transient(String),

    #[error("Database failure during extraction: {0}")]
    Database(#[from] DatabaseError),

    #[error("Failed to store extraction outcome: {0}")]
    Sync(#[from] SyncError),
}

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Database write failed: {0}")]
    Database(#[from] DatabaseError),

    #[error("Illegal job transition for '{job_id}': {from} -> {to}")]
    IllegalTransition {
        job_id: String,
        from: JobStatus,
        to: JobStatus,
    },

    #[error("{record} '{id}' not found")]
    MissingRecord { record: &'static str, id: String },

    #[error("{record} '{id}' did not reach '{expected}' after compensating write")]
    Unverified {
        record: &'static str,
        id: String,
        expected: &'static str,
    },

    #[error("Commit of {outcome} for job '{job_id}' / document '{document_id}' failed (compensated: {compensated}): {source}")]
    Commit {
        job_id: String,
        document_id: String,
        outcome: &'static str,
        compensated: bool,
        #[source]
        source: Box<SyncError>,
    },
}

impl SyncError {
    /// True when the failure path was written for both records after the
    /// original commit failed, i.e. the records agree on a terminal failure.
    pub fn is_compensated(&self) -> bool {
        matches!(
            self,
            SyncError::Commit {
                compensated: true,
                ..
            }
        )
    }

    /// True when a job was asked to leave a terminal state.
    pub fn is_illegal_transition(&self) -> bool {
        matches!(self, SyncError::IllegalTransition { .. })
    }
}

#[derive(Error, Debug)]
pub enum QueryError {
    #[error("{kind} '{id}' not found")]
    NotFound { kind: &'static str, id: String },

    #[error("Text for document '{document_id}' is not ready (status: {status})")]
    NotReady {
        document_id: String,
        status: ExtractionStatus,
    },

    #[error("Extraction failed for document '{document_id}': {message}")]
    ExtractionFailed {
        document_id: String,
        message: String,
    },

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),
}

#[derive(Error, Debug)]
pub enum SubmitError {
    #[error("Document '{0}' does not exist")]
    DocumentNotFound(String),

    #[error("Failed to stat document file '{path}': {source}")]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("No document ids given")]
    EmptyBatch,

    #[error("Batch of {size} documents exceeds the limit of {max}")]
    BatchTooLarge { size: usize, max: usize },

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Synchronization error: {0}")]
    Sync(#[from] SyncError),
}

#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("Failed to spawn worker: {0}")]
    SpawnFailed(String),

    #[error("Queue operation failed: {0}")]
    Queue(#[from] DatabaseError),
}

pub type Result<T> = std::result::Result<T, DocExtractError>;
