//! Persisted records of the pipeline.

pub mod document;
pub mod job;

pub use document::{Document, DocumentCategory, ExtractionStatus};
pub use job::{ExtractionMethod, Job, JobResultPayload, JobStatus, JobType};
