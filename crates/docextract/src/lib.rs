pub mod config;
pub mod db;
pub mod error;
pub mod extractor;
pub mod model;
pub mod queue;
pub mod retry;
pub mod service;
pub mod sync;
pub mod worker;

pub use config::{load_config, Config};
pub use db::Database;
pub use error::{
    ConfigError, DocExtractError, ExtractError, QueryError, Result, SubmitError, SyncError,
    WorkerError,
};
pub use extractor::{DocumentExtractor, ExtractedText, StrategySelector, TextExtractor};
pub use model::{Document, ExtractionStatus, Job, JobStatus};
pub use queue::{Delivery, DeliveryQueue};
pub use retry::{FailureClass, RetryDecision, RetryPolicy};
pub use service::{ExtractionService, JobSnapshot, Submission};
pub use sync::{Outcome, StateSynchronizer};
pub use worker::{AttemptReport, Worker, WorkerPool};
