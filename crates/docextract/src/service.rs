//! Client-facing operations: registration, submission and status queries.

use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::config::Config;
use crate::db::job_repo::{self, JobFilter};
use crate::db::{document_repo, queue_repo, Database, DatabaseError};
use crate::error::{DocExtractError, QueryError, SubmitError, WorkerError};
use crate::extractor::{DocumentExtractor, StrategySelector};
use crate::model::{Document, ExtractionStatus, Job, JobResultPayload, JobStatus};
use crate::queue::{Delivery, DeliveryQueue};
use crate::sync::StateSynchronizer;
use crate::worker::{PoolSettings, WorkerPool};

/// Handle returned by a submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Submission {
    pub handle: String,
    pub document_id: String,
    /// True when an already-live delivery was reused.
    pub deduplicated: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SkippedDocument {
    pub document_id: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchSubmission {
    pub submitted: Vec<Submission>,
    pub skipped: Vec<SkippedDocument>,
}

/// Point-in-time view of one extraction chain.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSnapshot {
    pub handle: String,
    /// Attempt record this snapshot describes; absent before the first attempt.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,
    pub document_id: String,
    pub attempt: u32,
    pub status: JobStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<JobResultPayload>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// When a queued retry becomes eligible to run.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_attempt_at: Option<DateTime<Utc>>,
}

impl JobSnapshot {
    fn from_job(job: Job, delivery: Option<&Delivery>) -> Self {
        Self {
            handle: job.chain_id,
            job_id: Some(job.id),
            document_id: job.document_id,
            attempt: job.attempt,
            status: job.status,
            result: job.result,
            error_message: job.error_message,
            created_at: job.created_at,
            started_at: job.started_at,
            completed_at: job.completed_at,
            next_attempt_at: delivery.and_then(next_attempt_at),
        }
    }

    fn queued(delivery: &Delivery) -> Self {
        Self {
            handle: delivery.id.clone(),
            job_id: None,
            document_id: delivery.document_id.clone(),
            attempt: delivery.retry_count,
            status: JobStatus::Pending,
            result: None,
            error_message: None,
            created_at: delivery.enqueued_at,
            started_at: None,
            completed_at: None,
            next_attempt_at: next_attempt_at(delivery),
        }
    }
}

fn next_attempt_at(delivery: &Delivery) -> Option<DateTime<Utc>> {
    (!delivery.is_claimed()).then_some(delivery.available_at)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentState {
    pub document_id: String,
    pub filename: String,
    pub status: ExtractionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text_length: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_count: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub is_used: bool,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl From<Document> for DocumentState {
    fn from(doc: Document) -> Self {
        Self {
            document_id: doc.id,
            filename: doc.filename,
            status: doc.extraction_status,
            text_length: doc.text_length,
            page_count: doc.page_count,
            error: doc.extraction_error,
            is_used: doc.is_used,
            updated_at: doc.updated_at,
            completed_at: doc.completed_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractedDocument {
    pub document_id: String,
    pub filename: String,
    pub text: String,
    pub text_length: u64,
    pub page_count: u32,
}

/// A document's state together with its most recent attempt.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentStatusEntry {
    pub document_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<DocumentState>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latest_job: Option<Job>,
}

pub struct ExtractionService {
    db: Database,
    queue: DeliveryQueue,
    config: Config,
}

impl ExtractionService {
    pub fn new(db: Database, config: Config) -> Self {
        Self {
            queue: DeliveryQueue::new(db.clone(), config.visibility_timeout_secs),
            db,
            config,
        }
    }

    /// Opens the configured database and builds a service on top of it.
    pub fn open(config: Config) -> Result<Self, DocExtractError> {
        let path = config
            .resolved_database_path()
            .ok_or_else(|| crate::error::ConfigError::Validation {
                message: "No database_path configured and no home directory found".to_string(),
            })?;
        let db = Database::open(&path)?;
        Ok(Self::new(db, config))
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn queue(&self) -> &DeliveryQueue {
        &self.queue
    }

    /// The production extractor for this configuration.
    pub fn default_extractor(&self) -> Arc<dyn DocumentExtractor> {
        Arc::new(StrategySelector::for_pdfs(
            self.config.extraction.quality_threshold,
        ))
    }

    pub fn start_workers(
        &self,
        extractor: Arc<dyn DocumentExtractor>,
    ) -> Result<WorkerPool, WorkerError> {
        WorkerPool::start(
            self.db.clone(),
            extractor,
            PoolSettings {
                worker_count: self.config.worker_count,
                poll_interval: self.config.poll_interval(),
                visibility_timeout_secs: self.config.visibility_timeout_secs,
                retry: self.config.retry_policy(),
            },
        )
    }

    /// Records a file on disk as a new `pending` document.
    pub fn register_document(&self, path: &Path) -> Result<Document, SubmitError> {
        let unreadable = |source| SubmitError::Unreadable {
            path: path.to_path_buf(),
            source,
        };
        let storage_path = path.canonicalize().map_err(unreadable)?;
        let metadata = std::fs::metadata(&storage_path).map_err(unreadable)?;

        let doc = Document::new(&storage_path, metadata.len(), Utc::now());
        self.db.with_conn(|c| document_repo::insert(c, &doc))?;

        log::info!(
            "Registered document {} ({}, {} bytes)",
            doc.id,
            doc.filename,
            doc.file_size
        );
        Ok(doc)
    }

    /// Queues a document for extraction.
    ///
    /// A failed document goes back to `pending`. With deduplication on, a
    /// document that already has a live delivery gets that delivery's handle.
    pub fn submit(&self, document_id: &str) -> Result<Submission, SubmitError> {
        let now = Utc::now();
        let deduplicate = self.config.submission.deduplicate;

        let submission = self.db.with_transaction(|tx| {
            if document_repo::find_by_id(tx, document_id)?.is_none() {
                return Err(SubmitError::DocumentNotFound(document_id.to_string()));
            }

            if deduplicate {
                if let Some(live) = queue_repo::live_for_document(tx, document_id)? {
                    return Ok(Submission {
                        handle: live.id,
                        document_id: document_id.to_string(),
                        deduplicated: true,
                    });
                }
            }

            StateSynchronizer::reset_for_submission(tx, document_id, now)?;
            let delivery = Delivery::new(uuid::Uuid::new_v4().to_string(), document_id, now, now);
            queue_repo::insert(tx, &delivery)?;

            Ok(Submission {
                handle: delivery.id,
                document_id: document_id.to_string(),
                deduplicated: false,
            })
        })?;

        if submission.deduplicated {
            log::info!(
                "Document {} already queued as {}",
                document_id,
                submission.handle
            );
        } else {
            log::info!(
                "Queued document {} as {}",
                document_id,
                submission.handle
            );
        }
        Ok(submission)
    }

    /// Submits several documents. Only `pending` and `failed` documents are
    /// queued; the rest are reported as skipped.
    pub fn submit_batch(&self, document_ids: &[String]) -> Result<BatchSubmission, SubmitError> {
        if document_ids.is_empty() {
            return Err(SubmitError::EmptyBatch);
        }
        let max = self.config.submission.max_batch_size;
        if document_ids.len() > max {
            return Err(SubmitError::BatchTooLarge {
                size: document_ids.len(),
                max,
            });
        }

        let mut batch = BatchSubmission::default();
        for id in document_ids {
            let doc = self.db.with_conn(|c| document_repo::find_by_id(c, id))?;
            match doc {
                None => batch.skipped.push(SkippedDocument {
                    document_id: id.clone(),
                    reason: "not found".to_string(),
                }),
                Some(doc)
                    if matches!(
                        doc.extraction_status,
                        ExtractionStatus::Pending | ExtractionStatus::Failed
                    ) =>
                {
                    batch.submitted.push(self.submit(id)?);
                }
                Some(doc) => batch.skipped.push(SkippedDocument {
                    document_id: id.clone(),
                    reason: format!("status is {}", doc.extraction_status),
                }),
            }
        }
        Ok(batch)
    }

    /// Submits every `pending` or `failed` document.
    pub fn resubmit_pending(&self) -> Result<BatchSubmission, SubmitError> {
        let docs = self.db.with_conn(|c| {
            document_repo::list_by_status(c, &[ExtractionStatus::Pending, ExtractionStatus::Failed])
        })?;

        let mut batch = BatchSubmission::default();
        for doc in docs {
            batch.submitted.push(self.submit(&doc.id)?);
        }
        log::info!("Resubmitted {} documents", batch.submitted.len());
        Ok(batch)
    }

    /// Status by attempt job id or by submission handle.
    ///
    /// A handle resolves to its most recent attempt. A handle without any
    /// attempt yet reports `pending`.
    pub fn job_status(&self, id: &str) -> Result<JobSnapshot, QueryError> {
        self.db
            .with_conn(|c| {
                let job = match job_repo::find_by_id(c, id)? {
                    Some(job) => Some(job),
                    None => job_repo::find_by_chain(c, id)?.pop(),
                };

                match job {
                    Some(job) => {
                        let delivery = queue_repo::find_by_id(c, &job.chain_id)?;
                        Ok(Some(JobSnapshot::from_job(job, delivery.as_ref())))
                    }
                    None => Ok(queue_repo::find_by_id(c, id)?.map(|d| JobSnapshot::queued(&d))),
                }
            })?
            .ok_or_else(|| QueryError::NotFound {
                kind: "job",
                id: id.to_string(),
            })
    }

    /// Every attempt made under a submission handle, oldest first.
    pub fn job_history(&self, handle: &str) -> Result<Vec<Job>, QueryError> {
        let (jobs, live) = self.db.with_conn(|c| {
            Ok((
                job_repo::find_by_chain(c, handle)?,
                queue_repo::find_by_id(c, handle)?.is_some(),
            ))
        })?;
        if jobs.is_empty() && !live {
            return Err(QueryError::NotFound {
                kind: "job",
                id: handle.to_string(),
            });
        }
        Ok(jobs)
    }

    pub fn document_state(&self, document_id: &str) -> Result<DocumentState, QueryError> {
        Ok(self.find_document(document_id)?.into())
    }

    /// Returns the extracted text of a completed document.
    pub fn read_text(&self, document_id: &str) -> Result<ExtractedDocument, QueryError> {
        let doc = self.find_document(document_id)?;
        match doc.extraction_status {
            ExtractionStatus::Completed => Ok(ExtractedDocument {
                text_length: doc.text_length.unwrap_or_default(),
                page_count: doc.page_count.unwrap_or_default(),
                text: doc.extracted_text.unwrap_or_default(),
                document_id: doc.id,
                filename: doc.filename,
            }),
            ExtractionStatus::Failed => Err(QueryError::ExtractionFailed {
                document_id: doc.id,
                message: doc.extraction_error.unwrap_or_default(),
            }),
            status @ (ExtractionStatus::Pending | ExtractionStatus::Processing) => {
                Err(QueryError::NotReady {
                    document_id: doc.id,
                    status,
                })
            }
        }
    }

    pub fn list_jobs(&self, filter: &JobFilter) -> Result<(Vec<Job>, u64), QueryError> {
        Ok(self.db.with_conn(|c| job_repo::query(c, filter))?)
    }

    /// State and latest attempt for each requested document, in request order.
    pub fn batch_status(
        &self,
        document_ids: &[String],
    ) -> Result<Vec<DocumentStatusEntry>, QueryError> {
        self.db
            .with_conn(|c| {
                document_ids
                    .iter()
                    .map(|id| {
                        Ok(DocumentStatusEntry {
                            document_id: id.clone(),
                            state: document_repo::find_by_id(c, id)?.map(DocumentState::from),
                            latest_job: job_repo::latest_for_document(c, id)?,
                        })
                    })
                    .collect::<Result<Vec<_>, DatabaseError>>()
            })
            .map_err(QueryError::from)
    }

    /// Marks a document as consumed (or not). Extraction state is untouched.
    pub fn set_used(&self, document_id: &str, used: bool) -> Result<(), QueryError> {
        let changed = self
            .db
            .with_conn(|c| document_repo::set_used(c, document_id, used, Utc::now()))?;
        if changed == 0 {
            return Err(QueryError::NotFound {
                kind: "document",
                id: document_id.to_string(),
            });
        }
        Ok(())
    }

    fn find_document(&self, document_id: &str) -> Result<Document, QueryError> {
        self.db
            .with_conn(|c| document_repo::find_by_id(c, document_id))?
            .ok_or_else(|| QueryError::NotFound {
                kind: "document",
                id: document_id.to_string(),
            })
    }
}
