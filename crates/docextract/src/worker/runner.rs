//! A single worker: claims one delivery and drives it to an outcome.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use super::report::{AttemptReport, WorkerState};
use crate::db::{document_repo, Database};
use crate::error::{ExtractError, WorkerError};
use crate::extractor::{DocumentExtractor, ExtractedText};
use crate::model::Document;
use crate::queue::{Delivery, DeliveryQueue};
use crate::retry::{RetryDecision, RetryPolicy};
use crate::sync::{Outcome, StateSynchronizer};

pub struct Worker {
    id: String,
    db: Database,
    queue: DeliveryQueue,
    sync: StateSynchronizer,
    extractor: Arc<dyn DocumentExtractor>,
    policy: RetryPolicy,
    state: WorkerState,
}

impl Worker {
    pub fn new(
        id: impl Into<String>,
        db: Database,
        queue: DeliveryQueue,
        extractor: Arc<dyn DocumentExtractor>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            id: id.into(),
            sync: StateSynchronizer::new(db.clone()),
            db,
            queue,
            extractor,
            policy,
            state: WorkerState::Idle,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> WorkerState {
        self.state
    }

    /// Claims and processes at most one delivery as of `now`.
    ///
    /// Only queue failures are returned as errors. Everything that goes wrong
    /// with the attempt itself ends up in the report.
    pub fn process_next(&mut self, now: DateTime<Utc>) -> Result<AttemptReport, WorkerError> {
        self.state = WorkerState::Idle;

        let Some(delivery) = self.queue.claim(&self.id, now)? else {
            return Ok(AttemptReport::Idle);
        };
        self.state = WorkerState::Claimed;

        let _span = tracing::info_span!(
            "worker.attempt",
            worker = %self.id,
            delivery = %delivery.id,
            document = %delivery.document_id,
            retry = delivery.retry_count
        )
        .entered();

        let job_id = uuid::Uuid::new_v4().to_string();
        if let Err(e) = self.sync.begin_attempt(
            job_id.clone(),
            &delivery.id,
            delivery.retry_count,
            &delivery.document_id,
            now,
        ) {
            log::error!("Could not record start of job {}: {}", job_id, e);
            return self.handle_failure(&delivery, &job_id, ExtractError::Sync(e), now);
        }

        self.state = WorkerState::Executing;
        log::info!(
            "Job {} started for document {} (attempt {})",
            job_id,
            delivery.document_id,
            delivery.retry_count + 1
        );

        let result = self
            .load_document(&delivery.document_id)
            .and_then(|doc| self.extractor.extract(&doc.storage_path));

        match result {
            Ok(extracted) => self.handle_success(&delivery, &job_id, extracted, now),
            Err(e) => self.handle_failure(&delivery, &job_id, e, now),
        }
    }

    fn load_document(&self, document_id: &str) -> Result<Document, ExtractError> {
        self.db
            .with_conn(|c| document_repo::find_by_id(c, document_id))?
            .ok_or_else(|| ExtractError::DocumentMissing(document_id.to_string()))
    }

    fn handle_success(
        &mut self,
        delivery: &Delivery,
        job_id: &str,
        extracted: ExtractedText,
        now: DateTime<Utc>,
    ) -> Result<AttemptReport, WorkerError> {
        let method = extracted.method;
        let text_length = extracted.text_length;

        match self.sync.commit(
            job_id,
            &delivery.document_id,
            &Outcome::Success(extracted),
            now,
        ) {
            Ok(()) => {
                if !self.queue.ack(delivery)? {
                    return Ok(self.superseded(delivery, job_id));
                }
                self.state = WorkerState::Completed;
                log::info!(
                    "Job {} completed: {} chars via {} method",
                    job_id,
                    text_length,
                    method
                );
                Ok(AttemptReport::Completed {
                    delivery_id: delivery.id.clone(),
                    document_id: delivery.document_id.clone(),
                    job_id: job_id.to_string(),
                    method,
                    text_length,
                })
            }
            // Both records already show a terminal outcome.
            Err(e) if e.is_compensated() || e.is_illegal_transition() => {
                if !self.queue.ack(delivery)? {
                    return Ok(self.superseded(delivery, job_id));
                }
                self.state = WorkerState::Completed;
                Ok(AttemptReport::Failed {
                    delivery_id: delivery.id.clone(),
                    document_id: delivery.document_id.clone(),
                    job_id: job_id.to_string(),
                    message: e.to_string(),
                })
            }
            Err(e) => self.handle_failure(delivery, job_id, ExtractError::Sync(e), now),
        }
    }

    fn handle_failure(
        &mut self,
        delivery: &Delivery,
        job_id: &str,
        err: ExtractError,
        now: DateTime<Utc>,
    ) -> Result<AttemptReport, WorkerError> {
        match self.policy.decide(&err, delivery.retry_count) {
            RetryDecision::Requeue { delay, next_retry } => {
                log::warn!(
                    "Job {} failed ({}), retry {} in {}s",
                    job_id,
                    err,
                    next_retry,
                    delay.as_secs()
                );
                let requeued = self.queue.requeue(
                    delivery,
                    next_retry,
                    delay.as_secs(),
                    &err.to_string(),
                    now,
                )?;
                if !requeued {
                    return Ok(self.superseded(delivery, job_id));
                }
                self.state = WorkerState::Requeued;
                Ok(AttemptReport::Requeued {
                    delivery_id: delivery.id.clone(),
                    document_id: delivery.document_id.clone(),
                    job_id: job_id.to_string(),
                    next_retry,
                    delay,
                })
            }
            RetryDecision::Terminal(message) => {
                log::error!("Job {} failed permanently: {}", job_id, message);

                match self.sync.commit(
                    job_id,
                    &delivery.document_id,
                    &Outcome::failure(message.clone()),
                    now,
                ) {
                    Ok(()) => {}
                    Err(e) if e.is_compensated() || e.is_illegal_transition() => {
                        log::warn!("Failure for job {} recorded out of band: {}", job_id, e);
                    }
                    Err(e) => {
                        log::error!(
                            "Could not record failure of job {}, leaving delivery {} for redelivery: {}",
                            job_id,
                            delivery.id,
                            e
                        );
                        return Ok(AttemptReport::Abandoned {
                            delivery_id: delivery.id.clone(),
                            document_id: delivery.document_id.clone(),
                            job_id: job_id.to_string(),
                            error: e.to_string(),
                        });
                    }
                }

                if !self.queue.ack(delivery)? {
                    return Ok(self.superseded(delivery, job_id));
                }
                self.state = WorkerState::Completed;
                Ok(AttemptReport::Failed {
                    delivery_id: delivery.id.clone(),
                    document_id: delivery.document_id.clone(),
                    job_id: job_id.to_string(),
                    message,
                })
            }
        }
    }

    fn superseded(&mut self, delivery: &Delivery, job_id: &str) -> AttemptReport {
        log::warn!(
            "Job {} outlived its claim on delivery {}; the current holder owns the retry",
            job_id,
            delivery.id
        );
        self.state = WorkerState::Superseded;
        AttemptReport::Superseded {
            delivery_id: delivery.id.clone(),
            document_id: delivery.document_id.clone(),
            job_id: job_id.to_string(),
        }
    }
}
