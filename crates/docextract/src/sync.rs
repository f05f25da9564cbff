//! Keeps document and job records in agreement.
//!
//! Once an attempt starts, this is the only writer of extraction state. Both
//! records change inside one transaction; if that transaction fails, each
//! record is separately driven to the failure outcome and re-read to confirm.

use chrono::{DateTime, Utc};
use rusqlite::Connection;

use crate::db::{document_repo, job_repo, Database, DatabaseError};
use crate::error::SyncError;
use crate::extractor::ExtractedText;
use crate::model::{ExtractionStatus, Job, JobResultPayload, JobStatus};

/// Final result of one attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Success(ExtractedText),
    Failure { message: String },
}

impl Outcome {
    pub fn failure(message: impl Into<String>) -> Self {
        Outcome::Failure {
            message: message.into(),
        }
    }

    fn label(&self) -> &'static str {
        match self {
            Outcome::Success(_) => "success",
            Outcome::Failure { .. } => "failure",
        }
    }
}

#[derive(Clone)]
pub struct StateSynchronizer {
    db: Database,
}

impl StateSynchronizer {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Records the start of an attempt.
    ///
    /// Inserts the attempt's job and moves it to `processing`. The document is
    /// then marked `processing` on a best-effort basis: a failure there is
    /// logged and does not stop the attempt.
    pub fn begin_attempt(
        &self,
        job_id: String,
        chain_id: &str,
        attempt: u32,
        document_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Job, SyncError> {
        let mut job = Job::new_attempt(job_id, chain_id, attempt, document_id, now);

        self.db.with_transaction(|tx| {
            job_repo::insert(tx, &job)?;
            if job_repo::mark_processing(tx, &job.id, now)? != 1 {
                return Err(SyncError::IllegalTransition {
                    job_id: job.id.clone(),
                    from: job.status,
                    to: JobStatus::Processing,
                });
            }
            Ok(())
        })?;
        job.status = JobStatus::Processing;
        job.started_at = Some(now);

        match self
            .db
            .with_conn(|c| document_repo::mark_processing(c, document_id, now))
        {
            Ok(0) => log::warn!(
                "Document {} not found while starting job {}",
                document_id,
                job.id
            ),
            Ok(_) => {}
            Err(e) => log::warn!(
                "Could not mark document {} as processing: {}",
                document_id,
                e
            ),
        }

        Ok(job)
    }

    /// Commits the outcome of an attempt to both records.
    ///
    /// On a failed commit the failure path is applied to each record on its
    /// own. The returned `SyncError::Commit` says whether that succeeded; its
    /// source is always the original commit error.
    pub fn commit(
        &self,
        job_id: &str,
        document_id: &str,
        outcome: &Outcome,
        now: DateTime<Utc>,
    ) -> Result<(), SyncError> {
        let _span =
            tracing::info_span!("sync.commit", job_id, document_id, outcome = outcome.label())
                .entered();

        let result = self.db.with_transaction(|tx| match outcome {
            Outcome::Success(extracted) => commit_success(tx, job_id, document_id, extracted, now),
            Outcome::Failure { message } => commit_failure(tx, job_id, document_id, message, now),
        });

        let err = match result {
            Ok(()) => return Ok(()),
            Err(e) if e.is_illegal_transition() => return Err(e),
            Err(e) => e,
        };

        log::error!(
            "Commit of {} for job {} failed: {}",
            outcome.label(),
            job_id,
            err
        );

        let message = match outcome {
            Outcome::Success(_) => format!("Failed to store extraction result: {}", err),
            Outcome::Failure { message } => message.clone(),
        };
        let compensated = self.compensate(job_id, document_id, &message, now);

        Err(SyncError::Commit {
            job_id: job_id.to_string(),
            document_id: document_id.to_string(),
            outcome: outcome.label(),
            compensated,
            source: Box::new(err),
        })
    }

    /// Puts a failed document back to `pending` ahead of a fresh submission.
    ///
    /// Runs on the caller's connection so it can share the submission's
    /// transaction. Returns whether the document was reset.
    pub(crate) fn reset_for_submission(
        conn: &Connection,
        document_id: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, DatabaseError> {
        Ok(document_repo::reset_failed_to_pending(conn, document_id, now)? > 0)
    }

    /// Applies the failure path to each record separately and verifies it.
    /// Errors are logged, never returned.
    fn compensate(
        &self,
        job_id: &str,
        document_id: &str,
        message: &str,
        now: DateTime<Utc>,
    ) -> bool {
        let job_ok = match self.compensate_job(job_id, message, now) {
            Ok(()) => true,
            Err(e) => {
                log::error!("Compensating write for job {} failed: {}", job_id, e);
                false
            }
        };
        let document_ok = match self.compensate_document(document_id, message, now) {
            Ok(()) => true,
            Err(e) => {
                log::error!(
                    "Compensating write for document {} failed: {}",
                    document_id,
                    e
                );
                false
            }
        };
        job_ok && document_ok
    }

    fn compensate_job(&self, job_id: &str, message: &str, now: DateTime<Utc>) -> Result<(), SyncError> {
        let job = self.db.with_conn(|c| {
            job_repo::mark_failure(c, job_id, message, now)?;
            job_repo::find_by_id(c, job_id)
        })?;
        match job {
            Some(job) if job.status == JobStatus::Failure => Ok(()),
            Some(_) => Err(SyncError::Unverified {
                record: "job",
                id: job_id.to_string(),
                expected: JobStatus::Failure.as_str(),
            }),
            None => Err(SyncError::MissingRecord {
                record: "job",
                id: job_id.to_string(),
            }),
        }
    }

    fn compensate_document(
        &self,
        document_id: &str,
        message: &str,
        now: DateTime<Utc>,
    ) -> Result<(), SyncError> {
        let doc = self.db.with_conn(|c| {
            document_repo::mark_failed(c, document_id, message, now)?;
            document_repo::find_by_id(c, document_id)
        })?;
        match doc {
            Some(doc) if doc.extraction_status == ExtractionStatus::Failed => Ok(()),
            Some(_) => Err(SyncError::Unverified {
                record: "document",
                id: document_id.to_string(),
                expected: ExtractionStatus::Failed.as_str(),
            }),
            None => Err(SyncError::MissingRecord {
                record: "document",
                id: document_id.to_string(),
            }),
        }
    }
}

fn ensure_transition(job: &Job, to: JobStatus) -> Result<(), SyncError> {
    if job.status.can_transition_to(to) {
        Ok(())
    } else {
        Err(SyncError::IllegalTransition {
            job_id: job.id.clone(),
            from: job.status,
            to,
        })
    }
}

fn commit_success(
    conn: &Connection,
    job_id: &str,
    document_id: &str,
    extracted: &ExtractedText,
    now: DateTime<Utc>,
) -> Result<(), SyncError> {
    let job = job_repo::find_by_id(conn, job_id)?.ok_or_else(|| SyncError::MissingRecord {
        record: "job",
        id: job_id.to_string(),
    })?;
    ensure_transition(&job, JobStatus::Success)?;

    let changed = document_repo::mark_completed(
        conn,
        document_id,
        &extracted.text,
        extracted.text_length,
        extracted.page_count,
        now,
    )?;
    if changed == 0 {
        return Err(SyncError::MissingRecord {
            record: "document",
            id: document_id.to_string(),
        });
    }

    let payload = JobResultPayload {
        method: extracted.method,
        text_length: extracted.text_length,
        page_count: extracted.page_count,
    };
    if job_repo::mark_success(conn, job_id, &payload, now)? == 0 {
        return Err(SyncError::IllegalTransition {
            job_id: job_id.to_string(),
            from: job.status,
            to: JobStatus::Success,
        });
    }
    Ok(())
}

/// Missing records are tolerated on the failure path as long as one of the
/// two exists to carry the error.
fn commit_failure(
    conn: &Connection,
    job_id: &str,
    document_id: &str,
    message: &str,
    now: DateTime<Utc>,
) -> Result<(), SyncError> {
    let job = job_repo::find_by_id(conn, job_id)?;
    if let Some(ref job) = job {
        ensure_transition(job, JobStatus::Failure)?;
        job_repo::mark_failure(conn, job_id, message, now)?;
    } else {
        log::warn!("Job {} missing while recording failure", job_id);
    }

    let changed = document_repo::mark_failed(conn, document_id, message, now)?;
    if changed == 0 {
        if job.is_none() {
            return Err(SyncError::MissingRecord {
                record: "document",
                id: document_id.to_string(),
            });
        }
        log::warn!("Document {} missing while recording failure", document_id);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Document, ExtractionMethod};
    use std::path::Path;

    struct Fixture {
        db: Database,
        sync: StateSynchronizer,
        doc: Document,
    }

    fn fixture() -> Fixture {
        let db = Database::open_in_memory().unwrap();
        let doc = Document::new(Path::new("/data/scan.pdf"), 10, Utc::now());
        db.with_conn(|c| document_repo::insert(c, &doc)).unwrap();
        Fixture {
            sync: StateSynchronizer::new(db.clone()),
            db,
            doc,
        }
    }

    impl Fixture {
        fn doc(&self) -> Document {
            self.db
                .with_conn(|c| document_repo::find_by_id(c, &self.doc.id))
                .unwrap()
                .unwrap()
        }

        fn job(&self, id: &str) -> Job {
            self.db
                .with_conn(|c| job_repo::find_by_id(c, id))
                .unwrap()
                .unwrap()
        }

        fn begin(&self, job_id: &str) -> Job {
            self.sync
                .begin_attempt(job_id.to_string(), "chain", 0, &self.doc.id, Utc::now())
                .unwrap()
        }
    }

    fn extracted(text: &str) -> ExtractedText {
        ExtractedText::new(text.to_string(), 2, ExtractionMethod::Secondary)
    }

    #[test]
    fn test_begin_attempt_marks_both_processing() {
        let f = fixture();
        let job = f.begin("j1");

        assert_eq!(job.status, JobStatus::Processing);
        assert_eq!(f.job("j1").status, JobStatus::Processing);
        assert!(f.job("j1").started_at.is_some());
        assert_eq!(f.doc().extraction_status, ExtractionStatus::Processing);
    }

    #[test]
    fn test_begin_attempt_tolerates_missing_document() {
        let f = fixture();
        let job = f
            .sync
            .begin_attempt("j1".into(), "chain", 0, "ghost", Utc::now())
            .unwrap();
        assert_eq!(job.status, JobStatus::Processing);
    }

    #[test]
    fn test_success_commit() {
        let f = fixture();
        f.begin("j1");
        f.sync
            .commit("j1", &f.doc.id, &Outcome::Success(extracted("héllo")), Utc::now())
            .unwrap();

        let doc = f.doc();
        assert_eq!(doc.extraction_status, ExtractionStatus::Completed);
        assert_eq!(doc.text_length, Some(5));
        assert_eq!(doc.page_count, Some(2));
        assert!(doc.is_consistent());

        let job = f.job("j1");
        assert_eq!(job.status, JobStatus::Success);
        assert_eq!(
            job.result.map(|r| r.method),
            Some(ExtractionMethod::Secondary)
        );
        assert!(job.completed_at.is_some());
    }

    #[test]
    fn test_failure_commit() {
        let f = fixture();
        f.begin("j1");
        f.sync
            .commit("j1", &f.doc.id, &Outcome::failure("cannot open"), Utc::now())
            .unwrap();

        let doc = f.doc();
        assert_eq!(doc.extraction_status, ExtractionStatus::Failed);
        assert_eq!(doc.extraction_error.as_deref(), Some("cannot open"));
        assert!(doc.text_length.is_none());
        assert!(doc.is_consistent());
        assert_eq!(f.job("j1").status, JobStatus::Failure);
    }

    #[test]
    fn test_terminal_job_rejects_second_commit() {
        let f = fixture();
        f.begin("j1");
        f.sync
            .commit("j1", &f.doc.id, &Outcome::Success(extracted("done")), Utc::now())
            .unwrap();

        let err = f
            .sync
            .commit("j1", &f.doc.id, &Outcome::failure("late"), Utc::now())
            .unwrap_err();
        assert!(err.is_illegal_transition());
        // nothing was compensated: the first outcome stands
        assert_eq!(f.doc().extraction_status, ExtractionStatus::Completed);
        assert_eq!(f.job("j1").status, JobStatus::Success);
    }

    #[test]
    fn test_failed_success_commit_is_compensated() {
        let f = fixture();
        f.begin("j1");
        f.db.with_conn(|c| {
            c.execute_batch(
                "CREATE TRIGGER reject_success BEFORE UPDATE OF status ON jobs
                 WHEN NEW.status = 'success'
                 BEGIN SELECT RAISE(ABORT, 'disk full'); END;",
            )?;
            Ok(())
        })
        .unwrap();

        let err = f
            .sync
            .commit("j1", &f.doc.id, &Outcome::Success(extracted("lost")), Utc::now())
            .unwrap_err();
        assert!(err.is_compensated());

        // the document update inside the transaction was rolled back
        // and both records now agree on failure
        let doc = f.doc();
        assert_eq!(doc.extraction_status, ExtractionStatus::Failed);
        assert!(doc.extracted_text.is_none());
        assert!(doc
            .extraction_error
            .as_deref()
            .unwrap_or_default()
            .contains("disk full"));
        assert!(doc.is_consistent());
        assert_eq!(f.job("j1").status, JobStatus::Failure);
    }

    #[test]
    fn test_uncompensated_commit_reports_original_error() {
        let f = fixture();
        f.begin("j1");
        f.db.with_conn(|c| {
            c.execute_batch(
                "CREATE TRIGGER reject_doc BEFORE UPDATE ON documents
                 BEGIN SELECT RAISE(ABORT, 'read-only volume'); END;",
            )?;
            Ok(())
        })
        .unwrap();

        let err = f
            .sync
            .commit("j1", &f.doc.id, &Outcome::failure("bad"), Utc::now())
            .unwrap_err();
        assert!(!err.is_compensated());
        match err {
            SyncError::Commit { source, .. } => {
                assert!(source.to_string().contains("read-only volume"))
            }
            other => panic!("unexpected error: {:?}", other),
        }
        // the job side of the compensation still landed
        assert_eq!(f.job("j1").status, JobStatus::Failure);
    }

    #[test]
    fn test_failure_with_missing_document_still_fails_job() {
        let f = fixture();
        f.sync
            .begin_attempt("j1".into(), "chain", 0, "ghost", Utc::now())
            .unwrap();
        f.sync
            .commit("j1", "ghost", &Outcome::failure("Document 'ghost' does not exist"), Utc::now())
            .unwrap();
        assert_eq!(f.job("j1").status, JobStatus::Failure);
    }

    #[test]
    fn test_reset_for_submission() {
        let f = fixture();
        f.begin("j1");
        f.sync
            .commit("j1", &f.doc.id, &Outcome::failure("x"), Utc::now())
            .unwrap();

        let reset = f
            .db
            .with_conn(|c| StateSynchronizer::reset_for_submission(c, &f.doc.id, Utc::now()))
            .unwrap();
        assert!(reset);
        assert_eq!(f.doc().extraction_status, ExtractionStatus::Pending);
        assert!(f.doc().is_consistent());
    }
}
