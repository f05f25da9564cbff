//! Job repository: CRUD operations for the `jobs` table.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use super::{format_timestamp, parse_optional_timestamp, parse_timestamp, DatabaseError};
use crate::model::{Job, JobResultPayload, JobStatus, JobType};

const COLUMNS: &str = "id, chain_id, attempt, job_type, status, document_id, result, error_message,
     created_at, started_at, completed_at";

/// A raw job row from the database.
#[derive(Debug, Clone)]
struct JobRow {
    id: String,
    chain_id: String,
    attempt: i64,
    job_type: String,
    status: String,
    document_id: String,
    result: Option<String>,
    error_message: Option<String>,
    created_at: String,
    started_at: Option<String>,
    completed_at: Option<String>,
}

impl JobRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            chain_id: row.get("chain_id")?,
            attempt: row.get("attempt")?,
            job_type: row.get("job_type")?,
            status: row.get("status")?,
            document_id: row.get("document_id")?,
            result: row.get("result")?,
            error_message: row.get("error_message")?,
            created_at: row.get("created_at")?,
            started_at: row.get("started_at")?,
            completed_at: row.get("completed_at")?,
        })
    }

    fn into_job(self) -> Result<Job, DatabaseError> {
        let status = self
            .status
            .parse::<JobStatus>()
            .map_err(|reason| DatabaseError::InvalidValue {
                column: "status",
                value: self.status.clone(),
                reason,
            })?;
        let job_type =
            self.job_type
                .parse::<JobType>()
                .map_err(|reason| DatabaseError::InvalidValue {
                    column: "job_type",
                    value: self.job_type.clone(),
                    reason,
                })?;
        let result = self
            .result
            .as_deref()
            .map(serde_json::from_str::<JobResultPayload>)
            .transpose()
            .map_err(|e| DatabaseError::InvalidValue {
                column: "result",
                value: self.result.clone().unwrap_or_default(),
                reason: e.to_string(),
            })?;

        Ok(Job {
            id: self.id,
            chain_id: self.chain_id,
            attempt: self.attempt.max(0) as u32,
            job_type,
            status,
            document_id: self.document_id,
            result,
            error_message: self.error_message,
            created_at: parse_timestamp("created_at", &self.created_at)?,
            started_at: parse_optional_timestamp("started_at", self.started_at)?,
            completed_at: parse_optional_timestamp("completed_at", self.completed_at)?,
        })
    }
}

/// Query filter parameters for job listing.
///
/// Attempts that were requeued, superseded or abandoned by a crashed worker
/// keep status `processing` forever; a later attempt in the same chain
/// carries the outcome. Set `latest_only` to see only the newest attempt of
/// each chain.
#[derive(Debug, Default, Clone)]
pub struct JobFilter {
    pub job_type: Option<JobType>,
    pub status: Option<JobStatus>,
    pub document_id: Option<String>,
    pub latest_only: bool,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

/// Inserts a new attempt row.
pub(crate) fn insert(conn: &Connection, job: &Job) -> Result<(), DatabaseError> {
    let result = job
        .result
        .as_ref()
        .map(serde_json::to_string)
        .transpose()
        .map_err(|e| DatabaseError::InvalidValue {
            column: "result",
            value: String::new(),
            reason: e.to_string(),
        })?;

    conn.execute(
        "INSERT INTO jobs (id, chain_id, attempt, job_type, status, document_id, result,
         error_message, created_at, started_at, completed_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
        params![
            job.id,
            job.chain_id,
            job.attempt as i64,
            job.job_type.as_str(),
            job.status.as_str(),
            job.document_id,
            result,
            job.error_message,
            format_timestamp(job.created_at),
            job.started_at.map(format_timestamp),
            job.completed_at.map(format_timestamp),
        ],
    )?;
    Ok(())
}

/// Moves a pending job to `processing`. Returns the number of rows changed.
pub(crate) fn mark_processing(
    conn: &Connection,
    id: &str,
    now: DateTime<Utc>,
) -> Result<usize, DatabaseError> {
    Ok(conn.execute(
        "UPDATE jobs SET status = 'processing', started_at = ?2
         WHERE id = ?1 AND status = 'pending'",
        params![id, format_timestamp(now)],
    )?)
}

/// Moves a processing job to `success`. Terminal jobs are never touched.
pub(crate) fn mark_success(
    conn: &Connection,
    id: &str,
    payload: &JobResultPayload,
    now: DateTime<Utc>,
) -> Result<usize, DatabaseError> {
    let result = serde_json::to_string(payload).map_err(|e| DatabaseError::InvalidValue {
        column: "result",
        value: String::new(),
        reason: e.to_string(),
    })?;
    Ok(conn.execute(
        "UPDATE jobs SET status = 'success', result = ?2, error_message = NULL, completed_at = ?3
         WHERE id = ?1 AND status = 'processing'",
        params![id, result, format_timestamp(now)],
    )?)
}

/// Moves a non-terminal job to `failure`. Terminal jobs are never touched.
pub(crate) fn mark_failure(
    conn: &Connection,
    id: &str,
    error: &str,
    now: DateTime<Utc>,
) -> Result<usize, DatabaseError> {
    Ok(conn.execute(
        "UPDATE jobs SET status = 'failure', error_message = ?2, completed_at = ?3
         WHERE id = ?1 AND status IN ('pending', 'processing')",
        params![id, error, format_timestamp(now)],
    )?)
}

/// Finds a job attempt by its ID.
pub fn find_by_id(conn: &Connection, id: &str) -> Result<Option<Job>, DatabaseError> {
    let row = conn
        .query_row(
            &format!("SELECT {} FROM jobs WHERE id = ?1", COLUMNS),
            params![id],
            JobRow::from_row,
        )
        .optional()?;
    row.map(JobRow::into_job).transpose()
}

/// Returns every attempt of a chain, first attempt first.
pub fn find_by_chain(conn: &Connection, chain_id: &str) -> Result<Vec<Job>, DatabaseError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM jobs WHERE chain_id = ?1 ORDER BY attempt ASC, created_at ASC",
        COLUMNS
    ))?;
    let rows = stmt
        .query_map(params![chain_id], JobRow::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    rows.into_iter().map(JobRow::into_job).collect()
}

/// Returns the most recent attempt for a document: the authoritative one for display.
pub fn latest_for_document(
    conn: &Connection,
    document_id: &str,
) -> Result<Option<Job>, DatabaseError> {
    let row = conn
        .query_row(
            &format!(
                "SELECT {} FROM jobs WHERE document_id = ?1
                 ORDER BY created_at DESC, attempt DESC, rowid DESC LIMIT 1",
                COLUMNS
            ),
            params![document_id],
            JobRow::from_row,
        )
        .optional()?;
    row.map(JobRow::into_job).transpose()
}

/// Queries jobs with filters, returning (rows, total_count).
pub fn query(conn: &Connection, filter: &JobFilter) -> Result<(Vec<Job>, u64), DatabaseError> {
    let mut conditions = Vec::new();
    let mut param_values: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();

    if let Some(job_type) = filter.job_type {
        conditions.push(format!("job_type = ?{}", param_values.len() + 1));
        param_values.push(Box::new(job_type.as_str()));
    }
    if let Some(status) = filter.status {
        conditions.push(format!("status = ?{}", param_values.len() + 1));
        param_values.push(Box::new(status.as_str()));
    }
    if let Some(ref document_id) = filter.document_id {
        conditions.push(format!("document_id = ?{}", param_values.len() + 1));
        param_values.push(Box::new(document_id.clone()));
    }
    if filter.latest_only {
        conditions.push(
            "rowid = (SELECT newer.rowid FROM jobs AS newer WHERE newer.chain_id = jobs.chain_id
             ORDER BY newer.created_at DESC, newer.rowid DESC LIMIT 1)"
                .to_string(),
        );
    }

    let where_clause = if conditions.is_empty() {
        String::new()
    } else {
        format!("WHERE {}", conditions.join(" AND "))
    };

    let count_sql = format!("SELECT COUNT(*) FROM jobs {}", where_clause);
    let params_ref: Vec<&dyn rusqlite::types::ToSql> =
        param_values.iter().map(|p| p.as_ref()).collect();
    let total: u64 = conn.query_row(&count_sql, params_ref.as_slice(), |r| r.get(0))?;

    let limit = filter.limit.unwrap_or(20) as i64;
    let offset = filter.offset.unwrap_or(0) as i64;
    param_values.push(Box::new(limit));
    param_values.push(Box::new(offset));
    let query_sql = format!(
        "SELECT {} FROM jobs {} ORDER BY created_at DESC, rowid DESC LIMIT ?{} OFFSET ?{}",
        COLUMNS,
        where_clause,
        param_values.len() - 1,
        param_values.len()
    );

    let params_ref: Vec<&dyn rusqlite::types::ToSql> =
        param_values.iter().map(|p| p.as_ref()).collect();
    let mut stmt = conn.prepare(&query_sql)?;
    let rows = stmt
        .query_map(params_ref.as_slice(), JobRow::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    let jobs = rows
        .into_iter()
        .map(JobRow::into_job)
        .collect::<Result<Vec<_>, _>>()?;

    Ok((jobs, total))
}
