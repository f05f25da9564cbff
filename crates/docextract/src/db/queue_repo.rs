//! Delivery table access: the durable side of the extraction queue.
//!
//! A row exists while a submission is live (queued or claimed). Acknowledging
//! a delivery deletes its row.

use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use super::{format_timestamp, parse_optional_timestamp, parse_timestamp, DatabaseError};
use crate::queue::Delivery;

const COLUMNS: &str = "id, document_id, retry_count, available_at, claimed_at, claimed_by,
     last_error, last_delay_secs, enqueued_at";

struct DeliveryRow {
    id: String,
    document_id: String,
    retry_count: i64,
    available_at: String,
    claimed_at: Option<String>,
    claimed_by: Option<String>,
    last_error: Option<String>,
    last_delay_secs: Option<i64>,
    enqueued_at: String,
}

impl DeliveryRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            document_id: row.get("document_id")?,
            retry_count: row.get("retry_count")?,
            available_at: row.get("available_at")?,
            claimed_at: row.get("claimed_at")?,
            claimed_by: row.get("claimed_by")?,
            last_error: row.get("last_error")?,
            last_delay_secs: row.get("last_delay_secs")?,
            enqueued_at: row.get("enqueued_at")?,
        })
    }

    fn into_delivery(self) -> Result<Delivery, DatabaseError> {
        Ok(Delivery {
            id: self.id,
            document_id: self.document_id,
            retry_count: self.retry_count.max(0) as u32,
            available_at: parse_timestamp("available_at", &self.available_at)?,
            claimed_at: parse_optional_timestamp("claimed_at", self.claimed_at)?,
            claimed_by: self.claimed_by,
            last_error: self.last_error,
            last_delay_secs: self.last_delay_secs.map(|s| s.max(0) as u64),
            enqueued_at: parse_timestamp("enqueued_at", &self.enqueued_at)?,
        })
    }
}

pub(crate) fn insert(conn: &Connection, delivery: &Delivery) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO deliveries (id, document_id, retry_count, available_at, claimed_at,
         claimed_by, last_error, last_delay_secs, enqueued_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            delivery.id,
            delivery.document_id,
            delivery.retry_count as i64,
            format_timestamp(delivery.available_at),
            delivery.claimed_at.map(format_timestamp),
            delivery.claimed_by,
            delivery.last_error,
            delivery.last_delay_secs.map(|s| s as i64),
            format_timestamp(delivery.enqueued_at),
        ],
    )?;
    Ok(())
}

pub fn find_by_id(conn: &Connection, id: &str) -> Result<Option<Delivery>, DatabaseError> {
    let row = conn
        .query_row(
            &format!("SELECT {} FROM deliveries WHERE id = ?1", COLUMNS),
            params![id],
            DeliveryRow::from_row,
        )
        .optional()?;
    row.map(DeliveryRow::into_delivery).transpose()
}

/// Oldest live delivery for a document, if any.
pub fn live_for_document(
    conn: &Connection,
    document_id: &str,
) -> Result<Option<Delivery>, DatabaseError> {
    let row = conn
        .query_row(
            &format!(
                "SELECT {} FROM deliveries WHERE document_id = ?1
                 ORDER BY enqueued_at ASC, rowid ASC LIMIT 1",
                COLUMNS
            ),
            params![document_id],
            DeliveryRow::from_row,
        )
        .optional()?;
    row.map(DeliveryRow::into_delivery).transpose()
}

/// Claims the next visible delivery for `worker_id`.
///
/// A delivery is visible when its `available_at` has passed and it is either
/// unclaimed or its claim is older than `visibility_timeout`. Callers run this
/// inside a transaction so the select and the claim cannot interleave with
/// another claimer.
pub(crate) fn claim_next(
    conn: &Connection,
    worker_id: &str,
    now: DateTime<Utc>,
    visibility_timeout: Duration,
) -> Result<Option<Delivery>, DatabaseError> {
    let now_str = format_timestamp(now);
    let stale_before = format_timestamp(stale_cutoff(now, visibility_timeout));

    let row = conn
        .query_row(
            &format!(
                "SELECT {} FROM deliveries
                 WHERE available_at <= ?1 AND (claimed_at IS NULL OR claimed_at <= ?2)
                 ORDER BY available_at ASC, enqueued_at ASC, rowid ASC LIMIT 1",
                COLUMNS
            ),
            params![now_str, stale_before],
            DeliveryRow::from_row,
        )
        .optional()?;

    let Some(row) = row else {
        return Ok(None);
    };

    if row.claimed_at.is_some() {
        log::warn!(
            "Reclaiming delivery {} from {} after claim expired",
            row.id,
            row.claimed_by.as_deref().unwrap_or("unknown worker")
        );
    }

    conn.execute(
        "UPDATE deliveries SET claimed_at = ?2, claimed_by = ?3 WHERE id = ?1",
        params![row.id, now_str, worker_id],
    )?;

    let mut delivery = row.into_delivery()?;
    delivery.claimed_at = Some(now);
    delivery.claimed_by = Some(worker_id.to_string());
    Ok(Some(delivery))
}

/// Claims taken at or before the returned instant have expired.
///
/// A timeout reaching past the earliest representable instant never expires.
fn stale_cutoff(now: DateTime<Utc>, visibility_timeout: Duration) -> DateTime<Utc> {
    now.checked_sub_signed(visibility_timeout)
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// The claim a worker holds on a delivery, as handed out by [`claim_next`].
///
/// Writes that end an attempt match on it, so a worker whose claim expired
/// and was handed to someone else cannot touch the new holder's row.
pub(crate) struct ClaimToken<'a> {
    pub worker_id: Option<&'a str>,
    pub claimed_at: Option<String>,
}

impl<'a> ClaimToken<'a> {
    pub(crate) fn of(delivery: &'a Delivery) -> Self {
        Self {
            worker_id: delivery.claimed_by.as_deref(),
            claimed_at: delivery.claimed_at.map(format_timestamp),
        }
    }
}

/// Releases a claim and schedules the delivery for a later attempt.
///
/// Returns 0 when the row is gone or its claim is no longer `claim`.
pub(crate) fn requeue(
    conn: &Connection,
    id: &str,
    claim: &ClaimToken<'_>,
    retry_count: u32,
    available_at: DateTime<Utc>,
    last_error: &str,
    delay_secs: u64,
) -> Result<usize, DatabaseError> {
    Ok(conn.execute(
        "UPDATE deliveries SET retry_count = ?4, available_at = ?5, claimed_at = NULL,
         claimed_by = NULL, last_error = ?6, last_delay_secs = ?7
         WHERE id = ?1 AND claimed_by IS ?2 AND claimed_at IS ?3",
        params![
            id,
            claim.worker_id,
            claim.claimed_at,
            retry_count as i64,
            format_timestamp(available_at),
            last_error,
            delay_secs as i64
        ],
    )?)
}

/// Acknowledges a delivery. It will never be delivered again.
///
/// Returns 0 when the row is gone or its claim is no longer `claim`.
pub(crate) fn delete(
    conn: &Connection,
    id: &str,
    claim: &ClaimToken<'_>,
) -> Result<usize, DatabaseError> {
    Ok(conn.execute(
        "DELETE FROM deliveries WHERE id = ?1 AND claimed_by IS ?2 AND claimed_at IS ?3",
        params![id, claim.worker_id, claim.claimed_at],
    )?)
}

/// Number of live deliveries.
pub fn count(conn: &Connection) -> Result<u64, DatabaseError> {
    Ok(conn.query_row("SELECT COUNT(*) FROM deliveries", [], |r| r.get(0))?)
}

/// Number of deliveries that a worker could claim at `now`.
pub fn count_ready(
    conn: &Connection,
    now: DateTime<Utc>,
    visibility_timeout: Duration,
) -> Result<u64, DatabaseError> {
    Ok(conn.query_row(
        "SELECT COUNT(*) FROM deliveries
         WHERE available_at <= ?1 AND (claimed_at IS NULL OR claimed_at <= ?2)",
        params![
            format_timestamp(now),
            format_timestamp(stale_cutoff(now, visibility_timeout))
        ],
        |r| r.get(0),
    )?)
}
