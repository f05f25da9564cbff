//! At-least-once delivery queue backed by the `deliveries` table.
//!
//! Each live submission is one row. Workers claim rows, and a claim that is
//! older than the visibility timeout is handed out again, so a worker that
//! dies mid-extraction never strands its delivery.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::db::queue_repo::{self, ClaimToken};
use crate::db::{Database, DatabaseError};

/// A queued extraction request.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Delivery {
    /// Handle returned to the submitter; shared by all attempts.
    pub id: String,
    pub document_id: String,
    /// How many attempts have already failed transiently.
    pub retry_count: u32,
    /// Not claimable before this instant.
    pub available_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub claimed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub claimed_by: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_delay_secs: Option<u64>,
    pub enqueued_at: DateTime<Utc>,
}

impl Delivery {
    pub fn new(
        id: String,
        document_id: &str,
        available_at: DateTime<Utc>,
        enqueued_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            document_id: document_id.to_string(),
            retry_count: 0,
            available_at,
            claimed_at: None,
            claimed_by: None,
            last_error: None,
            last_delay_secs: None,
            enqueued_at,
        }
    }

    pub fn is_claimed(&self) -> bool {
        self.claimed_at.is_some()
    }
}

#[derive(Clone)]
pub struct DeliveryQueue {
    db: Database,
    visibility_timeout: Duration,
}

impl DeliveryQueue {
    pub fn new(db: Database, visibility_timeout_secs: u64) -> Self {
        Self {
            db,
            visibility_timeout: i64::try_from(visibility_timeout_secs)
                .ok()
                .and_then(Duration::try_seconds)
                .unwrap_or(Duration::MAX),
        }
    }

    /// Claims the next visible delivery, if any.
    pub fn claim(
        &self,
        worker_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Delivery>, DatabaseError> {
        let visibility = self.visibility_timeout;
        self.db
            .with_transaction(|tx| queue_repo::claim_next(tx, worker_id, now, visibility))
    }

    /// Schedules another attempt `delay_secs` from `now` with the given retry count.
    ///
    /// Returns `false` without changing anything when `delivery` is no longer
    /// claimed by the worker that claimed it, i.e. its claim expired and was
    /// handed out again or the row was acknowledged.
    pub fn requeue(
        &self,
        delivery: &Delivery,
        next_retry: u32,
        delay_secs: u64,
        last_error: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, DatabaseError> {
        let available_at = i64::try_from(delay_secs)
            .ok()
            .and_then(Duration::try_seconds)
            .and_then(|delay| now.checked_add_signed(delay))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        let claim = ClaimToken::of(delivery);
        let changed = self.db.with_conn(|c| {
            queue_repo::requeue(
                c,
                &delivery.id,
                &claim,
                next_retry,
                available_at,
                last_error,
                delay_secs,
            )
        })?;
        if changed == 0 {
            log::warn!(
                "Delivery {} is no longer held by {}, not requeued",
                delivery.id,
                claim.worker_id.unwrap_or("unknown worker")
            );
        }
        Ok(changed > 0)
    }

    /// Acknowledges a delivery so it is never redelivered.
    ///
    /// Returns `false` when the claim on `delivery` is no longer current.
    pub fn ack(&self, delivery: &Delivery) -> Result<bool, DatabaseError> {
        let claim = ClaimToken::of(delivery);
        let changed = self
            .db
            .with_conn(|c| queue_repo::delete(c, &delivery.id, &claim))?;
        if changed == 0 {
            log::warn!(
                "Delivery {} is no longer held by {}, not acknowledged",
                delivery.id,
                claim.worker_id.unwrap_or("unknown worker")
            );
        }
        Ok(changed > 0)
    }

    pub fn find(&self, delivery_id: &str) -> Result<Option<Delivery>, DatabaseError> {
        self.db.with_conn(|c| queue_repo::find_by_id(c, delivery_id))
    }

    pub fn len(&self) -> Result<u64, DatabaseError> {
        self.db.with_conn(queue_repo::count)
    }

    pub fn is_empty(&self) -> Result<bool, DatabaseError> {
        Ok(self.len()? == 0)
    }

    /// Number of deliveries claimable at `now`.
    pub fn ready(&self, now: DateTime<Utc>) -> Result<u64, DatabaseError> {
        let visibility = self.visibility_timeout;
        self.db
            .with_conn(|c| queue_repo::count_ready(c, now, visibility))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn queue() -> DeliveryQueue {
        DeliveryQueue::new(Database::open_in_memory().unwrap(), 900)
    }

    fn enqueue(q: &DeliveryQueue, id: &str, now: DateTime<Utc>) {
        q.db.with_conn(|c| queue_repo::insert(c, &Delivery::new(id.into(), "doc", now, now)))
            .unwrap();
    }

    #[test]
    fn test_claim_then_ack() {
        let q = queue();
        let now = Utc::now();
        enqueue(&q, "h1", now);

        let claimed = q.claim("w0", now).unwrap().unwrap();
        assert!(claimed.is_claimed());
        assert!(q.claim("w1", now).unwrap().is_none());

        assert!(q.ack(&claimed).unwrap());
        assert!(q.is_empty().unwrap());
        // double ack is harmless
        assert!(!q.ack(&claimed).unwrap());
    }

    #[test]
    fn test_requeue_delays_visibility() {
        let q = queue();
        let now = Utc::now();
        enqueue(&q, "h1", now);
        let claimed = q.claim("w0", now).unwrap().unwrap();

        assert!(q.requeue(&claimed, 1, 60, "busy", now).unwrap());
        assert_eq!(q.ready(now).unwrap(), 0);
        assert!(q.claim("w0", now + Duration::seconds(59)).unwrap().is_none());

        let again = q.claim("w0", now + Duration::seconds(60)).unwrap().unwrap();
        assert_eq!(again.retry_count, 1);
        assert_eq!(again.last_delay_secs, Some(60));
    }

    #[test]
    fn test_expired_claim_redelivered() {
        let q = DeliveryQueue::new(Database::open_in_memory().unwrap(), 30);
        let now = Utc::now();
        enqueue(&q, "h1", now);

        q.claim("w0", now).unwrap().unwrap();
        let redelivered = q.claim("w1", now + Duration::seconds(30)).unwrap();
        assert_eq!(redelivered.and_then(|d| d.claimed_by), Some("w1".into()));
    }

    #[test]
    fn test_expired_claim_cannot_requeue_over_new_holder() {
        let q = queue();
        let now = Utc::now();
        enqueue(&q, "h1", now);

        let first = q.claim("w0", now).unwrap().unwrap();
        let second = q.claim("w1", now + Duration::seconds(901)).unwrap().unwrap();

        // The first holder finishes late and fails.
        assert!(!q.requeue(&first, 1, 60, "late", now + Duration::seconds(902)).unwrap());
        // Nobody else can claim while the second holder's claim is live.
        assert!(q.claim("w2", now + Duration::seconds(962)).unwrap().is_none());

        // A late success must not drop the row either.
        assert!(!q.ack(&first).unwrap());
        assert_eq!(q.len().unwrap(), 1);
        assert!(q.ack(&second).unwrap());
        assert!(q.is_empty().unwrap());
    }

    #[test]
    fn test_oversized_visibility_timeout_does_not_panic() {
        let q = DeliveryQueue::new(Database::open_in_memory().unwrap(), u64::MAX);
        let now = Utc::now();
        enqueue(&q, "h1", now);

        assert!(q.claim("w0", now).unwrap().is_some());
        assert!(q.claim("w1", now + Duration::days(3650)).unwrap().is_none());
        assert_eq!(q.ready(now).unwrap(), 0);
    }
}
