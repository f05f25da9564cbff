//! Retry policy for failed extraction attempts.
//!
//! Permanent failures end the chain immediately. Transient failures are
//! requeued with a linearly growing delay until the retry budget is spent.

use std::time::Duration;

use crate::error::ExtractError;

pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_BACKOFF_BASE_SECS: u64 = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Retrying cannot help (missing or unreadable source, missing record).
    Permanent,
    Transient,
}

impl FailureClass {
    pub fn of(err: &ExtractError) -> Self {
        match err {
            ExtractError::SourceUnreadable { .. } | ExtractError::DocumentMissing(_) => {
                FailureClass::Permanent
            }
            ExtractError::Sync(sync) if sync.is_compensated() || sync.is_illegal_transition() => {
                FailureClass::Permanent
            }
            ExtractError::Transient(_) | ExtractError::Database(_) | ExtractError::Sync(_) => {
                FailureClass::Transient
            }
        }
    }
}

/// What to do with a delivery after a failed attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Put the delivery back, visible again after `delay`, carrying `next_retry`.
    Requeue { delay: Duration, next_retry: u32 },
    /// Stop retrying; the message becomes the user-visible error.
    Terminal(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff_base: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            backoff_base: Duration::from_secs(DEFAULT_BACKOFF_BASE_SECS),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, backoff_base_secs: u64) -> Self {
        Self {
            max_retries,
            backoff_base: Duration::from_secs(backoff_base_secs),
        }
    }

    /// Delay before the attempt that follows `retry_count` failures.
    pub fn delay_for(&self, retry_count: u32) -> Duration {
        self.backoff_base.saturating_mul(retry_count.saturating_add(1))
    }

    pub fn decide(&self, err: &ExtractError, retry_count: u32) -> RetryDecision {
        let message = err.to_string();
        match FailureClass::of(err) {
            FailureClass::Permanent => RetryDecision::Terminal(message),
            FailureClass::Transient if retry_count < self.max_retries => RetryDecision::Requeue {
                delay: self.delay_for(retry_count),
                next_retry: retry_count + 1,
            },
            FailureClass::Transient => RetryDecision::Terminal(message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SyncError;
    use std::path::PathBuf;

    fn transient() -> ExtractError {
        ExtractError::Transient("storage timeout".to_string())
    }

    #[test]
    fn test_backoff_is_linear() {
        let policy = RetryPolicy::default();
        let delays: Vec<u64> = (0..3)
            .map(|n| match policy.decide(&transient(), n) {
                RetryDecision::Requeue { delay, next_retry } => {
                    assert_eq!(next_retry, n + 1);
                    delay.as_secs()
                }
                other => panic!("expected requeue, got {:?}", other),
            })
            .collect();
        assert_eq!(delays, vec![60, 120, 180]);
    }

    #[test]
    fn test_exhausted_retries_are_terminal() {
        let policy = RetryPolicy::default();
        assert_eq!(
            policy.decide(&transient(), 3),
            RetryDecision::Terminal("Transient extraction failure: storage timeout".to_string())
        );
        assert!(matches!(
            policy.decide(&transient(), 7),
            RetryDecision::Terminal(_)
        ));
    }

    #[test]
    fn test_permanent_short_circuits() {
        let policy = RetryPolicy::default();
        let unreadable = ExtractError::SourceUnreadable {
            path: PathBuf::from("/gone.pdf"),
            reason: "No such file".to_string(),
        };
        assert!(matches!(
            policy.decide(&unreadable, 0),
            RetryDecision::Terminal(m) if m.contains("/gone.pdf")
        ));
        assert!(matches!(
            policy.decide(&ExtractError::DocumentMissing("d1".into()), 0),
            RetryDecision::Terminal(_)
        ));
    }

    #[test]
    fn test_sync_failure_classification() {
        let uncompensated = ExtractError::Sync(SyncError::Commit {
            job_id: "j".into(),
            document_id: "d".into(),
            outcome: "success",
            compensated: false,
            source: Box::new(SyncError::MissingRecord {
                record: "job",
                id: "j".into(),
            }),
        });
        assert_eq!(FailureClass::of(&uncompensated), FailureClass::Transient);

        let compensated = ExtractError::Sync(SyncError::Commit {
            job_id: "j".into(),
            document_id: "d".into(),
            outcome: "success",
            compensated: true,
            source: Box::new(SyncError::MissingRecord {
                record: "job",
                id: "j".into(),
            }),
        });
        assert_eq!(FailureClass::of(&compensated), FailureClass::Permanent);
    }

    #[test]
    fn test_custom_policy() {
        let policy = RetryPolicy::new(1, 5);
        assert_eq!(
            policy.decide(&transient(), 0),
            RetryDecision::Requeue {
                delay: Duration::from_secs(5),
                next_retry: 1
            }
        );
        assert!(matches!(policy.decide(&transient(), 1), RetryDecision::Terminal(_)));
    }
}
