use std::time::Duration;

use crate::model::ExtractionMethod;

/// Where a worker is in handling its current delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Idle,
    Claimed,
    Executing,
    /// The delivery was acknowledged, successfully or not.
    Completed,
    Requeued,
    /// The claim was lost before the attempt finished.
    Superseded,
}

/// What one call to [`super::Worker::process_next`] did.
#[derive(Debug, Clone, PartialEq)]
pub enum AttemptReport {
    /// Nothing was visible in the queue.
    Idle,
    Completed {
        delivery_id: String,
        document_id: String,
        job_id: String,
        method: ExtractionMethod,
        text_length: u64,
    },
    Requeued {
        delivery_id: String,
        document_id: String,
        job_id: String,
        next_retry: u32,
        delay: Duration,
    },
    /// The chain ended in a terminal failure.
    Failed {
        delivery_id: String,
        document_id: String,
        job_id: String,
        message: String,
    },
    /// The claim expired and another worker now holds the delivery, so this
    /// attempt left the queue row alone.
    Superseded {
        delivery_id: String,
        document_id: String,
        job_id: String,
    },
    /// The outcome could not be recorded; the claim is left to expire so the
    /// delivery is redelivered.
    Abandoned {
        delivery_id: String,
        document_id: String,
        job_id: String,
        error: String,
    },
}

impl AttemptReport {
    pub fn is_idle(&self) -> bool {
        matches!(self, AttemptReport::Idle)
    }
}
