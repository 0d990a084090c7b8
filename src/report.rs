//! Run reporting: the value a pipeline run returns to its caller.
//!
//! Counters and errors accumulate into a [`PipelineRun`] owned by the
//! controller and handed back explicitly — there is no shared mutable stats
//! singleton anywhere in this crate. Persisting the run (or its contacts)
//! is the caller's responsibility.
//!
//! Everything here serialises to JSON so the CLI can write the run as a
//! machine-readable report.

use crate::error::BatchError;
use crate::merge::ContactRecord;
use serde::{Deserialize, Serialize};

/// How one batch resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    /// Resolved with a single batched request.
    Succeeded,
    /// Resolved via per-image submission after a payload rejection.
    Degraded,
    /// Failed terminally; the error is in [`PipelineRun::errors`].
    Failed,
}

/// Per-batch record of what happened during a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchReport {
    pub batch_index: usize,
    /// Page indices the batch covered, in order.
    pub page_indices: Vec<usize>,
    /// Cumulative encoded byte size of the batch.
    pub total_size: usize,
    pub status: BatchStatus,
    /// Attempts consumed by the request that resolved (or failed) the batch.
    pub attempts: u32,
    pub elapsed_ms: u64,
    /// Contacts parsed from this batch before merging/dedup.
    pub contacts_found: usize,
}

/// The aggregated result of one pipeline run.
///
/// Always returned, even when every batch failed or the run was cancelled —
/// partial results are the point of per-batch error isolation. Use
/// [`PipelineRun::is_complete_success`] and friends to classify the run
/// without inspecting logs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineRun {
    /// Unique id for this run (UUIDv4).
    pub run_id: String,
    /// Unix epoch milliseconds at run start.
    pub started_at_ms: u64,
    /// Wall-clock duration of the whole run.
    pub duration_ms: u64,
    /// Whether the run stopped early on a cancellation signal.
    pub cancelled: bool,

    pub batches_planned: usize,
    pub batches_succeeded: usize,
    pub batches_degraded: usize,

    /// Merged, deduplicated contacts in page order.
    pub contacts: Vec<ContactRecord>,
    pub total_contacts: usize,

    /// Per-batch telemetry, in batch order. On a cancelled run, batches not
    /// yet reached and the batch in flight when cancellation landed have no
    /// entry.
    pub batches: Vec<BatchReport>,
    /// Terminal errors of failed batches, in batch order.
    pub errors: Vec<BatchError>,
}

impl PipelineRun {
    /// Every planned batch resolved (possibly degraded) and nothing was
    /// cancelled.
    pub fn is_complete_success(&self) -> bool {
        !self.cancelled
            && self.errors.is_empty()
            && self.batches_succeeded + self.batches_degraded == self.batches_planned
    }

    /// At least one batch resolved and at least one did not (or the run was
    /// cut short with work remaining).
    pub fn is_partial(&self) -> bool {
        let resolved = self.batches_succeeded + self.batches_degraded;
        resolved > 0 && resolved < self.batches_planned
    }

    /// Batches were planned but none resolved.
    pub fn is_total_failure(&self) -> bool {
        self.batches_planned > 0 && self.batches_succeeded + self.batches_degraded == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(planned: usize, succeeded: usize, degraded: usize, cancelled: bool) -> PipelineRun {
        PipelineRun {
            run_id: "test".into(),
            started_at_ms: 0,
            duration_ms: 0,
            cancelled,
            batches_planned: planned,
            batches_succeeded: succeeded,
            batches_degraded: degraded,
            contacts: Vec::new(),
            total_contacts: 0,
            batches: Vec::new(),
            errors: Vec::new(),
        }
    }

    #[test]
    fn classification_complete_success() {
        let r = run(3, 2, 1, false);
        assert!(r.is_complete_success());
        assert!(!r.is_partial());
        assert!(!r.is_total_failure());
    }

    #[test]
    fn classification_partial() {
        let r = run(3, 1, 0, false);
        assert!(!r.is_complete_success());
        assert!(r.is_partial());
        assert!(!r.is_total_failure());
    }

    #[test]
    fn classification_total_failure() {
        let r = run(2, 0, 0, false);
        assert!(r.is_total_failure());
        assert!(!r.is_partial());
    }

    #[test]
    fn cancelled_run_is_not_complete_success() {
        let r = run(3, 3, 0, true);
        assert!(!r.is_complete_success());
    }

    #[test]
    fn empty_plan_is_trivially_complete() {
        let r = run(0, 0, 0, false);
        assert!(r.is_complete_success());
        assert!(!r.is_total_failure());
    }

    #[test]
    fn round_trips_through_json() {
        let r = run(1, 1, 0, false);
        let json = serde_json::to_string(&r).expect("serializes");
        let back: PipelineRun = serde_json::from_str(&json).expect("deserializes");
        assert_eq!(back.batches_planned, 1);
        assert_eq!(back.run_id, "test");
    }
}
