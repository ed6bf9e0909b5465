//! Offline SLO evaluation over appended baseline records.
//!
//! Pure and deterministic: no I/O, no clock.  The evaluator is run against
//! an exported batch of records as a quality gate, not on the turn path.

use crate::baseline::{BaselineEvidence, TerminalOutcome};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Latency and completeness thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SloThresholds {
    /// Budget from `turn_open` to first output, in milliseconds.
    pub max_open_to_first_output_ms: u64,
    /// Budget from cancel-accept to cancel-fence, in milliseconds.
    pub max_cancel_accept_to_fence_ms: u64,
    /// A committed turn must have produced output.
    pub require_first_output_on_commit: bool,
}

impl Default for SloThresholds {
    fn default() -> Self {
        Self {
            max_open_to_first_output_ms: 1_500,
            max_cancel_accept_to_fence_ms: 250,
            require_first_output_on_commit: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SloViolation {
    pub event_id: String,
    pub rule: String,
    pub observed_ms: Option<u64>,
    pub limit_ms: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SloReport {
    pub evaluated: usize,
    pub violations: Vec<SloViolation>,
}

impl SloReport {
    pub fn passed(&self) -> bool {
        self.violations.is_empty()
    }
}

#[derive(Debug, Clone, Default)]
pub struct SloEvaluator {
    thresholds: SloThresholds,
}

impl SloEvaluator {
    pub fn new(thresholds: SloThresholds) -> Self {
        Self { thresholds }
    }

    pub fn evaluate(&self, records: &[BaselineEvidence]) -> SloReport {
        let mut report = SloReport {
            evaluated: records.len(),
            violations: Vec::new(),
        };
        for record in records {
            self.evaluate_record(record, &mut report.violations);
        }
        report
    }

    fn evaluate_record(&self, record: &BaselineEvidence, violations: &mut Vec<SloViolation>) {
        if let (Some(open), Some(first_output)) = (record.turn_open_at, record.first_output_at) {
            let observed = millis_between(open, first_output);
            if observed > self.thresholds.max_open_to_first_output_ms {
                violations.push(SloViolation {
                    event_id: record.event_id.clone(),
                    rule: "open_to_first_output".into(),
                    observed_ms: Some(observed),
                    limit_ms: Some(self.thresholds.max_open_to_first_output_ms),
                });
            }
        } else if record.terminal_outcome == TerminalOutcome::Commit
            && self.thresholds.require_first_output_on_commit
            && record.first_output_at.is_none()
        {
            violations.push(SloViolation {
                event_id: record.event_id.clone(),
                rule: "commit_without_first_output".into(),
                observed_ms: None,
                limit_ms: None,
            });
        }

        if let (Some(accepted), Some(fence)) = (record.cancel_accepted_at, record.cancel_fence_at) {
            let observed = millis_between(accepted, fence);
            if observed > self.thresholds.max_cancel_accept_to_fence_ms {
                violations.push(SloViolation {
                    event_id: record.event_id.clone(),
                    rule: "cancel_accept_to_fence".into(),
                    observed_ms: Some(observed),
                    limit_ms: Some(self.thresholds.max_cancel_accept_to_fence_ms),
                });
            }
        }
    }
}

fn millis_between(from: OffsetDateTime, to: OffsetDateTime) -> u64 {
    let delta = to - from;
    delta.whole_milliseconds().max(0) as u64
}
