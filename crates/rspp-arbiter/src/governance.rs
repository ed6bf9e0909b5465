//! Offline governance evaluation: the correctness gate over appended
//! baseline records.
//!
//! Where the SLO evaluator asks "was it fast enough", this asks "is the
//! evidence well-formed": close flags, decision presence, marker
//! uniqueness, timestamp ordering, and redaction consistency.

use crate::baseline::{BaselineEvidence, CONTROL_PAYLOAD_CLASS, REDACTED_ENVELOPE};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use time::OffsetDateTime;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GovernanceFinding {
    pub event_id: String,
    pub rule: String,
    pub detail: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GovernanceReport {
    pub evaluated: usize,
    pub findings: Vec<GovernanceFinding>,
}

impl GovernanceReport {
    pub fn passed(&self) -> bool {
        self.findings.is_empty()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct GovernanceEvaluator;

impl GovernanceEvaluator {
    pub fn evaluate(&self, records: &[BaselineEvidence]) -> GovernanceReport {
        let mut report = GovernanceReport {
            evaluated: records.len(),
            findings: Vec::new(),
        };
        for record in records {
            evaluate_record(record, &mut report.findings);
        }
        report
    }
}

fn evaluate_record(record: &BaselineEvidence, findings: &mut Vec<GovernanceFinding>) {
    let mut push = |rule: &str, detail: String| {
        findings.push(GovernanceFinding {
            event_id: record.event_id.clone(),
            rule: rule.to_string(),
            detail,
        });
    };

    if !record.closed {
        push("close_flag", "record is not closed".into());
    }
    if record.terminal_reason.is_empty() {
        push("terminal_reason", "terminal reason is empty".into());
    }
    if record.decisions.is_empty() {
        push("decision_presence", "no decision outcome recorded".into());
    }

    let unique: BTreeSet<&String> = record.ordering_markers.iter().collect();
    if unique.len() != record.ordering_markers.len() {
        push(
            "marker_uniqueness",
            format!(
                "{} markers, {} unique",
                record.ordering_markers.len(),
                unique.len()
            ),
        );
    }

    check_order(
        "proposed_before_open",
        record.turn_open_proposed_at,
        record.turn_open_at,
        &mut push,
    );
    check_order(
        "open_before_first_output",
        record.turn_open_at,
        record.first_output_at,
        &mut push,
    );
    check_order(
        "cancel_accept_before_fence",
        record.cancel_accepted_at,
        record.cancel_fence_at,
        &mut push,
    );
    check_order(
        "cancel_fence_before_sent",
        record.cancel_fence_at,
        record.cancel_sent_at,
        &mut push,
    );
    check_order(
        "cancel_sent_before_ack",
        record.cancel_sent_at,
        record.cancel_ack_at,
        &mut push,
    );

    if record.envelope_snapshot == REDACTED_ENVELOPE
        && record.payload_class_tags != [CONTROL_PAYLOAD_CLASS.to_string()]
    {
        push(
            "redaction_consistency",
            "redacted envelope with non-control payload classes".into(),
        );
    }
}

fn check_order(
    rule: &str,
    earlier: Option<OffsetDateTime>,
    later: Option<OffsetDateTime>,
    push: &mut impl FnMut(&str, String),
) {
    if let (Some(earlier), Some(later)) = (earlier, later) {
        if earlier > later {
            push(rule, format!("{earlier} after {later}"));
        }
    }
}
