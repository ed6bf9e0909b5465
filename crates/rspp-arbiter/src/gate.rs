//! Pre-turn deterministic gates: local admission and the authority guard.

use crate::events::{CpDecision, DecisionKind};
use rspp_cp::artifact::AdmissionScope;
use serde::{Deserialize, Serialize};

/// Local capacity verdict supplied with the turn-open request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CapacityOutcome {
    #[default]
    Admit,
    Reject,
    Defer,
}

/// What to do when a deterministic failure gate trips.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Shed load without hard-failing the session.
    #[default]
    Defer,
    Reject,
}

impl FailurePolicy {
    pub fn decision_kind(&self) -> DecisionKind {
        match self {
            FailurePolicy::Defer => DecisionKind::Defer,
            FailurePolicy::Reject => DecisionKind::Reject,
        }
    }
}

pub const REASON_SNAPSHOT_INVALID: &str = "snapshot_invalid";
pub const REASON_CAPACITY_REJECT: &str = "capacity_reject";
pub const REASON_CAPACITY_DEFER: &str = "capacity_defer";
pub const REASON_EPOCH_STALE: &str = "authority_epoch_stale";
pub const REASON_DEAUTHORIZED: &str = "authority_deauthorized";

/// Local admission: snapshot validity under the configured failure policy,
/// then capacity.  `None` means the turn may proceed.
pub fn evaluate_local_admission(
    snapshot_valid: bool,
    capacity: CapacityOutcome,
    snapshot_failure_policy: FailurePolicy,
) -> Option<CpDecision> {
    if !snapshot_valid {
        return Some(CpDecision {
            kind: snapshot_failure_policy.decision_kind(),
            scope: AdmissionScope::Session,
            reason: REASON_SNAPSHOT_INVALID.to_string(),
        });
    }
    match capacity {
        CapacityOutcome::Admit => None,
        CapacityOutcome::Reject => Some(CpDecision {
            kind: DecisionKind::Reject,
            scope: AdmissionScope::Session,
            reason: REASON_CAPACITY_REJECT.to_string(),
        }),
        CapacityOutcome::Defer => Some(CpDecision {
            kind: DecisionKind::Defer,
            scope: AdmissionScope::Session,
            reason: REASON_CAPACITY_DEFER.to_string(),
        }),
    }
}

/// Authority guard over the current epoch view.  Epoch validity is checked
/// before authorization.
pub fn evaluate_authority(epoch_valid: bool, authorized: bool) -> Option<CpDecision> {
    if !epoch_valid {
        return Some(CpDecision {
            kind: DecisionKind::StaleEpochReject,
            scope: AdmissionScope::Session,
            reason: REASON_EPOCH_STALE.to_string(),
        });
    }
    if !authorized {
        return Some(CpDecision {
            kind: DecisionKind::Deauthorized,
            scope: AdmissionScope::Session,
            reason: REASON_DEAUTHORIZED.to_string(),
        });
    }
    None
}
