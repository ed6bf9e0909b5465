//! Structured error type for the turn runtime.
//!
//! The arbiter never lets one of these surface as an unclassified abort:
//! every error maps to a deterministic decision outcome or the fallback
//! abort path before anything reaches the caller.

use crate::events::TurnState;
use rspp_cp::CpError;
use thiserror::Error;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ArbiterError {
    /// The composed turn-start bundle failed its invariants.
    #[error("bundle validation failed: {reason}")]
    BundleValidation { reason: String },

    /// The planner could not freeze a turn plan.
    #[error("plan materialization failed: {reason}")]
    PlanMaterialization { reason: String },

    /// The recorder refused a baseline append.
    #[error("recording evidence unavailable: {reason}")]
    RecordingUnavailable { reason: String },

    /// A baseline record failed completeness validation before append.
    #[error("incomplete baseline evidence: {reason}")]
    IncompleteEvidence { reason: String },

    /// Distribution-layer failure, service-tagged.
    #[error(transparent)]
    Distribution(#[from] CpError),

    /// A transition outside the closed state set was about to be emitted.
    #[error("invalid transition {from:?} -> {to:?} ({trigger})")]
    InvalidTransition {
        from: TurnState,
        to: TurnState,
        trigger: String,
    },

    /// `handle_active` was called with no trigger raised.
    #[error("no active-turn trigger raised")]
    NoTrigger,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_messages_are_human_readable() {
        assert_eq!(
            ArbiterError::BundleValidation {
                reason: "empty provider bindings".into()
            }
            .to_string(),
            "bundle validation failed: empty provider bindings"
        );
        assert_eq!(
            ArbiterError::NoTrigger.to_string(),
            "no active-turn trigger raised"
        );
    }

    #[test]
    fn distribution_errors_wrap_transparently() {
        let cp = CpError::stale(rspp_cp::error::service::POLICY, "test");
        let err: ArbiterError = cp.into();
        assert!(err.to_string().contains("snapshot_stale"));
    }
}
