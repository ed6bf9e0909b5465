//! Turn lifecycle states, validated transitions, emitted events, and
//! control-lane signals.

use crate::error::ArbiterError;
use rspp_cp::artifact::AdmissionScope;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// The closed set of per-turn states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnState {
    Idle,
    Opening,
    Active,
    Terminal,
    Closed,
}

/// Well-known transition trigger names.
pub mod trigger {
    pub const TURN_OPEN_PROPOSED: &str = "turn_open_proposed";
    pub const TURN_OPEN: &str = "turn_open";
    pub const CLOSE: &str = "close";
    pub const AUTHORITY_REVOKED: &str = "authority_revoked";
    pub const CANCEL_ACCEPTED: &str = "cancel_accepted";
    pub const PROVIDER_FAILURE: &str = "provider_failure";
    pub const NODE_TIMEOUT_OR_FAILURE: &str = "node_timeout_or_failure";
    pub const TRANSPORT_DISCONNECT_OR_STALL: &str = "transport_disconnect_or_stall";
    pub const BASELINE_APPEND_FAILED: &str = "baseline_append_failed";
    pub const NO_LEGAL_CONTINUE_OR_FALLBACK: &str = "no_legal_continue_or_fallback";
    pub const TERMINAL_SUCCESS_READY: &str = "terminal_success_ready";
}

/// A labeled state transition.  Every transition the arbiter produces is
/// deterministic; the constructor enforces it and [`validate_transitions`]
/// re-checks before anything is returned to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transition {
    pub from: TurnState,
    pub to: TurnState,
    pub trigger: String,
    pub deterministic: bool,
}

impl Transition {
    pub fn new(from: TurnState, to: TurnState, trigger: impl Into<String>) -> Self {
        Self {
            from,
            to,
            trigger: trigger.into(),
            deterministic: true,
        }
    }
}

/// Reject non-deterministic or discontiguous transition chains.
pub fn validate_transitions(transitions: &[Transition]) -> Result<(), ArbiterError> {
    let mut previous: Option<&Transition> = None;
    for transition in transitions {
        if !transition.deterministic {
            return Err(ArbiterError::InvalidTransition {
                from: transition.from,
                to: transition.to,
                trigger: transition.trigger.clone(),
            });
        }
        if let Some(previous) = previous {
            if previous.to != transition.from {
                return Err(ArbiterError::InvalidTransition {
                    from: transition.from,
                    to: transition.to,
                    trigger: transition.trigger.clone(),
                });
            }
        }
        previous = Some(transition);
    }
    Ok(())
}

/// Pre-turn decision outcomes emitted to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionKind {
    Admit,
    Reject,
    Defer,
    StaleEpochReject,
    Deauthorized,
}

impl DecisionKind {
    pub fn name(&self) -> &'static str {
        match self {
            DecisionKind::Admit => "admit",
            DecisionKind::Reject => "reject",
            DecisionKind::Defer => "defer",
            DecisionKind::StaleEpochReject => "stale_epoch_reject",
            DecisionKind::Deauthorized => "deauthorized",
        }
    }
}

/// A pre-turn decision with its scope and reason.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CpDecision {
    pub kind: DecisionKind,
    pub scope: AdmissionScope,
    pub reason: String,
}

/// Why an active turn aborted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AbortReason {
    AuthorityLoss,
    Cancelled,
    ProviderFailure,
    NodeTimeoutOrFailure,
    TransportDisconnectOrStall,
    RecordingEvidenceUnavailable,
    DeterministicReason,
}

impl AbortReason {
    pub fn name(&self) -> &'static str {
        match self {
            AbortReason::AuthorityLoss => "authority_loss",
            AbortReason::Cancelled => "cancelled",
            AbortReason::ProviderFailure => "provider_failure",
            AbortReason::NodeTimeoutOrFailure => "node_timeout_or_failure",
            AbortReason::TransportDisconnectOrStall => "transport_disconnect_or_stall",
            AbortReason::RecordingEvidenceUnavailable => "recording_evidence_unavailable",
            AbortReason::DeterministicReason => "deterministic_reason",
        }
    }
}

/// Lifecycle events emitted to the caller, in order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LifecycleEvent {
    TurnOpenProposed,
    TurnOpen,
    Commit,
    Abort { reason: AbortReason },
    Close,
    DeauthorizedDrain,
    Decision { decision: CpDecision },
}

impl LifecycleEvent {
    /// The wire name of this event.
    pub fn name(&self) -> &'static str {
        match self {
            LifecycleEvent::TurnOpenProposed => "turn_open_proposed",
            LifecycleEvent::TurnOpen => "turn_open",
            LifecycleEvent::Commit => "commit",
            LifecycleEvent::Abort { .. } => "abort",
            LifecycleEvent::Close => "close",
            LifecycleEvent::DeauthorizedDrain => "deauthorized_drain",
            LifecycleEvent::Decision { decision } => decision.kind.name(),
        }
    }
}

/// Control-lane signal kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlSignalKind {
    DeauthorizedDrain,
    Disconnected,
    Stall,
}

/// A control-lane signal.  Sequences increase strictly within one turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlSignal {
    pub kind: ControlSignalKind,
    pub transport_sequence: u64,
    pub runtime_sequence: u64,
    #[serde(with = "time::serde::rfc3339")]
    pub runtime_ts: OffsetDateTime,
}
