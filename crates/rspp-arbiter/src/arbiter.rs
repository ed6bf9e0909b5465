//! The turn arbiter: deterministic precedence at turn-open and during
//! active-turn handling, driving every turn to a well-ordered terminal
//! outcome with baseline evidence.
//!
//! The arbiter is single-threaded cooperative per turn: one call applies
//! one input and returns.  It performs no I/O on its hot path beyond bundle
//! resolution at open and `append_baseline` at terminal.

use crate::baseline::{
    build_baseline, BaselineEvidence, ProviderInvocationOutcome, TerminalOutcome,
};
use crate::bundle::SnapshotProvenance;
use crate::error::ArbiterError;
use crate::events::{
    trigger, validate_transitions, AbortReason, ControlSignal, ControlSignalKind, CpDecision,
    LifecycleEvent, Transition, TurnState,
};
use crate::gate::{evaluate_authority, evaluate_local_admission, CapacityOutcome, FailurePolicy};
use crate::plan::{PlanResolver, ResolvedTurnPlan};
use crate::recorder::TurnRecorder;
use crate::resolver::BundleSource;
use rspp_cp::artifact::{AdmissionOutcome, RecordingLevel};
use rspp_cp::backend::TurnLookup;
use rspp_cp::Clock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;

pub const REASON_BUNDLE_RESOLUTION_FAILED: &str = "turn_start_bundle_resolution_failed";
pub const REASON_PLAN_MATERIALIZATION_FAILED: &str = "plan_materialization_failed";

/// Arbiter configuration.
#[derive(Debug, Clone, Copy, Default)]
pub struct ArbiterConfig {
    pub snapshot_failure_policy: FailurePolicy,
    pub plan_failure_policy: FailurePolicy,
}

/// A turn-open request as the session layer sees it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnOpenRequest {
    pub session_id: String,
    pub turn_id: String,
    pub tenant_id: String,
    pub requested_pipeline_version: String,
    pub authority_epoch: u64,
    pub authority_epoch_valid: bool,
    pub authority_authorized: bool,
    pub snapshot_valid: bool,
    pub capacity: CapacityOutcome,
}

/// Everything `handle_open` produced, in emission order.
#[derive(Debug, Clone)]
pub struct OpenOutcome {
    pub state: TurnState,
    pub transitions: Vec<Transition>,
    pub events: Vec<LifecycleEvent>,
    pub decision: Option<CpDecision>,
    pub plan: Option<ResolvedTurnPlan>,
}

/// Context the active-turn handler needs about an open turn.
#[derive(Debug, Clone, Default)]
pub struct ActiveTurn {
    pub session_id: String,
    pub turn_id: String,
    pub tenant_id: String,
    pub pipeline_version: String,
    pub authority_epoch: u64,
    pub determinism_seed: u64,
    pub recording_level: RecordingLevel,
    pub plan: Option<ResolvedTurnPlan>,
    pub provenance: Option<SnapshotProvenance>,
    pub envelope_snapshot: String,
    pub payload_class_tags: Vec<String>,
    pub ordering_markers: Vec<String>,
    pub decisions: Vec<CpDecision>,
    pub invocation_outcomes: Vec<ProviderInvocationOutcome>,
    pub merge_rule_id: String,
    pub merge_rule_version: String,
    pub turn_open_proposed_at: Option<OffsetDateTime>,
    pub turn_open_at: Option<OffsetDateTime>,
    pub first_output_at: Option<OffsetDateTime>,
    /// Last control-lane sequences used by the transport layer; emitted
    /// signals continue from here.
    pub transport_sequence: u64,
    pub runtime_sequence: u64,
}

impl ActiveTurn {
    pub fn new(session_id: impl Into<String>, turn_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            turn_id: turn_id.into(),
            ..Self::default()
        }
    }

    /// Carry an accepted open outcome into active-turn context.
    pub fn from_open(request: &TurnOpenRequest, outcome: &OpenOutcome) -> Self {
        let plan = outcome.plan.clone();
        Self {
            session_id: request.session_id.clone(),
            turn_id: request.turn_id.clone(),
            tenant_id: request.tenant_id.clone(),
            pipeline_version: plan
                .as_ref()
                .map(|p| p.pipeline_version.clone())
                .unwrap_or_else(|| request.requested_pipeline_version.clone()),
            authority_epoch: plan
                .as_ref()
                .map(|p| p.authority_epoch)
                .unwrap_or(request.authority_epoch),
            provenance: plan.as_ref().map(|p| p.provenance.clone()),
            plan,
            ..Self::default()
        }
    }
}

/// The raised conditions for one active-turn input.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveSignals {
    pub authority_revoked: bool,
    pub cancel_accepted: bool,
    pub provider_failure: bool,
    pub node_timeout_or_failure: bool,
    pub transport_disconnect_or_stall: bool,
    pub baseline_append_failed: bool,
    pub no_legal_continue_or_fallback: bool,
    pub terminal_success_ready: bool,
}

/// The active-turn triggers, in precedence order (highest first).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActiveTrigger {
    AuthorityRevoked,
    CancelAccepted,
    ProviderFailure,
    NodeTimeoutOrFailure,
    TransportDisconnectOrStall,
    BaselineAppendFailed,
    NoLegalContinueOrFallback,
    TerminalSuccessReady,
}

impl ActiveTrigger {
    pub fn name(&self) -> &'static str {
        match self {
            ActiveTrigger::AuthorityRevoked => trigger::AUTHORITY_REVOKED,
            ActiveTrigger::CancelAccepted => trigger::CANCEL_ACCEPTED,
            ActiveTrigger::ProviderFailure => trigger::PROVIDER_FAILURE,
            ActiveTrigger::NodeTimeoutOrFailure => trigger::NODE_TIMEOUT_OR_FAILURE,
            ActiveTrigger::TransportDisconnectOrStall => trigger::TRANSPORT_DISCONNECT_OR_STALL,
            ActiveTrigger::BaselineAppendFailed => trigger::BASELINE_APPEND_FAILED,
            ActiveTrigger::NoLegalContinueOrFallback => trigger::NO_LEGAL_CONTINUE_OR_FALLBACK,
            ActiveTrigger::TerminalSuccessReady => trigger::TERMINAL_SUCCESS_READY,
        }
    }

    fn abort_reason(&self) -> Option<AbortReason> {
        match self {
            ActiveTrigger::AuthorityRevoked => Some(AbortReason::AuthorityLoss),
            ActiveTrigger::CancelAccepted => Some(AbortReason::Cancelled),
            ActiveTrigger::ProviderFailure => Some(AbortReason::ProviderFailure),
            ActiveTrigger::NodeTimeoutOrFailure => Some(AbortReason::NodeTimeoutOrFailure),
            ActiveTrigger::TransportDisconnectOrStall => {
                Some(AbortReason::TransportDisconnectOrStall)
            }
            ActiveTrigger::BaselineAppendFailed => Some(AbortReason::RecordingEvidenceUnavailable),
            ActiveTrigger::NoLegalContinueOrFallback => Some(AbortReason::DeterministicReason),
            ActiveTrigger::TerminalSuccessReady => None,
        }
    }
}

impl ActiveSignals {
    /// The highest-precedence raised trigger.
    pub fn trigger(&self) -> Option<ActiveTrigger> {
        if self.authority_revoked {
            Some(ActiveTrigger::AuthorityRevoked)
        } else if self.cancel_accepted {
            Some(ActiveTrigger::CancelAccepted)
        } else if self.provider_failure {
            Some(ActiveTrigger::ProviderFailure)
        } else if self.node_timeout_or_failure {
            Some(ActiveTrigger::NodeTimeoutOrFailure)
        } else if self.transport_disconnect_or_stall {
            Some(ActiveTrigger::TransportDisconnectOrStall)
        } else if self.baseline_append_failed {
            Some(ActiveTrigger::BaselineAppendFailed)
        } else if self.no_legal_continue_or_fallback {
            Some(ActiveTrigger::NoLegalContinueOrFallback)
        } else if self.terminal_success_ready {
            Some(ActiveTrigger::TerminalSuccessReady)
        } else {
            None
        }
    }
}

/// Everything `handle_active` produced, in emission order.
#[derive(Debug, Clone)]
pub struct ActiveOutcome {
    pub state: TurnState,
    pub transitions: Vec<Transition>,
    pub events: Vec<LifecycleEvent>,
    pub control_signals: Vec<ControlSignal>,
    pub baseline: Option<BaselineEvidence>,
}

/// The per-turn lifecycle state machine.
pub struct TurnArbiter {
    bundles: Arc<dyn BundleSource>,
    plans: Arc<dyn PlanResolver>,
    recorder: Arc<dyn TurnRecorder>,
    clock: Arc<dyn Clock>,
    config: ArbiterConfig,
}

impl TurnArbiter {
    pub fn new(
        bundles: Arc<dyn BundleSource>,
        plans: Arc<dyn PlanResolver>,
        recorder: Arc<dyn TurnRecorder>,
        clock: Arc<dyn Clock>,
        config: ArbiterConfig,
    ) -> Self {
        Self {
            bundles,
            plans,
            recorder,
            clock,
            config,
        }
    }

    /// Handle a turn-open proposal.
    ///
    /// Precedence: local admission, authority guard, bundle resolution,
    /// lease adoption + re-guard, CP admission, plan materialization.
    /// Pre-turn denials are not terminal events: they return Opening → Idle
    /// with the matching decision and emit no abort/close.
    #[tracing::instrument(
        name = "arbiter.turn.open",
        skip(self, request),
        fields(
            session_id = %request.session_id,
            turn_id = %request.turn_id,
            epoch = %request.authority_epoch
        )
    )]
    pub async fn handle_open(&self, request: &TurnOpenRequest) -> Result<OpenOutcome, ArbiterError> {
        let mut transitions = vec![Transition::new(
            TurnState::Idle,
            TurnState::Opening,
            trigger::TURN_OPEN_PROPOSED,
        )];
        let mut events = vec![LifecycleEvent::TurnOpenProposed];

        // 2. local admission
        if let Some(decision) = evaluate_local_admission(
            request.snapshot_valid,
            request.capacity,
            self.config.snapshot_failure_policy,
        ) {
            return deny(transitions, events, decision);
        }

        // 3. authority guard on the input epoch view
        if let Some(decision) =
            evaluate_authority(request.authority_epoch_valid, request.authority_authorized)
        {
            return deny(transitions, events, decision);
        }

        // 4. turn-start bundle resolution
        let lookup = TurnLookup::new(
            request.tenant_id.clone(),
            request.session_id.clone(),
            request.requested_pipeline_version.clone(),
        );
        let bundle = match self.bundles.resolve(&lookup).await {
            Ok(bundle) => bundle,
            Err(err) => {
                log::warn!(
                    "bundle resolution failed for {}/{}: {err}",
                    request.session_id,
                    request.turn_id
                );
                let decision = CpDecision {
                    kind: self.config.plan_failure_policy.decision_kind(),
                    scope: Default::default(),
                    reason: REASON_BUNDLE_RESOLUTION_FAILED.to_string(),
                };
                return deny(transitions, events, decision);
            }
        };

        // 5. lease adoption: take the lease epoch when positive (or when the
        // input epoch is zero), AND the lease verdicts into current values,
        // then re-run the authority guard.
        let mut epoch = request.authority_epoch;
        let mut epoch_valid = request.authority_epoch_valid;
        let mut authorized = request.authority_authorized;
        if bundle.has_lease_decision {
            let lease = &bundle.lease;
            if lease.authority_epoch > 0 || epoch == 0 {
                epoch = lease.authority_epoch;
            }
            if let Some(lease_valid) = lease.authority_epoch_valid {
                epoch_valid = epoch_valid && lease_valid;
            }
            if let Some(lease_granted) = lease.authority_authorized {
                authorized = authorized && lease_granted;
            }
            if let Some(decision) = evaluate_authority(epoch_valid, authorized) {
                return deny(transitions, events, decision);
            }
        }

        // 6. CP admission decision carried in the bundle
        if bundle.has_cp_admission_decision
            && bundle.cp_admission.outcome != AdmissionOutcome::Admit
        {
            let kind = match bundle.cp_admission.outcome {
                AdmissionOutcome::Reject => crate::events::DecisionKind::Reject,
                _ => crate::events::DecisionKind::Defer,
            };
            let decision = CpDecision {
                kind,
                scope: bundle.cp_admission.scope,
                reason: bundle.cp_admission.reason.clone(),
            };
            return deny(transitions, events, decision);
        }

        // 7. plan materialization
        let plan = match self.plans.materialize(&bundle, epoch) {
            Ok(plan) => plan,
            Err(err) => {
                log::warn!(
                    "plan materialization failed for {}/{}: {err}",
                    request.session_id,
                    request.turn_id
                );
                let decision = CpDecision {
                    kind: self.config.plan_failure_policy.decision_kind(),
                    scope: Default::default(),
                    reason: REASON_PLAN_MATERIALIZATION_FAILED.to_string(),
                };
                return deny(transitions, events, decision);
            }
        };

        // 8. Opening -> Active
        transitions.push(Transition::new(
            TurnState::Opening,
            TurnState::Active,
            trigger::TURN_OPEN,
        ));
        events.push(LifecycleEvent::TurnOpen);
        validate_transitions(&transitions)?;
        Ok(OpenOutcome {
            state: TurnState::Active,
            transitions,
            events,
            decision: None,
            plan: Some(plan),
        })
    }

    /// Handle one active-turn input under deterministic precedence.
    #[tracing::instrument(
        name = "arbiter.turn.active",
        skip(self, turn, signals),
        fields(session_id = %turn.session_id, turn_id = %turn.turn_id)
    )]
    pub async fn handle_active(
        &self,
        turn: &ActiveTurn,
        signals: &ActiveSignals,
    ) -> Result<ActiveOutcome, ArbiterError> {
        let trigger = signals.trigger().ok_or(ArbiterError::NoTrigger)?;
        let now = self.clock.now_utc();

        let emission = self.plan_emission(turn, trigger, now);

        // Every terminal except the append-failure trigger itself records
        // baseline evidence; a failed build or append replaces the whole
        // emission with the deterministic fallback sequence.
        let (emission, baseline) = if trigger == ActiveTrigger::BaselineAppendFailed {
            (emission, None)
        } else {
            let cancel_fired = trigger == ActiveTrigger::CancelAccepted;
            let built = build_baseline(
                turn,
                emission.terminal_outcome,
                emission.terminal_reason,
                cancel_fired,
                self.recorder.as_ref(),
                self.bundles.as_ref(),
                self.clock.as_ref(),
            )
            .await;
            match built {
                Ok(record) => match self.recorder.append_baseline(&record).await {
                    Ok(()) => (emission, Some(record)),
                    Err(err) => {
                        log::error!(
                            "baseline append failed for {}/{}: {err}",
                            turn.session_id,
                            turn.turn_id
                        );
                        (
                            self.plan_emission(turn, ActiveTrigger::BaselineAppendFailed, now),
                            None,
                        )
                    }
                },
                Err(err) => {
                    log::error!(
                        "baseline build failed for {}/{}: {err}",
                        turn.session_id,
                        turn.turn_id
                    );
                    (
                        self.plan_emission(turn, ActiveTrigger::BaselineAppendFailed, now),
                        None,
                    )
                }
            }
        };

        let transitions = vec![
            Transition::new(TurnState::Active, TurnState::Terminal, emission.trigger.name()),
            Transition::new(TurnState::Terminal, TurnState::Closed, trigger::CLOSE),
        ];
        validate_transitions(&transitions)?;

        Ok(ActiveOutcome {
            state: TurnState::Closed,
            transitions,
            events: emission.events,
            control_signals: emission.control_signals,
            baseline,
        })
    }

    /// The events and control signals one trigger emits.
    fn plan_emission(
        &self,
        turn: &ActiveTurn,
        trigger: ActiveTrigger,
        now: OffsetDateTime,
    ) -> PlannedEmission {
        let mut events = Vec::new();
        let mut control_signals = Vec::new();
        let transport_base = turn.transport_sequence;
        let runtime_base = turn.runtime_sequence;

        match trigger {
            ActiveTrigger::AuthorityRevoked => {
                control_signals.push(ControlSignal {
                    kind: ControlSignalKind::DeauthorizedDrain,
                    transport_sequence: transport_base + 1,
                    runtime_sequence: runtime_base + 1,
                    runtime_ts: now,
                });
                events.push(LifecycleEvent::DeauthorizedDrain);
            }
            ActiveTrigger::TransportDisconnectOrStall => {
                control_signals.push(ControlSignal {
                    kind: ControlSignalKind::Disconnected,
                    transport_sequence: transport_base + 1,
                    runtime_sequence: runtime_base + 1,
                    runtime_ts: now,
                });
                control_signals.push(ControlSignal {
                    kind: ControlSignalKind::Stall,
                    transport_sequence: transport_base + 2,
                    runtime_sequence: runtime_base + 2,
                    runtime_ts: now + Duration::from_millis(1),
                });
            }
            _ => {}
        }

        let (terminal_outcome, terminal_reason) = match trigger.abort_reason() {
            Some(reason) => {
                events.push(LifecycleEvent::Abort { reason });
                (TerminalOutcome::Abort, reason.name())
            }
            None => {
                events.push(LifecycleEvent::Commit);
                (TerminalOutcome::Commit, trigger::TERMINAL_SUCCESS_READY)
            }
        };
        events.push(LifecycleEvent::Close);

        PlannedEmission {
            trigger,
            events,
            control_signals,
            terminal_outcome,
            terminal_reason,
        }
    }
}

struct PlannedEmission {
    trigger: ActiveTrigger,
    events: Vec<LifecycleEvent>,
    control_signals: Vec<ControlSignal>,
    terminal_outcome: TerminalOutcome,
    terminal_reason: &'static str,
}

fn deny(
    mut transitions: Vec<Transition>,
    mut events: Vec<LifecycleEvent>,
    decision: CpDecision,
) -> Result<OpenOutcome, ArbiterError> {
    transitions.push(Transition::new(
        TurnState::Opening,
        TurnState::Idle,
        decision.kind.name(),
    ));
    events.push(LifecycleEvent::Decision {
        decision: decision.clone(),
    });
    validate_transitions(&transitions)?;
    Ok(OpenOutcome {
        state: TurnState::Idle,
        transitions,
        events,
        decision: Some(decision),
        plan: None,
    })
}
