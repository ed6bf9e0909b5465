//! Baseline evidence: the append-only record describing a completed turn
//! for audit and replay.
//!
//! The builder fills whatever the active turn did not carry: provenance is
//! recovered by re-resolving the bundle, invocation outcomes are
//! synthesized from the recorder's per-attempt records, missing timestamps
//! are pinned to the runtime timestamp, ordering markers are de-duplicated,
//! and `L0` recording collapses payload evidence to its redaction defaults.
//! Completeness validation runs before any append.

use crate::arbiter::ActiveTurn;
use crate::error::ArbiterError;
use crate::events::{CpDecision, DecisionKind};
use crate::plan::{FrozenPlanResolver, PlanHash, PlanResolver};
use crate::recorder::{ProviderInvocationAttempt, TurnRecorder};
use crate::resolver::BundleSource;
use crate::bundle::SnapshotProvenance;
use rspp_cp::artifact::{AdmissionScope, RecordingLevel};
use rspp_cp::backend::TurnLookup;
use rspp_cp::Clock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::time::Duration;
use time::OffsetDateTime;

pub const REDACTED_ENVELOPE: &str = "envelope:redacted";
pub const CONTROL_PAYLOAD_CLASS: &str = "control";
pub const DEFAULT_ENVELOPE_SNAPSHOT: &str = "envelope:v1";
pub const DEFAULT_MERGE_RULE_ID: &str = "merge-ordered";
pub const DEFAULT_MERGE_RULE_VERSION: &str = "v1";
pub const REASON_TURN_ADMITTED: &str = "turn_admitted";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminalOutcome {
    Commit,
    #[default]
    Abort,
}

/// One provider invocation, collapsed to its final attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderInvocationOutcome {
    pub provider_invocation_id: String,
    pub provider_id: String,
    pub final_attempt: u32,
    pub total_latency_ms: u64,
    pub ok: bool,
}

/// The complete baseline evidence record for one turn.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BaselineEvidence {
    pub session_id: String,
    pub turn_id: String,
    pub pipeline_version: String,
    pub event_id: String,
    pub envelope_snapshot: String,
    pub payload_class_tags: Vec<String>,
    pub plan_hash: PlanHash,
    pub provenance: SnapshotProvenance,
    pub decisions: Vec<CpDecision>,
    pub invocation_outcomes: Vec<ProviderInvocationOutcome>,
    pub determinism_seed: u64,
    pub ordering_markers: Vec<String>,
    pub merge_rule_id: String,
    pub merge_rule_version: String,
    pub authority_epoch: u64,
    #[serde(with = "time::serde::rfc3339::option")]
    pub turn_open_proposed_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub turn_open_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub first_output_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub cancel_accepted_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub cancel_fence_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub cancel_sent_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub cancel_ack_at: Option<OffsetDateTime>,
    pub terminal_outcome: TerminalOutcome,
    pub terminal_reason: String,
    pub closed: bool,
}

impl BaselineEvidence {
    /// Completeness validation; runs before any append.
    pub fn validate_complete(&self) -> Result<(), ArbiterError> {
        let require = |ok: bool, reason: &str| {
            if ok {
                Ok(())
            } else {
                Err(ArbiterError::IncompleteEvidence {
                    reason: reason.to_string(),
                })
            }
        };
        require(!self.session_id.is_empty(), "missing session_id")?;
        require(!self.turn_id.is_empty(), "missing turn_id")?;
        require(!self.pipeline_version.is_empty(), "missing pipeline_version")?;
        require(!self.event_id.is_empty(), "missing event_id")?;
        require(self.provenance.is_complete(), "incomplete provenance")?;
        require(!self.decisions.is_empty(), "no decision outcome")?;
        require(!self.terminal_reason.is_empty(), "missing terminal reason")?;
        require(self.closed, "close flag not set")?;
        require(
            self.turn_open_proposed_at.is_some(),
            "missing turn_open_proposed_at",
        )?;
        require(self.turn_open_at.is_some(), "missing turn_open_at")?;

        let unique: BTreeSet<&String> = self.ordering_markers.iter().collect();
        require(
            unique.len() == self.ordering_markers.len(),
            "duplicate ordering markers",
        )?;
        Ok(())
    }
}

/// Build the baseline evidence record for a terminal resolution.
pub async fn build_baseline(
    turn: &ActiveTurn,
    terminal_outcome: TerminalOutcome,
    terminal_reason: &str,
    cancel_fired: bool,
    recorder: &dyn TurnRecorder,
    bundles: &dyn BundleSource,
    clock: &dyn Clock,
) -> Result<BaselineEvidence, ArbiterError> {
    let runtime_ts = clock.now_utc();

    // Recover provenance (and a plan hash) when the turn does not carry
    // them; the bundle resolver is deterministic so this re-resolution
    // describes the same turn.
    let mut plan_hash = turn.plan.as_ref().map(|p| p.plan_hash);
    let provenance = match turn
        .provenance
        .clone()
        .or_else(|| turn.plan.as_ref().map(|p| p.provenance.clone()))
    {
        Some(provenance) => provenance,
        None => {
            let lookup = TurnLookup::new(
                turn.tenant_id.clone(),
                turn.session_id.clone(),
                turn.pipeline_version.clone(),
            );
            let bundle = bundles.resolve(&lookup).await?;
            if plan_hash.is_none() {
                let plan = FrozenPlanResolver.materialize(&bundle, turn.authority_epoch)?;
                plan_hash = Some(plan.plan_hash);
            }
            bundle.provenance
        }
    };
    let plan_hash = plan_hash.unwrap_or_else(|| {
        PlanHash::digest(&format!(
            "{}\n{}\n{}",
            turn.pipeline_version, turn.authority_epoch, turn.session_id
        ))
    });

    let invocation_outcomes = if turn.invocation_outcomes.is_empty() {
        synthesize_outcomes(recorder.invocation_attempts(&turn.session_id, &turn.turn_id))
    } else {
        turn.invocation_outcomes.clone()
    };

    let mut decisions = turn.decisions.clone();
    if decisions.is_empty() {
        decisions.push(CpDecision {
            kind: DecisionKind::Admit,
            scope: AdmissionScope::Session,
            reason: REASON_TURN_ADMITTED.to_string(),
        });
    }

    let turn_open_proposed_at = turn
        .turn_open_proposed_at
        .unwrap_or(runtime_ts - Duration::from_millis(1));
    let turn_open_at = turn.turn_open_at.unwrap_or(runtime_ts);
    // The whole cancel chain is pinned to the runtime timestamp when the
    // cancel path fired; equal timestamps satisfy the ordering rules.
    let cancel_ts = if cancel_fired { Some(runtime_ts) } else { None };

    let (envelope_snapshot, payload_class_tags) = if turn.recording_level == RecordingLevel::L0 {
        // Redaction at L0: payload evidence collapses, identity and
        // provenance stay.
        (
            REDACTED_ENVELOPE.to_string(),
            vec![CONTROL_PAYLOAD_CLASS.to_string()],
        )
    } else {
        let envelope = if turn.envelope_snapshot.is_empty() {
            DEFAULT_ENVELOPE_SNAPSHOT.to_string()
        } else {
            turn.envelope_snapshot.clone()
        };
        (envelope, turn.payload_class_tags.clone())
    };

    let record = BaselineEvidence {
        session_id: turn.session_id.clone(),
        turn_id: turn.turn_id.clone(),
        pipeline_version: turn.pipeline_version.clone(),
        event_id: format!("{}/{}/baseline", turn.session_id, turn.turn_id),
        envelope_snapshot,
        payload_class_tags,
        plan_hash,
        provenance,
        decisions,
        invocation_outcomes,
        determinism_seed: turn.determinism_seed,
        ordering_markers: dedup_markers(&turn.ordering_markers),
        merge_rule_id: non_empty_or(&turn.merge_rule_id, DEFAULT_MERGE_RULE_ID),
        merge_rule_version: non_empty_or(&turn.merge_rule_version, DEFAULT_MERGE_RULE_VERSION),
        authority_epoch: turn.authority_epoch,
        turn_open_proposed_at: Some(turn_open_proposed_at),
        turn_open_at: Some(turn_open_at),
        first_output_at: turn.first_output_at,
        cancel_accepted_at: cancel_ts,
        cancel_fence_at: cancel_ts,
        cancel_sent_at: cancel_ts,
        cancel_ack_at: cancel_ts,
        terminal_outcome,
        terminal_reason: terminal_reason.to_string(),
        closed: true,
    };
    record.validate_complete()?;
    Ok(record)
}

fn non_empty_or(value: &str, default: &str) -> String {
    if value.is_empty() {
        default.to_string()
    } else {
        value.to_string()
    }
}

fn dedup_markers(markers: &[String]) -> Vec<String> {
    let mut seen = BTreeSet::new();
    markers
        .iter()
        .filter(|m| seen.insert(m.as_str().to_string()))
        .cloned()
        .collect()
}

/// Group per-attempt records by invocation id (first-seen order), take the
/// highest attempt as final, and sum latencies.
fn synthesize_outcomes(attempts: Vec<ProviderInvocationAttempt>) -> Vec<ProviderInvocationOutcome> {
    let mut outcomes: Vec<ProviderInvocationOutcome> = Vec::new();
    for attempt in attempts {
        match outcomes
            .iter_mut()
            .find(|o| o.provider_invocation_id == attempt.provider_invocation_id)
        {
            Some(outcome) => {
                outcome.total_latency_ms += attempt.latency_ms;
                if attempt.attempt >= outcome.final_attempt {
                    outcome.final_attempt = attempt.attempt;
                    outcome.ok = attempt.ok;
                    outcome.provider_id = attempt.provider_id;
                }
            }
            None => outcomes.push(ProviderInvocationOutcome {
                provider_invocation_id: attempt.provider_invocation_id,
                provider_id: attempt.provider_id,
                final_attempt: attempt.attempt,
                total_latency_ms: attempt.latency_ms,
                ok: attempt.ok,
            }),
        }
    }
    outcomes
}
