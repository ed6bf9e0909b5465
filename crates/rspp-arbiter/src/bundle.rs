//! The immutable turn-start bundle: every control-plane output one turn
//! needs, composed and validated before the runtime sees it.

use crate::error::ArbiterError;
use rspp_cp::artifact::{AdmissionOutcome, ExecutionProfile};
use rspp_cp::backend::{
    CompiledGraph, CpAdmissionDecision, LeaseDecision, ProviderHealthView, ResolvedTurnPolicy,
    RolloutDecision, RoutingSnapshot,
};
use serde::{Deserialize, Serialize};

/// The six snapshot identifiers recorded with every turn.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotProvenance {
    pub routing_view_snapshot: String,
    pub admission_policy_snapshot: String,
    pub policy_resolution_snapshot: String,
    pub provider_health_snapshot: String,
    pub graph_compile_snapshot: String,
    pub lease_resolution_snapshot: String,
}

impl SnapshotProvenance {
    pub fn is_complete(&self) -> bool {
        !self.routing_view_snapshot.is_empty()
            && !self.admission_policy_snapshot.is_empty()
            && !self.policy_resolution_snapshot.is_empty()
            && !self.provider_health_snapshot.is_empty()
            && !self.graph_compile_snapshot.is_empty()
            && !self.lease_resolution_snapshot.is_empty()
    }
}

/// The composed, validated, per-turn set of control-plane outputs.  Exists
/// for a single turn; the plan resolver freezes it into a
/// [`ResolvedTurnPlan`](crate::plan::ResolvedTurnPlan).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnStartBundle {
    pub pipeline_version: String,
    pub graph_definition_ref: String,
    pub execution_profile: ExecutionProfile,
    pub rollout: RolloutDecision,
    pub routing: RoutingSnapshot,
    pub policy: ResolvedTurnPolicy,
    pub provider_health: ProviderHealthView,
    pub graph: CompiledGraph,
    pub provenance: SnapshotProvenance,
    pub has_cp_admission_decision: bool,
    pub cp_admission: CpAdmissionDecision,
    pub has_lease_decision: bool,
    pub lease: LeaseDecision,
}

impl TurnStartBundle {
    /// Every per-section invariant, re-checked on the composed whole.  A
    /// bundle that fails validation is never returned to a caller.
    pub fn validate(&self) -> Result<(), ArbiterError> {
        if self.pipeline_version.is_empty() {
            return Err(invalid("bundle has no pipeline version"));
        }
        if self.graph_definition_ref.is_empty() {
            return Err(invalid("bundle has no graph definition ref"));
        }
        if self.rollout.pipeline_version != self.pipeline_version {
            return Err(invalid("rollout decision disagrees with bundle version"));
        }
        self.policy
            .validate()
            .map_err(|e| invalid(format!("turn policy: {e}")))?;
        if !self.provenance.is_complete() {
            return Err(invalid("snapshot provenance is incomplete"));
        }
        if self.has_cp_admission_decision
            && self.cp_admission.over_quota()
            && self.cp_admission.outcome != AdmissionOutcome::Reject
        {
            return Err(invalid("quota breach without reject outcome"));
        }
        Ok(())
    }
}

fn invalid(reason: impl Into<String>) -> ArbiterError {
    ArbiterError::BundleValidation {
        reason: reason.into(),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use rspp_cp::backend::{DEFAULT_LEASE_SNAPSHOT, DEFAULT_ROLLOUT_SNAPSHOT};

    pub(crate) fn valid_bundle() -> TurnStartBundle {
        let policy = ResolvedTurnPolicy::service_default();
        let routing = RoutingSnapshot::service_default();
        let health = ProviderHealthView::service_default();
        let graph = CompiledGraph::service_default();
        TurnStartBundle {
            pipeline_version: "v1".into(),
            graph_definition_ref: "graph:v1".into(),
            execution_profile: ExecutionProfile::Simple,
            rollout: RolloutDecision {
                pipeline_version: "v1".into(),
                rollout_policy_snapshot: DEFAULT_ROLLOUT_SNAPSHOT.into(),
                canary: false,
            },
            provenance: SnapshotProvenance {
                routing_view_snapshot: routing.routing_view_snapshot.clone(),
                admission_policy_snapshot: routing.admission_policy_snapshot.clone(),
                policy_resolution_snapshot: policy.policy_resolution_snapshot.clone(),
                provider_health_snapshot: health.provider_health_snapshot.clone(),
                graph_compile_snapshot: graph.graph_compile_snapshot.clone(),
                lease_resolution_snapshot: DEFAULT_LEASE_SNAPSHOT.into(),
            },
            routing,
            policy,
            provider_health: health,
            graph,
            has_cp_admission_decision: false,
            cp_admission: CpAdmissionDecision::default(),
            has_lease_decision: false,
            lease: LeaseDecision::default(),
        }
    }

    #[test]
    fn well_formed_bundle_validates() {
        valid_bundle().validate().unwrap();
    }

    #[test]
    fn empty_pipeline_version_rejected() {
        let mut bundle = valid_bundle();
        bundle.pipeline_version.clear();
        assert!(bundle.validate().is_err());
    }

    #[test]
    fn rollout_disagreement_rejected() {
        let mut bundle = valid_bundle();
        bundle.rollout.pipeline_version = "v9".into();
        assert!(bundle.validate().is_err());
    }

    #[test]
    fn incomplete_provenance_rejected() {
        let mut bundle = valid_bundle();
        bundle.provenance.lease_resolution_snapshot.clear();
        let err = bundle.validate().unwrap_err();
        assert!(err.to_string().contains("provenance"));
    }

    #[test]
    fn policy_invariants_rechecked() {
        let mut bundle = valid_bundle();
        bundle.policy.provider_bindings.clear();
        assert!(bundle.validate().is_err());
    }

    #[test]
    fn quota_breach_must_carry_reject() {
        let mut bundle = valid_bundle();
        bundle.has_cp_admission_decision = true;
        bundle.cp_admission.session_rate_limit_per_min = 5;
        bundle.cp_admission.session_rate_observed_per_min = 50;
        bundle.cp_admission.outcome = AdmissionOutcome::Admit;
        assert!(bundle.validate().is_err());

        bundle.cp_admission.outcome = AdmissionOutcome::Reject;
        bundle.validate().unwrap();
    }

    #[test]
    fn bundles_compare_equal_by_value() {
        assert_eq!(valid_bundle(), valid_bundle());
    }
}
