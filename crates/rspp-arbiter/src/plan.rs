//! Plan materialization: freezing a bundle into the immutable plan the
//! active-turn handler references by identity only.

use crate::bundle::{SnapshotProvenance, TurnStartBundle};
use crate::error::ArbiterError;
use rspp_cp::artifact::ExecutionProfile;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// A 64-bit identity digest over the plan's identifying fields.
///
/// Serializes as a 16-character hex string so downstream consumers never
/// hit integer-precision trouble.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct PlanHash(u64);

impl PlanHash {
    pub fn digest(identity: &str) -> Self {
        Self(rapidhash::v3::rapidhash_v3(identity.as_bytes()))
    }

    pub const fn as_u64(&self) -> u64 {
        self.0
    }

    pub fn to_hex(&self) -> String {
        format!("{:016x}", self.0)
    }
}

impl fmt::Debug for PlanHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PlanHash({:016x})", self.0)
    }
}

impl fmt::Display for PlanHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

impl Serialize for PlanHash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for PlanHash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        u64::from_str_radix(&raw, 16)
            .map(Self)
            .map_err(serde::de::Error::custom)
    }
}

/// The frozen runtime plan for one turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedTurnPlan {
    pub pipeline_version: String,
    pub graph_definition_ref: String,
    pub execution_profile: ExecutionProfile,
    pub allowed_adaptive_actions: Vec<String>,
    pub authority_epoch: u64,
    pub provenance: SnapshotProvenance,
    pub plan_hash: PlanHash,
}

/// Seam for materializing plans; tests direct failure through it.
pub trait PlanResolver: Send + Sync {
    fn materialize(
        &self,
        bundle: &TurnStartBundle,
        authority_epoch: u64,
    ) -> Result<ResolvedTurnPlan, ArbiterError>;
}

/// The production resolver: derives the plan hash from the bundle's
/// identity fields, so identical bundles freeze to identical plans.
#[derive(Debug, Clone, Copy, Default)]
pub struct FrozenPlanResolver;

impl FrozenPlanResolver {
    pub fn plan_identity(bundle: &TurnStartBundle, authority_epoch: u64) -> String {
        let provenance = &bundle.provenance;
        let mut identity = String::new();
        for part in [
            bundle.pipeline_version.as_str(),
            bundle.graph_definition_ref.as_str(),
            "simple",
            &authority_epoch.to_string(),
            &provenance.routing_view_snapshot,
            &provenance.admission_policy_snapshot,
            &provenance.policy_resolution_snapshot,
            &provenance.provider_health_snapshot,
            &provenance.graph_compile_snapshot,
            &provenance.lease_resolution_snapshot,
        ] {
            identity.push_str(part);
            identity.push('\n');
        }
        for action in &bundle.policy.allowed_adaptive_actions {
            identity.push_str(action);
            identity.push('\n');
        }
        identity
    }
}

impl PlanResolver for FrozenPlanResolver {
    fn materialize(
        &self,
        bundle: &TurnStartBundle,
        authority_epoch: u64,
    ) -> Result<ResolvedTurnPlan, ArbiterError> {
        bundle.validate()?;
        let identity = Self::plan_identity(bundle, authority_epoch);
        Ok(ResolvedTurnPlan {
            pipeline_version: bundle.pipeline_version.clone(),
            graph_definition_ref: bundle.graph_definition_ref.clone(),
            execution_profile: bundle.execution_profile,
            allowed_adaptive_actions: bundle.policy.allowed_adaptive_actions.clone(),
            authority_epoch,
            provenance: bundle.provenance.clone(),
            plan_hash: PlanHash::digest(&identity),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bundle::tests::valid_bundle;

    #[test]
    fn identical_bundles_freeze_to_identical_plans() {
        let resolver = FrozenPlanResolver;
        let first = resolver.materialize(&valid_bundle(), 2).unwrap();
        let second = resolver.materialize(&valid_bundle(), 2).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.plan_hash, second.plan_hash);
    }

    #[test]
    fn epoch_changes_the_hash() {
        let resolver = FrozenPlanResolver;
        let first = resolver.materialize(&valid_bundle(), 2).unwrap();
        let second = resolver.materialize(&valid_bundle(), 3).unwrap();
        assert_ne!(first.plan_hash, second.plan_hash);
    }

    #[test]
    fn adaptive_actions_change_the_hash() {
        let resolver = FrozenPlanResolver;
        let first = resolver.materialize(&valid_bundle(), 2).unwrap();
        let mut bundle = valid_bundle();
        bundle
            .policy
            .allowed_adaptive_actions
            .push("degrade_tier".into());
        let second = resolver.materialize(&bundle, 2).unwrap();
        assert_ne!(first.plan_hash, second.plan_hash);
    }

    #[test]
    fn plan_hash_serializes_as_hex() {
        let hash = PlanHash::digest("identity");
        let json = serde_json::to_string(&hash).unwrap();
        assert_eq!(json.len(), 18);
        let back: PlanHash = serde_json::from_str(&json).unwrap();
        assert_eq!(hash, back);
    }

    #[test]
    fn invalid_bundle_fails_materialization() {
        let mut bundle = valid_bundle();
        bundle.pipeline_version.clear();
        assert!(FrozenPlanResolver.materialize(&bundle, 2).is_err());
    }
}
