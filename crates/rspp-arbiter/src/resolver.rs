//! Turn-start bundle resolution.
//!
//! Executes the per-service backends in fixed order — registry, normalizer,
//! rollout, graph compiler, routing view, provider health, policy, lease,
//! admission — each step feeding the next, then composes and validates the
//! bundle.  Availability-mode zero values from the fallback wrappers are
//! substituted with service defaults here.

use crate::bundle::{SnapshotProvenance, TurnStartBundle};
use crate::error::ArbiterError;
use async_trait::async_trait;
use rspp_cp::backend::{
    AdmissionBackend, BackendSet, CompiledGraph, CpAdmissionDecision, FallbackMode,
    GraphCompilerBackend, LeaseBackend, LeaseDecision, PipelineRecord, PolicyBackend,
    ProviderHealthBackend, ProviderHealthView, RegistryBackend, ResolvedTurnPolicy,
    RolloutBackend, RolloutDecision, RoutingSnapshot, RoutingViewBackend, TurnLookup,
    DEFAULT_LEASE_SNAPSHOT, DEFAULT_ROLLOUT_SNAPSHOT,
};
use rspp_cp::{Clock, SnapshotSource};
use std::sync::Arc;

/// Pipeline identity used when the control plane supplies nothing at all
/// (availability mode with an empty registry).
pub const FALLBACK_PIPELINE_VERSION: &str = "pipeline-default";
pub const FALLBACK_GRAPH_REF: &str = "graph:default";

/// Object-safe bundle producer; the arbiter and the baseline builder both
/// resolve through this seam.
#[async_trait]
pub trait BundleSource: Send + Sync {
    async fn resolve(&self, lookup: &TurnLookup) -> Result<TurnStartBundle, ArbiterError>;
}

/// The production resolver over a snapshot source.
pub struct TurnStartResolver {
    source: Arc<dyn SnapshotSource>,
    clock: Arc<dyn Clock>,
    mode: FallbackMode,
}

impl TurnStartResolver {
    pub fn new(source: Arc<dyn SnapshotSource>, clock: Arc<dyn Clock>, mode: FallbackMode) -> Self {
        Self {
            source,
            clock,
            mode,
        }
    }
}

#[async_trait]
impl BundleSource for TurnStartResolver {
    #[tracing::instrument(
        name = "arbiter.bundle.resolve",
        skip(self, lookup),
        fields(
            tenant_id = %lookup.tenant_id,
            session_id = %lookup.session_id,
            requested_version = %lookup.pipeline_version
        )
    )]
    async fn resolve(&self, lookup: &TurnLookup) -> Result<TurnStartBundle, ArbiterError> {
        let adapter = self.source.current().await?;
        let backends = BackendSet::from_adapter(adapter, self.clock.clone(), self.mode);

        // registry, then the normalizer
        let record = backends.registry.pipeline_record(lookup)?;
        let record = normalize_record(record, lookup);

        // rollout decides the version every later lookup uses
        let rollout = backends.rollout.route(lookup)?;
        let rollout = normalize_rollout(rollout, &record);
        let resolved = lookup.with_pipeline_version(&rollout.pipeline_version);

        let graph = backends.graph_compiler.compiled_graph(&resolved)?;
        let graph = or_default(graph, CompiledGraph::service_default);

        let routing = backends.routing.routing(&resolved)?;
        let routing = or_default(routing, RoutingSnapshot::service_default);

        let provider_health = backends.provider_health.health(&resolved)?;
        let provider_health = or_default(provider_health, ProviderHealthView::service_default);

        let policy = backends.policy.turn_policy(&resolved)?;
        let policy = or_default(policy, ResolvedTurnPolicy::service_default);

        let lease = backends.lease.lease(&resolved)?;
        let has_lease_decision = lease != LeaseDecision::default();

        // the policy resolution snapshot flows into the admission lookup
        let cp_admission = backends.admission.decision(&resolved)?;
        let has_cp_admission_decision = cp_admission != CpAdmissionDecision::default();

        let graph_definition_ref = if graph.compiled_graph_ref.is_empty() {
            record.graph_definition_ref.clone()
        } else {
            graph.compiled_graph_ref.clone()
        };

        let provenance = SnapshotProvenance {
            routing_view_snapshot: routing.routing_view_snapshot.clone(),
            admission_policy_snapshot: if has_cp_admission_decision {
                cp_admission.admission_policy_snapshot.clone()
            } else {
                routing.admission_policy_snapshot.clone()
            },
            policy_resolution_snapshot: policy.policy_resolution_snapshot.clone(),
            provider_health_snapshot: provider_health.provider_health_snapshot.clone(),
            graph_compile_snapshot: graph.graph_compile_snapshot.clone(),
            lease_resolution_snapshot: if has_lease_decision {
                lease.lease_resolution_snapshot.clone()
            } else {
                DEFAULT_LEASE_SNAPSHOT.to_string()
            },
        };

        let bundle = TurnStartBundle {
            pipeline_version: rollout.pipeline_version.clone(),
            graph_definition_ref,
            execution_profile: record.execution_profile,
            rollout,
            routing,
            policy,
            provider_health,
            graph,
            provenance,
            has_cp_admission_decision,
            cp_admission,
            has_lease_decision,
            lease,
        };
        bundle.validate()?;
        log::debug!(
            "resolved turn-start bundle for {}/{} at version {}",
            lookup.tenant_id,
            lookup.session_id,
            bundle.pipeline_version
        );
        Ok(bundle)
    }
}

/// Zero-value substitution for availability-mode outputs.
fn or_default<T: Default + PartialEq>(value: T, default: fn() -> T) -> T {
    if value == T::default() {
        default()
    } else {
        value
    }
}

fn normalize_record(record: PipelineRecord, lookup: &TurnLookup) -> PipelineRecord {
    if record != PipelineRecord::default() {
        return record;
    }
    let pipeline_version = if lookup.pipeline_version.is_empty() {
        FALLBACK_PIPELINE_VERSION.to_string()
    } else {
        lookup.pipeline_version.clone()
    };
    PipelineRecord {
        pipeline_version,
        graph_definition_ref: FALLBACK_GRAPH_REF.to_string(),
        execution_profile: Default::default(),
    }
}

fn normalize_rollout(rollout: RolloutDecision, record: &PipelineRecord) -> RolloutDecision {
    if rollout != RolloutDecision::default() {
        return rollout;
    }
    RolloutDecision {
        pipeline_version: record.pipeline_version.clone(),
        rollout_policy_snapshot: DEFAULT_ROLLOUT_SNAPSHOT.to_string(),
        canary: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rspp_cp::artifact::{
        AdmissionConfig, AdmissionOutcome, AdmissionScope, PipelineRecordConfig, RegistryConfig,
        RolloutConfig, SnapshotAdapter, SnapshotDocument,
    };
    use rspp_cp::{CpError, SystemClock};

    struct FixedSource(Arc<SnapshotAdapter>);

    #[async_trait]
    impl SnapshotSource for FixedSource {
        async fn current(&self) -> Result<Arc<SnapshotAdapter>, CpError> {
            Ok(self.0.clone())
        }
    }

    fn resolver_for(document: SnapshotDocument, mode: FallbackMode) -> TurnStartResolver {
        TurnStartResolver::new(
            Arc::new(FixedSource(Arc::new(SnapshotAdapter::new("test", document)))),
            Arc::new(SystemClock),
            mode,
        )
    }

    fn registry_document() -> SnapshotDocument {
        let mut document = SnapshotDocument::empty();
        let mut registry = RegistryConfig {
            default_pipeline_version: Some("v1".into()),
            ..RegistryConfig::default()
        };
        registry.pipelines.insert(
            "v1".into(),
            PipelineRecordConfig {
                graph_definition_ref: Some("graph:v1".into()),
                ..PipelineRecordConfig::default()
            },
        );
        document.registry.default = Some(registry);
        document.rollout.default = Some(RolloutConfig {
            default_pipeline_version: Some("v1".into()),
            ..RolloutConfig::default()
        });
        document
    }

    fn lookup() -> TurnLookup {
        TurnLookup::new("tenant-1", "sess-1", "v1")
    }

    #[tokio::test]
    async fn resolves_complete_bundle_from_populated_snapshot() {
        let resolver = resolver_for(registry_document(), FallbackMode::Availability);
        let bundle = resolver.resolve(&lookup()).await.unwrap();
        assert_eq!(bundle.pipeline_version, "v1");
        assert_eq!(bundle.graph_definition_ref, "graph:v1");
        assert!(bundle.provenance.is_complete());
        assert!(!bundle.has_cp_admission_decision);
        assert!(!bundle.has_lease_decision);
    }

    #[tokio::test]
    async fn empty_snapshot_in_availability_mode_resolves_defaults() {
        let resolver = resolver_for(SnapshotDocument::empty(), FallbackMode::Availability);
        let bundle = resolver.resolve(&lookup()).await.unwrap();
        assert_eq!(bundle.pipeline_version, "v1");
        assert_eq!(bundle.graph_definition_ref, FALLBACK_GRAPH_REF);
        assert!(bundle.provenance.is_complete());
    }

    #[tokio::test]
    async fn empty_snapshot_in_strict_mode_fails() {
        let resolver = resolver_for(SnapshotDocument::empty(), FallbackMode::Strict);
        let err = resolver.resolve(&lookup()).await.unwrap_err();
        assert!(matches!(err, ArbiterError::Distribution(_)));
    }

    #[tokio::test]
    async fn stale_snapshot_fails_in_both_modes() {
        for mode in [FallbackMode::Availability, FallbackMode::Strict] {
            let mut document = registry_document();
            document.stale = Some(true);
            let resolver = resolver_for(document, mode);
            let err = resolver.resolve(&lookup()).await.unwrap_err();
            let ArbiterError::Distribution(cp) = err else {
                panic!("expected distribution error");
            };
            assert!(cp.is_stale());
        }
    }

    #[tokio::test]
    async fn cp_admission_decision_marks_bundle() {
        let mut document = registry_document();
        document.admission.by_tenant.insert(
            "tenant-1".into(),
            AdmissionConfig {
                outcome: Some(AdmissionOutcome::Defer),
                scope: Some(AdmissionScope::Tenant),
                reason: Some("cp_admission_defer_capacity".into()),
                ..AdmissionConfig::default()
            },
        );
        let resolver = resolver_for(document, FallbackMode::Availability);
        let bundle = resolver.resolve(&lookup()).await.unwrap();
        assert!(bundle.has_cp_admission_decision);
        assert_eq!(bundle.cp_admission.outcome, AdmissionOutcome::Defer);
        assert_eq!(bundle.cp_admission.scope, AdmissionScope::Tenant);
    }

    #[tokio::test]
    async fn repeated_resolution_returns_equal_bundles() {
        let resolver = resolver_for(registry_document(), FallbackMode::Availability);
        let first = resolver.resolve(&lookup()).await.unwrap();
        let second = resolver.resolve(&lookup()).await.unwrap();
        assert_eq!(first, second);
    }
}
