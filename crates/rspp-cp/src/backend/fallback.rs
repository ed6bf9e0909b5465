//! Availability/strict error-policy wrappers.
//!
//! In `availability` mode a non-stale backend error degrades to the zero
//! value of the output type; the composing resolver substitutes its own
//! defaults for zero values.  Stale errors always propagate: staleness
//! means the control plane is not authoritative right now, which no
//! fallback may paper over.  `strict` mode propagates everything.

use super::{
    AdmissionBackend, CpAdmissionDecision, CompiledGraph, GraphCompilerBackend, LeaseBackend,
    LeaseDecision, PipelineRecord, PolicyBackend, ProviderHealthBackend, ProviderHealthView,
    RegistryBackend, ResolvedTurnPolicy, RolloutBackend, RolloutDecision, RoutingSnapshot,
    RoutingViewBackend, TurnLookup,
};
use crate::error::CpError;
use serde::{Deserialize, Serialize};

/// How backend errors are handled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackMode {
    /// Swallow non-stale errors into zero values; stale propagates.
    #[default]
    Availability,
    /// Propagate every error.
    Strict,
}

/// Thin decorator applying a [`FallbackMode`] to any backend.
pub struct Fallback<B> {
    inner: B,
    mode: FallbackMode,
}

impl<B> Fallback<B> {
    pub fn new(inner: B, mode: FallbackMode) -> Self {
        Self { inner, mode }
    }

    fn absorb<T: Default>(&self, result: Result<T, CpError>) -> Result<T, CpError> {
        match result {
            Ok(value) => Ok(value),
            Err(err) if self.mode == FallbackMode::Availability && !err.is_stale() => {
                log::warn!("{}: degrading to zero value: {err}", err.service());
                Ok(T::default())
            }
            Err(err) => Err(err),
        }
    }
}

impl<B: RegistryBackend> RegistryBackend for Fallback<B> {
    fn pipeline_record(&self, lookup: &TurnLookup) -> Result<PipelineRecord, CpError> {
        self.absorb(self.inner.pipeline_record(lookup))
    }
}

impl<B: RolloutBackend> RolloutBackend for Fallback<B> {
    fn route(&self, lookup: &TurnLookup) -> Result<RolloutDecision, CpError> {
        self.absorb(self.inner.route(lookup))
    }
}

impl<B: RoutingViewBackend> RoutingViewBackend for Fallback<B> {
    fn routing(&self, lookup: &TurnLookup) -> Result<RoutingSnapshot, CpError> {
        self.absorb(self.inner.routing(lookup))
    }
}

impl<B: PolicyBackend> PolicyBackend for Fallback<B> {
    fn turn_policy(&self, lookup: &TurnLookup) -> Result<ResolvedTurnPolicy, CpError> {
        self.absorb(self.inner.turn_policy(lookup))
    }
}

impl<B: ProviderHealthBackend> ProviderHealthBackend for Fallback<B> {
    fn health(&self, lookup: &TurnLookup) -> Result<ProviderHealthView, CpError> {
        self.absorb(self.inner.health(lookup))
    }
}

impl<B: GraphCompilerBackend> GraphCompilerBackend for Fallback<B> {
    fn compiled_graph(&self, lookup: &TurnLookup) -> Result<CompiledGraph, CpError> {
        self.absorb(self.inner.compiled_graph(lookup))
    }
}

impl<B: AdmissionBackend> AdmissionBackend for Fallback<B> {
    fn decision(&self, lookup: &TurnLookup) -> Result<CpAdmissionDecision, CpError> {
        self.absorb(self.inner.decision(lookup))
    }
}

impl<B: LeaseBackend> LeaseBackend for Fallback<B> {
    fn lease(&self, lookup: &TurnLookup) -> Result<LeaseDecision, CpError> {
        self.absorb(self.inner.lease(lookup))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{service, ErrorCode};

    struct FailingRegistry(ErrorCode);

    impl RegistryBackend for FailingRegistry {
        fn pipeline_record(&self, _lookup: &TurnLookup) -> Result<PipelineRecord, CpError> {
            match self.0 {
                ErrorCode::SnapshotStale => Err(CpError::stale(service::REGISTRY, "test")),
                code => Err(CpError::new(code, service::REGISTRY, "test", "boom")),
            }
        }
    }

    struct HealthyRegistry;

    impl RegistryBackend for HealthyRegistry {
        fn pipeline_record(&self, _lookup: &TurnLookup) -> Result<PipelineRecord, CpError> {
            Ok(PipelineRecord {
                pipeline_version: "v1".into(),
                graph_definition_ref: "graph:v1".into(),
                execution_profile: Default::default(),
            })
        }
    }

    fn lookup() -> TurnLookup {
        TurnLookup::new("t", "s", "v1")
    }

    #[test]
    fn availability_swallows_missing_into_zero_value() {
        let wrapped = Fallback::new(
            FailingRegistry(ErrorCode::SnapshotMissing),
            FallbackMode::Availability,
        );
        let record = wrapped.pipeline_record(&lookup()).unwrap();
        assert_eq!(record, PipelineRecord::default());
    }

    #[test]
    fn availability_never_swallows_stale() {
        let wrapped = Fallback::new(
            FailingRegistry(ErrorCode::SnapshotStale),
            FallbackMode::Availability,
        );
        let err = wrapped.pipeline_record(&lookup()).unwrap_err();
        assert!(err.is_stale());
    }

    #[test]
    fn strict_propagates_everything() {
        let wrapped = Fallback::new(
            FailingRegistry(ErrorCode::SnapshotMissing),
            FallbackMode::Strict,
        );
        let err = wrapped.pipeline_record(&lookup()).unwrap_err();
        assert_eq!(err.code(), ErrorCode::SnapshotMissing);
    }

    #[test]
    fn success_passes_through_untouched() {
        let wrapped = Fallback::new(HealthyRegistry, FallbackMode::Availability);
        let record = wrapped.pipeline_record(&lookup()).unwrap();
        assert_eq!(record.pipeline_version, "v1");
    }
}
