//! Per-service backends over the sealed snapshot adapter.
//!
//! Each backend reads one section of the artifact, applies deterministic
//! defaulting and validation, and exposes a single-method trait so the
//! composing resolver (and tests) can swap implementations freely.  Uniform
//! rules shared by every service:
//!
//! - a root-level or section-level `stale` flag yields `snapshot_stale`
//!   tagged with the service,
//! - override precedence is `by_tenant`, then `by_pipeline`, then `default`,
//! - an all-empty section yields `snapshot_missing`,
//! - empties inside a selected config normalize to the service's defaults.

mod admission;
mod fallback;
mod graph;
mod lease;
mod policy;
mod provider_health;
mod registry;
mod rollout;
mod routing;

pub use admission::{
    CpAdmissionDecision, SnapshotAdmissionBackend, DEFAULT_ADMISSION_SNAPSHOT,
    REASON_ADMISSION_QUOTA,
};
pub use fallback::{Fallback, FallbackMode};
pub use graph::{CompiledGraph, SnapshotGraphCompilerBackend, DEFAULT_GRAPH_COMPILE_SNAPSHOT};
pub use lease::{
    LeaseDecision, SnapshotLeaseBackend, DEFAULT_LEASE_SNAPSHOT, DEFAULT_LEASE_TTL,
    REASON_LEASE_DEAUTHORIZED,
};
pub use policy::{
    EdgeBufferPolicy, LaneFlowControl, NodeExecutionPolicy, RecordingPolicy, ResolvedTurnPolicy,
    SnapshotPolicyBackend, TurnBudgets, DEFAULT_POLICY_SNAPSHOT,
};
pub use provider_health::{
    ProviderHealthView, SnapshotProviderHealthBackend, DEFAULT_PROVIDER_HEALTH_SNAPSHOT,
};
pub use registry::{PipelineRecord, SnapshotRegistryBackend};
pub use rollout::{RolloutDecision, SnapshotRolloutBackend, DEFAULT_ROLLOUT_SNAPSHOT};
pub use routing::{RoutingSnapshot, SnapshotRoutingViewBackend, DEFAULT_ROUTING_VIEW_SNAPSHOT};

use crate::artifact::{Section, SnapshotAdapter};
use crate::clock::Clock;
use crate::error::CpError;
use std::sync::Arc;

/// Lookup context for one turn.  `pipeline_version` starts as the requested
/// version and is replaced by the rollout-resolved version for downstream
/// backends.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TurnLookup {
    pub tenant_id: String,
    pub session_id: String,
    pub pipeline_version: String,
}

impl TurnLookup {
    pub fn new(
        tenant_id: impl Into<String>,
        session_id: impl Into<String>,
        pipeline_version: impl Into<String>,
    ) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            session_id: session_id.into(),
            pipeline_version: pipeline_version.into(),
        }
    }

    /// The same lookup pointed at a different pipeline version.
    pub fn with_pipeline_version(&self, pipeline_version: impl Into<String>) -> Self {
        Self {
            tenant_id: self.tenant_id.clone(),
            session_id: self.session_id.clone(),
            pipeline_version: pipeline_version.into(),
        }
    }
}

/// Stale classification plus override selection, shared by every backend.
pub(crate) fn section_config<'a, T>(
    adapter: &'a SnapshotAdapter,
    section: &'a Section<T>,
    service: &'static str,
    lookup: &TurnLookup,
) -> Result<&'a T, CpError> {
    if adapter.root_stale() || section.is_stale() {
        return Err(CpError::stale(service, adapter.origin()));
    }
    section
        .select(&lookup.tenant_id, &lookup.pipeline_version)
        .ok_or_else(|| {
            CpError::missing(
                service,
                adapter.origin(),
                "section carries no config for this lookup",
            )
        })
}

pub trait RegistryBackend: Send + Sync {
    fn pipeline_record(&self, lookup: &TurnLookup) -> Result<PipelineRecord, CpError>;
}

pub trait RolloutBackend: Send + Sync {
    fn route(&self, lookup: &TurnLookup) -> Result<RolloutDecision, CpError>;
}

pub trait RoutingViewBackend: Send + Sync {
    fn routing(&self, lookup: &TurnLookup) -> Result<RoutingSnapshot, CpError>;
}

pub trait PolicyBackend: Send + Sync {
    fn turn_policy(&self, lookup: &TurnLookup) -> Result<ResolvedTurnPolicy, CpError>;
}

pub trait ProviderHealthBackend: Send + Sync {
    fn health(&self, lookup: &TurnLookup) -> Result<ProviderHealthView, CpError>;
}

pub trait GraphCompilerBackend: Send + Sync {
    fn compiled_graph(&self, lookup: &TurnLookup) -> Result<CompiledGraph, CpError>;
}

pub trait AdmissionBackend: Send + Sync {
    fn decision(&self, lookup: &TurnLookup) -> Result<CpAdmissionDecision, CpError>;
}

pub trait LeaseBackend: Send + Sync {
    fn lease(&self, lookup: &TurnLookup) -> Result<LeaseDecision, CpError>;
}

/// All eight backends wired over one sealed adapter, each wrapped with the
/// configured fallback mode.
pub struct BackendSet {
    pub registry: Box<dyn RegistryBackend>,
    pub rollout: Box<dyn RolloutBackend>,
    pub routing: Box<dyn RoutingViewBackend>,
    pub policy: Box<dyn PolicyBackend>,
    pub provider_health: Box<dyn ProviderHealthBackend>,
    pub graph_compiler: Box<dyn GraphCompilerBackend>,
    pub admission: Box<dyn AdmissionBackend>,
    pub lease: Box<dyn LeaseBackend>,
}

impl BackendSet {
    pub fn from_adapter(
        adapter: Arc<SnapshotAdapter>,
        clock: Arc<dyn Clock>,
        mode: FallbackMode,
    ) -> Self {
        Self {
            registry: Box::new(Fallback::new(
                SnapshotRegistryBackend::new(adapter.clone()),
                mode,
            )),
            rollout: Box::new(Fallback::new(
                SnapshotRolloutBackend::new(adapter.clone()),
                mode,
            )),
            routing: Box::new(Fallback::new(
                SnapshotRoutingViewBackend::new(adapter.clone()),
                mode,
            )),
            policy: Box::new(Fallback::new(
                SnapshotPolicyBackend::new(adapter.clone()),
                mode,
            )),
            provider_health: Box::new(Fallback::new(
                SnapshotProviderHealthBackend::new(adapter.clone()),
                mode,
            )),
            graph_compiler: Box::new(Fallback::new(
                SnapshotGraphCompilerBackend::new(adapter.clone()),
                mode,
            )),
            admission: Box::new(Fallback::new(
                SnapshotAdmissionBackend::new(adapter.clone()),
                mode,
            )),
            lease: Box::new(Fallback::new(
                SnapshotLeaseBackend::new(adapter, clock, DEFAULT_LEASE_TTL),
                mode,
            )),
        }
    }
}
