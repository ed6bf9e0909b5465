//! Typed view over the versioned control-plane snapshot document.
//!
//! The artifact is a single JSON object with a mandatory `schema_version`,
//! an optional top-level `stale` flag, and eight named sections.  Every
//! section carries its own `stale` flag plus a `default` subsection and
//! optional `by_pipeline` / `by_tenant` override maps.  Raw section configs
//! keep all fields optional; the per-service backends own defaulting and
//! validation.

use crate::error::{service, CpError};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// The only schema version this client understands.
pub const SCHEMA_VERSION: &str = "cp-snapshot-distribution/v1";

/// One named section of the artifact: a `default` subsection plus optional
/// per-pipeline and per-tenant overrides.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Section<T> {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stale: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<T>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub by_pipeline: BTreeMap<String, T>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub by_tenant: BTreeMap<String, T>,
}

impl<T> Default for Section<T> {
    fn default() -> Self {
        Self {
            stale: None,
            default: None,
            by_pipeline: BTreeMap::new(),
            by_tenant: BTreeMap::new(),
        }
    }
}

impl<T> Section<T> {
    pub fn is_stale(&self) -> bool {
        self.stale == Some(true)
    }

    pub fn is_empty(&self) -> bool {
        self.default.is_none() && self.by_pipeline.is_empty() && self.by_tenant.is_empty()
    }

    /// Override precedence: `by_tenant[tenant]`, then `by_pipeline[version]`,
    /// then `default`.  Empty keys never match an override map.
    pub fn select(&self, tenant_id: &str, pipeline_version: &str) -> Option<&T> {
        if !tenant_id.is_empty() {
            if let Some(cfg) = self.by_tenant.get(tenant_id) {
                return Some(cfg);
            }
        }
        if !pipeline_version.is_empty() {
            if let Some(cfg) = self.by_pipeline.get(pipeline_version) {
                return Some(cfg);
            }
        }
        self.default.as_ref()
    }
}

// --- Shared wire enums -----------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionProfile {
    /// The only profile the MVP runtime accepts.
    #[default]
    Simple,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdmissionOutcome {
    #[default]
    Admit,
    Reject,
    Defer,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdmissionScope {
    Tenant,
    #[default]
    Session,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderStatus {
    #[default]
    Healthy,
    Degraded,
    Unavailable,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BufferStrategy {
    #[default]
    Block,
    DropOldest,
    DropNewest,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DefaultingSource {
    Explicit,
    PipelineDefault,
    #[default]
    ServiceDefault,
}

/// The three runtime lanes an edge can carry.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Lane {
    #[default]
    Data,
    Control,
    Telemetry,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowControlMode {
    #[default]
    Backpressure,
    Shed,
    Off,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SheddingPolicy {
    #[default]
    None,
    DropOldest,
    Sample,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RecordingLevel {
    L0,
    #[default]
    L1,
    L2,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplayMode {
    #[default]
    Deterministic,
    BestEffort,
}

// --- Raw section configs ---------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PipelineRecordConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pipeline_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub graph_definition_ref: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_profile: Option<ExecutionProfile>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RegistryConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_pipeline_version: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub pipelines: BTreeMap<String, PipelineRecordConfig>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RolloutPolicyConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_pipeline_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub canary_pipeline_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub canary_percentage: Option<u8>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tenant_allowlist: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RolloutConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rollout_policy_snapshot: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_pipeline_version: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub by_requested_version: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy: Option<RolloutPolicyConfig>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RoutingConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub routing_view_snapshot: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub admission_policy_snapshot: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub abi_compatibility_snapshot: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transport_kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transport_endpoint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runtime_id: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct BudgetsConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub turn_ms: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_default_ms: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path_default_ms: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub edge_default_ms: Option<i64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct EdgeBufferConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strategy: Option<BufferStrategy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_queue_items: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_queue_latency_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub low_watermark: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub high_watermark: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lane: Option<Lane>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<DefaultingSource>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct NodeExecutionConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub concurrency_limit: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fairness_key: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct LaneFlowConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<FlowControlMode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub low_watermark: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub high_watermark: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shedding: Option<SheddingPolicy>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RecordingConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level: Option<RecordingLevel>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowed_replay_modes: Option<Vec<ReplayMode>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PolicyConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy_resolution_snapshot: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub budgets: Option<BudgetsConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_bindings: Option<BTreeMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub edge_buffer_policies: Option<BTreeMap<String, EdgeBufferConfig>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_execution_policies: Option<BTreeMap<String, NodeExecutionConfig>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flow_control: Option<BTreeMap<Lane, LaneFlowConfig>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recording: Option<RecordingConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowed_adaptive_actions: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ProviderHealthConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_health_snapshot: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub statuses: BTreeMap<String, ProviderStatus>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct GraphCompilerConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub graph_compile_snapshot: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compiled_graph_ref: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compiler_version: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AdmissionConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub admission_policy_snapshot: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outcome: Option<AdmissionOutcome>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<AdmissionScope>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_rate_limit_per_min: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_rate_observed_per_min: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_rate_limit_per_min: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_rate_observed_per_min: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct LeaseConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lease_resolution_snapshot: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authority_epoch: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authority_epoch_valid: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authority_authorized: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lease_token_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lease_expires_at_utc: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

// --- Document --------------------------------------------------------------

/// The full control-plane snapshot document.  Immutable per fetch.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SnapshotDocument {
    pub schema_version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stale: Option<bool>,
    #[serde(default)]
    pub registry: Section<RegistryConfig>,
    #[serde(default)]
    pub rollout: Section<RolloutConfig>,
    #[serde(default)]
    pub routing_view: Section<RoutingConfig>,
    #[serde(default)]
    pub policy: Section<PolicyConfig>,
    #[serde(default)]
    pub provider_health: Section<ProviderHealthConfig>,
    #[serde(default)]
    pub graph_compiler: Section<GraphCompilerConfig>,
    #[serde(default)]
    pub admission: Section<AdmissionConfig>,
    #[serde(default)]
    pub lease: Section<LeaseConfig>,
}

impl SnapshotDocument {
    /// An empty document at the supported schema version.  Handy as a test
    /// fixture base.
    pub fn empty() -> Self {
        Self {
            schema_version: SCHEMA_VERSION.to_string(),
            stale: None,
            registry: Section::default(),
            rollout: Section::default(),
            routing_view: Section::default(),
            policy: Section::default(),
            provider_health: Section::default(),
            graph_compiler: Section::default(),
            admission: Section::default(),
            lease: Section::default(),
        }
    }

    pub fn is_stale(&self) -> bool {
        self.stale == Some(true)
    }

    /// True when the root or any section carries a staleness marker.
    pub fn any_stale(&self) -> bool {
        self.is_stale()
            || self.registry.is_stale()
            || self.rollout.is_stale()
            || self.routing_view.is_stale()
            || self.policy.is_stale()
            || self.provider_health.is_stale()
            || self.graph_compiler.is_stale()
            || self.admission.is_stale()
            || self.lease.is_stale()
    }

    /// Structural validation: reject unknown top-level schema versions.
    pub fn validate(&self, origin: &str) -> Result<(), CpError> {
        if self.schema_version != SCHEMA_VERSION {
            return Err(CpError::invalid(
                service::DISTRIBUTION,
                origin,
                format!(
                    "unsupported schema_version {:?}, expected {:?}",
                    self.schema_version, SCHEMA_VERSION
                ),
            ));
        }
        Ok(())
    }
}

/// Strict decode of exactly one JSON object.  Trailing content after the
/// document is a decode failure, not silently ignored.
pub fn decode_document(bytes: &[u8], origin: &str) -> Result<SnapshotDocument, CpError> {
    let document: SnapshotDocument = decode_strict(bytes)
        .map_err(|e| CpError::decode_failed(service::DISTRIBUTION, origin, e.to_string()))?;
    document.validate(origin)?;
    Ok(document)
}

fn decode_strict<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, serde_json::Error> {
    let mut deserializer = serde_json::Deserializer::from_slice(bytes);
    let value = T::deserialize(&mut deserializer)?;
    deserializer.end()?;
    Ok(value)
}

/// A sealed, immutable adapter over one fetched document.  Backends read
/// sections through this value; nothing mutates it after construction.
#[derive(Clone)]
pub struct SnapshotAdapter {
    origin: String,
    document: SnapshotDocument,
}

impl SnapshotAdapter {
    pub fn new(origin: impl Into<String>, document: SnapshotDocument) -> Self {
        Self {
            origin: origin.into(),
            document,
        }
    }

    /// File path or URL the document came from.
    pub fn origin(&self) -> &str {
        &self.origin
    }

    pub fn document(&self) -> &SnapshotDocument {
        &self.document
    }

    pub fn root_stale(&self) -> bool {
        self.document.is_stale()
    }
}

impl fmt::Debug for SnapshotAdapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SnapshotAdapter")
            .field("origin", &self.origin)
            .field("schema_version", &self.document.schema_version)
            .finish()
    }
}
