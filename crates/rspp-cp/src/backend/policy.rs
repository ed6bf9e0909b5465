//! Turn policy backend: budgets, provider bindings, edge buffer policies,
//! node execution policies, flow-control watermarks, and the recording
//! policy.  Candidate config merges with service defaults field by field,
//! then the full invariant set runs before anything is returned.

use super::{section_config, PolicyBackend, TurnLookup};
use crate::artifact::{
    BufferStrategy, DefaultingSource, EdgeBufferConfig, FlowControlMode, Lane, LaneFlowConfig,
    PolicyConfig, RecordingLevel, ReplayMode, SheddingPolicy, SnapshotAdapter,
};
use crate::error::{service, CpError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

pub const DEFAULT_POLICY_SNAPSHOT: &str = "policy-resolution/v1";

pub const DEFAULT_TURN_BUDGET_MS: u64 = 15_000;
pub const DEFAULT_NODE_BUDGET_MS: u64 = 2_500;
pub const DEFAULT_PATH_BUDGET_MS: u64 = 6_000;
pub const DEFAULT_EDGE_BUDGET_MS: u64 = 4_000;

/// Per-turn deadline budgets, in milliseconds.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnBudgets {
    pub turn_ms: u64,
    pub node_default_ms: u64,
    pub path_default_ms: u64,
    pub edge_default_ms: u64,
}

impl TurnBudgets {
    pub fn service_default() -> Self {
        Self {
            turn_ms: DEFAULT_TURN_BUDGET_MS,
            node_default_ms: DEFAULT_NODE_BUDGET_MS,
            path_default_ms: DEFAULT_PATH_BUDGET_MS,
            edge_default_ms: DEFAULT_EDGE_BUDGET_MS,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdgeBufferPolicy {
    pub strategy: BufferStrategy,
    pub max_queue_items: u32,
    pub max_queue_latency_ms: u64,
    pub low_watermark: u32,
    pub high_watermark: u32,
    pub lane: Lane,
    pub source: DefaultingSource,
}

impl EdgeBufferPolicy {
    pub fn service_default() -> Self {
        Self {
            strategy: BufferStrategy::Block,
            max_queue_items: 64,
            max_queue_latency_ms: 250,
            low_watermark: 16,
            high_watermark: 48,
            lane: Lane::Data,
            source: DefaultingSource::ServiceDefault,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeExecutionPolicy {
    pub concurrency_limit: u32,
    pub fairness_key: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaneFlowControl {
    pub mode: FlowControlMode,
    pub low_watermark: u32,
    pub high_watermark: u32,
    pub shedding: SheddingPolicy,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordingPolicy {
    pub level: RecordingLevel,
    pub allowed_replay_modes: Vec<ReplayMode>,
}

impl RecordingPolicy {
    pub fn service_default() -> Self {
        Self {
            level: RecordingLevel::L1,
            allowed_replay_modes: vec![ReplayMode::Deterministic],
        }
    }
}

/// The complete resolved turn policy.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedTurnPolicy {
    pub policy_resolution_snapshot: String,
    pub budgets: TurnBudgets,
    pub provider_bindings: BTreeMap<String, String>,
    pub edge_buffer_policies: BTreeMap<String, EdgeBufferPolicy>,
    pub node_execution_policies: BTreeMap<String, NodeExecutionPolicy>,
    pub flow_control: BTreeMap<Lane, LaneFlowControl>,
    pub recording: RecordingPolicy,
    pub allowed_adaptive_actions: Vec<String>,
}

impl ResolvedTurnPolicy {
    pub fn service_default() -> Self {
        Self {
            policy_resolution_snapshot: DEFAULT_POLICY_SNAPSHOT.to_string(),
            budgets: TurnBudgets::service_default(),
            provider_bindings: default_bindings(),
            edge_buffer_policies: default_edge_buffers(),
            node_execution_policies: BTreeMap::new(),
            flow_control: default_flow_control(),
            recording: RecordingPolicy::service_default(),
            allowed_adaptive_actions: Vec::new(),
        }
    }

    /// The invariant set every resolved policy must satisfy.  The bundle
    /// validator re-runs this before a bundle is handed out.
    pub fn validate(&self) -> Result<(), CpError> {
        let origin = "policy";
        let budgets = &self.budgets;
        if budgets.turn_ms < budgets.path_default_ms {
            return Err(CpError::invalid(
                service::POLICY,
                origin,
                format!(
                    "turn budget {} below path default {}",
                    budgets.turn_ms, budgets.path_default_ms
                ),
            ));
        }
        if budgets.path_default_ms < budgets.node_default_ms {
            return Err(CpError::invalid(
                service::POLICY,
                origin,
                format!(
                    "path default {} below node default {}",
                    budgets.path_default_ms, budgets.node_default_ms
                ),
            ));
        }
        if budgets.turn_ms < budgets.edge_default_ms {
            return Err(CpError::invalid(
                service::POLICY,
                origin,
                format!(
                    "turn budget {} below edge default {}",
                    budgets.turn_ms, budgets.edge_default_ms
                ),
            ));
        }
        if self.provider_bindings.is_empty() {
            return Err(CpError::invalid(
                service::POLICY,
                origin,
                "provider bindings are empty",
            ));
        }
        for (modality, provider) in &self.provider_bindings {
            if modality.is_empty() || provider.is_empty() {
                return Err(CpError::invalid(
                    service::POLICY,
                    origin,
                    "provider binding with empty modality or provider id",
                ));
            }
        }
        if self.edge_buffer_policies.is_empty() {
            return Err(CpError::invalid(
                service::POLICY,
                origin,
                "edge buffer policies are empty",
            ));
        }
        for (edge_id, policy) in &self.edge_buffer_policies {
            if edge_id.is_empty() {
                return Err(CpError::invalid(
                    service::POLICY,
                    origin,
                    "edge buffer policy with empty edge id",
                ));
            }
            if policy.low_watermark > policy.high_watermark {
                return Err(CpError::invalid(
                    service::POLICY,
                    origin,
                    format!("edge {edge_id:?} watermarks inverted"),
                ));
            }
        }
        for (node_id, policy) in &self.node_execution_policies {
            if policy.concurrency_limit < 1 {
                return Err(CpError::invalid(
                    service::POLICY,
                    origin,
                    format!("node {node_id:?} concurrency limit below 1"),
                ));
            }
        }
        for lane in [Lane::Data, Lane::Control, Lane::Telemetry] {
            let Some(flow) = self.flow_control.get(&lane) else {
                return Err(CpError::invalid(
                    service::POLICY,
                    origin,
                    format!("flow control missing lane {lane:?}"),
                ));
            };
            if flow.low_watermark > flow.high_watermark {
                return Err(CpError::invalid(
                    service::POLICY,
                    origin,
                    format!("flow control watermarks inverted for lane {lane:?}"),
                ));
            }
        }
        Ok(())
    }
}

fn default_bindings() -> BTreeMap<String, String> {
    BTreeMap::from([
        ("stt".to_string(), "stt-default".to_string()),
        ("llm".to_string(), "llm-default".to_string()),
        ("tts".to_string(), "tts-default".to_string()),
    ])
}

fn default_edge_buffers() -> BTreeMap<String, EdgeBufferPolicy> {
    BTreeMap::from([(
        "edge-default".to_string(),
        EdgeBufferPolicy::service_default(),
    )])
}

fn default_flow_control() -> BTreeMap<Lane, LaneFlowControl> {
    BTreeMap::from([
        (
            Lane::Data,
            LaneFlowControl {
                mode: FlowControlMode::Backpressure,
                low_watermark: 32,
                high_watermark: 96,
                shedding: SheddingPolicy::None,
            },
        ),
        (
            Lane::Control,
            LaneFlowControl {
                mode: FlowControlMode::Backpressure,
                low_watermark: 8,
                high_watermark: 16,
                shedding: SheddingPolicy::None,
            },
        ),
        (
            Lane::Telemetry,
            LaneFlowControl {
                mode: FlowControlMode::Shed,
                low_watermark: 64,
                high_watermark: 256,
                shedding: SheddingPolicy::Sample,
            },
        ),
    ])
}

pub struct SnapshotPolicyBackend {
    adapter: Arc<SnapshotAdapter>,
}

impl SnapshotPolicyBackend {
    pub fn new(adapter: Arc<SnapshotAdapter>) -> Self {
        Self { adapter }
    }

    fn merge(&self, config: &PolicyConfig) -> Result<ResolvedTurnPolicy, CpError> {
        let defaults = ResolvedTurnPolicy::service_default();

        let budgets = match &config.budgets {
            None => defaults.budgets,
            Some(raw) => TurnBudgets {
                turn_ms: budget_field(raw.turn_ms, DEFAULT_TURN_BUDGET_MS, "turn_ms")?,
                node_default_ms: budget_field(
                    raw.node_default_ms,
                    DEFAULT_NODE_BUDGET_MS,
                    "node_default_ms",
                )?,
                path_default_ms: budget_field(
                    raw.path_default_ms,
                    DEFAULT_PATH_BUDGET_MS,
                    "path_default_ms",
                )?,
                edge_default_ms: budget_field(
                    raw.edge_default_ms,
                    DEFAULT_EDGE_BUDGET_MS,
                    "edge_default_ms",
                )?,
            },
        };

        let provider_bindings = match &config.provider_bindings {
            Some(bindings) if !bindings.is_empty() => bindings.clone(),
            _ => defaults.provider_bindings,
        };

        let edge_buffer_policies = match &config.edge_buffer_policies {
            Some(policies) if !policies.is_empty() => policies
                .iter()
                .map(|(edge_id, raw)| (edge_id.clone(), merge_edge_buffer(raw)))
                .collect(),
            _ => defaults.edge_buffer_policies,
        };

        let node_execution_policies = match &config.node_execution_policies {
            None => defaults.node_execution_policies,
            Some(policies) => policies
                .iter()
                .map(|(node_id, raw)| {
                    (
                        node_id.clone(),
                        NodeExecutionPolicy {
                            concurrency_limit: raw.concurrency_limit.unwrap_or(1),
                            fairness_key: raw
                                .fairness_key
                                .clone()
                                .filter(|k| !k.is_empty())
                                .unwrap_or_else(|| "session".to_string()),
                        },
                    )
                })
                .collect(),
        };

        let mut flow_control = default_flow_control();
        if let Some(lanes) = &config.flow_control {
            for (lane, raw) in lanes {
                let base = flow_control
                    .get(lane)
                    .cloned()
                    .unwrap_or_default();
                flow_control.insert(*lane, merge_lane_flow(raw, base));
            }
        }

        let recording = match &config.recording {
            None => defaults.recording,
            Some(raw) => RecordingPolicy {
                level: raw.level.unwrap_or_default(),
                allowed_replay_modes: raw
                    .allowed_replay_modes
                    .clone()
                    .filter(|m| !m.is_empty())
                    .unwrap_or_else(|| vec![ReplayMode::Deterministic]),
            },
        };

        Ok(ResolvedTurnPolicy {
            policy_resolution_snapshot: config
                .policy_resolution_snapshot
                .clone()
                .filter(|s| !s.is_empty())
                .unwrap_or(defaults.policy_resolution_snapshot),
            budgets,
            provider_bindings,
            edge_buffer_policies,
            node_execution_policies,
            flow_control,
            recording,
            allowed_adaptive_actions: config
                .allowed_adaptive_actions
                .clone()
                .unwrap_or(defaults.allowed_adaptive_actions),
        })
    }
}

fn budget_field(raw: Option<i64>, default: u64, field: &str) -> Result<u64, CpError> {
    match raw {
        None => Ok(default),
        Some(ms) if ms < 0 => Err(CpError::invalid(
            service::POLICY,
            "policy",
            format!("negative budget {field}: {ms}"),
        )),
        Some(ms) => Ok(ms as u64),
    }
}

fn merge_edge_buffer(raw: &EdgeBufferConfig) -> EdgeBufferPolicy {
    let defaults = EdgeBufferPolicy::service_default();
    EdgeBufferPolicy {
        strategy: raw.strategy.unwrap_or(defaults.strategy),
        max_queue_items: raw.max_queue_items.unwrap_or(defaults.max_queue_items),
        max_queue_latency_ms: raw
            .max_queue_latency_ms
            .unwrap_or(defaults.max_queue_latency_ms),
        low_watermark: raw.low_watermark.unwrap_or(defaults.low_watermark),
        high_watermark: raw.high_watermark.unwrap_or(defaults.high_watermark),
        lane: raw.lane.unwrap_or(defaults.lane),
        source: raw.source.unwrap_or(DefaultingSource::Explicit),
    }
}

fn merge_lane_flow(raw: &LaneFlowConfig, base: LaneFlowControl) -> LaneFlowControl {
    LaneFlowControl {
        mode: raw.mode.unwrap_or(base.mode),
        low_watermark: raw.low_watermark.unwrap_or(base.low_watermark),
        high_watermark: raw.high_watermark.unwrap_or(base.high_watermark),
        shedding: raw.shedding.unwrap_or(base.shedding),
    }
}

impl PolicyBackend for SnapshotPolicyBackend {
    fn turn_policy(&self, lookup: &TurnLookup) -> Result<ResolvedTurnPolicy, CpError> {
        let config = section_config(
            &self.adapter,
            &self.adapter.document().policy,
            service::POLICY,
            lookup,
        )?;
        let resolved = self.merge(config)?;
        resolved.validate()?;
        Ok(resolved)
    }
}
