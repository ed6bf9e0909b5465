//! Rollout backend: requested-version mapping plus deterministic canary
//! routing.

use super::{section_config, RolloutBackend, TurnLookup};
use crate::artifact::SnapshotAdapter;
use crate::bucket;
use crate::error::{service, CpError};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub const DEFAULT_ROLLOUT_SNAPSHOT: &str = "rollout-policy/v1";

/// The version a turn actually runs, plus how it was chosen.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RolloutDecision {
    pub pipeline_version: String,
    pub rollout_policy_snapshot: String,
    pub canary: bool,
}

pub struct SnapshotRolloutBackend {
    adapter: Arc<SnapshotAdapter>,
}

impl SnapshotRolloutBackend {
    pub fn new(adapter: Arc<SnapshotAdapter>) -> Self {
        Self { adapter }
    }
}

impl RolloutBackend for SnapshotRolloutBackend {
    fn route(&self, lookup: &TurnLookup) -> Result<RolloutDecision, CpError> {
        let config = section_config(
            &self.adapter,
            &self.adapter.document().rollout,
            service::ROLLOUT,
            lookup,
        )?;

        let requested = lookup.pipeline_version.as_str();
        let mut version = config
            .by_requested_version
            .get(requested)
            .filter(|v| !v.is_empty())
            .cloned()
            .or_else(|| {
                config
                    .default_pipeline_version
                    .clone()
                    .filter(|v| !v.is_empty())
            });

        let mut canary = false;
        if let Some(policy) = &config.policy {
            let percentage = policy.canary_percentage.unwrap_or(0);
            if percentage > 100 {
                return Err(CpError::invalid(
                    service::ROLLOUT,
                    self.adapter.origin(),
                    format!("canary_percentage {percentage} outside [0,100]"),
                ));
            }
            let canary_version = policy
                .canary_pipeline_version
                .as_deref()
                .filter(|v| !v.is_empty());
            // Canary traffic configured without a canary version is a
            // structural violation, not a silent fallback.
            if (percentage > 0 || !policy.tenant_allowlist.is_empty()) && canary_version.is_none() {
                return Err(CpError::invalid(
                    service::ROLLOUT,
                    self.adapter.origin(),
                    "canary traffic configured without canary_pipeline_version",
                ));
            }
            if version.is_none() {
                version = policy
                    .base_pipeline_version
                    .clone()
                    .filter(|v| !v.is_empty());
            }
            canary = policy
                .tenant_allowlist
                .iter()
                .any(|t| t == &lookup.tenant_id)
                || bucket::in_canary(&lookup.tenant_id, &lookup.session_id, percentage);
            if canary {
                // canary_version is present whenever canary can be true
                version = canary_version.map(str::to_string);
            }
        }

        let pipeline_version = version
            .or_else(|| Some(requested.to_string()).filter(|v| !v.is_empty()))
            .ok_or_else(|| {
                CpError::missing(
                    service::ROLLOUT,
                    self.adapter.origin(),
                    "no pipeline version resolvable for rollout",
                )
            })?;

        Ok(RolloutDecision {
            pipeline_version,
            rollout_policy_snapshot: config
                .rollout_policy_snapshot
                .clone()
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| DEFAULT_ROLLOUT_SNAPSHOT.to_string()),
            canary,
        })
    }
}
