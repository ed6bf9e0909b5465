//! Provider health backend.

use super::{section_config, ProviderHealthBackend, TurnLookup};
use crate::artifact::{ProviderStatus, SnapshotAdapter};
use crate::error::{service, CpError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

pub const DEFAULT_PROVIDER_HEALTH_SNAPSHOT: &str = "provider-health/v1";

/// Per-provider health as seen by the control plane.  An empty status map
/// means "no provider is known to be unhealthy".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderHealthView {
    pub provider_health_snapshot: String,
    pub statuses: BTreeMap<String, ProviderStatus>,
}

impl ProviderHealthView {
    pub fn service_default() -> Self {
        Self {
            provider_health_snapshot: DEFAULT_PROVIDER_HEALTH_SNAPSHOT.to_string(),
            statuses: BTreeMap::new(),
        }
    }

    pub fn status_of(&self, provider_id: &str) -> ProviderStatus {
        self.statuses
            .get(provider_id)
            .copied()
            .unwrap_or_default()
    }
}

pub struct SnapshotProviderHealthBackend {
    adapter: Arc<SnapshotAdapter>,
}

impl SnapshotProviderHealthBackend {
    pub fn new(adapter: Arc<SnapshotAdapter>) -> Self {
        Self { adapter }
    }
}

impl ProviderHealthBackend for SnapshotProviderHealthBackend {
    fn health(&self, lookup: &TurnLookup) -> Result<ProviderHealthView, CpError> {
        let config = section_config(
            &self.adapter,
            &self.adapter.document().provider_health,
            service::PROVIDER_HEALTH,
            lookup,
        )?;
        Ok(ProviderHealthView {
            provider_health_snapshot: config
                .provider_health_snapshot
                .clone()
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| DEFAULT_PROVIDER_HEALTH_SNAPSHOT.to_string()),
            statuses: config.statuses.clone(),
        })
    }
}
