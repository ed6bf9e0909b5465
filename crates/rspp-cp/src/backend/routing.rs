//! Routing view backend.

use super::{section_config, RoutingViewBackend, TurnLookup};
use crate::artifact::SnapshotAdapter;
use crate::error::{service, CpError};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub const DEFAULT_ROUTING_VIEW_SNAPSHOT: &str = "routing-view/v1";
pub const DEFAULT_ABI_COMPATIBILITY_SNAPSHOT: &str = "abi-compat/v1";
pub const DEFAULT_TRANSPORT_KIND: &str = "inproc";
pub const DEFAULT_TRANSPORT_ENDPOINT: &str = "local:turn";
pub const DEFAULT_RUNTIME_ID: &str = "runtime-0";

/// Routing view for one turn; all six fields are required after defaulting.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingSnapshot {
    pub routing_view_snapshot: String,
    pub admission_policy_snapshot: String,
    pub abi_compatibility_snapshot: String,
    pub transport_kind: String,
    pub transport_endpoint: String,
    pub runtime_id: String,
}

impl RoutingSnapshot {
    /// The deterministic defaults this service normalizes empties to.
    pub fn service_default() -> Self {
        Self {
            routing_view_snapshot: DEFAULT_ROUTING_VIEW_SNAPSHOT.to_string(),
            admission_policy_snapshot: super::DEFAULT_ADMISSION_SNAPSHOT.to_string(),
            abi_compatibility_snapshot: DEFAULT_ABI_COMPATIBILITY_SNAPSHOT.to_string(),
            transport_kind: DEFAULT_TRANSPORT_KIND.to_string(),
            transport_endpoint: DEFAULT_TRANSPORT_ENDPOINT.to_string(),
            runtime_id: DEFAULT_RUNTIME_ID.to_string(),
        }
    }
}

pub struct SnapshotRoutingViewBackend {
    adapter: Arc<SnapshotAdapter>,
}

impl SnapshotRoutingViewBackend {
    pub fn new(adapter: Arc<SnapshotAdapter>) -> Self {
        Self { adapter }
    }
}

impl RoutingViewBackend for SnapshotRoutingViewBackend {
    fn routing(&self, lookup: &TurnLookup) -> Result<RoutingSnapshot, CpError> {
        let config = section_config(
            &self.adapter,
            &self.adapter.document().routing_view,
            service::ROUTING_VIEW,
            lookup,
        )?;
        let defaults = RoutingSnapshot::service_default();
        let pick = |value: &Option<String>, default: String| {
            value
                .clone()
                .filter(|v| !v.is_empty())
                .unwrap_or(default)
        };
        Ok(RoutingSnapshot {
            routing_view_snapshot: pick(&config.routing_view_snapshot, defaults.routing_view_snapshot),
            admission_policy_snapshot: pick(
                &config.admission_policy_snapshot,
                defaults.admission_policy_snapshot,
            ),
            abi_compatibility_snapshot: pick(
                &config.abi_compatibility_snapshot,
                defaults.abi_compatibility_snapshot,
            ),
            transport_kind: pick(&config.transport_kind, defaults.transport_kind),
            transport_endpoint: pick(&config.transport_endpoint, defaults.transport_endpoint),
            runtime_id: pick(&config.runtime_id, defaults.runtime_id),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::{RoutingConfig, SnapshotDocument};
    use crate::error::ErrorCode;

    #[test]
    fn empties_normalize_to_service_defaults() {
        let mut document = SnapshotDocument::empty();
        document.routing_view.default = Some(RoutingConfig {
            runtime_id: Some("edge-runtime-3".into()),
            ..RoutingConfig::default()
        });
        let backend =
            SnapshotRoutingViewBackend::new(Arc::new(SnapshotAdapter::new("test", document)));
        let routing = backend.routing(&TurnLookup::new("t", "s", "v1")).unwrap();
        assert_eq!(routing.runtime_id, "edge-runtime-3");
        assert_eq!(routing.routing_view_snapshot, DEFAULT_ROUTING_VIEW_SNAPSHOT);
        assert_eq!(routing.transport_kind, DEFAULT_TRANSPORT_KIND);
        assert_eq!(routing.transport_endpoint, DEFAULT_TRANSPORT_ENDPOINT);
    }

    #[test]
    fn missing_section_is_snapshot_missing() {
        let backend = SnapshotRoutingViewBackend::new(Arc::new(SnapshotAdapter::new(
            "test",
            SnapshotDocument::empty(),
        )));
        let err = backend
            .routing(&TurnLookup::new("t", "s", "v1"))
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::SnapshotMissing);
        assert_eq!(err.service(), service::ROUTING_VIEW);
    }

    #[test]
    fn root_stale_shadows_section() {
        let mut document = SnapshotDocument::empty();
        document.stale = Some(true);
        document.routing_view.default = Some(RoutingConfig::default());
        let backend =
            SnapshotRoutingViewBackend::new(Arc::new(SnapshotAdapter::new("test", document)));
        let err = backend
            .routing(&TurnLookup::new("t", "s", "v1"))
            .unwrap_err();
        assert!(err.is_stale());
    }
}
