//! Pipeline registry backend.

use super::{section_config, RegistryBackend, TurnLookup};
use crate::artifact::{ExecutionProfile, SnapshotAdapter};
use crate::error::{service, CpError};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// A fully resolved pipeline record.  All three fields are required after
/// defaulting.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineRecord {
    pub pipeline_version: String,
    pub graph_definition_ref: String,
    pub execution_profile: ExecutionProfile,
}

pub struct SnapshotRegistryBackend {
    adapter: Arc<SnapshotAdapter>,
}

impl SnapshotRegistryBackend {
    pub fn new(adapter: Arc<SnapshotAdapter>) -> Self {
        Self { adapter }
    }
}

impl RegistryBackend for SnapshotRegistryBackend {
    fn pipeline_record(&self, lookup: &TurnLookup) -> Result<PipelineRecord, CpError> {
        let config = section_config(
            &self.adapter,
            &self.adapter.document().registry,
            service::REGISTRY,
            lookup,
        )?;

        // Record by requested version, falling back to the section's default
        // pipeline version.
        let requested = lookup.pipeline_version.as_str();
        let (version, record) = if !requested.is_empty() && config.pipelines.contains_key(requested)
        {
            (requested.to_string(), &config.pipelines[requested])
        } else {
            let default_version = config
                .default_pipeline_version
                .as_deref()
                .filter(|v| !v.is_empty())
                .ok_or_else(|| {
                    CpError::missing(
                        service::REGISTRY,
                        self.adapter.origin(),
                        format!("no record for version {requested:?} and no default version"),
                    )
                })?;
            let record = config.pipelines.get(default_version).ok_or_else(|| {
                CpError::missing(
                    service::REGISTRY,
                    self.adapter.origin(),
                    format!("no record for default version {default_version:?}"),
                )
            })?;
            (default_version.to_string(), record)
        };

        let pipeline_version = record
            .pipeline_version
            .clone()
            .filter(|v| !v.is_empty())
            .unwrap_or(version);
        let graph_definition_ref = record
            .graph_definition_ref
            .clone()
            .filter(|r| !r.is_empty())
            .ok_or_else(|| {
                CpError::missing(
                    service::REGISTRY,
                    self.adapter.origin(),
                    format!("record {pipeline_version:?} has no graph_definition_ref"),
                )
            })?;

        Ok(PipelineRecord {
            pipeline_version,
            graph_definition_ref,
            execution_profile: record.execution_profile.unwrap_or_default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::{PipelineRecordConfig, RegistryConfig, SnapshotDocument};
    use crate::error::ErrorCode;

    fn adapter_with(config: RegistryConfig) -> Arc<SnapshotAdapter> {
        let mut document = SnapshotDocument::empty();
        document.registry.default = Some(config);
        Arc::new(SnapshotAdapter::new("test", document))
    }

    fn registry_with_versions(default: Option<&str>, versions: &[&str]) -> RegistryConfig {
        let mut config = RegistryConfig {
            default_pipeline_version: default.map(str::to_string),
            ..RegistryConfig::default()
        };
        for version in versions {
            config.pipelines.insert(
                version.to_string(),
                PipelineRecordConfig {
                    graph_definition_ref: Some(format!("graph:{version}")),
                    ..PipelineRecordConfig::default()
                },
            );
        }
        config
    }

    #[test]
    fn picks_record_by_requested_version() {
        let backend = SnapshotRegistryBackend::new(adapter_with(registry_with_versions(
            Some("v1"),
            &["v1", "v2"],
        )));
        let record = backend
            .pipeline_record(&TurnLookup::new("t", "s", "v2"))
            .unwrap();
        assert_eq!(record.pipeline_version, "v2");
        assert_eq!(record.graph_definition_ref, "graph:v2");
        assert_eq!(record.execution_profile, ExecutionProfile::Simple);
    }

    #[test]
    fn falls_back_to_default_version() {
        let backend = SnapshotRegistryBackend::new(adapter_with(registry_with_versions(
            Some("v1"),
            &["v1"],
        )));
        let record = backend
            .pipeline_record(&TurnLookup::new("t", "s", "v9"))
            .unwrap();
        assert_eq!(record.pipeline_version, "v1");
    }

    #[test]
    fn missing_record_is_snapshot_missing() {
        let backend = SnapshotRegistryBackend::new(adapter_with(registry_with_versions(
            Some("v1"),
            &[],
        )));
        let err = backend
            .pipeline_record(&TurnLookup::new("t", "s", "v9"))
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::SnapshotMissing);
        assert_eq!(err.service(), service::REGISTRY);
    }

    #[test]
    fn record_without_graph_ref_is_missing() {
        let mut config = RegistryConfig::default();
        config
            .pipelines
            .insert("v1".into(), PipelineRecordConfig::default());
        let backend = SnapshotRegistryBackend::new(adapter_with(config));
        let err = backend
            .pipeline_record(&TurnLookup::new("t", "s", "v1"))
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::SnapshotMissing);
    }

    #[test]
    fn stale_section_is_snapshot_stale() {
        let mut document = SnapshotDocument::empty();
        document.registry.stale = Some(true);
        document.registry.default = Some(registry_with_versions(Some("v1"), &["v1"]));
        let backend =
            SnapshotRegistryBackend::new(Arc::new(SnapshotAdapter::new("test", document)));
        let err = backend
            .pipeline_record(&TurnLookup::new("t", "s", "v1"))
            .unwrap_err();
        assert!(err.is_stale());
        assert_eq!(err.service(), service::REGISTRY);
    }

    #[test]
    fn empty_section_is_snapshot_missing() {
        let backend = SnapshotRegistryBackend::new(Arc::new(SnapshotAdapter::new(
            "test",
            SnapshotDocument::empty(),
        )));
        let err = backend
            .pipeline_record(&TurnLookup::new("t", "s", "v1"))
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::SnapshotMissing);
    }
}
