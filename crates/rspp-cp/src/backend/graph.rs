//! Graph compiler backend.

use super::{section_config, GraphCompilerBackend, TurnLookup};
use crate::artifact::SnapshotAdapter;
use crate::error::{service, CpError};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub const DEFAULT_GRAPH_COMPILE_SNAPSHOT: &str = "graph-compile/v1";
pub const DEFAULT_COMPILER_VERSION: &str = "graphc-1";

/// Compiled-graph coordinates.  An empty `compiled_graph_ref` means the
/// compiler has not produced an artifact for this version and the registry's
/// graph definition is used as-is.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompiledGraph {
    pub graph_compile_snapshot: String,
    pub compiled_graph_ref: String,
    pub compiler_version: String,
}

impl CompiledGraph {
    pub fn service_default() -> Self {
        Self {
            graph_compile_snapshot: DEFAULT_GRAPH_COMPILE_SNAPSHOT.to_string(),
            compiled_graph_ref: String::new(),
            compiler_version: DEFAULT_COMPILER_VERSION.to_string(),
        }
    }
}

pub struct SnapshotGraphCompilerBackend {
    adapter: Arc<SnapshotAdapter>,
}

impl SnapshotGraphCompilerBackend {
    pub fn new(adapter: Arc<SnapshotAdapter>) -> Self {
        Self { adapter }
    }
}

impl GraphCompilerBackend for SnapshotGraphCompilerBackend {
    fn compiled_graph(&self, lookup: &TurnLookup) -> Result<CompiledGraph, CpError> {
        let config = section_config(
            &self.adapter,
            &self.adapter.document().graph_compiler,
            service::GRAPH_COMPILER,
            lookup,
        )?;
        Ok(CompiledGraph {
            graph_compile_snapshot: config
                .graph_compile_snapshot
                .clone()
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| DEFAULT_GRAPH_COMPILE_SNAPSHOT.to_string()),
            compiled_graph_ref: config.compiled_graph_ref.clone().unwrap_or_default(),
            compiler_version: config
                .compiler_version
                .clone()
                .filter(|v| !v.is_empty())
                .unwrap_or_else(|| DEFAULT_COMPILER_VERSION.to_string()),
        })
    }
}
