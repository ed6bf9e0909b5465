//! One-shot file adapter: read, strictly decode, validate, seal.

use crate::artifact::{decode_document, SnapshotAdapter};
use crate::error::{service, CpError};
use crate::SnapshotSource;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// A sealed adapter constructed from a local artifact file.
///
/// The file is read exactly once at `open`; staleness markers inside the
/// document are left for the per-service backends to classify.
#[derive(Debug, Clone)]
pub struct SnapshotFileAdapter {
    path: PathBuf,
    adapter: Arc<SnapshotAdapter>,
}

impl SnapshotFileAdapter {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, CpError> {
        let path = path.as_ref().to_path_buf();
        let origin = path.display().to_string();
        let bytes = std::fs::read(&path).map_err(|e| {
            CpError::read_failed(service::DISTRIBUTION, &origin, "failed to read artifact")
                .with_source(e)
        })?;
        let document = decode_document(&bytes, &origin)?;
        log::debug!("loaded control-plane artifact from {origin}");
        Ok(Self {
            path,
            adapter: Arc::new(SnapshotAdapter::new(origin, document)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn adapter(&self) -> Arc<SnapshotAdapter> {
        self.adapter.clone()
    }
}

#[async_trait]
impl SnapshotSource for SnapshotFileAdapter {
    async fn current(&self) -> Result<Arc<SnapshotAdapter>, CpError> {
        Ok(self.adapter.clone())
    }
}
