//! Control-plane snapshot distribution client for the RSPP runtime.
//!
//! The control plane publishes a schema-versioned snapshot document; this
//! crate fetches it (from a file or an ordered set of HTTP endpoints, with
//! bounded retries, a TTL cache, and bounded stale serving), seals it into
//! an immutable adapter, and exposes one backend per service section with
//! deterministic defaulting and validation.
//!
//! The turn runtime composes these backends into a per-turn bundle; see the
//! `rspp-arbiter` crate.

pub mod artifact;
pub mod backend;
pub mod bucket;
pub mod clock;
pub mod env;
pub mod error;
pub mod file;
pub mod http;

pub use artifact::{decode_document, SnapshotAdapter, SnapshotDocument, SCHEMA_VERSION};
pub use backend::{BackendSet, FallbackMode, TurnLookup};
pub use clock::{Clock, Sleeper, SystemClock, TokioSleeper};
pub use env::{DistributionOptions, DistributionSource};
pub use error::{CpError, ErrorCode};
pub use file::SnapshotFileAdapter;
pub use http::{HttpProviderConfig, HttpSnapshotProvider};

use async_trait::async_trait;
use std::sync::Arc;

/// Object-safe handle to whatever produces the current snapshot adapter:
/// the HTTP provider, the file adapter, or a test double.
#[async_trait]
pub trait SnapshotSource: Send + Sync {
    async fn current(&self) -> Result<Arc<SnapshotAdapter>, CpError>;
}

/// Build a snapshot source from the environment-derived options.
///
/// `Unset` is an `invalid_config` error here: callers that can run without
/// a control plane should check [`DistributionSource`] themselves.
pub async fn source_from_options(
    options: &DistributionOptions,
) -> Result<Arc<dyn SnapshotSource>, CpError> {
    match &options.source {
        DistributionSource::File(path) => {
            Ok(Arc::new(SnapshotFileAdapter::open(path)?) as Arc<dyn SnapshotSource>)
        }
        DistributionSource::Http(config) => {
            let provider = HttpSnapshotProvider::connect(config.clone()).await?;
            Ok(Arc::new(provider) as Arc<dyn SnapshotSource>)
        }
        DistributionSource::Unset => Err(CpError::invalid_config(
            "RSPP_CP_DISTRIBUTION_PATH",
            "no distribution source configured",
        )),
    }
}
