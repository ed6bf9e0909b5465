//! Typed error surface for the distribution client.
//!
//! Every failure in this crate carries a machine-readable [`ErrorCode`], the
//! service that produced it, and the path (file, URL list, env var, or
//! section path) it relates to.  Downstream policy layers branch on the
//! interrogation methods instead of matching on strings.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Classification of a distribution failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// Malformed configuration; surfaced at construction, never retried.
    InvalidConfig,
    /// Transport/HTTP failure or unexpected status.
    ArtifactReadFailed,
    /// Non-JSON body, trailing content, or a strict-mode violation.
    ArtifactDecodeFailed,
    /// Unknown schema version or a structural rule violation.
    ArtifactInvalid,
    /// Section or record absent when required.
    SnapshotMissing,
    /// Explicit staleness marker on the document or a section.
    SnapshotStale,
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorCode::InvalidConfig => "invalid_config",
            ErrorCode::ArtifactReadFailed => "artifact_read_failed",
            ErrorCode::ArtifactDecodeFailed => "artifact_decode_failed",
            ErrorCode::ArtifactInvalid => "artifact_invalid",
            ErrorCode::SnapshotMissing => "snapshot_missing",
            ErrorCode::SnapshotStale => "snapshot_stale",
        };
        f.write_str(s)
    }
}

/// Service tags attached to every error.
pub mod service {
    pub const DISTRIBUTION: &str = "distribution";
    pub const REGISTRY: &str = "registry";
    pub const ROLLOUT: &str = "rollout";
    pub const ROUTING_VIEW: &str = "routing_view";
    pub const POLICY: &str = "policy";
    pub const PROVIDER_HEALTH: &str = "provider_health";
    pub const GRAPH_COMPILER: &str = "graph_compiler";
    pub const ADMISSION: &str = "admission";
    pub const LEASE: &str = "lease";
}

/// A distribution error: code, service tag, path, message, and an optional
/// HTTP status plus wrapped cause.
#[derive(Debug, Error)]
#[error("{service}: {code} ({path}): {message}")]
pub struct CpError {
    code: ErrorCode,
    service: &'static str,
    path: String,
    message: String,
    status: Option<u16>,
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl CpError {
    pub fn new(
        code: ErrorCode,
        service: &'static str,
        path: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            code,
            service,
            path: path.into(),
            message: message.into(),
            status: None,
            source: None,
        }
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    // --- Convenience constructors, one per code ---

    pub fn invalid_config(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidConfig, service::DISTRIBUTION, path, message)
    }

    pub fn read_failed(
        service: &'static str,
        path: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::new(ErrorCode::ArtifactReadFailed, service, path, message)
    }

    pub fn decode_failed(
        service: &'static str,
        path: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::new(ErrorCode::ArtifactDecodeFailed, service, path, message)
    }

    pub fn invalid(
        service: &'static str,
        path: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::new(ErrorCode::ArtifactInvalid, service, path, message)
    }

    pub fn missing(
        service: &'static str,
        path: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::new(ErrorCode::SnapshotMissing, service, path, message)
    }

    pub fn stale(service: &'static str, path: impl Into<String>) -> Self {
        Self::new(
            ErrorCode::SnapshotStale,
            service,
            path,
            "snapshot marked stale",
        )
    }

    // --- Interrogation ---

    pub fn code(&self) -> ErrorCode {
        self.code
    }

    pub fn service(&self) -> &'static str {
        self.service
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn status(&self) -> Option<u16> {
        self.status
    }

    /// True when this error is an explicit staleness marker.  Staleness is a
    /// strong signal (the CP snapshot is not authoritative right now) and is
    /// never swallowed by availability fallbacks.
    pub fn is_stale(&self) -> bool {
        self.code == ErrorCode::SnapshotStale
    }

    /// True when a retry against the same endpoint may succeed: a read
    /// failure with status 429 or 5xx, or a read failure where no HTTP
    /// status was obtained at all (network error).
    pub fn is_retryable(&self) -> bool {
        if self.code != ErrorCode::ArtifactReadFailed {
            return false;
        }
        match self.status {
            Some(status) => status == 429 || status >= 500,
            None => true,
        }
    }
}
