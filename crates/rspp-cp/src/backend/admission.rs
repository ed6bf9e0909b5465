//! CP admission backend.
//!
//! Normalizes the section config, then applies the quota override: any
//! observed rate above a positive limit forces a reject regardless of the
//! outcome the control plane supplied.

use super::{section_config, AdmissionBackend, TurnLookup};
use crate::artifact::{AdmissionOutcome, AdmissionScope, SnapshotAdapter};
use crate::error::{service, CpError};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub const DEFAULT_ADMISSION_SNAPSHOT: &str = "admission-policy/v1";
pub const REASON_ADMISSION_QUOTA: &str = "cp_admission_reject_quota";

/// The control-plane-side admit/defer/reject decision for one turn.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CpAdmissionDecision {
    pub admission_policy_snapshot: String,
    pub outcome: AdmissionOutcome,
    pub scope: AdmissionScope,
    pub reason: String,
    pub session_rate_limit_per_min: u64,
    pub session_rate_observed_per_min: u64,
    pub token_rate_limit_per_min: u64,
    pub token_rate_observed_per_min: u64,
}

impl CpAdmissionDecision {
    /// True when an observed rate exceeds a positive limit.
    pub fn over_quota(&self) -> bool {
        over(self.session_rate_observed_per_min, self.session_rate_limit_per_min)
            || over(self.token_rate_observed_per_min, self.token_rate_limit_per_min)
    }
}

fn over(observed: u64, limit: u64) -> bool {
    limit > 0 && observed > limit
}

pub struct SnapshotAdmissionBackend {
    adapter: Arc<SnapshotAdapter>,
}

impl SnapshotAdmissionBackend {
    pub fn new(adapter: Arc<SnapshotAdapter>) -> Self {
        Self { adapter }
    }
}

impl AdmissionBackend for SnapshotAdmissionBackend {
    fn decision(&self, lookup: &TurnLookup) -> Result<CpAdmissionDecision, CpError> {
        let config = section_config(
            &self.adapter,
            &self.adapter.document().admission,
            service::ADMISSION,
            lookup,
        )?;

        let mut decision = CpAdmissionDecision {
            admission_policy_snapshot: config
                .admission_policy_snapshot
                .clone()
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| DEFAULT_ADMISSION_SNAPSHOT.to_string()),
            outcome: config.outcome.unwrap_or_default(),
            scope: config.scope.unwrap_or_default(),
            reason: config.reason.clone().unwrap_or_default(),
            session_rate_limit_per_min: config.session_rate_limit_per_min.unwrap_or(0),
            session_rate_observed_per_min: config.session_rate_observed_per_min.unwrap_or(0),
            token_rate_limit_per_min: config.token_rate_limit_per_min.unwrap_or(0),
            token_rate_observed_per_min: config.token_rate_observed_per_min.unwrap_or(0),
        };

        // Quota override beats whatever outcome the backend supplied.
        if decision.over_quota() {
            decision.outcome = AdmissionOutcome::Reject;
            decision.reason = REASON_ADMISSION_QUOTA.to_string();
        }
        Ok(decision)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::{AdmissionConfig, SnapshotDocument};

    fn decide(config: AdmissionConfig) -> CpAdmissionDecision {
        let mut document = SnapshotDocument::empty();
        document.admission.default = Some(config);
        SnapshotAdmissionBackend::new(Arc::new(SnapshotAdapter::new("test", document)))
            .decision(&TurnLookup::new("t", "s", "v1"))
            .unwrap()
    }

    #[test]
    fn empty_config_admits_with_defaults() {
        let decision = decide(AdmissionConfig::default());
        assert_eq!(decision.outcome, AdmissionOutcome::Admit);
        assert_eq!(decision.scope, AdmissionScope::Session);
        assert_eq!(decision.admission_policy_snapshot, DEFAULT_ADMISSION_SNAPSHOT);
    }

    #[test]
    fn session_quota_breach_forces_reject() {
        let decision = decide(AdmissionConfig {
            outcome: Some(AdmissionOutcome::Admit),
            session_rate_limit_per_min: Some(10),
            session_rate_observed_per_min: Some(11),
            ..AdmissionConfig::default()
        });
        assert_eq!(decision.outcome, AdmissionOutcome::Reject);
        assert_eq!(decision.reason, REASON_ADMISSION_QUOTA);
    }

    #[test]
    fn token_quota_breach_overrides_defer() {
        let decision = decide(AdmissionConfig {
            outcome: Some(AdmissionOutcome::Defer),
            reason: Some("cp_admission_defer_capacity".into()),
            token_rate_limit_per_min: Some(1_000),
            token_rate_observed_per_min: Some(5_000),
            ..AdmissionConfig::default()
        });
        assert_eq!(decision.outcome, AdmissionOutcome::Reject);
        assert_eq!(decision.reason, REASON_ADMISSION_QUOTA);
    }

    #[test]
    fn zero_limit_never_trips_quota() {
        let decision = decide(AdmissionConfig {
            session_rate_observed_per_min: Some(1_000_000),
            ..AdmissionConfig::default()
        });
        assert_eq!(decision.outcome, AdmissionOutcome::Admit);
    }

    #[test]
    fn observed_at_limit_is_within_quota() {
        let decision = decide(AdmissionConfig {
            session_rate_limit_per_min: Some(10),
            session_rate_observed_per_min: Some(10),
            ..AdmissionConfig::default()
        });
        assert_eq!(decision.outcome, AdmissionOutcome::Admit);
    }

    #[test]
    fn tenant_override_carries_scope_and_reason() {
        let mut document = SnapshotDocument::empty();
        document.admission.by_tenant.insert(
            "tenant-gold".into(),
            AdmissionConfig {
                outcome: Some(AdmissionOutcome::Defer),
                scope: Some(AdmissionScope::Tenant),
                reason: Some("cp_admission_defer_capacity".into()),
                ..AdmissionConfig::default()
            },
        );
        let backend =
            SnapshotAdmissionBackend::new(Arc::new(SnapshotAdapter::new("test", document)));
        let decision = backend
            .decision(&TurnLookup::new("tenant-gold", "s", "v1"))
            .unwrap();
        assert_eq!(decision.outcome, AdmissionOutcome::Defer);
        assert_eq!(decision.scope, AdmissionScope::Tenant);
        assert_eq!(decision.reason, "cp_admission_defer_capacity");
    }

    #[test]
    fn stale_root_propagates() {
        let mut document = SnapshotDocument::empty();
        document.stale = Some(true);
        document.admission.default = Some(AdmissionConfig::default());
        let backend =
            SnapshotAdmissionBackend::new(Arc::new(SnapshotAdapter::new("test", document)));
        assert!(backend
            .decision(&TurnLookup::new("t", "s", "v1"))
            .unwrap_err()
            .is_stale());
    }
}
