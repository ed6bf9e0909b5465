//! Lease backend: authority epoch plus token expiry against an injected
//! clock.
//!
//! An expired token always flips `authority_authorized` to false with
//! `lease_deauthorized`.  An unparseable or absent expiry synthesizes
//! `now + default_ttl` and leaves authorization untouched.

use super::{section_config, LeaseBackend, TurnLookup};
use crate::artifact::SnapshotAdapter;
use crate::clock::Clock;
use crate::error::{service, CpError};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

pub const DEFAULT_LEASE_SNAPSHOT: &str = "lease-resolution/v1";
pub const DEFAULT_LEASE_TTL: Duration = Duration::from_secs(60);
pub const REASON_LEASE_DEAUTHORIZED: &str = "lease_deauthorized";

/// The lease resolution for one turn.  The `authority_epoch_valid` and
/// `authority_authorized` flags are tri-state: `None` means the control
/// plane expressed no opinion and the caller's value stands.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaseDecision {
    pub lease_resolution_snapshot: String,
    pub authority_epoch: u64,
    pub authority_epoch_valid: Option<bool>,
    pub authority_authorized: Option<bool>,
    pub lease_token_id: String,
    #[serde(with = "time::serde::rfc3339::option")]
    pub lease_expires_at_utc: Option<OffsetDateTime>,
    pub reason: String,
}

pub struct SnapshotLeaseBackend {
    adapter: Arc<SnapshotAdapter>,
    clock: Arc<dyn Clock>,
    default_ttl: Duration,
}

impl SnapshotLeaseBackend {
    pub fn new(adapter: Arc<SnapshotAdapter>, clock: Arc<dyn Clock>, default_ttl: Duration) -> Self {
        Self {
            adapter,
            clock,
            default_ttl,
        }
    }
}

impl LeaseBackend for SnapshotLeaseBackend {
    fn lease(&self, lookup: &TurnLookup) -> Result<LeaseDecision, CpError> {
        let config = section_config(
            &self.adapter,
            &self.adapter.document().lease,
            service::LEASE,
            lookup,
        )?;

        let epoch = match config.authority_epoch {
            Some(epoch) if epoch < 0 => {
                return Err(CpError::invalid(
                    service::LEASE,
                    self.adapter.origin(),
                    format!("negative authority_epoch {epoch}"),
                ));
            }
            Some(epoch) => epoch as u64,
            None => 0,
        };

        let now = self.clock.now_utc();
        let mut authorized = config.authority_authorized;
        let mut reason = config.reason.clone().unwrap_or_default();
        let expires_at = match config.lease_expires_at_utc.as_deref() {
            Some(raw) => match OffsetDateTime::parse(raw, &Rfc3339) {
                Ok(parsed) => {
                    if parsed <= now {
                        authorized = Some(false);
                        reason = REASON_LEASE_DEAUTHORIZED.to_string();
                    }
                    parsed
                }
                Err(err) => {
                    log::debug!("unparseable lease expiry {raw:?}: {err}");
                    now + self.default_ttl
                }
            },
            None => now + self.default_ttl,
        };

        Ok(LeaseDecision {
            lease_resolution_snapshot: config
                .lease_resolution_snapshot
                .clone()
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| DEFAULT_LEASE_SNAPSHOT.to_string()),
            authority_epoch: epoch,
            authority_epoch_valid: config.authority_epoch_valid,
            authority_authorized: authorized,
            lease_token_id: config.lease_token_id.clone().unwrap_or_default(),
            lease_expires_at_utc: Some(expires_at),
            reason,
        })
    }
}
