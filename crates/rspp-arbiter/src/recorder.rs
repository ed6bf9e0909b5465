//! The append-only evidence store contract.
//!
//! The arbiter hands every accepted terminal a baseline record; the
//! recorder also collects per-attempt provider invocation records during
//! the turn so the baseline builder can synthesize final-attempt evidence.
//! Implementations must be safe for concurrent append; the arbiter does not
//! serialize turns against each other.

use crate::baseline::BaselineEvidence;
use crate::error::ArbiterError;
use async_trait::async_trait;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};

/// One provider invocation attempt, recorded as it happens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderInvocationAttempt {
    pub session_id: String,
    pub turn_id: String,
    pub provider_invocation_id: String,
    pub provider_id: String,
    pub attempt: u32,
    pub latency_ms: u64,
    pub ok: bool,
}

#[async_trait]
pub trait TurnRecorder: Send + Sync {
    /// Append one baseline evidence record.  Failure maps to the
    /// deterministic fallback abort path in the arbiter.
    async fn append_baseline(&self, record: &BaselineEvidence) -> Result<(), ArbiterError>;

    /// Record a provider invocation attempt observed during a turn.
    async fn record_invocation_attempt(
        &self,
        attempt: ProviderInvocationAttempt,
    ) -> Result<(), ArbiterError>;

    /// The attempts recorded for one turn, in recording order.
    fn invocation_attempts(&self, session_id: &str, turn_id: &str)
        -> Vec<ProviderInvocationAttempt>;
}

/// In-memory recorder for tests and local runs.
#[derive(Default)]
pub struct MemoryRecorder {
    baselines: Mutex<Vec<BaselineEvidence>>,
    attempts: Mutex<Vec<ProviderInvocationAttempt>>,
    fail_appends: AtomicBool,
}

impl MemoryRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent `append_baseline` fail, simulating a
    /// saturated evidence store.
    pub fn fail_appends(&self, fail: bool) {
        self.fail_appends.store(fail, Ordering::SeqCst);
    }

    pub fn baselines(&self) -> Vec<BaselineEvidence> {
        self.baselines.lock().expect("recorder poisoned").clone()
    }
}

#[async_trait]
impl TurnRecorder for MemoryRecorder {
    async fn append_baseline(&self, record: &BaselineEvidence) -> Result<(), ArbiterError> {
        if self.fail_appends.load(Ordering::SeqCst) {
            return Err(ArbiterError::RecordingUnavailable {
                reason: "append rejected".into(),
            });
        }
        self.baselines
            .lock()
            .expect("recorder poisoned")
            .push(record.clone());
        Ok(())
    }

    async fn record_invocation_attempt(
        &self,
        attempt: ProviderInvocationAttempt,
    ) -> Result<(), ArbiterError> {
        self.attempts
            .lock()
            .expect("recorder poisoned")
            .push(attempt);
        Ok(())
    }

    fn invocation_attempts(
        &self,
        session_id: &str,
        turn_id: &str,
    ) -> Vec<ProviderInvocationAttempt> {
        self.attempts
            .lock()
            .expect("recorder poisoned")
            .iter()
            .filter(|a| a.session_id == session_id && a.turn_id == turn_id)
            .cloned()
            .collect()
    }
}

static DEFAULT_RECORDER: Lazy<RwLock<Option<Arc<dyn TurnRecorder>>>> =
    Lazy::new(|| RwLock::new(None));

/// Install a process-default recorder.  This is a convenience seam for the
/// runner; the arbiter itself always takes an injected recorder.
pub fn set_default_recorder(recorder: Arc<dyn TurnRecorder>) {
    *DEFAULT_RECORDER.write().expect("recorder registry poisoned") = Some(recorder);
}

pub fn default_recorder() -> Option<Arc<dyn TurnRecorder>> {
    DEFAULT_RECORDER
        .read()
        .expect("recorder registry poisoned")
        .clone()
}
