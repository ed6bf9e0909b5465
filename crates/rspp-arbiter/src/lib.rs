//! Turn runtime for the RSPP control plane: bundle resolution, pre-turn
//! gates, plan materialization, the per-turn lifecycle state machine, and
//! baseline evidence.
//!
//! One turn flows: a [`TurnOpenRequest`] enters [`TurnArbiter::handle_open`]
//! → local admission and the authority guard → the bundle resolver composes
//! the per-service backends from `rspp-cp` → lease and CP admission are
//! re-gated → the plan resolver freezes a [`ResolvedTurnPlan`] → the turn is
//! `Active`.  A second input with [`ActiveSignals`] applies the terminal
//! precedence table, appends baseline evidence, and closes the turn.

pub mod arbiter;
pub mod baseline;
pub mod bundle;
pub mod error;
pub mod events;
pub mod gate;
pub mod governance;
pub mod plan;
pub mod recorder;
pub mod resolver;
pub mod slo;

pub use arbiter::{
    ActiveOutcome, ActiveSignals, ActiveTrigger, ActiveTurn, ArbiterConfig, OpenOutcome,
    TurnArbiter, TurnOpenRequest,
};
pub use baseline::{BaselineEvidence, ProviderInvocationOutcome, TerminalOutcome};
pub use bundle::{SnapshotProvenance, TurnStartBundle};
pub use error::ArbiterError;
pub use events::{
    AbortReason, ControlSignal, ControlSignalKind, CpDecision, DecisionKind, LifecycleEvent,
    Transition, TurnState,
};
pub use gate::{CapacityOutcome, FailurePolicy};
pub use governance::{GovernanceEvaluator, GovernanceReport};
pub use plan::{FrozenPlanResolver, PlanHash, PlanResolver, ResolvedTurnPlan};
pub use recorder::{
    default_recorder, set_default_recorder, MemoryRecorder, ProviderInvocationAttempt,
    TurnRecorder,
};
pub use resolver::{BundleSource, TurnStartResolver};
pub use slo::{SloEvaluator, SloReport, SloThresholds};
