//! Ingestion orchestration kernel.
//!
//! Given a free-text request, decides which connectors to run, schedules them
//! across the fixed phases, merges their concurrently produced output into one
//! context deterministically, deduplicates entities, resolves field conflicts
//! by trust, and stops early once the budget or goal is met.

pub mod conditions;
pub mod connector;
pub mod context;
pub mod dedup;
mod merge;
pub mod orchestrator;
pub mod plan;
pub mod report;

pub use conditions::{CompareOp, Condition, EvalContext};
pub use connector::{Connector, ConnectorOutput, ConnectorRegistry};
pub use context::{
    AcceptOutcome, AcceptedEntity, ConnectorErrorRecord, ConnectorMetrics, ExecutionContext,
    FieldSource, RejectReason,
};
pub use dedup::{DedupTier, dedup_key, dedup_key_with_tier, normalize_name};
pub use orchestrator::{Orchestrator, ProgressReporter, SilentProgress};
pub use plan::{ExecutionPlan, GateDecision, PhaseOutline, PlanNode, PlanOutline, select_provider, should_run};
pub use report::{
    ConnectorOutcome, PhaseReport, PhaseStatus, RunReport, SkipReason, StopReason,
};
