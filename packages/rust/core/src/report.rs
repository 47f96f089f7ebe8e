//! Run report handed to whatever persists or displays the result.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use ingestkit_features::QueryFeatures;
use ingestkit_shared::{IngestRequest, Phase};

use crate::context::ExecutionContext;

/// Why a phase or connector did not run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// No required input and the query alone is not enough.
    NoInput,
    /// The `run_if` condition evaluated false.
    Condition,
    /// Not enough budget left for this connector.
    BudgetExhausted,
    /// The run's goal was met before this point.
    GoalReached,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NoInput => "no input",
            Self::Condition => "condition",
            Self::BudgetExhausted => "budget exhausted",
            Self::GoalReached => "goal reached",
        }
    }
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a run ended before exhausting its phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    GoalReached,
    BudgetExhausted,
}

impl From<StopReason> for SkipReason {
    fn from(stop: StopReason) -> Self {
        match stop {
            StopReason::GoalReached => Self::GoalReached,
            StopReason::BudgetExhausted => Self::BudgetExhausted,
        }
    }
}

/// Status of one phase at the end of the run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PhaseStatus {
    Completed { executed: usize, skipped: usize, errored: usize },
    Skipped { reason: SkipReason },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseReport {
    pub phase: Phase,
    #[serde(flatten)]
    pub status: PhaseStatus,
}

/// What happened to one connector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ConnectorOutcome {
    Succeeded {
        candidates: usize,
        accepted: usize,
        duplicates: usize,
    },
    Errored { message: String },
    Skipped { reason: SkipReason },
}

impl ConnectorOutcome {
    pub fn skip_reason(&self) -> Option<SkipReason> {
        match self {
            Self::Skipped { reason } => Some(*reason),
            _ => None,
        }
    }

    pub fn executed(&self) -> bool {
        !matches!(self, Self::Skipped { .. })
    }
}

/// Complete outcome of one run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub request: IngestRequest,
    pub features: QueryFeatures,
    pub phases: Vec<PhaseReport>,
    pub connectors: BTreeMap<String, ConnectorOutcome>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_reason: Option<StopReason>,
    pub context: ExecutionContext,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl RunReport {
    /// Number of phases that actually executed.
    pub fn phases_run(&self) -> usize {
        self.phases
            .iter()
            .filter(|p| matches!(p.status, PhaseStatus::Completed { .. }))
            .count()
    }

    pub fn phase_status(&self, phase: Phase) -> Option<&PhaseStatus> {
        self.phases.iter().find(|p| p.phase == phase).map(|p| &p.status)
    }

    pub fn outcome(&self, connector: &str) -> Option<&ConnectorOutcome> {
        self.connectors.get(connector)
    }

    /// Connectors that did not run, with the reason.
    pub fn skipped(&self) -> Vec<(&str, SkipReason)> {
        self.connectors
            .iter()
            .filter_map(|(name, o)| o.skip_reason().map(|r| (name.as_str(), r)))
            .collect()
    }

    pub fn elapsed_ms(&self) -> i64 {
        (self.finished_at - self.started_at).num_milliseconds()
    }
}
