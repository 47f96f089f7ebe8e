//! The run loop: DISCOVERY → STRUCTURED → ENRICHMENT, with early stopping.
//!
//! Each phase is split into dependency waves. A wave's admitted connectors
//! run concurrently against an immutable snapshot of the context; their
//! outputs are buffered and folded in at the merge barrier.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tokio::sync::Semaphore;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use ingestkit_features::QueryFeatures;
use ingestkit_shared::{
    IngestError, IngestMode, IngestRequest, OrchestratorConfig, Phase, Result,
};

use crate::conditions::EvalContext;
use crate::connector::ConnectorRegistry;
use crate::context::ExecutionContext;
use crate::merge::{ConnectorRun, merge_barrier};
use crate::plan::{ExecutionPlan, GateDecision, PlanNode};
use crate::report::{
    ConnectorOutcome, PhaseReport, PhaseStatus, RunReport, SkipReason, StopReason,
};

/// Slack for floating-point budget comparisons.
const BUDGET_EPSILON: f64 = 1e-9;

// ---------------------------------------------------------------------------
// Progress
// ---------------------------------------------------------------------------

/// Progress callback for reporting run status.
pub trait ProgressReporter: Send + Sync {
    /// Called when a phase starts executing.
    fn phase_started(&self, phase: Phase, connectors: usize);
    /// Called when a phase is skipped by early stopping.
    fn phase_skipped(&self, phase: Phase, reason: SkipReason);
    /// Called for every connector once its outcome is final.
    fn connector_finished(&self, connector: &str, outcome: &ConnectorOutcome);
    /// Called when the run completes.
    fn done(&self, report: &RunReport);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn phase_started(&self, _phase: Phase, _connectors: usize) {}
    fn phase_skipped(&self, _phase: Phase, _reason: SkipReason) {}
    fn connector_finished(&self, _connector: &str, _outcome: &ConnectorOutcome) {}
    fn done(&self, _report: &RunReport) {}
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

pub struct Orchestrator {
    plan: ExecutionPlan,
    registry: ConnectorRegistry,
    config: OrchestratorConfig,
}

impl Orchestrator {
    /// Bind a plan to its implementations. Every planned connector must be
    /// registered; a missing one is a configuration error raised here, before
    /// anything runs.
    pub fn new(
        plan: ExecutionPlan,
        registry: ConnectorRegistry,
        config: OrchestratorConfig,
    ) -> Result<Self> {
        registry.check_plan(&plan)?;
        Ok(Self {
            plan,
            registry,
            config,
        })
    }

    pub fn plan(&self) -> &ExecutionPlan {
        &self.plan
    }

    /// Execute one run to completion or early stop.
    ///
    /// Connector failures are recorded in the context and never abort the
    /// run. Only request validation errors are returned.
    #[instrument(skip_all, fields(mode = %request.mode, query = %request.query))]
    pub async fn run(
        &self,
        request: IngestRequest,
        progress: &dyn ProgressReporter,
    ) -> Result<RunReport> {
        request.validate()?;
        let started_at = Utc::now();
        let run_id = Uuid::now_v7();
        let request = self.effective_request(request);
        let features = ingestkit_features::extract(&request.query, Some(&request));

        info!(%run_id, connectors = self.plan.len(), "starting run");

        let mut ctx = ExecutionContext::new();
        let mut phases = Vec::with_capacity(Phase::ALL.len());
        let mut outcomes: BTreeMap<String, ConnectorOutcome> = BTreeMap::new();
        let mut stop: Option<StopReason> = None;

        for phase in Phase::ALL {
            // --- Pre-check ---
            if stop.is_none() {
                stop = self.pre_check(phase, &request, &ctx);
            }
            if let Some(reason) = stop {
                let reason = SkipReason::from(reason);
                info!(%phase, %reason, "skipping phase");
                for node in self.plan.waves(phase).iter().flatten() {
                    let outcome = ConnectorOutcome::Skipped { reason };
                    progress.connector_finished(node.name(), &outcome);
                    outcomes.insert(node.name().to_string(), outcome);
                }
                progress.phase_skipped(phase, reason);
                phases.push(PhaseReport {
                    phase,
                    status: PhaseStatus::Skipped { reason },
                });
                continue;
            }

            // --- Waves ---
            let waves = self.plan.waves(phase);
            progress.phase_started(phase, waves.iter().map(Vec::len).sum());
            info!(%phase, waves = waves.len(), "entering phase");

            let (mut executed, mut skipped, mut errored) = (0, 0, 0);
            for wave in waves {
                let (admitted, wave_skips) = self.admit(wave, &request, &features, &ctx);
                for (name, reason) in wave_skips {
                    let outcome = ConnectorOutcome::Skipped { reason };
                    progress.connector_finished(&name, &outcome);
                    outcomes.insert(name, outcome);
                    skipped += 1;
                }
                if admitted.is_empty() {
                    continue;
                }

                let runs = self.dispatch(&admitted, &request, &features, &ctx).await?;
                for (name, outcome) in merge_barrier(&mut ctx, phase, runs) {
                    executed += 1;
                    if matches!(outcome, ConnectorOutcome::Errored { .. }) {
                        errored += 1;
                    }
                    progress.connector_finished(&name, &outcome);
                    outcomes.insert(name, outcome);
                }
            }

            info!(
                %phase,
                executed,
                skipped,
                errored,
                entities = ctx.entity_count(),
                confidence = ctx.confidence(),
                budget_spent_usd = ctx.budget_spent_usd(),
                "phase complete"
            );
            phases.push(PhaseReport {
                phase,
                status: PhaseStatus::Completed {
                    executed,
                    skipped,
                    errored,
                },
            });

            // --- Post-check ---
            stop = self.post_check(&request, &ctx);
            if let Some(reason) = stop {
                info!(%phase, ?reason, "stopping early");
            }
        }

        let report = RunReport {
            run_id,
            request,
            features,
            phases,
            connectors: outcomes,
            stop_reason: stop,
            context: ctx,
            started_at,
            finished_at: Utc::now(),
        };

        info!(
            %run_id,
            phases_run = report.phases_run(),
            entities = report.context.entity_count(),
            errors = report.context.errors().len(),
            elapsed_ms = report.elapsed_ms(),
            "run complete"
        );
        progress.done(&report);
        Ok(report)
    }

    /// Fill unset goals from config. The result is the request the run uses.
    fn effective_request(&self, mut request: IngestRequest) -> IngestRequest {
        if request.mode == IngestMode::ResolveOne && request.min_confidence.is_none() {
            request.min_confidence = Some(self.config.default_min_confidence);
        }
        if request.budget_usd.is_none() {
            request.budget_usd = self.config.default_budget_usd;
        }
        request
    }

    // -----------------------------------------------------------------------
    // Stopping rules
    // -----------------------------------------------------------------------

    fn pre_check(
        &self,
        phase: Phase,
        request: &IngestRequest,
        ctx: &ExecutionContext,
    ) -> Option<StopReason> {
        if goal_reached(request, ctx) {
            return Some(StopReason::GoalReached);
        }

        let budget = request.budget_usd?;
        let cheapest = Phase::ALL
            .iter()
            .filter(|p| **p >= phase)
            .flat_map(|p| self.plan.waves(*p).iter().flatten())
            .map(|n| n.spec.estimated_cost_usd)
            .min_by(f64::total_cmp)?;
        let remaining = budget - ctx.budget_spent_usd();
        if remaining + BUDGET_EPSILON < cheapest {
            debug!(%phase, remaining, cheapest, "remaining budget below cheapest connector");
            return Some(StopReason::BudgetExhausted);
        }
        None
    }

    fn post_check(&self, request: &IngestRequest, ctx: &ExecutionContext) -> Option<StopReason> {
        if goal_reached(request, ctx) {
            return Some(StopReason::GoalReached);
        }
        match request.budget_usd {
            Some(budget) if ctx.budget_spent_usd() + BUDGET_EPSILON >= budget => {
                Some(StopReason::BudgetExhausted)
            }
            _ => None,
        }
    }

    // -----------------------------------------------------------------------
    // Gating and dispatch
    // -----------------------------------------------------------------------

    /// Gate a wave and admit what fits in the budget, in name order.
    fn admit<'a>(
        &self,
        wave: &'a [PlanNode],
        request: &IngestRequest,
        features: &QueryFeatures,
        ctx: &ExecutionContext,
    ) -> (Vec<&'a PlanNode>, Vec<(String, SkipReason)>) {
        let flags = self.flags(request, ctx);
        let eval = EvalContext::build(request, features, ctx, &flags);

        let mut admitted = Vec::new();
        let mut skipped = Vec::new();
        let mut reserved = 0.0;

        for node in wave {
            let reason = match node.gate(ctx, &eval) {
                GateDecision::NoInput => Some(SkipReason::NoInput),
                GateDecision::ConditionFalse => Some(SkipReason::Condition),
                GateDecision::Run => {
                    let cost = node.spec.estimated_cost_usd;
                    let fits = request.budget_usd.is_none_or(|budget| {
                        ctx.budget_spent_usd() + reserved + cost <= budget + BUDGET_EPSILON
                    });
                    if fits {
                        reserved += cost;
                        None
                    } else {
                        Some(SkipReason::BudgetExhausted)
                    }
                }
            };

            match reason {
                Some(reason) => {
                    debug!(connector = %node.name(), %reason, "connector skipped");
                    skipped.push((node.name().to_string(), reason));
                }
                None => admitted.push(node),
            }
        }
        (admitted, skipped)
    }

    /// Booleans precomputed for `run_if` conditions.
    fn flags(&self, request: &IngestRequest, ctx: &ExecutionContext) -> BTreeMap<String, bool> {
        let budget_remaining = request
            .budget_usd
            .is_none_or(|b| ctx.budget_spent_usd() + BUDGET_EPSILON < b);
        BTreeMap::from([
            ("has_candidates".to_string(), !ctx.candidates().is_empty()),
            ("has_entities".to_string(), ctx.entity_count() > 0),
            ("has_seeds".to_string(), !ctx.seeds().is_empty()),
            ("has_errors".to_string(), !ctx.errors().is_empty()),
            ("has_budget_remaining".to_string(), budget_remaining),
        ])
    }

    /// Run admitted connectors concurrently against a shared snapshot.
    async fn dispatch(
        &self,
        nodes: &[&PlanNode],
        request: &IngestRequest,
        features: &QueryFeatures,
        ctx: &ExecutionContext,
    ) -> Result<Vec<ConnectorRun>> {
        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrency.max(1)));
        let request = Arc::new(request.clone());
        let features = Arc::new(features.clone());
        let snapshot = Arc::new(ctx.clone());

        // Resolve every implementation before spawning anything.
        let resolved = nodes
            .iter()
            .map(|node| {
                self.registry
                    .get(node.name())
                    .map(|connector| (*node, connector))
                    .ok_or_else(|| {
                        IngestError::config(format!(
                            "no registered implementation for connector(s): {}",
                            node.name()
                        ))
                    })
            })
            .collect::<Result<Vec<_>>>()?;

        let mut handles = Vec::with_capacity(resolved.len());
        for (node, connector) in resolved {
            let name = node.name().to_string();
            let sem = semaphore.clone();
            let request = request.clone();
            let features = features.clone();
            let snapshot = snapshot.clone();

            debug!(connector = %name, "dispatching connector");
            let handle = tokio::spawn(async move {
                let _permit = match sem.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => {
                        return (Err(IngestError::connector(name, "scheduler closed")), 0);
                    }
                };
                let start = Instant::now();
                let result = connector.execute(&request, &features, &snapshot).await;
                (result, start.elapsed().as_millis() as u64)
            });
            handles.push((node.spec.clone(), handle));
        }

        let mut runs = Vec::with_capacity(handles.len());
        for (spec, handle) in handles {
            let run = match handle.await {
                Ok((result, latency_ms)) => ConnectorRun {
                    spec,
                    result,
                    latency_ms,
                },
                Err(e) => {
                    warn!(connector = %spec.name, error = %e, "connector task failed");
                    let result = Err(IngestError::connector(
                        spec.name.clone(),
                        format!("task failed: {e}"),
                    ));
                    ConnectorRun {
                        spec,
                        result,
                        latency_ms: 0,
                    }
                }
            };
            runs.push(run);
        }
        Ok(runs)
    }
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("plan", &self.plan)
            .field("registry", &self.registry)
            .field("config", &self.config)
            .finish()
    }
}

/// The run's goal: a confident match for `RESOLVE_ONE`, enough entities for
/// `DISCOVER_MANY`.
fn goal_reached(request: &IngestRequest, ctx: &ExecutionContext) -> bool {
    match request.mode {
        IngestMode::ResolveOne => {
            ctx.entity_count() >= 1
                && request
                    .min_confidence
                    .is_some_and(|min| ctx.confidence() >= min)
        }
        IngestMode::DiscoverMany => request
            .target_entity_count
            .is_some_and(|target| ctx.entity_count() >= target),
    }
}
