//! Execution plan: phase-grouped, dependency-ordered connector nodes.
//!
//! Dependencies are inferred by matching each connector's `requires` keys to
//! other connectors' `provides` keys. The fixed phase order already imposes
//! the dominant ordering, so this only layers nodes *within* a phase into
//! waves; it is not a general cycle solver.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;
use tracing::{debug, warn};

use ingestkit_shared::{ConnectorSpec, IngestError, Phase, Result};

use crate::conditions::{Condition, EvalContext};
use crate::context::ExecutionContext;

// ---------------------------------------------------------------------------
// PlanNode
// ---------------------------------------------------------------------------

/// One connector in the plan.
#[derive(Debug, Clone)]
pub struct PlanNode {
    pub spec: ConnectorSpec,
    /// Parsed `run_if`, if declared.
    pub condition: Option<Condition>,
    /// Connectors chosen to provide this node's required keys.
    pub depends_on: BTreeSet<String>,
}

impl PlanNode {
    pub fn name(&self) -> &str {
        &self.spec.name
    }

    /// Full gating decision: input availability, then the `run_if` condition.
    pub fn gate(&self, context: &ExecutionContext, eval: &EvalContext) -> GateDecision {
        if !should_run(&self.spec, context) {
            return GateDecision::NoInput;
        }
        match &self.condition {
            Some(condition) if !condition.evaluate(eval) => GateDecision::ConditionFalse,
            _ => GateDecision::Run,
        }
    }
}

/// Outcome of gating one node for the current attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    Run,
    /// Every required key is empty and the query alone is not enough.
    NoInput,
    /// The declared `run_if` condition evaluated false.
    ConditionFalse,
}

/// Aggregate input gating.
///
/// A connector is skipped only when it requires something, **all** of its
/// required keys are currently empty, and it cannot run from the query alone.
/// A connector with no `requires` has nothing to wait for and always runs.
pub fn should_run(spec: &ConnectorSpec, context: &ExecutionContext) -> bool {
    if spec.supports_query_only || spec.requires.is_empty() {
        return true;
    }
    spec.requires.iter().any(|key| context.has_value(key))
}

/// Pick the provider for a key: highest trust, then earliest phase, then name.
pub fn select_provider<'a, I>(candidates: I) -> Option<&'a ConnectorSpec>
where
    I: IntoIterator<Item = &'a ConnectorSpec>,
{
    candidates.into_iter().min_by(|a, b| {
        b.trust_level
            .cmp(&a.trust_level)
            .then(a.phase.cmp(&b.phase))
            .then_with(|| a.name.cmp(&b.name))
    })
}

// ---------------------------------------------------------------------------
// ExecutionPlan
// ---------------------------------------------------------------------------

/// Connector nodes grouped by phase, each phase split into dependency waves.
#[derive(Debug, Clone, Default)]
pub struct ExecutionPlan {
    waves: BTreeMap<Phase, Vec<Vec<PlanNode>>>,
    providers: BTreeMap<String, String>,
}

impl ExecutionPlan {
    /// Build a plan from connector declarations.
    ///
    /// Fails on duplicate or empty names, invalid costs, or a malformed
    /// `run_if` condition. Nothing here depends on declaration order.
    pub fn build(specs: Vec<ConnectorSpec>) -> Result<Self> {
        let mut by_name: BTreeMap<String, ConnectorSpec> = BTreeMap::new();
        for spec in specs {
            if spec.name.trim().is_empty() {
                return Err(IngestError::config("connector declared with an empty name"));
            }
            if !spec.estimated_cost_usd.is_finite() || spec.estimated_cost_usd < 0.0 {
                return Err(IngestError::config(format!(
                    "connector '{}' has an invalid estimated cost {}",
                    spec.name, spec.estimated_cost_usd
                )));
            }
            if by_name.contains_key(&spec.name) {
                return Err(IngestError::config(format!(
                    "connector '{}' is declared more than once",
                    spec.name
                )));
            }
            by_name.insert(spec.name.clone(), spec);
        }

        // --- Provider table ---
        let provided: BTreeSet<&String> = by_name.values().flat_map(|s| &s.provides).collect();
        let providers: BTreeMap<String, String> = provided
            .into_iter()
            .filter_map(|key| {
                select_provider(by_name.values().filter(|s| s.provides.contains(key)))
                    .map(|p| (key.clone(), p.name.clone()))
            })
            .collect();

        // --- Nodes ---
        let mut nodes: BTreeMap<String, PlanNode> = BTreeMap::new();
        for spec in by_name.values() {
            let condition = spec
                .run_if
                .as_ref()
                .map(|raw| {
                    Condition::parse(raw).map_err(|e| match e {
                        IngestError::Condition { message } => IngestError::condition(format!(
                            "connector '{}': {message}",
                            spec.name
                        )),
                        other => other,
                    })
                })
                .transpose()?;

            let mut depends_on = BTreeSet::new();
            for key in &spec.requires {
                let provider = select_provider(
                    by_name
                        .values()
                        .filter(|s| s.name != spec.name && s.provides.contains(key)),
                );
                match provider {
                    Some(p) => {
                        if p.phase > spec.phase {
                            warn!(
                                connector = %spec.name,
                                %key,
                                provider = %p.name,
                                provider_phase = %p.phase,
                                "required key is only provided by a later phase"
                            );
                        }
                        depends_on.insert(p.name.clone());
                    }
                    None => debug!(connector = %spec.name, %key, "no provider for required key"),
                }
            }

            nodes.insert(
                spec.name.clone(),
                PlanNode {
                    spec: spec.clone(),
                    condition,
                    depends_on,
                },
            );
        }

        // --- Phase grouping and in-phase waves ---
        let mut waves = BTreeMap::new();
        for phase in Phase::ALL {
            let in_phase: BTreeMap<String, PlanNode> = nodes
                .iter()
                .filter(|(_, n)| n.spec.phase == phase)
                .map(|(k, n)| (k.clone(), n.clone()))
                .collect();
            waves.insert(phase, layer_waves(phase, in_phase));
        }

        Ok(Self { waves, providers })
    }

    /// Waves of a phase, each sorted by connector name.
    pub fn waves(&self, phase: Phase) -> &[Vec<PlanNode>] {
        self.waves.get(&phase).map(Vec::as_slice).unwrap_or_default()
    }

    /// Every node in execution order (phase, wave, name).
    pub fn nodes(&self) -> impl Iterator<Item = &PlanNode> {
        self.waves.values().flatten().flatten()
    }

    pub fn node(&self, name: &str) -> Option<&PlanNode> {
        self.nodes().find(|n| n.name() == name)
    }

    /// Connector chosen to provide `key`, if any declares it.
    pub fn provider_for(&self, key: &str) -> Option<&str> {
        self.providers.get(key).map(String::as_str)
    }

    pub fn providers(&self) -> &BTreeMap<String, String> {
        &self.providers
    }

    pub fn len(&self) -> usize {
        self.nodes().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Serializable outline for display.
    pub fn outline(&self) -> PlanOutline {
        PlanOutline {
            phases: Phase::ALL
                .iter()
                .map(|phase| PhaseOutline {
                    phase: *phase,
                    waves: self
                        .waves(*phase)
                        .iter()
                        .map(|wave| wave.iter().map(|n| n.name().to_string()).collect())
                        .collect(),
                })
                .collect(),
            providers: self.providers.clone(),
        }
    }
}

/// Kahn layering restricted to same-phase dependencies.
fn layer_waves(phase: Phase, mut remaining: BTreeMap<String, PlanNode>) -> Vec<Vec<PlanNode>> {
    let mut placed: BTreeSet<String> = BTreeSet::new();
    let mut waves = Vec::new();

    while !remaining.is_empty() {
        let ready: Vec<String> = remaining
            .iter()
            .filter(|(_, node)| {
                node.depends_on
                    .iter()
                    .all(|dep| placed.contains(dep) || !remaining.contains_key(dep))
            })
            .map(|(name, _)| name.clone())
            .collect();

        if ready.is_empty() {
            warn!(
                %phase,
                connectors = ?remaining.keys().collect::<Vec<_>>(),
                "dependency cycle within phase, running remaining connectors together"
            );
            waves.push(remaining.into_values().collect());
            break;
        }

        let wave: Vec<PlanNode> = ready
            .iter()
            .filter_map(|name| remaining.remove(name))
            .collect();
        placed.extend(ready);
        waves.push(wave);
    }

    waves
}

/// Display form of a plan.
#[derive(Debug, Clone, Serialize)]
pub struct PlanOutline {
    pub phases: Vec<PhaseOutline>,
    pub providers: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PhaseOutline {
    pub phase: Phase,
    pub waves: Vec<Vec<String>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use ingestkit_shared::{Candidate, IngestRequest};
    use serde_json::json;

    fn eval_for(ctx: &ExecutionContext) -> EvalContext {
        let req = IngestRequest::resolve_one("leeds padel");
        let features = ingestkit_features::extract(&req.query, Some(&req));
        EvalContext::build(&req, &features, ctx, &BTreeMap::new())
    }

    #[test]
    fn provider_selection_prefers_trust_then_phase_then_name() {
        let specs = vec![
            ConnectorSpec::new("zeta", Phase::Enrichment).trust(9).provides(["phone"]),
            ConnectorSpec::new("alpha", Phase::Enrichment).trust(9).provides(["phone"]),
            ConnectorSpec::new("beta", Phase::Structured).trust(9).provides(["phone"]),
            ConnectorSpec::new("gamma", Phase::Discovery).trust(3).provides(["phone"]),
        ];
        assert_eq!(select_provider(&specs).map(|s| s.name.as_str()), Some("beta"));

        let tie = [
            ConnectorSpec::new("zeta", Phase::Enrichment).trust(9),
            ConnectorSpec::new("alpha", Phase::Enrichment).trust(9),
        ];
        assert_eq!(select_provider(&tie).map(|s| s.name.as_str()), Some("alpha"));
    }

    #[test]
    fn provider_selection_ignores_registration_order() {
        let a = ConnectorSpec::new("a", Phase::Discovery).trust(4).provides(["candidates"]);
        let b = ConnectorSpec::new("b", Phase::Discovery).trust(4).provides(["candidates"]);
        let forward = ExecutionPlan::build(vec![a.clone(), b.clone()]).unwrap();
        let backward = ExecutionPlan::build(vec![b, a]).unwrap();
        assert_eq!(forward.provider_for("candidates"), Some("a"));
        assert_eq!(backward.provider_for("candidates"), Some("a"));
    }

    #[test]
    fn dependencies_layer_same_phase_nodes_into_waves() {
        let plan = ExecutionPlan::build(vec![
            ConnectorSpec::new("website_scrape", Phase::Enrichment)
                .requires(["fields.website"])
                .provides(["fields.opening_hours"]),
            ConnectorSpec::new("website_finder", Phase::Enrichment)
                .query_only()
                .provides(["fields.website"]),
            ConnectorSpec::new("reviews", Phase::Enrichment).query_only(),
        ])
        .unwrap();

        let waves: Vec<Vec<&str>> = plan
            .waves(Phase::Enrichment)
            .iter()
            .map(|w| w.iter().map(PlanNode::name).collect())
            .collect();
        assert_eq!(waves, vec![vec!["reviews", "website_finder"], vec!["website_scrape"]]);
        assert!(plan.node("website_scrape").unwrap().depends_on.contains("website_finder"));
    }

    #[test]
    fn cross_phase_dependencies_do_not_create_waves() {
        let plan = ExecutionPlan::build(vec![
            ConnectorSpec::new("search", Phase::Discovery).provides(["candidates"]),
            ConnectorSpec::new("registry", Phase::Structured).requires(["candidates"]),
        ])
        .unwrap();
        assert_eq!(plan.waves(Phase::Structured).len(), 1);
        assert_eq!(plan.waves(Phase::Enrichment).len(), 0);
        assert!(plan.node("registry").unwrap().depends_on.contains("search"));
        let order: Vec<&str> = plan.nodes().map(PlanNode::name).collect();
        assert_eq!(order, vec!["search", "registry"]);
    }

    #[test]
    fn same_phase_cycle_collapses_into_one_wave() {
        let plan = ExecutionPlan::build(vec![
            ConnectorSpec::new("a", Phase::Structured).requires(["x"]).provides(["y"]),
            ConnectorSpec::new("b", Phase::Structured).requires(["y"]).provides(["x"]),
            ConnectorSpec::new("c", Phase::Structured).query_only(),
        ])
        .unwrap();
        let waves = plan.waves(Phase::Structured);
        assert_eq!(waves.len(), 2);
        assert_eq!(waves[0][0].name(), "c");
        assert_eq!(waves[1].len(), 2);
    }

    #[test]
    fn duplicate_names_are_a_config_error() {
        let err = ExecutionPlan::build(vec![
            ConnectorSpec::new("a", Phase::Discovery),
            ConnectorSpec::new("a", Phase::Structured),
        ])
        .unwrap_err();
        assert!(matches!(err, IngestError::Config { .. }));
    }

    #[test]
    fn malformed_condition_fails_the_build() {
        let err = ExecutionPlan::build(vec![
            ConnectorSpec::new("a", Phase::Discovery)
                .run_if(json!({"path": "features.has_geo_intent", "op": "equals", "value": true})),
        ])
        .unwrap_err();
        assert!(matches!(err, IngestError::Condition { .. }));
        assert!(err.to_string().contains("connector 'a'"));
    }

    #[test]
    fn gating_requires_all_inputs_absent_and_no_query_support() {
        let mut ctx = ExecutionContext::new();
        let spec = ConnectorSpec::new("registry", Phase::Structured)
            .requires(["candidates", "seeds"]);
        assert!(!should_run(&spec, &ctx));
        assert!(should_run(&spec.clone().query_only(), &ctx));

        ctx.candidates.push(Candidate::named("x"));
        // One of two required keys present is enough.
        assert!(should_run(&spec, &ctx));

        let no_requires = ConnectorSpec::new("free", Phase::Discovery);
        assert!(should_run(&no_requires, &ExecutionContext::new()));
    }

    #[test]
    fn gate_checks_condition_after_inputs() {
        let plan = ExecutionPlan::build(vec![
            ConnectorSpec::new("geo_only", Phase::Discovery)
                .query_only()
                .run_if(json!({"path": "features.has_geo_intent", "op": "eq", "value": true})),
            ConnectorSpec::new("needs_input", Phase::Discovery)
                .requires(["seeds"])
                .run_if(json!({"path": "features.has_geo_intent", "op": "eq", "value": false})),
        ])
        .unwrap();
        let ctx = ExecutionContext::new();
        let eval = eval_for(&ctx);
        assert_eq!(
            plan.node("geo_only").unwrap().gate(&ctx, &eval),
            GateDecision::ConditionFalse
        );
        assert_eq!(
            plan.node("needs_input").unwrap().gate(&ctx, &eval),
            GateDecision::NoInput
        );
    }
}
