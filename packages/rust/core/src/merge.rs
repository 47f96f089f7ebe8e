//! The merge barrier: folds buffered connector writes into the context.
//!
//! Runs are folded in connector-name order, whatever order they finished in.
//! Scalar fields resolve by trust (ties go to the later name); arrays union in
//! order of arrival; objects union key-wise.

use std::cmp::Ordering;

use serde_json::Value;
use tracing::{debug, warn};

use ingestkit_shared::{ConnectorSpec, IngestError, Phase, Result};

use crate::connector::ConnectorOutput;
use crate::context::{ConnectorErrorRecord, ExecutionContext, FieldSource};
use crate::report::ConnectorOutcome;

/// One finished connector call waiting at the barrier.
#[derive(Debug)]
pub(crate) struct ConnectorRun {
    pub spec: ConnectorSpec,
    pub result: Result<ConnectorOutput>,
    pub latency_ms: u64,
}

/// Fold a wave's runs into the context. Returns outcomes in merge order.
pub(crate) fn merge_barrier(
    ctx: &mut ExecutionContext,
    phase: Phase,
    mut runs: Vec<ConnectorRun>,
) -> Vec<(String, ConnectorOutcome)> {
    runs.sort_by(|a, b| a.spec.name.cmp(&b.spec.name));

    runs.into_iter()
        .map(|run| {
            let name = run.spec.name.clone();
            let outcome = merge_one(ctx, phase, run);
            (name, outcome)
        })
        .collect()
}

fn merge_one(ctx: &mut ExecutionContext, phase: Phase, run: ConnectorRun) -> ConnectorOutcome {
    let ConnectorRun {
        spec,
        result,
        latency_ms,
    } = run;

    let output = match result {
        Ok(output) => output,
        Err(e) => {
            let message = match e {
                IngestError::Connector { message, .. } => message,
                other => other.to_string(),
            };
            warn!(connector = %spec.name, %phase, error = %message, "connector failed");

            ctx.budget_spent_usd += spec.estimated_cost_usd;
            let m = ctx.metrics.entry(spec.name.clone()).or_default();
            m.calls += 1;
            m.errors += 1;
            m.cost_usd += spec.estimated_cost_usd;
            m.latency_ms += latency_ms;
            ctx.errors.push(ConnectorErrorRecord {
                connector: spec.name.clone(),
                phase,
                message: message.clone(),
            });
            return ConnectorOutcome::Errored { message };
        }
    };

    let cost = output
        .cost_usd
        .filter(|c| c.is_finite() && *c >= 0.0)
        .unwrap_or(spec.estimated_cost_usd);
    ctx.budget_spent_usd += cost;

    ctx.seeds.extend(output.seeds);

    let evidence_count = output.evidence.len();
    for mut evidence in output.evidence {
        evidence.connector.get_or_insert_with(|| spec.name.clone());
        ctx.evidence.push(evidence);
    }

    let mut fields_written = 0;
    for (field, value) in output.fields {
        if merge_field(ctx, &spec, phase, field, value) {
            fields_written += 1;
        }
    }

    let candidate_count = output.candidates.len();
    let mut accepted = 0;
    let mut duplicates = 0;
    for mut candidate in output.candidates {
        candidate.source.get_or_insert_with(|| spec.name.clone());
        ctx.candidates.push(candidate.clone());
        let confidence = candidate.confidence;
        if ctx.accept_entity(candidate).accepted {
            accepted += 1;
            if let Some(c) = confidence {
                ctx.raise_confidence(c);
            }
        } else {
            duplicates += 1;
        }
    }

    if let Some(c) = output.confidence {
        ctx.raise_confidence(c);
    }

    let m = ctx.metrics.entry(spec.name.clone()).or_default();
    m.calls += 1;
    m.candidates += candidate_count;
    m.accepted += accepted;
    m.duplicates += duplicates;
    m.evidence += evidence_count;
    m.fields_written += fields_written;
    m.cost_usd += cost;
    m.latency_ms += latency_ms;

    debug!(
        connector = %spec.name,
        candidates = candidate_count,
        accepted,
        duplicates,
        fields_written,
        cost_usd = cost,
        "merged connector output"
    );

    ConnectorOutcome::Succeeded {
        candidates: candidate_count,
        accepted,
        duplicates,
    }
}

/// Merge one field. Returns whether the context changed.
fn merge_field(
    ctx: &mut ExecutionContext,
    spec: &ConnectorSpec,
    phase: Phase,
    field: String,
    value: Value,
) -> bool {
    if value.is_null() {
        return false;
    }

    let wins = ctx
        .field_sources
        .get(&field)
        .is_none_or(|src| outranks(spec, phase, src));

    let changed = match ctx.fields.get_mut(&field) {
        Some(existing) if is_collection(existing) && same_kind(existing, &value) => {
            merge_collection(existing, value, wins)
        }
        Some(existing) => {
            if wins && *existing != value {
                *existing = value;
                true
            } else {
                false
            }
        }
        None => {
            ctx.fields.insert(field.clone(), value);
            true
        }
    };

    if wins {
        ctx.field_sources.insert(
            field,
            FieldSource {
                connector: spec.name.clone(),
                trust_level: spec.trust_level,
                phase,
            },
        );
    }
    changed
}

/// Whether `spec` may replace the current provenance of a field.
///
/// Higher trust wins. On equal trust a later phase wins, and within one
/// phase the name that sorts last wins, whichever wave merged first.
fn outranks(spec: &ConnectorSpec, phase: Phase, current: &FieldSource) -> bool {
    match spec.trust_level.cmp(&current.trust_level) {
        Ordering::Greater => true,
        Ordering::Less => false,
        Ordering::Equal if phase == current.phase => spec.name >= current.connector,
        Ordering::Equal => phase > current.phase,
    }
}

fn is_collection(value: &Value) -> bool {
    value.is_array() || value.is_object()
}

fn same_kind(a: &Value, b: &Value) -> bool {
    (a.is_array() && b.is_array()) || (a.is_object() && b.is_object())
}

/// Union `incoming` into `existing`. Nested scalar collisions are only
/// overwritten when the writer wins on trust.
fn merge_collection(existing: &mut Value, incoming: Value, overwrite: bool) -> bool {
    match (existing, incoming) {
        (Value::Array(items), Value::Array(new_items)) => {
            let before = items.len();
            for item in new_items {
                if !items.contains(&item) {
                    items.push(item);
                }
            }
            items.len() != before
        }
        (Value::Object(map), Value::Object(new_map)) => {
            let mut changed = false;
            for (key, value) in new_map {
                match map.get_mut(&key) {
                    Some(slot) if same_kind(slot, &value) && is_collection(slot) => {
                        changed |= merge_collection(slot, value, overwrite);
                    }
                    Some(slot) => {
                        if overwrite && !value.is_null() && *slot != value {
                            *slot = value;
                            changed = true;
                        }
                    }
                    None => {
                        map.insert(key, value);
                        changed = true;
                    }
                }
            }
            changed
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ingestkit_shared::{Candidate, Evidence};
    use serde_json::json;

    fn run(spec: ConnectorSpec, output: ConnectorOutput) -> ConnectorRun {
        ConnectorRun {
            spec,
            result: Ok(output),
            latency_ms: 5,
        }
    }

    fn spec(name: &str, trust: i32) -> ConnectorSpec {
        ConnectorSpec::new(name, Phase::Structured).trust(trust).cost(0.1)
    }

    #[test]
    fn higher_trust_scalar_wins_regardless_of_name_order() {
        let mut ctx = ExecutionContext::new();
        let runs = vec![
            run(spec("zz_low", 2), ConnectorOutput::default().field("phone", json!("low"))),
            run(spec("aa_high", 9), ConnectorOutput::default().field("phone", json!("high"))),
        ];
        merge_barrier(&mut ctx, Phase::Structured, runs);
        assert_eq!(ctx.field("phone"), Some(&json!("high")));
        assert_eq!(ctx.field_source("phone").unwrap().connector, "aa_high");
    }

    #[test]
    fn trust_tie_goes_to_last_name() {
        for order in [["alpha", "beta"], ["beta", "alpha"]] {
            let mut ctx = ExecutionContext::new();
            let runs = order
                .iter()
                .map(|n| run(spec(n, 5), ConnectorOutput::default().field("website", json!(*n))))
                .collect();
            merge_barrier(&mut ctx, Phase::Structured, runs);
            assert_eq!(ctx.field("website"), Some(&json!("beta")));
        }
    }

    #[test]
    fn same_phase_tie_across_barriers_follows_name() {
        let mut ctx = ExecutionContext::new();
        merge_barrier(
            &mut ctx,
            Phase::Structured,
            vec![run(spec("z_first", 5), ConnectorOutput::default().field("phone", json!("z")))],
        );
        merge_barrier(
            &mut ctx,
            Phase::Structured,
            vec![run(spec("a_second", 5), ConnectorOutput::default().field("phone", json!("a")))],
        );
        assert_eq!(ctx.field("phone"), Some(&json!("z")));

        // A later phase at equal trust still replaces.
        merge_barrier(
            &mut ctx,
            Phase::Enrichment,
            vec![run(spec("a_late", 5), ConnectorOutput::default().field("phone", json!("late")))],
        );
        assert_eq!(ctx.field("phone"), Some(&json!("late")));
        assert_eq!(ctx.field_source("phone").unwrap().phase, Phase::Enrichment);
    }

    #[test]
    fn lower_trust_cannot_override_earlier_barrier() {
        let mut ctx = ExecutionContext::new();
        merge_barrier(
            &mut ctx,
            Phase::Structured,
            vec![run(spec("registry", 9), ConnectorOutput::default().field("phone", json!("1")))],
        );
        merge_barrier(
            &mut ctx,
            Phase::Enrichment,
            vec![run(spec("scrape", 3), ConnectorOutput::default().field("phone", json!("2")))],
        );
        assert_eq!(ctx.field("phone"), Some(&json!("1")));
    }

    #[test]
    fn collections_union_instead_of_overwrite() {
        let mut ctx = ExecutionContext::new();
        let runs = vec![
            run(
                spec("a", 9),
                ConnectorOutput::default()
                    .field("tags", json!(["padel", "indoor"]))
                    .field("socials", json!({"x": "@a"})),
            ),
            run(
                spec("b", 1),
                ConnectorOutput::default()
                    .field("tags", json!(["indoor", "cafe"]))
                    .field("socials", json!({"instagram": "@b", "x": "@b"})),
            ),
        ];
        merge_barrier(&mut ctx, Phase::Structured, runs);
        assert_eq!(ctx.field("tags"), Some(&json!(["padel", "indoor", "cafe"])));
        // New key added; colliding scalar kept from the higher-trust writer.
        assert_eq!(ctx.field("socials"), Some(&json!({"instagram": "@b", "x": "@a"})));
    }

    #[test]
    fn errors_are_recorded_and_charged() {
        let mut ctx = ExecutionContext::new();
        let outcomes = merge_barrier(
            &mut ctx,
            Phase::Discovery,
            vec![
                ConnectorRun {
                    spec: spec("broken", 1),
                    result: Err(IngestError::connector("broken", "HTTP 503")),
                    latency_ms: 12,
                },
                run(spec("fine", 1), ConnectorOutput::with_candidates(vec![Candidate::named("x")])),
            ],
        );
        assert_eq!(
            outcomes[0],
            ("broken".to_string(), ConnectorOutcome::Errored { message: "HTTP 503".into() })
        );
        assert_eq!(ctx.errors().len(), 1);
        assert_eq!(ctx.errors()[0].phase, Phase::Discovery);
        assert_eq!(ctx.metrics()["broken"].errors, 1);
        assert!((ctx.budget_spent_usd() - 0.2).abs() < 1e-9);
        assert_eq!(ctx.entity_count(), 1);
    }

    #[test]
    fn candidates_and_evidence_are_stamped_with_source() {
        let mut ctx = ExecutionContext::new();
        let output = ConnectorOutput::with_candidates(vec![
            Candidate::named("Leeds Padel").with_identifier("osm", "1").with_confidence(0.7),
            Candidate::named("Leeds Padel Club").with_identifier("osm", "1").with_confidence(0.95),
        ])
        .evidence(Evidence {
            field: "phone".into(),
            value: json!("0113"),
            locator: None,
            connector: None,
        })
        .seed("https://leedspadel.example")
        .cost(0.05);

        let outcomes = merge_barrier(&mut ctx, Phase::Discovery, vec![run(spec("search", 5), output)]);
        assert_eq!(
            outcomes[0].1,
            ConnectorOutcome::Succeeded { candidates: 2, accepted: 1, duplicates: 1 }
        );
        assert_eq!(ctx.candidates().len(), 2);
        assert_eq!(ctx.entities()[0].candidate.source.as_deref(), Some("search"));
        assert_eq!(ctx.evidence()[0].connector.as_deref(), Some("search"));
        assert!(ctx.seeds().contains("https://leedspadel.example"));
        // Duplicate's confidence does not count.
        assert!((ctx.confidence() - 0.7).abs() < 1e-9);
        assert!((ctx.budget_spent_usd() - 0.05).abs() < 1e-9);
    }
}
