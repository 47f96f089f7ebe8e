//! The single mutable state object for one run.
//!
//! Connectors only ever see an immutable snapshot of an [`ExecutionContext`].
//! The orchestrator's merge barrier and [`ExecutionContext::accept_entity`]
//! are the only writers.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use ingestkit_shared::{Candidate, Evidence, Phase};

use crate::dedup;

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// A candidate that passed deduplication.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AcceptedEntity {
    pub dedup_key: String,
    pub candidate: Candidate,
}

/// Why a candidate was not accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    Duplicate,
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Duplicate => f.write_str("duplicate"),
        }
    }
}

/// Result of [`ExecutionContext::accept_entity`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcceptOutcome {
    pub accepted: bool,
    pub key: String,
    pub reason: Option<RejectReason>,
}

/// Per-connector counters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConnectorMetrics {
    pub calls: u32,
    pub candidates: usize,
    pub accepted: usize,
    pub duplicates: usize,
    pub evidence: usize,
    pub fields_written: usize,
    pub errors: u32,
    pub cost_usd: f64,
    pub latency_ms: u64,
}

/// A recorded, non-fatal connector failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectorErrorRecord {
    pub connector: String,
    pub phase: Phase,
    pub message: String,
}

/// Who last won a scalar field, with what trust, in which phase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSource {
    pub connector: String,
    pub trust_level: i32,
    pub phase: Phase,
}

// ---------------------------------------------------------------------------
// ExecutionContext
// ---------------------------------------------------------------------------

/// Shared run state: candidates, accepted entities, evidence, budget, confidence.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionContext {
    pub(crate) candidates: Vec<Candidate>,
    pub(crate) entities: Vec<AcceptedEntity>,
    /// Only grows within a run.
    pub(crate) accepted_keys: BTreeSet<String>,
    pub(crate) evidence: Vec<Evidence>,
    pub(crate) seeds: BTreeSet<String>,
    pub(crate) fields: BTreeMap<String, Value>,
    pub(crate) field_sources: BTreeMap<String, FieldSource>,
    pub(crate) budget_spent_usd: f64,
    pub(crate) confidence: f64,
    pub(crate) metrics: BTreeMap<String, ConnectorMetrics>,
    pub(crate) errors: Vec<ConnectorErrorRecord>,
}

impl ExecutionContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a run with seed inputs already known (ids, URLs, ...).
    pub fn with_seeds<I, S>(seeds: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            seeds: seeds.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    /// Deduplicate and admit a candidate.
    ///
    /// A duplicate leaves the context untouched, so repeated submissions keep
    /// every count stable.
    pub fn accept_entity(&mut self, candidate: Candidate) -> AcceptOutcome {
        let key = dedup::dedup_key(&candidate);

        if self.accepted_keys.contains(&key) {
            debug!(%key, "duplicate candidate rejected");
            return AcceptOutcome {
                accepted: false,
                key,
                reason: Some(RejectReason::Duplicate),
            };
        }

        self.accepted_keys.insert(key.clone());
        self.entities.push(AcceptedEntity {
            dedup_key: key.clone(),
            candidate,
        });
        debug!(%key, total = self.entities.len(), "entity accepted");

        AcceptOutcome {
            accepted: true,
            key,
            reason: None,
        }
    }

    /// Whether a context path currently holds a usable value.
    ///
    /// `candidates`, `entities`, `evidence` and `seeds` name the collections;
    /// any other key (optionally prefixed `fields.`) is looked up in `fields`.
    pub fn has_value(&self, key: &str) -> bool {
        match key {
            "candidates" => !self.candidates.is_empty(),
            "entities" | "accepted_entities" => !self.entities.is_empty(),
            "evidence" => !self.evidence.is_empty(),
            "seeds" => !self.seeds.is_empty(),
            other => {
                let field = other.strip_prefix("fields.").unwrap_or(other);
                self.fields.get(field).is_some_and(|v| !is_empty_value(v))
            }
        }
    }

    pub fn candidates(&self) -> &[Candidate] {
        &self.candidates
    }

    pub fn entities(&self) -> &[AcceptedEntity] {
        &self.entities
    }

    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    pub fn is_accepted(&self, key: &str) -> bool {
        self.accepted_keys.contains(key)
    }

    pub fn accepted_keys(&self) -> &BTreeSet<String> {
        &self.accepted_keys
    }

    pub fn evidence(&self) -> &[Evidence] {
        &self.evidence
    }

    pub fn seeds(&self) -> &BTreeSet<String> {
        &self.seeds
    }

    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    pub fn fields(&self) -> &BTreeMap<String, Value> {
        &self.fields
    }

    pub fn field_source(&self, name: &str) -> Option<&FieldSource> {
        self.field_sources.get(name)
    }

    pub fn budget_spent_usd(&self) -> f64 {
        self.budget_spent_usd
    }

    pub fn confidence(&self) -> f64 {
        self.confidence
    }

    pub fn metrics(&self) -> &BTreeMap<String, ConnectorMetrics> {
        &self.metrics
    }

    pub fn errors(&self) -> &[ConnectorErrorRecord] {
        &self.errors
    }

    /// Raise (never lower) the running confidence.
    pub(crate) fn raise_confidence(&mut self, value: f64) {
        if value.is_finite() && value > self.confidence {
            self.confidence = value.min(1.0);
        }
    }
}

/// Null, empty strings, and empty collections count as absent.
pub(crate) fn is_empty_value(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
        Value::Bool(_) | Value::Number(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn strong_id_duplicate_is_rejected_without_mutation() {
        let mut ctx = ExecutionContext::new();
        let first = Candidate::named("Leeds Padel Club").with_identifier("google", "abc");
        let second = Candidate::named("LEEDS PADEL").with_identifier("google", "abc");

        let a = ctx.accept_entity(first);
        assert_eq!(
            a,
            AcceptOutcome {
                accepted: true,
                key: "id:google:abc".into(),
                reason: None
            }
        );

        let before = ctx.clone();
        let b = ctx.accept_entity(second);
        assert_eq!(
            b,
            AcceptOutcome {
                accepted: false,
                key: "id:google:abc".into(),
                reason: Some(RejectReason::Duplicate)
            }
        );
        assert_eq!(ctx, before);
        assert_eq!(ctx.entity_count(), 1);
    }

    #[test]
    fn repeated_duplicates_keep_counts_stable() {
        let mut ctx = ExecutionContext::new();
        let c = Candidate::named("Cafe").with_coordinates(1.0, 2.0);
        assert!(ctx.accept_entity(c.clone()).accepted);
        for _ in 0..5 {
            let out = ctx.accept_entity(c.clone());
            assert!(!out.accepted);
            assert_eq!(out.reason.map(|r| r.to_string()).as_deref(), Some("duplicate"));
        }
        assert_eq!(ctx.entity_count(), 1);
        assert_eq!(ctx.accepted_keys().len(), 1);
    }

    #[test]
    fn null_island_pair_is_a_duplicate() {
        let mut ctx = ExecutionContext::new();
        let a = Candidate::named("Null Island Cafe").with_coordinates(0.0, 0.0);
        let b = Candidate::named("  null island   CAFE").with_coordinates(0.0, 0.0);
        assert!(ctx.accept_entity(a).accepted);
        let out = ctx.accept_entity(b);
        assert!(!out.accepted);
        assert_eq!(out.key, "geo:null island cafe:0.0000:0.0000");
    }

    #[test]
    fn keys_are_identical_across_runs() {
        let candidate = Candidate::named("Market Hall").with_attribute("city", json!("Leeds"));
        let mut run_one = ExecutionContext::new();
        let mut run_two = ExecutionContext::new();
        run_two.accept_entity(Candidate::named("Unrelated"));

        let k1 = run_one.accept_entity(candidate.clone()).key;
        let k2 = run_two.accept_entity(candidate).key;
        assert_eq!(k1, k2);
    }

    #[test]
    fn has_value_on_fresh_context() {
        let ctx = ExecutionContext::new();
        for key in ["candidates", "entities", "evidence", "seeds", "fields.phone", "phone"] {
            assert!(!ctx.has_value(key), "{key} should be absent");
        }
    }

    #[test]
    fn has_value_reads_fields_and_seeds() {
        let mut ctx = ExecutionContext::with_seeds(["https://example.com"]);
        ctx.fields.insert("phone".into(), json!("0113"));
        ctx.fields.insert("tags".into(), json!([]));
        assert!(ctx.has_value("seeds"));
        assert!(ctx.has_value("fields.phone"));
        assert!(ctx.has_value("phone"));
        assert!(!ctx.has_value("tags"));
    }

    #[test]
    fn confidence_only_rises() {
        let mut ctx = ExecutionContext::new();
        ctx.raise_confidence(0.6);
        ctx.raise_confidence(0.3);
        assert!((ctx.confidence() - 0.6).abs() < f64::EPSILON);
        ctx.raise_confidence(f64::NAN);
        ctx.raise_confidence(1.7);
        assert!((ctx.confidence() - 1.0).abs() < f64::EPSILON);
    }
}
