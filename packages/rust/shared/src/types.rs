//! Core domain types for an ingestion run.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::error::{IngestError, Result};

// ---------------------------------------------------------------------------
// IngestMode / IngestRequest
// ---------------------------------------------------------------------------

/// What a run is trying to achieve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IngestMode {
    /// Find the single entity the query names.
    ResolveOne,
    /// Collect as many distinct entities as the query describes.
    DiscoverMany,
}

impl IngestMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ResolveOne => "RESOLVE_ONE",
            Self::DiscoverMany => "DISCOVER_MANY",
        }
    }
}

impl std::fmt::Display for IngestMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for IngestMode {
    type Err = IngestError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "resolve-one" => Ok(Self::ResolveOne),
            "discover-many" => Ok(Self::DiscoverMany),
            other => Err(IngestError::validation(format!(
                "unknown ingest mode '{other}' (expected resolve-one or discover-many)"
            ))),
        }
    }
}

/// Immutable description of a single run. Created once, never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestRequest {
    pub mode: IngestMode,
    /// Stop a `DISCOVER_MANY` run once this many entities are accepted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_entity_count: Option<usize>,
    /// Stop a `RESOLVE_ONE` run once confidence reaches this value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_confidence: Option<f64>,
    /// Ceiling on total connector cost, in USD.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub budget_usd: Option<f64>,
    /// The raw free-text query.
    pub query: String,
}

impl IngestRequest {
    pub fn resolve_one(query: impl Into<String>) -> Self {
        Self::new(IngestMode::ResolveOne, query)
    }

    pub fn discover_many(query: impl Into<String>) -> Self {
        Self::new(IngestMode::DiscoverMany, query)
    }

    pub fn new(mode: IngestMode, query: impl Into<String>) -> Self {
        Self {
            mode,
            target_entity_count: None,
            min_confidence: None,
            budget_usd: None,
            query: query.into(),
        }
    }

    pub fn with_target(mut self, count: usize) -> Self {
        self.target_entity_count = Some(count);
        self
    }

    pub fn with_min_confidence(mut self, confidence: f64) -> Self {
        self.min_confidence = Some(confidence);
        self
    }

    pub fn with_budget(mut self, usd: f64) -> Self {
        self.budget_usd = Some(usd);
        self
    }

    /// Reject values that would make the stopping rules meaningless.
    pub fn validate(&self) -> Result<()> {
        if let Some(c) = self.min_confidence {
            if !(0.0..=1.0).contains(&c) {
                return Err(IngestError::validation(format!(
                    "min_confidence must be within [0, 1], got {c}"
                )));
            }
        }
        if let Some(b) = self.budget_usd {
            if !b.is_finite() || b < 0.0 {
                return Err(IngestError::validation(format!(
                    "budget_usd must be a non-negative amount, got {b}"
                )));
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Phase
// ---------------------------------------------------------------------------

/// The fixed run stages, declared in execution order.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Phase {
    Discovery,
    Structured,
    Enrichment,
}

impl Phase {
    /// Every phase, in the only order a run may execute them.
    pub const ALL: [Phase; 3] = [Phase::Discovery, Phase::Structured, Phase::Enrichment];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Discovery => "DISCOVERY",
            Self::Structured => "STRUCTURED",
            Self::Enrichment => "ENRICHMENT",
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Phase {
    type Err = IngestError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "DISCOVERY" => Ok(Self::Discovery),
            "STRUCTURED" => Ok(Self::Structured),
            "ENRICHMENT" => Ok(Self::Enrichment),
            other => Err(IngestError::validation(format!("unknown phase '{other}'"))),
        }
    }
}

// ---------------------------------------------------------------------------
// Candidate / Evidence
// ---------------------------------------------------------------------------

/// A raw, not-yet-deduplicated entity proposed by a connector.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub name: String,
    /// Externally issued ids, keyed by issuing provider.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub identifiers: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latitude: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub longitude: Option<f64>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, serde_json::Value>,
    /// How sure the producing connector is that this is the sought entity.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    /// Producing connector; stamped at merge time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

impl Candidate {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_identifier(mut self, provider: impl Into<String>, id: impl Into<String>) -> Self {
        self.identifiers.insert(provider.into(), id.into());
        self
    }

    pub fn with_coordinates(mut self, latitude: f64, longitude: f64) -> Self {
        self.latitude = Some(latitude);
        self.longitude = Some(longitude);
        self
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.attributes.insert(key.into(), value);
        self
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = Some(confidence);
        self
    }
}

/// A piece of supporting data recorded during a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evidence {
    /// Field or claim this evidence supports.
    pub field: String,
    pub value: serde_json::Value,
    /// Where the connector found it (URL, record id, ...).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locator: Option<String>,
    /// Producing connector; stamped at merge time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connector: Option<String>,
}

// ---------------------------------------------------------------------------
// ConnectorSpec
// ---------------------------------------------------------------------------

/// Declared (not executed) metadata for one connector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectorSpec {
    pub name: String,
    pub phase: Phase,
    /// Higher is more authoritative.
    #[serde(default)]
    pub trust_level: i32,
    /// Context keys this connector reads.
    #[serde(default)]
    pub requires: BTreeSet<String>,
    /// Context keys this connector writes.
    #[serde(default)]
    pub provides: BTreeSet<String>,
    /// Whether the raw query alone is usable input.
    #[serde(default)]
    pub supports_query_only: bool,
    #[serde(default)]
    pub estimated_cost_usd: f64,
    /// Optional gating condition, parsed when the plan is built.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_if: Option<serde_json::Value>,
}

impl ConnectorSpec {
    pub fn new(name: impl Into<String>, phase: Phase) -> Self {
        Self {
            name: name.into(),
            phase,
            trust_level: 0,
            requires: BTreeSet::new(),
            provides: BTreeSet::new(),
            supports_query_only: false,
            estimated_cost_usd: 0.0,
            run_if: None,
        }
    }

    pub fn trust(mut self, level: i32) -> Self {
        self.trust_level = level;
        self
    }

    pub fn requires<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.requires.extend(keys.into_iter().map(Into::into));
        self
    }

    pub fn provides<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.provides.extend(keys.into_iter().map(Into::into));
        self
    }

    pub fn query_only(mut self) -> Self {
        self.supports_query_only = true;
        self
    }

    pub fn cost(mut self, usd: f64) -> Self {
        self.estimated_cost_usd = usd;
        self
    }

    pub fn run_if(mut self, condition: serde_json::Value) -> Self {
        self.run_if = Some(condition);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phases_are_totally_ordered() {
        assert!(Phase::Discovery < Phase::Structured);
        assert!(Phase::Structured < Phase::Enrichment);
        let mut sorted = Phase::ALL.to_vec();
        sorted.sort();
        assert_eq!(sorted, Phase::ALL.to_vec());
    }

    #[test]
    fn mode_parses_cli_spellings() {
        assert_eq!("resolve-one".parse::<IngestMode>().unwrap(), IngestMode::ResolveOne);
        assert_eq!(
            "DISCOVER_MANY".parse::<IngestMode>().unwrap(),
            IngestMode::DiscoverMany
        );
        assert!("everything".parse::<IngestMode>().is_err());
    }

    #[test]
    fn request_serializes_with_wire_names() {
        let req = IngestRequest::discover_many("padel courts in leeds")
            .with_target(2)
            .with_budget(1.0);
        let json = serde_json::to_value(&req).expect("serialize");
        assert_eq!(json["mode"], "DISCOVER_MANY");
        assert_eq!(json["target_entity_count"], 2);
        assert!(json.get("min_confidence").is_none());
    }

    #[test]
    fn request_validation() {
        assert!(IngestRequest::resolve_one("x").with_min_confidence(0.8).validate().is_ok());
        assert!(IngestRequest::resolve_one("x").with_min_confidence(1.5).validate().is_err());
        assert!(IngestRequest::resolve_one("x").with_budget(-1.0).validate().is_err());
    }

    #[test]
    fn connector_spec_from_toml() {
        let spec: ConnectorSpec = toml::from_str(
            r#"
name = "places_api"
phase = "STRUCTURED"
trust_level = 9
requires = ["candidates"]
provides = ["fields.phone", "entities"]
estimated_cost_usd = 0.2
"#,
        )
        .expect("parse");
        assert_eq!(spec.phase, Phase::Structured);
        assert_eq!(spec.trust_level, 9);
        assert!(spec.requires.contains("candidates"));
        assert!(!spec.supports_query_only);
        assert!(spec.run_if.is_none());
    }

    #[test]
    fn candidate_roundtrip_keeps_zero_coordinates() {
        let c = Candidate::named("Null Island Cafe").with_coordinates(0.0, 0.0);
        let json = serde_json::to_string(&c).expect("serialize");
        let back: Candidate = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back.latitude, Some(0.0));
        assert_eq!(back.longitude, Some(0.0));
    }
}
