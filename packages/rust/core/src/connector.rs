//! Connector contract and registry.
//!
//! A connector is anything that, given the request, the query features and a
//! read-only view of the run state, proposes writes. How it gets them (HTTP,
//! file, LLM) is its own business.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use ingestkit_features::QueryFeatures;
use ingestkit_shared::{Candidate, Evidence, IngestError, IngestRequest, Result};

use crate::context::ExecutionContext;
use crate::plan::ExecutionPlan;

// ---------------------------------------------------------------------------
// Proposed writes
// ---------------------------------------------------------------------------

/// Everything one connector call wants to add to the run state.
///
/// Buffered per connector and folded into the context at the merge barrier.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConnectorOutput {
    #[serde(default)]
    pub candidates: Vec<Candidate>,
    #[serde(default)]
    pub evidence: Vec<Evidence>,
    #[serde(default)]
    pub seeds: BTreeSet<String>,
    /// Scalars resolve by trust; arrays append; objects union.
    #[serde(default)]
    pub fields: BTreeMap<String, Value>,
    /// Connector's own confidence that the goal entity was found.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    /// Actual cost, when the connector knows it better than its estimate.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost_usd: Option<f64>,
}

impl ConnectorOutput {
    pub fn with_candidates(candidates: Vec<Candidate>) -> Self {
        Self {
            candidates,
            ..Self::default()
        }
    }

    pub fn field(mut self, name: impl Into<String>, value: Value) -> Self {
        self.fields.insert(name.into(), value);
        self
    }

    pub fn evidence(mut self, evidence: Evidence) -> Self {
        self.evidence.push(evidence);
        self
    }

    pub fn seed(mut self, seed: impl Into<String>) -> Self {
        self.seeds.insert(seed.into());
        self
    }

    pub fn confidence(mut self, confidence: f64) -> Self {
        self.confidence = Some(confidence);
        self
    }

    pub fn cost(mut self, usd: f64) -> Self {
        self.cost_usd = Some(usd);
        self
    }
}

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// The single call contract every connector adapter satisfies.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Produce proposed writes. `context` is a snapshot taken at the start of
    /// the connector's wave; writes from concurrently running connectors are
    /// never visible.
    async fn execute(
        &self,
        request: &IngestRequest,
        features: &QueryFeatures,
        context: &ExecutionContext,
    ) -> Result<ConnectorOutput>;
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Implementations keyed by connector name. Wiring is explicit and static.
#[derive(Clone, Default)]
pub struct ConnectorRegistry {
    connectors: BTreeMap<String, Arc<dyn Connector>>,
}

impl ConnectorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an implementation. A second registration under the same name
    /// is a configuration error.
    pub fn register(&mut self, name: impl Into<String>, connector: Arc<dyn Connector>) -> Result<()> {
        let name = name.into();
        if self.connectors.contains_key(&name) {
            return Err(IngestError::config(format!(
                "connector '{name}' is registered more than once"
            )));
        }
        self.connectors.insert(name, connector);
        Ok(())
    }

    /// Builder-style [`register`](Self::register).
    pub fn with(mut self, name: impl Into<String>, connector: Arc<dyn Connector>) -> Result<Self> {
        self.register(name, connector)?;
        Ok(self)
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Connector>> {
        self.connectors.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.connectors.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.connectors.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.connectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connectors.is_empty()
    }

    /// Every plan node must have an implementation.
    pub fn check_plan(&self, plan: &ExecutionPlan) -> Result<()> {
        let missing: Vec<&str> = plan
            .nodes()
            .map(|n| n.name())
            .filter(|name| !self.contains(name))
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(IngestError::config(format!(
                "no registered implementation for connector(s): {}",
                missing.join(", ")
            )))
        }
    }
}

impl std::fmt::Debug for ConnectorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectorRegistry")
            .field("connectors", &self.connectors.keys().collect::<Vec<_>>())
            .finish()
    }
}
