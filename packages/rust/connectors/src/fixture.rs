//! Connector that replays a JSON fixture from disk.
//!
//! The file holds one serialized [`ConnectorOutput`]. It is read on every
//! call, so edits show up without rebuilding the registry.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::debug;

use ingestkit_core::{Connector, ConnectorOutput, ExecutionContext, normalize_name};
use ingestkit_features::QueryFeatures;
use ingestkit_shared::{IngestError, IngestRequest, Result};

/// Query tokens shorter than this never count as a match.
const MIN_MATCH_TOKEN_LEN: usize = 3;

#[derive(Debug, Clone)]
pub struct FixtureConnector {
    name: String,
    path: PathBuf,
    match_query: bool,
}

impl FixtureConnector {
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            match_query: false,
        }
    }

    /// Keep only candidates whose name shares a token with the query.
    pub fn match_query(mut self, enabled: bool) -> Self {
        self.match_query = enabled;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load(&self) -> Result<ConnectorOutput> {
        let raw = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|e| IngestError::connector(&self.name, format!("{}: {e}", self.path.display())))?;
        serde_json::from_str(&raw).map_err(|e| {
            IngestError::connector(&self.name, format!("invalid fixture {}: {e}", self.path.display()))
        })
    }
}

#[async_trait]
impl Connector for FixtureConnector {
    async fn execute(
        &self,
        _request: &IngestRequest,
        features: &QueryFeatures,
        _context: &ExecutionContext,
    ) -> Result<ConnectorOutput> {
        let mut output = self.load().await?;

        if self.match_query {
            let tokens: BTreeSet<&str> = features
                .normalized_query
                .split_whitespace()
                .filter(|t| t.chars().count() >= MIN_MATCH_TOKEN_LEN)
                .collect();
            let before = output.candidates.len();
            output.candidates.retain(|c| {
                normalize_name(&c.name)
                    .split_whitespace()
                    .any(|word| tokens.contains(word))
            });
            debug!(
                connector = %self.name,
                kept = output.candidates.len(),
                dropped = before - output.candidates.len(),
                "filtered fixture candidates by query"
            );
        }

        Ok(output)
    }
}
