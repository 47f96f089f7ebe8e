//! Connector that always proposes the same writes (or always fails).

use async_trait::async_trait;

use ingestkit_core::{Connector, ConnectorOutput, ExecutionContext};
use ingestkit_features::QueryFeatures;
use ingestkit_shared::{IngestError, IngestRequest, Result};

/// Returns a fixed [`ConnectorOutput`] or a fixed error on every call.
#[derive(Debug, Clone)]
pub struct StaticConnector {
    name: String,
    response: std::result::Result<ConnectorOutput, String>,
}

impl StaticConnector {
    pub fn new(name: impl Into<String>, output: ConnectorOutput) -> Self {
        Self {
            name: name.into(),
            response: Ok(output),
        }
    }

    /// A connector whose every call fails with `message`.
    pub fn failing(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            response: Err(message.into()),
        }
    }
}

#[async_trait]
impl Connector for StaticConnector {
    async fn execute(
        &self,
        _request: &IngestRequest,
        _features: &QueryFeatures,
        _context: &ExecutionContext,
    ) -> Result<ConnectorOutput> {
        self.response
            .clone()
            .map_err(|message| IngestError::connector(&self.name, message))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ingestkit_shared::Candidate;

    #[tokio::test]
    async fn returns_output_every_time() {
        let connector = StaticConnector::new(
            "fixed",
            ConnectorOutput::with_candidates(vec![Candidate::named("One")]),
        );
        let request = IngestRequest::discover_many("one");
        let features = QueryFeatures::empty();
        let ctx = ExecutionContext::new();
        for _ in 0..2 {
            let out = connector.execute(&request, &features, &ctx).await.unwrap();
            assert_eq!(out.candidates.len(), 1);
        }
    }

    #[tokio::test]
    async fn failing_reports_connector_error() {
        let connector = StaticConnector::failing("down", "HTTP 503");
        let err = connector
            .execute(
                &IngestRequest::discover_many("x"),
                &QueryFeatures::empty(),
                &ExecutionContext::new(),
            )
            .await
            .unwrap_err();
        match err {
            IngestError::Connector { connector, message } => {
                assert_eq!(connector, "down");
                assert_eq!(message, "HTTP 503");
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
