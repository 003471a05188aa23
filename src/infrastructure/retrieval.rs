use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::RetrievalConfig;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Citation {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,
}

/// Answer from the managed document corpus. A populated `error` field
/// signals partial failure without the call itself failing.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RetrievalOutcome {
    #[serde(default)]
    pub result: String,
    #[serde(default)]
    pub citations: Vec<Citation>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Error)]
pub enum RetrievalError {
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("retrieval backend returned invalid response: {0}")]
    InvalidResponse(String),
    #[error("knowledge retrieval is not configured")]
    NotConfigured,
}

/// Opaque question-answering capability over a managed document corpus.
#[async_trait]
pub trait KnowledgeRetriever: Send + Sync {
    async fn retrieve(&self, question: &str) -> Result<RetrievalOutcome, RetrievalError>;

    async fn test_connection(&self) -> bool;
}

#[derive(Clone)]
pub struct CorpusClient {
    http: Client,
    base_url: String,
    api_key: Option<String>,
}

impl CorpusClient {
    pub fn from_config(config: &RetrievalConfig) -> Self {
        Self::with_client(config, Client::new())
    }

    pub fn with_client(config: &RetrievalConfig, client: Client) -> Self {
        Self {
            http: client,
            base_url: config.endpoint.clone(),
            api_key: config.api_key.clone(),
        }
    }

    fn endpoint(&self, path: &str) -> String {
        let base = self.base_url.trim_end_matches('/');
        let path = path.trim_start_matches('/');
        format!("{base}/{path}")
    }
}

#[async_trait]
impl KnowledgeRetriever for CorpusClient {
    async fn retrieve(&self, question: &str) -> Result<RetrievalOutcome, RetrievalError> {
        info!("Querying document corpus");
        let mut request = self
            .http
            .post(self.endpoint("/query"))
            .json(&json!({ "question": question }));
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let outcome: RetrievalOutcome = request
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        debug!(
            citations = outcome.citations.len(),
            partial = outcome.error.is_some(),
            "Received corpus response"
        );
        Ok(outcome)
    }

    async fn test_connection(&self) -> bool {
        match self.http.get(self.endpoint("/healthz")).send().await {
            Ok(response) => response.status().is_success(),
            Err(err) => {
                warn!(%err, "Retrieval connectivity probe failed");
                false
            }
        }
    }
}

/// Stands in when no corpus endpoint is configured: every knowledge query
/// fails as a step, and the loop carries on with its other capabilities.
pub struct UnconfiguredRetriever;

#[async_trait]
impl KnowledgeRetriever for UnconfiguredRetriever {
    async fn retrieve(&self, _question: &str) -> Result<RetrievalOutcome, RetrievalError> {
        Err(RetrievalError::NotConfigured)
    }

    async fn test_connection(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_joins_paths_correctly() {
        let client = CorpusClient::from_config(&RetrievalConfig {
            endpoint: "http://localhost:9090/".to_string(),
            api_key: None,
        });
        assert_eq!(client.endpoint("/query"), "http://localhost:9090/query");
    }

    #[test]
    fn outcome_defaults_cover_missing_fields() {
        let outcome: RetrievalOutcome =
            serde_json::from_str(r#"{"result":"answer text"}"#).expect("parses");
        assert_eq!(outcome.result, "answer text");
        assert!(outcome.citations.is_empty());
        assert!(outcome.error.is_none());
    }

    #[test]
    fn populated_error_field_survives_parsing() {
        let outcome: RetrievalOutcome =
            serde_json::from_str(r#"{"result":"","error":"index rebuilding"}"#).expect("parses");
        assert_eq!(outcome.error.as_deref(), Some("index rebuilding"));
    }
}
