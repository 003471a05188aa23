use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::InferenceConfig;

/// Sampling parameters, chosen per call: planning runs near-deterministic,
/// final synthesis runs warmer with a larger output budget.
#[derive(Debug, Clone)]
pub struct GenerationOptions {
    pub temperature: f64,
    pub top_p: f64,
    pub top_k: Option<u32>,
    pub max_output_tokens: u32,
}

#[derive(Debug, Error)]
pub enum InferenceError {
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("inference backend returned invalid response: {0}")]
    InvalidResponse(String),
    #[error("inference backend returned an empty response")]
    Empty,
}

impl InferenceError {
    pub fn user_message(&self) -> String {
        match self {
            InferenceError::Network(err) => {
                if err.is_connect() {
                    "The language model service could not be reached.".to_string()
                } else if err.is_timeout() {
                    "The language model request timed out.".to_string()
                } else if let Some(status) = err.status() {
                    match status {
                        StatusCode::NOT_FOUND => {
                            "The language model endpoint was not found.".to_string()
                        }
                        StatusCode::SERVICE_UNAVAILABLE | StatusCode::BAD_GATEWAY => {
                            "The language model service is temporarily unavailable.".to_string()
                        }
                        _ => format!(
                            "The language model request failed with status {}.",
                            status.as_u16()
                        ),
                    }
                } else {
                    "A network error occurred while reaching the language model.".to_string()
                }
            }
            InferenceError::InvalidResponse(_) | InferenceError::Empty => {
                "The language model produced a response that could not be used.".to_string()
            }
        }
    }
}

/// Opaque text-generation capability. Used for step planning, free-text
/// reasoning, and final answer synthesis.
#[async_trait]
pub trait InferenceProvider: Send + Sync {
    async fn infer(
        &self,
        prompt: &str,
        options: &GenerationOptions,
    ) -> Result<String, InferenceError>;

    async fn test_connection(&self) -> bool;
}

#[derive(Clone)]
pub struct GeminiClient {
    http: Client,
    base_url: String,
    model: String,
    api_key: Option<String>,
}

impl GeminiClient {
    pub fn from_config(config: &InferenceConfig) -> Self {
        Self::with_client(config, Client::new())
    }

    pub fn with_client(config: &InferenceConfig, client: Client) -> Self {
        Self {
            http: client,
            base_url: config.endpoint.clone(),
            model: config.model.clone(),
            api_key: config.api_key.clone(),
        }
    }

    fn generate_url(&self) -> String {
        let base = self.base_url.trim_end_matches('/');
        format!("{base}/v1beta/models/{}:generateContent", self.model)
    }

    fn models_url(&self) -> String {
        let base = self.base_url.trim_end_matches('/');
        format!("{base}/v1beta/models")
    }

    fn key(&self) -> &str {
        self.api_key.as_deref().unwrap_or_default()
    }
}

#[async_trait]
impl InferenceProvider for GeminiClient {
    async fn infer(
        &self,
        prompt: &str,
        options: &GenerationOptions,
    ) -> Result<String, InferenceError> {
        let mut generation_config = json!({
            "temperature": options.temperature,
            "topP": options.top_p,
            "maxOutputTokens": options.max_output_tokens,
        });
        if let Some(top_k) = options.top_k {
            generation_config["topK"] = json!(top_k);
        }
        let payload = json!({
            "contents": [{"role": "user", "parts": [{"text": prompt}]}],
            "generationConfig": generation_config,
        });

        info!(
            model = self.model.as_str(),
            temperature = options.temperature,
            "Sending request to inference backend"
        );
        let response: GenerateResponse = self
            .http
            .post(self.generate_url())
            .query(&[("key", self.key())])
            .json(&payload)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        debug!("Received response from inference backend");

        let content = response
            .candidates
            .unwrap_or_default()
            .into_iter()
            .flat_map(|candidate| candidate.content)
            .flat_map(|content| content.parts)
            .find_map(|part| part.text)
            .ok_or_else(|| InferenceError::InvalidResponse("missing text part".into()))?;

        if content.trim().is_empty() {
            return Err(InferenceError::Empty);
        }
        Ok(content)
    }

    async fn test_connection(&self) -> bool {
        let probe = self
            .http
            .get(self.models_url())
            .query(&[("key", self.key())])
            .send()
            .await;
        match probe {
            Ok(response) => response.status().is_success(),
            Err(err) => {
                warn!(%err, "Inference connectivity probe failed");
                false
            }
        }
    }
}

#[derive(Deserialize)]
struct GenerateResponse {
    candidates: Option<Vec<Candidate>>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Deserialize)]
struct CandidateContent {
    parts: Vec<CandidatePart>,
}

#[derive(Deserialize)]
struct CandidatePart {
    text: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(endpoint: &str) -> InferenceConfig {
        InferenceConfig {
            endpoint: endpoint.to_string(),
            model: "gemini-2.0-flash".to_string(),
            api_key: Some("secret".to_string()),
        }
    }

    #[test]
    fn generate_url_joins_without_double_slash() {
        let client = GeminiClient::from_config(&config(
            "https://generativelanguage.googleapis.com/",
        ));
        assert_eq!(
            client.generate_url(),
            "https://generativelanguage.googleapis.com/v1beta/models/gemini-2.0-flash:generateContent"
        );
    }

    #[test]
    fn empty_candidate_text_parses_to_none() {
        let raw = r#"{"candidates":[{"content":{"parts":[{"inlineData":{}}]}}]}"#;
        let parsed: GenerateResponse = serde_json::from_str(raw).expect("valid shape");
        let text = parsed
            .candidates
            .unwrap_or_default()
            .into_iter()
            .flat_map(|c| c.content)
            .flat_map(|c| c.parts)
            .find_map(|p| p.text);
        assert!(text.is_none());
    }
}
