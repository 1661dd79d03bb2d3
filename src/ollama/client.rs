//! Ollama API client for LLM inference

use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use crate::metrics::LLM_CALL_DURATION;
use crate::model::{LanguageModel, LlmError};

/// Response from Ollama's generate endpoint with metadata
#[derive(Debug, Clone, Deserialize)]
pub struct GenerateResponse {
    /// The generated text
    #[serde(default, alias = "content")]
    pub response: String,
    /// Number of tokens generated
    #[serde(default)]
    pub eval_count: u32,
    /// Number of tokens in the prompt
    #[serde(default)]
    pub prompt_eval_count: u32,
    /// Time spent generating tokens (nanoseconds)
    #[serde(default, rename = "eval_duration")]
    pub eval_duration_ns: u64,
}

/// Client for interacting with Ollama's HTTP API
#[derive(Clone)]
pub struct OllamaClient {
    base_url: String,
    model: String,
    timeout: Duration,
    client: reqwest::Client,
}

impl OllamaClient {
    /// Create a new Ollama client
    ///
    /// # Arguments
    /// * `base_url` - The base URL of the Ollama server (e.g., "http://localhost:11434")
    /// * `model` - The model name (e.g., "gemma3:12b")
    /// * `timeout` - Upper bound on a single generate call
    pub fn new(base_url: impl Into<String>, model: impl Into<String>, timeout: Duration) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            timeout,
            client: reqwest::Client::new(),
        }
    }

    /// Model name sent with every request
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Generate a complete (non-streaming) response from Ollama
    pub async fn generate(&self, prompt: &str) -> Result<GenerateResponse, LlmError> {
        let endpoint = format!("{}/api/generate", self.base_url);

        let request = self
            .client
            .post(&endpoint)
            .timeout(self.timeout)
            .json(&serde_json::json!({
                "model": self.model,
                "prompt": prompt,
                "stream": false
            }));

        let response = request.send().await.map_err(|e| self.classify(e))?;
        let status = response.status();
        let text = response.text().await.map_err(|e| self.classify(e))?;

        if !status.is_success() {
            return Err(LlmError::Status {
                status: status.as_u16(),
                body: text,
            });
        }
        if text.trim().is_empty() {
            return Err(LlmError::EmptyResponse);
        }

        serde_json::from_str(&text).map_err(|e| LlmError::Decode(e.to_string()))
    }

    fn classify(&self, e: reqwest::Error) -> LlmError {
        if e.is_timeout() {
            LlmError::Timeout(self.timeout)
        } else {
            LlmError::Request(e)
        }
    }
}

#[async_trait]
impl LanguageModel for OllamaClient {
    async fn complete(&self, prompt: &str) -> Result<String, LlmError> {
        let start = Instant::now();
        let result = self.generate(prompt).await;
        LLM_CALL_DURATION.observe(start.elapsed().as_secs_f64());

        let response = result?;
        debug!(
            model = %self.model,
            eval_count = response.eval_count,
            prompt_eval_count = response.prompt_eval_count,
            "Model call completed"
        );
        if response.response.trim().is_empty() {
            return Err(LlmError::EmptyResponse);
        }
        Ok(response.response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_complete_returns_response_text() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/generate"))
            .and(body_partial_json(serde_json::json!({"model": "gemma3:12b", "stream": false})))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "response": "{\"thought\": \"t\", \"tool_name\": \"get_cart\"}",
                "done": true,
                "eval_count": 12
            })))
            .mount(&server)
            .await;

        let client = OllamaClient::new(server.uri(), "gemma3:12b", Duration::from_secs(5));
        let text = client.complete("hello").await.unwrap();
        assert!(text.contains("get_cart"));
    }

    #[tokio::test]
    async fn test_non_success_status_is_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
            .mount(&server)
            .await;

        let client = OllamaClient::new(server.uri(), "gemma3:12b", Duration::from_secs(5));
        match client.complete("hello").await {
            Err(LlmError::Status { status, body }) => {
                assert_eq!(status, 503);
                assert_eq!(body, "overloaded");
            }
            other => panic!("expected status error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_slow_model_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"response": "late"}))
                    .set_delay(Duration::from_secs(2)),
            )
            .mount(&server)
            .await;

        let client = OllamaClient::new(server.uri(), "m", Duration::from_millis(100));
        assert!(matches!(
            client.complete("hello").await,
            Err(LlmError::Timeout(_))
        ));
    }

    #[tokio::test]
    async fn test_blank_response_is_empty_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"response": "  "})))
            .mount(&server)
            .await;

        let client = OllamaClient::new(server.uri(), "m", Duration::from_secs(5));
        assert!(matches!(
            client.complete("hello").await,
            Err(LlmError::EmptyResponse)
        ));
    }
}
