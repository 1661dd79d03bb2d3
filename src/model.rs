//! Language-model boundary
//!
//! The engine only ever needs one operation from a model: turn a prompt into
//! text. Everything that speaks to a real backend lives behind this trait so
//! the agent loop can be driven by scripted models in tests.

use std::time::Duration;

use async_trait::async_trait;

/// Failure to obtain a completion from the model service
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("request error: {0}")]
    Request(#[from] reqwest::Error),
    #[error("model service returned HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("could not decode model response: {0}")]
    Decode(String),
    #[error("model call timed out after {0:?}")]
    Timeout(Duration),
    #[error("empty response from model service")]
    EmptyResponse,
}

/// A black-box text-completion service
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Complete `prompt`, returning the raw model text
    async fn complete(&self, prompt: &str) -> Result<String, LlmError>;
}
