//! Provider-neutral interface to hosted LLMs, grounded on the teacher's
//! `ai-client` module: the `Agent`/`PromptBuilder` trait split
//! (`ai-client/src/traits.rs`) generalized into a single `align` call, and
//! its Claude HTTP client (`ai-client/src/claude/client.rs`) as the shape
//! for `clients::AnthropicClient`.

mod clients;
mod set;

pub use clients::{AnthropicClient, OpenAiClient};
pub use set::LLMClientSet;

use serde_json::Value;
use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum LlmError {
    #[error("quota exceeded for provider {provider}")]
    QuotaExceeded { provider: String },

    #[error("authentication failed for provider {provider}: {message}")]
    AuthFailed { provider: String, message: String },

    #[error("transient failure calling {provider}: {message}")]
    Transient { provider: String, message: String },

    #[error("structured output from {provider} violated the requested schema: {message}")]
    SchemaViolation { provider: String, message: String },
}

pub type Result<T> = std::result::Result<T, LlmError>;

#[derive(Debug, Clone, Default)]
pub struct Usage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

#[derive(Debug, Clone)]
pub struct AlignResponse {
    pub structured_output: Value,
    pub confidence: Option<f32>,
    pub usage: Usage,
}

/// One hosted LLM invoked to turn `prompt` into JSON conforming to `schema`.
#[async_trait::async_trait]
pub trait LlmClient: Send + Sync {
    fn provider(&self) -> &str;
    async fn align(&self, prompt: &str, schema: &Value) -> Result<AlignResponse>;
}
