use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::{AlignResponse, LlmClient, LlmError, Result, Usage};

const ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const OPENAI_API_URL: &str = "https://api.openai.com/v1";

fn schema_prompt(prompt: &str, schema: &Value) -> String {
    format!(
        "{prompt}\n\nRespond with a single JSON object conforming exactly to this schema, and nothing else:\n{schema}"
    )
}

fn parse_structured_output(provider: &str, text: &str) -> Result<Value> {
    serde_json::from_str(text.trim()).map_err(|e| LlmError::SchemaViolation {
        provider: provider.to_string(),
        message: format!("response was not valid JSON: {e}"),
    })
}

fn classify_status(provider: &str, status: StatusCode) -> LlmError {
    if status == StatusCode::TOO_MANY_REQUESTS {
        LlmError::QuotaExceeded { provider: provider.to_string() }
    } else if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        LlmError::AuthFailed { provider: provider.to_string(), message: format!("status {status}") }
    } else {
        LlmError::Transient { provider: provider.to_string(), message: format!("status {status}") }
    }
}

/// HTTP client for Anthropic's Messages API. Shaped after the teacher's
/// `ClaudeClient`: API key stashed once, headers built per call, non-2xx
/// responses classified rather than bubbled as raw transport errors.
pub struct AnthropicClient {
    api_key: String,
    model: String,
    http: reqwest::Client,
    base_url: String,
}

impl AnthropicClient {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self { api_key: api_key.into(), model: model.into(), http: reqwest::Client::new(), base_url: ANTHROPIC_API_URL.to_string() }
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    fn headers(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-api-key",
            HeaderValue::from_str(&self.api_key).map_err(|_| LlmError::AuthFailed {
                provider: "anthropic".into(),
                message: "api key contains invalid header characters".into(),
            })?,
        );
        headers.insert("anthropic-version", HeaderValue::from_static(ANTHROPIC_VERSION));
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        Ok(headers)
    }
}

#[derive(Serialize)]
struct AnthropicRequest {
    model: String,
    max_tokens: u32,
    messages: Vec<AnthropicMessage>,
}

#[derive(Serialize)]
struct AnthropicMessage {
    role: &'static str,
    content: String,
}

#[derive(Deserialize)]
struct AnthropicResponse {
    content: Vec<AnthropicContentBlock>,
    usage: AnthropicUsage,
}

#[derive(Deserialize)]
struct AnthropicContentBlock {
    text: String,
}

#[derive(Deserialize)]
struct AnthropicUsage {
    input_tokens: u32,
    output_tokens: u32,
}

#[async_trait]
impl LlmClient for AnthropicClient {
    fn provider(&self) -> &str {
        "anthropic"
    }

    async fn align(&self, prompt: &str, schema: &Value) -> Result<AlignResponse> {
        let url = format!("{}/messages", self.base_url);
        let request = AnthropicRequest {
            model: self.model.clone(),
            max_tokens: 4096,
            messages: vec![AnthropicMessage { role: "user", content: schema_prompt(prompt, schema) }],
        };

        debug!(provider = "anthropic", model = %self.model, "align request");

        let response = self
            .http
            .post(&url)
            .headers(self.headers()?)
            .json(&request)
            .send()
            .await
            .map_err(|e| LlmError::Transient { provider: "anthropic".into(), message: e.to_string() })?;

        if !response.status().is_success() {
            return Err(classify_status("anthropic", response.status()));
        }

        let body: AnthropicResponse = response
            .json()
            .await
            .map_err(|e| LlmError::Transient { provider: "anthropic".into(), message: e.to_string() })?;

        let text = body.content.first().map(|b| b.text.as_str()).unwrap_or_default();
        let structured_output = parse_structured_output("anthropic", text)?;

        Ok(AlignResponse {
            structured_output,
            confidence: None,
            usage: Usage { input_tokens: body.usage.input_tokens, output_tokens: body.usage.output_tokens },
        })
    }
}

/// HTTP client for OpenAI-compatible chat completion APIs, following the
/// same shape as `AnthropicClient` so `LLMClientSet` can hold either behind
/// one trait object.
pub struct OpenAiClient {
    api_key: String,
    model: String,
    http: reqwest::Client,
    base_url: String,
}

impl OpenAiClient {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self { api_key: api_key.into(), model: model.into(), http: reqwest::Client::new(), base_url: OPENAI_API_URL.to_string() }
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }
}

#[derive(Serialize)]
struct OpenAiRequest {
    model: String,
    messages: Vec<OpenAiMessage>,
    response_format: OpenAiResponseFormat,
}

#[derive(Serialize)]
struct OpenAiMessage {
    role: &'static str,
    content: String,
}

#[derive(Serialize)]
struct OpenAiResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Deserialize)]
struct OpenAiResponse {
    choices: Vec<OpenAiChoice>,
    usage: OpenAiUsage,
}

#[derive(Deserialize)]
struct OpenAiChoice {
    message: OpenAiResponseMessage,
}

#[derive(Deserialize)]
struct OpenAiResponseMessage {
    content: String,
}

#[derive(Deserialize)]
struct OpenAiUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
}

#[async_trait]
impl LlmClient for OpenAiClient {
    fn provider(&self) -> &str {
        "openai"
    }

    async fn align(&self, prompt: &str, schema: &Value) -> Result<AlignResponse> {
        let url = format!("{}/chat/completions", self.base_url);
        let request = OpenAiRequest {
            model: self.model.clone(),
            messages: vec![OpenAiMessage { role: "user", content: schema_prompt(prompt, schema) }],
            response_format: OpenAiResponseFormat { kind: "json_object" },
        };

        debug!(provider = "openai", model = %self.model, "align request");

        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| LlmError::Transient { provider: "openai".into(), message: e.to_string() })?;

        if !response.status().is_success() {
            return Err(classify_status("openai", response.status()));
        }

        let body: OpenAiResponse = response
            .json()
            .await
            .map_err(|e| LlmError::Transient { provider: "openai".into(), message: e.to_string() })?;

        let text = body.choices.first().map(|c| c.message.content.as_str()).unwrap_or_default();
        let structured_output = parse_structured_output("openai", text)?;

        Ok(AlignResponse {
            structured_output,
            confidence: None,
            usage: Usage { input_tokens: body.usage.prompt_tokens, output_tokens: body.usage.completion_tokens },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_structured_output_rejects_non_json() {
        let err = parse_structured_output("anthropic", "not json").unwrap_err();
        assert!(matches!(err, LlmError::SchemaViolation { .. }));
    }

    #[test]
    fn parse_structured_output_accepts_trimmed_json() {
        let value = parse_structured_output("anthropic", "  {\"a\": 1}  \n").unwrap();
        assert_eq!(value["a"], 1);
    }

    #[test]
    fn classify_status_maps_429_to_quota_exceeded() {
        assert!(matches!(classify_status("anthropic", StatusCode::TOO_MANY_REQUESTS), LlmError::QuotaExceeded { .. }));
    }

    #[test]
    fn classify_status_maps_401_to_auth_failed() {
        assert!(matches!(classify_status("anthropic", StatusCode::UNAUTHORIZED), LlmError::AuthFailed { .. }));
    }
}
