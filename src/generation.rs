//! Text generation over an OpenAI-compatible chat completions endpoint.
//!
//! [`GenerationClient`] is the seam the pipeline calls; [`OpenAiChatClient`]
//! is the HTTP implementation. Any server that accepts
//! `POST {base_url}/chat/completions` works (vLLM, DashScope compatible mode,
//! Ollama's OpenAI shim, ...).

use anyhow::Result;
use async_trait::async_trait;

use crate::config::GenerationConfig;
use crate::error::RagError;
use crate::http_client::{build_client, post_json_with_retry};
use crate::prompt::Prompt;

/// Sampling parameters for one generation call.
#[derive(Debug, Clone, PartialEq)]
pub struct SamplingConfig {
    pub temperature: f32,
    pub max_tokens: Option<u32>,
    /// Sent as `enable_thinking`; reasoning models otherwise prepend their
    /// chain of thought to the answer.
    pub enable_thinking: bool,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            temperature: 0.1,
            max_tokens: None,
            enable_thinking: false,
        }
    }
}

impl From<&GenerationConfig> for SamplingConfig {
    fn from(config: &GenerationConfig) -> Self {
        Self {
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            enable_thinking: config.enable_thinking,
        }
    }
}

/// Produces answer text for a rendered prompt.
#[async_trait]
pub trait GenerationClient: Send + Sync {
    fn model_name(&self) -> &str;

    async fn generate(&self, prompt: &Prompt, sampling: &SamplingConfig) -> Result<String>;
}

pub struct OpenAiChatClient {
    model: String,
    endpoint: String,
    api_key: Option<String>,
    max_retries: u32,
    client: reqwest::Client,
}

impl OpenAiChatClient {
    pub fn new(config: &GenerationConfig) -> Result<Self> {
        Ok(Self {
            model: config.model.clone(),
            endpoint: format!(
                "{}/chat/completions",
                config.base_url.trim_end_matches('/')
            ),
            api_key: config.api_key.clone().filter(|k| !k.is_empty()),
            max_retries: config.max_retries,
            client: build_client(config.timeout_secs)?,
        })
    }

    fn request_body(&self, prompt: &Prompt, sampling: &SamplingConfig) -> serde_json::Value {
        let mut body = serde_json::json!({
            "model": self.model,
            "messages": prompt.messages(),
            "temperature": sampling.temperature,
            "enable_thinking": sampling.enable_thinking,
        });
        if let Some(max_tokens) = sampling.max_tokens {
            body["max_tokens"] = serde_json::json!(max_tokens);
        }
        body
    }
}

#[async_trait]
impl GenerationClient for OpenAiChatClient {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, prompt: &Prompt, sampling: &SamplingConfig) -> Result<String> {
        let body = self.request_body(prompt, sampling);
        let json = post_json_with_retry(
            &self.client,
            &self.endpoint,
            self.api_key.as_deref(),
            &body,
            self.max_retries,
            "Generation",
        )
        .await?;
        Ok(parse_chat_response(&json)?)
    }
}

/// Extract `choices[0].message.content`.
pub(crate) fn parse_chat_response(json: &serde_json::Value) -> Result<String, RagError> {
    json.get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_str())
        .map(str::to_string)
        .ok_or_else(|| {
            RagError::MalformedResponse("missing choices[0].message.content".to_string())
        })
}
