//! # OpenRouter Language Model Client
//!
//! OpenRouter exposes many hosted models behind one OpenAI-compatible
//! chat-completions endpoint. This crate provides the [`LanguageModel`]
//! implementation the DeepQuery agents reason through.
//!
//! ## Features
//!
//! - Single client for every model the pipeline's agents select
//! - System-prompt, temperature and token-budget pass-through
//! - Token-usage logging on every call
//! - API key redacted from `Debug` output
//!
//! ## Usage
//!
//! ```rust,no_run
//! use deepquery_openrouter::OpenRouterModel;
//! use deepquery::llm::{GenerateRequest, LanguageModel};
//!
//! # tokio_test::block_on(async {
//! let model = OpenRouterModel::new("sk-or-YOUR_API_KEY");
//! let reply = model
//!     .generate(GenerateRequest::new("Say hello.", "deepseek/deepseek-chat"))
//!     .await
//!     .unwrap();
//! println!("{reply}");
//! # });
//! ```

use async_trait::async_trait;
use deepquery::llm::{GenerateRequest, LanguageModel};
use deepquery::{Error, Result, DEFAULT_HTTP_CONNECT_TIMEOUT};
use serde::{Deserialize, Serialize};
use std::time::Duration;

const DEFAULT_BASE_URL: &str = "https://openrouter.ai/api/v1";

/// LLM calls get a longer budget than search traffic.
const LLM_REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// Chat message on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    /// "system", "user" or "assistant".
    pub role: String,
    /// Message text.
    pub content: String,
}

/// Request body for `/chat/completions`.
#[derive(Debug, Clone, Serialize)]
pub struct ChatRequest {
    /// Model identifier (e.g. "deepseek/deepseek-chat").
    pub model: String,
    /// Conversation messages.
    pub messages: Vec<ChatMessage>,
    /// Sampling temperature.
    pub temperature: f64,
    /// Maximum tokens to generate.
    pub max_tokens: u32,
}

/// Token accounting returned by the API.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Usage {
    /// Tokens in the prompt.
    #[serde(default)]
    pub prompt_tokens: u32,
    /// Tokens generated.
    #[serde(default)]
    pub completion_tokens: u32,
}

#[derive(Debug, Clone, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

/// Response body for `/chat/completions`.
#[derive(Debug, Clone, Deserialize)]
pub struct ChatResponse {
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<Usage>,
}

impl ChatResponse {
    /// First choice's content, if any.
    pub fn content(&self) -> Option<&str> {
        self.choices.first().map(|choice| choice.message.content.as_str())
    }
}

/// OpenRouter-backed [`LanguageModel`].
pub struct OpenRouterModel {
    api_key: String,
    base_url: String,
    client: reqwest::Client,
}

// Custom Debug implementation to prevent API key exposure in logs
impl std::fmt::Debug for OpenRouterModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenRouterModel")
            .field("api_key", &"[REDACTED]")
            .field("base_url", &self.base_url)
            .finish()
    }
}

impl OpenRouterModel {
    /// Create a client for the public OpenRouter endpoint.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            client: create_http_client(),
        }
    }

    /// Create a client from the `OPENROUTER_API_KEY` and optional
    /// `OPENROUTER_BASE_URL` environment variables. `None` when the key
    /// is unset.
    pub fn from_env() -> Option<Self> {
        let api_key = std::env::var("OPENROUTER_API_KEY").ok()?;
        if api_key.is_empty() {
            return None;
        }
        let mut model = Self::new(api_key);
        if let Ok(base_url) = std::env::var("OPENROUTER_BASE_URL") {
            model.base_url = base_url;
        }
        Some(model)
    }

    /// Override the endpoint (self-hosted gateways, tests).
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn build_request(request: &GenerateRequest) -> ChatRequest {
        let mut messages = Vec::with_capacity(2);
        if let Some(system_prompt) = &request.system_prompt {
            messages.push(ChatMessage {
                role: "system".to_string(),
                content: system_prompt.clone(),
            });
        }
        messages.push(ChatMessage {
            role: "user".to_string(),
            content: request.prompt.clone(),
        });
        ChatRequest {
            model: request.model.clone(),
            messages,
            temperature: request.temperature,
            max_tokens: request.max_tokens,
        }
    }
}

#[async_trait]
impl LanguageModel for OpenRouterModel {
    async fn generate(&self, request: GenerateRequest) -> Result<String> {
        if self.api_key.is_empty() {
            return Err(Error::llm("OpenRouter API key not configured"));
        }

        let model = request.model.clone();
        let body = Self::build_request(&request);

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .header("HTTP-Referer", "https://github.com/dropbox/dTOOL/deepquery")
            .header("X-Title", "DeepQuery")
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::llm(format!("OpenRouter request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(Error::llm(format!("OpenRouter error ({status}): {error_text}")));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| Error::llm(format!("Failed to parse OpenRouter response: {e}")))?;

        if let Some(usage) = &parsed.usage {
            tracing::debug!(
                model,
                prompt_tokens = usage.prompt_tokens,
                completion_tokens = usage.completion_tokens,
                "llm call"
            );
        }

        parsed
            .content()
            .map(ToString::to_string)
            .ok_or_else(|| Error::llm("OpenRouter response contained no choices"))
    }
}

/// Create an HTTP client with standard timeouts
fn create_http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(LLM_REQUEST_TIMEOUT)
        .connect_timeout(DEFAULT_HTTP_CONNECT_TIMEOUT)
        .build()
        .unwrap_or_else(|_| reqwest::Client::new())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_request_with_system_prompt() {
        let request = GenerateRequest::new("user text", "openai/gpt-4o")
            .with_system_prompt("be terse")
            .with_temperature(0.2)
            .with_max_tokens(512);
        let body = OpenRouterModel::build_request(&request);
        assert_eq!(body.model, "openai/gpt-4o");
        assert_eq!(body.messages.len(), 2);
        assert_eq!(body.messages[0].role, "system");
        assert_eq!(body.messages[1].role, "user");
        assert_eq!(body.messages[1].content, "user text");
        assert_eq!(body.max_tokens, 512);
    }

    #[test]
    fn test_build_request_without_system_prompt() {
        let request = GenerateRequest::new("hello", "m");
        let body = OpenRouterModel::build_request(&request);
        assert_eq!(body.messages.len(), 1);
        assert_eq!(body.messages[0].role, "user");
    }

    #[test]
    fn test_request_serialization() {
        let body = ChatRequest {
            model: "m".to_string(),
            messages: vec![ChatMessage {
                role: "user".to_string(),
                content: "hi".to_string(),
            }],
            temperature: 0.5,
            max_tokens: 100,
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["model"], "m");
        assert_eq!(json["messages"][0]["content"], "hi");
    }

    #[test]
    fn test_response_parsing() {
        let raw = r#"{
            "choices": [{"message": {"role": "assistant", "content": "hello there"}}],
            "usage": {"prompt_tokens": 12, "completion_tokens": 3}
        }"#;
        let parsed: ChatResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.content(), Some("hello there"));
        assert_eq!(parsed.usage.as_ref().unwrap().prompt_tokens, 12);
    }

    #[test]
    fn test_response_without_choices() {
        let parsed: ChatResponse = serde_json::from_str(r#"{"choices": []}"#).unwrap();
        assert!(parsed.content().is_none());
    }

    #[test]
    fn test_debug_redacts_api_key() {
        let model = OpenRouterModel::new("sk-or-secret");
        let debug = format!("{model:?}");
        assert!(!debug.contains("sk-or-secret"));
        assert!(debug.contains("[REDACTED]"));
    }

    #[tokio::test]
    async fn test_empty_key_errors_without_network() {
        let model = OpenRouterModel::new("");
        let result = model.generate(GenerateRequest::new("x", "m")).await;
        assert!(result.is_err());
    }
}
