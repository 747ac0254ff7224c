// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! The language-model seam.
//!
//! Every agent reasons through a [`LanguageModel`] injected at
//! construction. Implementations live in integration crates
//! (`deepquery-openrouter`) and in the [`crate::testing`] module for
//! tests.

use async_trait::async_trait;

use crate::error::Result;

/// A single text-generation request.
#[derive(Debug, Clone)]
pub struct GenerateRequest {
    /// User prompt.
    pub prompt: String,
    /// Optional system prompt.
    pub system_prompt: Option<String>,
    /// Model identifier (e.g. "deepseek/deepseek-chat").
    pub model: String,
    /// Sampling temperature.
    pub temperature: f64,
    /// Maximum tokens to generate.
    pub max_tokens: u32,
}

impl GenerateRequest {
    /// Create a request with the given prompt and model; temperature 0.5,
    /// 4096 max tokens.
    pub fn new(prompt: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            system_prompt: None,
            model: model.into(),
            temperature: 0.5,
            max_tokens: 4096,
        }
    }

    /// Set the system prompt.
    #[must_use]
    pub fn with_system_prompt(mut self, system_prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(system_prompt.into());
        self
    }

    /// Set the sampling temperature.
    #[must_use]
    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = temperature;
        self
    }

    /// Set the token budget.
    #[must_use]
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }
}

/// A text-generation backend.
///
/// Fails with [`crate::error::Error::Llm`] on transport, timeout or quota
/// problems. Replies are free-form text; structured parsing happens at the
/// call site via [`crate::json`].
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Generate a completion for the request.
    async fn generate(&self, request: GenerateRequest) -> Result<String>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_builder() {
        let request = GenerateRequest::new("summarize this", "openai/gpt-4o")
            .with_system_prompt("You are terse.")
            .with_temperature(0.2)
            .with_max_tokens(512);
        assert_eq!(request.model, "openai/gpt-4o");
        assert_eq!(request.system_prompt.as_deref(), Some("You are terse."));
        assert!((request.temperature - 0.2).abs() < f64::EPSILON);
        assert_eq!(request.max_tokens, 512);
    }
}
