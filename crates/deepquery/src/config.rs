// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! Pipeline configuration.
//!
//! There is no global settings object: a [`ResearchConfig`] is built once
//! (by hand or from the environment) and injected at orchestrator
//! construction, then passed read-only into the stages that need it.

use std::time::Duration;

use crate::constants::{
    DEFAULT_CACHE_TTL, DEFAULT_CHECKPOINT_AUTOCONTINUE, DEFAULT_CHECKPOINT_TIMEOUT,
    DEFAULT_PROVIDER_TIMEOUT, DEFAULT_STAGE_TIMEOUT,
};

/// Model selections for the individual agents.
#[derive(Debug, Clone)]
pub struct ModelConfig {
    /// Model for clarify + retrieve prompts.
    pub researcher: String,
    /// Model for synthesis.
    pub analyst: String,
    /// Model for verification (low temperature).
    pub verifier: String,
    /// Model for report writing.
    pub reporter: String,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            researcher: "deepseek/deepseek-chat".to_string(),
            analyst: "anthropic/claude-3.5-sonnet".to_string(),
            verifier: "openai/gpt-4o".to_string(),
            reporter: "deepseek/deepseek-chat".to_string(),
        }
    }
}

/// Read-only configuration injected at orchestrator construction.
#[derive(Debug, Clone)]
pub struct ResearchConfig {
    /// Per-agent model ids.
    pub models: ModelConfig,
    /// Envelope timeout applied to every stage.
    pub stage_timeout: Duration,
    /// Timeout for a single provider call inside the fan-out.
    pub provider_timeout: Duration,
    /// TTL for cached provider responses.
    pub cache_ttl: Duration,
    /// How long a supervised checkpoint waits for an attached collaborator.
    pub checkpoint_timeout: Duration,
    /// Auto-continue delay when no collaborator is attached.
    pub checkpoint_autocontinue: Duration,
}

impl Default for ResearchConfig {
    fn default() -> Self {
        Self {
            models: ModelConfig::default(),
            stage_timeout: DEFAULT_STAGE_TIMEOUT,
            provider_timeout: DEFAULT_PROVIDER_TIMEOUT,
            cache_ttl: DEFAULT_CACHE_TTL,
            checkpoint_timeout: DEFAULT_CHECKPOINT_TIMEOUT,
            checkpoint_autocontinue: DEFAULT_CHECKPOINT_AUTOCONTINUE,
        }
    }
}

impl ResearchConfig {
    /// Build a configuration from environment variables, falling back to
    /// defaults for anything unset.
    ///
    /// Recognized variables: `RESEARCHER_MODEL`, `ANALYST_MODEL`,
    /// `VERIFIER_MODEL`, `REPORTER_MODEL`, `STAGE_TIMEOUT_SECS`,
    /// `PROVIDER_TIMEOUT_SECS`, `CACHE_TTL_SECS`.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(model) = std::env::var("RESEARCHER_MODEL") {
            config.models.researcher = model;
        }
        if let Ok(model) = std::env::var("ANALYST_MODEL") {
            config.models.analyst = model;
        }
        if let Ok(model) = std::env::var("VERIFIER_MODEL") {
            config.models.verifier = model;
        }
        if let Ok(model) = std::env::var("REPORTER_MODEL") {
            config.models.reporter = model;
        }
        if let Some(secs) = env_u64("STAGE_TIMEOUT_SECS") {
            config.stage_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = env_u64("PROVIDER_TIMEOUT_SECS") {
            config.provider_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = env_u64("CACHE_TTL_SECS") {
            config.cache_ttl = Duration::from_secs(secs);
        }
        config
    }

    /// Override the stage timeout.
    #[must_use]
    pub fn with_stage_timeout(mut self, timeout: Duration) -> Self {
        self.stage_timeout = timeout;
        self
    }

    /// Override the checkpoint auto-continue delay.
    #[must_use]
    pub fn with_checkpoint_autocontinue(mut self, delay: Duration) -> Self {
        self.checkpoint_autocontinue = delay;
        self
    }
}

fn env_u64(key: &str) -> Option<u64> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ResearchConfig::default();
        assert_eq!(config.stage_timeout, Duration::from_secs(120));
        assert_eq!(config.provider_timeout, Duration::from_secs(30));
        assert_eq!(config.cache_ttl, Duration::from_secs(86_400));
        assert_eq!(config.checkpoint_autocontinue, Duration::from_millis(500));
    }

    #[test]
    fn test_builders() {
        let config = ResearchConfig::default()
            .with_stage_timeout(Duration::from_secs(10))
            .with_checkpoint_autocontinue(Duration::from_millis(5));
        assert_eq!(config.stage_timeout, Duration::from_secs(10));
        assert_eq!(config.checkpoint_autocontinue, Duration::from_millis(5));
    }
}
