// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! Error taxonomy for the research pipeline.
//!
//! Provider- and LLM-level failures are caught at the narrowest boundary
//! and converted to empty results or documented fallbacks; only
//! stage-level fatal outcomes surface to the session status. The
//! [`Error::is_fatal_for`] helper encodes which stages terminate the run
//! and which merely degrade it.

use std::time::Duration;

use crate::agents::Stage;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors produced by the research pipeline.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The run was cancelled by an external signal.
    #[error("research cancelled")]
    Cancelled,

    /// A stage exceeded its envelope timeout.
    #[error("stage '{stage}' timed out after {timeout:?}")]
    StageTimeout {
        /// Stage that timed out.
        stage: Stage,
        /// The envelope that was exceeded.
        timeout: Duration,
    },

    /// A stage reported an unrecoverable failure.
    #[error("stage '{stage}' failed: {message}")]
    StageFailed {
        /// Stage that failed.
        stage: Stage,
        /// Human-readable reason.
        message: String,
    },

    /// The supervised checkpoint was explicitly rejected.
    #[error("research rejected at checkpoint '{0}'")]
    Rejected(String),

    /// LLM transport, timeout or quota failure.
    #[error("llm error: {0}")]
    Llm(String),

    /// A structured reply could not be parsed; callers apply their
    /// documented per-call fallback.
    #[error("parse error: {0}")]
    Parse(String),

    /// A search provider call failed; isolated to that provider.
    #[error("provider '{provider}' error: {message}")]
    Provider {
        /// Provider name.
        provider: String,
        /// Failure description.
        message: String,
    },

    /// Persistence-layer failure.
    #[error("store error: {0}")]
    Store(String),

    /// HTTP transport failure outside of a specific provider.
    #[error("http error: {0}")]
    Http(String),

    /// Invalid configuration.
    #[error("config error: {0}")]
    Config(String),

    /// Invalid input or state.
    #[error("validation error: {0}")]
    Validation(String),
}

impl Error {
    /// Construct an LLM error.
    pub fn llm(message: impl Into<String>) -> Self {
        Error::Llm(message.into())
    }

    /// Construct a parse error.
    pub fn parse(message: impl Into<String>) -> Self {
        Error::Parse(message.into())
    }

    /// Construct a provider error.
    pub fn provider(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Provider {
            provider: provider.into(),
            message: message.into(),
        }
    }

    /// Construct a store error.
    pub fn store(message: impl Into<String>) -> Self {
        Error::Store(message.into())
    }

    /// Construct an HTTP error.
    pub fn http(message: impl Into<String>) -> Self {
        Error::Http(message.into())
    }

    /// Construct a stage failure.
    pub fn stage(stage: Stage, message: impl Into<String>) -> Self {
        Error::StageFailed {
            stage,
            message: message.into(),
        }
    }

    /// Whether this error terminates the whole run when raised from the
    /// given stage.
    ///
    /// Verify is the only degradation-tolerant stage: its failures are
    /// absorbed into a fallback confidence summary. Cancellation and
    /// rejection are always terminal.
    pub fn is_fatal_for(&self, stage: Stage) -> bool {
        match self {
            Error::Cancelled | Error::Rejected(_) => true,
            _ => stage != Stage::Verify,
        }
    }

    /// Whether this error represents cancellation.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let err = Error::provider("newsapi", "status 500");
        assert_eq!(err.to_string(), "provider 'newsapi' error: status 500");

        let err = Error::StageTimeout {
            stage: Stage::Retrieve,
            timeout: Duration::from_secs(120),
        };
        assert!(err.to_string().contains("retrieve"));
    }

    #[test]
    fn test_verify_is_degraded() {
        let err = Error::llm("boom");
        assert!(!err.is_fatal_for(Stage::Verify));
        assert!(err.is_fatal_for(Stage::Analyze));
        assert!(err.is_fatal_for(Stage::Report));
    }

    #[test]
    fn test_cancellation_is_always_fatal() {
        assert!(Error::Cancelled.is_fatal_for(Stage::Verify));
        assert!(Error::Cancelled.is_cancelled());
        assert!(!Error::llm("x").is_cancelled());
    }
}
