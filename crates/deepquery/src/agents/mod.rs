// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! The five pipeline agents and their shared execution contract.
//!
//! Every agent exposes `execute(context) -> StageOutput` and reports
//! progress through the context's sink; the orchestrator owns ordering,
//! timeouts and failure classification. Agents read their inputs from the
//! store by session id and persist their outputs before returning -
//! nothing flows between stages in memory.

mod analyze;
mod clarify;
mod report;
mod retrieve;
mod verify;

pub use analyze::AnalyzeAgent;
pub use clarify::ClarifyAgent;
pub use report::ReportAgent;
pub use retrieve::RetrieveAgent;
pub use verify::VerifyAgent;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::cancel::CancelToken;
use crate::config::ResearchConfig;
use crate::error::Result;
use crate::llm::{GenerateRequest, LanguageModel};
use crate::models::ResearchParams;
use crate::store::ResearchStore;

/// One of the five ordered pipeline stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Query clarification and planning.
    Clarify,
    /// Multi-source retrieval.
    Retrieve,
    /// Synthesis and analysis.
    Analyze,
    /// Verification and credibility scoring.
    Verify,
    /// Report generation.
    Report,
}

impl Stage {
    /// All stages, in pipeline order.
    pub const ALL: [Stage; 5] = [
        Stage::Clarify,
        Stage::Retrieve,
        Stage::Analyze,
        Stage::Verify,
        Stage::Report,
    ];

    /// Stable name used in events and persisted state.
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Clarify => "clarify",
            Stage::Retrieve => "retrieve",
            Stage::Analyze => "analyze",
            Stage::Verify => "verify",
            Stage::Report => "report",
        }
    }

    /// Contribution of this stage to the weighted overall progress.
    /// Weights sum to 100.
    pub fn weight(&self) -> u8 {
        match self {
            Stage::Clarify => 10,
            Stage::Retrieve => 30,
            Stage::Analyze => 25,
            Stage::Verify => 20,
            Stage::Report => 15,
        }
    }

    /// Checkpoint name published when supervised mode pauses after this
    /// stage.
    pub fn checkpoint_name(&self) -> String {
        format!("{}_complete", self.as_str())
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Receives per-stage progress reports. Implemented by the orchestrator,
/// which folds them into the weighted overall progress and fans them out
/// on the progress bus.
#[async_trait]
pub trait ProgressSink: Send + Sync {
    /// Report a stage's status and progress.
    async fn report(
        &self,
        stage: Stage,
        status: &str,
        progress: u8,
        message: Option<String>,
        error: Option<String>,
    );
}

/// A sink that discards everything; useful in unit tests.
pub struct NullProgressSink;

#[async_trait]
impl ProgressSink for NullProgressSink {
    async fn report(
        &self,
        _stage: Stage,
        _status: &str,
        _progress: u8,
        _message: Option<String>,
        _error: Option<String>,
    ) {
    }
}

/// Tagged result of a stage execution.
#[derive(Debug, Clone)]
pub enum StageOutput {
    /// Clarify finished; the hint never replaces the session query.
    Clarified {
        /// Search hint derived from the clarified query, when it differs.
        search_hint: Option<String>,
    },
    /// Retrieve finished.
    Retrieved {
        /// Sources persisted this pass.
        sources_persisted: usize,
        /// Findings extracted this pass.
        findings_extracted: usize,
    },
    /// Analyze finished.
    Analyzed {
        /// Organized findings persisted.
        findings_organized: usize,
    },
    /// Verify finished.
    Verified {
        /// Findings that passed verification.
        verified_count: usize,
        /// Findings examined.
        total_findings: usize,
        /// Overall confidence in [0, 1].
        overall_confidence: f64,
    },
    /// Report finished.
    Reported {
        /// Quality score in [0, 5].
        quality_score: f64,
    },
}

/// Read-mostly execution context handed to every agent.
///
/// The orchestrator mutates only `search_hint` (after clarify) and the
/// retry fields; everything else is fixed for the run.
#[derive(Clone)]
pub struct AgentContext {
    /// Session id.
    pub session_id: String,
    /// The caller's original query. Never overwritten.
    pub query: String,
    /// Effective query for searching. Equals `query` unless a supervised
    /// modification or the zero-source retry broadened it.
    pub effective_query: String,
    /// Optional search hint from clarification.
    pub search_hint: Option<String>,
    /// Session parameters.
    pub params: ResearchParams,
    /// Durable store.
    pub store: Arc<dyn ResearchStore>,
    /// Language model.
    pub llm: Arc<dyn LanguageModel>,
    /// Injected configuration.
    pub config: ResearchConfig,
    /// Cancellation token for this run.
    pub cancel: CancelToken,
    /// Progress sink.
    pub progress: Arc<dyn ProgressSink>,
}

impl AgentContext {
    /// Report progress for a stage.
    pub async fn report(&self, stage: Stage, status: &str, progress: u8, message: impl Into<String>) {
        self.progress
            .report(stage, status, progress, Some(message.into()), None)
            .await;
    }

    /// Run an LLM request under the run's cancellation token.
    pub async fn think(&self, request: GenerateRequest) -> Result<String> {
        self.cancel.guard(self.llm.generate(request)).await
    }

    /// Persist one pipeline artifact. A store failure here is logged and
    /// absorbed: the stage result still stands, and later stages that
    /// miss the artifact fall back on empty inputs.
    pub async fn persist_artifact(&self, key: &str, value: serde_json::Value) {
        if let Err(e) = self
            .store
            .pipeline_data_put(&self.session_id, key, value)
            .await
        {
            tracing::error!(
                session_id = %self.session_id,
                key,
                error = %e,
                "artifact persist failed; continuing"
            );
        }
    }

    /// Apply a session patch, logging instead of failing on a store
    /// outage.
    pub async fn patch_session(&self, patch: crate::store::SessionPatch) {
        if let Err(e) = self.store.session_update(&self.session_id, patch).await {
            tracing::error!(
                session_id = %self.session_id,
                error = %e,
                "session update failed; continuing"
            );
        }
    }
}

/// A stage exposes `execute(context)` and is registered with the
/// orchestrator keyed by its [`Stage`].
#[async_trait]
pub trait PipelineAgent: Send + Sync {
    /// Which stage this agent implements.
    fn stage(&self) -> Stage;

    /// Run the stage to completion.
    async fn execute(&self, ctx: &AgentContext) -> Result<StageOutput>;
}
