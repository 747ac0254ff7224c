// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! The staged pipeline executor.
//!
//! Drives clarify -> retrieve -> analyze -> verify -> report for one
//! session: per-stage envelope timeouts, cooperative cancellation,
//! fatal-vs-degraded failure classification, supervised checkpoints, the
//! single zero-source retry, and weighted progress fan-out. Stage
//! hand-off goes exclusively through the store; the orchestrator carries
//! only a lightweight context.

use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::{json, Value};

use crate::agents::{
    AgentContext, AnalyzeAgent, ClarifyAgent, PipelineAgent, ProgressSink, ReportAgent,
    RetrieveAgent, Stage, StageOutput, VerifyAgent,
};
use crate::approval::{ApprovalCollaborator, ApprovalResponse, CheckpointRequest};
use crate::cancel::CancelToken;
use crate::config::ResearchConfig;
use crate::error::{Error, Result};
use crate::fanout::SearchFanout;
use crate::llm::LanguageModel;
use crate::models::{artifact, ProgressEvent, SessionStatus, StageState};
use crate::progress::{ProgressBus, StageTracker};
use crate::store::{ResearchStore, SessionPatch};

/// Query suffix used by the zero-source retry.
const BROADEN_SUFFIX: &str = "overview research analysis";

/// Source floor the zero-source retry raises `max_sources` to.
const RETRY_MIN_SOURCES: usize = 100;

/// Terminal result of one pipeline run.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    /// Session the run belonged to.
    pub session_id: String,
    /// Terminal status.
    pub status: SessionStatus,
    /// Error message for failed/rejected runs.
    pub error: Option<String>,
}

/// Executes the five-stage research pipeline for sessions.
pub struct Orchestrator {
    store: Arc<dyn ResearchStore>,
    llm: Arc<dyn LanguageModel>,
    fanout: SearchFanout,
    bus: Arc<ProgressBus>,
    config: ResearchConfig,
    approvals: Option<Arc<dyn ApprovalCollaborator>>,
}

impl Orchestrator {
    /// Assemble an orchestrator from its collaborators.
    pub fn new(
        store: Arc<dyn ResearchStore>,
        llm: Arc<dyn LanguageModel>,
        fanout: SearchFanout,
        bus: Arc<ProgressBus>,
        config: ResearchConfig,
    ) -> Self {
        Self {
            store,
            llm,
            fanout,
            bus,
            config,
            approvals: None,
        }
    }

    /// Attach the human-input collaborator used at supervised checkpoints.
    #[must_use]
    pub fn with_approvals(mut self, approvals: Arc<dyn ApprovalCollaborator>) -> Self {
        self.approvals = Some(approvals);
        self
    }

    /// Run the pipeline for a session to a terminal status.
    ///
    /// The returned outcome mirrors what was persisted; partial artifacts
    /// from completed stages remain in the store whatever the outcome.
    pub async fn execute(&self, session_id: &str, cancel: CancelToken) -> Result<RunOutcome> {
        let session = self.store.session_get(session_id).await?;

        tracing::info!(session_id, query = %session.query, "starting research workflow");

        self.store
            .session_update(
                session_id,
                SessionPatch::new()
                    .status(SessionStatus::Running)
                    .started_now(),
            )
            .await?;

        let reporter = Arc::new(Reporter {
            session_id: session_id.to_string(),
            store: Arc::clone(&self.store),
            bus: Arc::clone(&self.bus),
            tracker: Mutex::new(StageTracker::new()),
        });

        let mut ctx = AgentContext {
            session_id: session_id.to_string(),
            query: session.query.clone(),
            effective_query: session.query.clone(),
            search_hint: None,
            params: session.params.clone(),
            store: Arc::clone(&self.store),
            llm: Arc::clone(&self.llm),
            config: self.config.clone(),
            cancel,
            progress: Arc::clone(&reporter) as Arc<dyn ProgressSink>,
        };

        match self.run_pipeline(&mut ctx, &reporter).await {
            Ok(outcome) => Ok(outcome),
            Err(e) if e.is_cancelled() => self.finish_cancelled(&ctx, &reporter).await,
            Err(Error::Rejected(checkpoint)) => self.finish_rejected(&ctx, &reporter, &checkpoint).await,
            Err(e) => self.finish_failed(&ctx, &reporter, &e).await,
        }
    }

    async fn run_pipeline(
        &self,
        ctx: &mut AgentContext,
        reporter: &Arc<Reporter>,
    ) -> Result<RunOutcome> {
        // Phase 1: clarify.
        reporter
            .announce("in_progress", "Phase 1: Processing research query...")
            .await;
        let clarify = ClarifyAgent;
        if let StageOutput::Clarified { search_hint } = self.run_stage(&clarify, ctx).await? {
            ctx.search_hint = search_hint;
        }
        self.checkpoint(ctx, Stage::Clarify).await?;

        // Phase 2: retrieve, with the single zero-source retry.
        reporter
            .announce("in_progress", "Phase 2: Gathering information...")
            .await;
        let retrieve = RetrieveAgent::new(self.fanout.clone());
        self.run_stage(&retrieve, ctx).await?;

        let persisted = self.store.sources_count(&ctx.session_id).await?;
        if persisted == 0 && ctx.params.max_sources > 0 {
            tracing::warn!(
                session_id = %ctx.session_id,
                providers = ?self.fanout.provider_names(),
                "zero sources persisted; retrying once with broadened query"
            );
            ctx.effective_query = format!("{} {BROADEN_SUFFIX}", ctx.query);
            ctx.params.max_sources = ctx.params.max_sources.max(RETRY_MIN_SOURCES);
            self.run_stage(&retrieve, ctx).await?;
        }
        self.checkpoint(ctx, Stage::Retrieve).await?;

        // Phase 3: analyze.
        reporter
            .announce("in_progress", "Phase 3: Analyzing findings...")
            .await;
        let analyze = AnalyzeAgent;
        self.run_stage(&analyze, ctx).await?;
        self.checkpoint(ctx, Stage::Analyze).await?;

        // Phase 4: verify - degradation-tolerant.
        reporter
            .announce("in_progress", "Phase 4: Verifying facts...")
            .await;
        let verify = VerifyAgent;
        match self.run_stage(&verify, ctx).await {
            Ok(_) => {}
            Err(e) if e.is_fatal_for(Stage::Verify) => return Err(e),
            Err(e) => {
                tracing::warn!(
                    session_id = %ctx.session_id,
                    error = %e,
                    "verification failed; continuing with fallback confidence summary"
                );
                ctx.persist_artifact(
                    artifact::CONFIDENCE_SUMMARY,
                    json!({
                        "overall": 0.5,
                        "overall_confidence": 0.5,
                        "level": "medium",
                        "confidence_level": "medium",
                        "note": "verification failed",
                    }),
                )
                .await;
                ctx.patch_session(SessionPatch::new().push_error(format!("verify: {e}")))
                    .await;
            }
        }

        // Phase 5: report.
        reporter
            .announce("in_progress", "Phase 5: Generating report...")
            .await;
        let report = ReportAgent;
        self.run_stage(&report, ctx).await?;

        self.store
            .session_set_status(&ctx.session_id, SessionStatus::Completed, None)
            .await?;
        self.store
            .session_update(&ctx.session_id, SessionPatch::new().overall_progress(100))
            .await?;
        reporter
            .announce_terminal("completed", 100, "Research completed successfully!")
            .await;

        tracing::info!(session_id = %ctx.session_id, "research workflow completed");
        Ok(RunOutcome {
            session_id: ctx.session_id.clone(),
            status: SessionStatus::Completed,
            error: None,
        })
    }

    /// Run one stage under its envelope timeout with uniform reporting.
    async fn run_stage(
        &self,
        agent: &dyn PipelineAgent,
        ctx: &AgentContext,
    ) -> Result<StageOutput> {
        if ctx.cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        let stage = agent.stage();

        self.store
            .session_update(
                &ctx.session_id,
                SessionPatch::new().current_phase(stage.as_str()),
            )
            .await
            .unwrap_or_else(|e| {
                tracing::warn!(session_id = %ctx.session_id, error = %e, "failed to update phase");
            });

        ctx.progress
            .report(stage, "in_progress", 0, None, None)
            .await;

        let outcome = tokio::time::timeout(self.config.stage_timeout, agent.execute(ctx)).await;

        match outcome {
            Ok(Ok(output)) => {
                ctx.progress.report(stage, "completed", 100, None, None).await;
                ctx.patch_session(SessionPatch::new().agent_executed(stage.as_str()))
                    .await;
                Ok(output)
            }
            Ok(Err(e)) => {
                // Cancellation gets exactly one terminal event, published
                // by the orchestrator; no per-stage failure event.
                if !e.is_cancelled() {
                    ctx.progress
                        .report(stage, "failed", 0, None, Some(e.to_string()))
                        .await;
                }
                Err(e)
            }
            Err(_) => {
                let e = Error::StageTimeout {
                    stage,
                    timeout: self.config.stage_timeout,
                };
                ctx.progress
                    .report(stage, "failed", 0, None, Some(e.to_string()))
                    .await;
                Err(e)
            }
        }
    }

    /// Supervised checkpoint after a stage. Auto mode is a no-op. With a
    /// collaborator attached the orchestrator waits (bounded) for its
    /// decision; without one it publishes `awaiting_approval` and
    /// auto-continues after a short delay.
    async fn checkpoint(&self, ctx: &mut AgentContext, stage: Stage) -> Result<()> {
        if ctx.params.mode != crate::models::ResearchMode::Supervised {
            return Ok(());
        }
        let checkpoint = stage.checkpoint_name();
        tracing::info!(session_id = %ctx.session_id, checkpoint = %checkpoint, "supervised checkpoint");

        ctx.progress
            .report(
                stage,
                "awaiting_approval",
                100,
                Some(format!("Checkpoint: {checkpoint}. Awaiting approval...")),
                None,
            )
            .await;
        self.store
            .session_update(
                &ctx.session_id,
                SessionPatch::new().status(SessionStatus::Paused),
            )
            .await?;

        let response = match &self.approvals {
            Some(approvals) => {
                let request = CheckpointRequest::new(
                    &ctx.session_id,
                    &checkpoint,
                    self.checkpoint_payload(ctx, stage).await,
                );
                let wait = tokio::time::timeout(
                    self.config.checkpoint_timeout,
                    approvals.request_approval(request),
                );
                tokio::select! {
                    biased;
                    () = ctx.cancel.cancelled() => return Err(Error::Cancelled),
                    outcome = wait => match outcome {
                        Ok(Ok(response)) => response,
                        Ok(Err(e)) => {
                            tracing::warn!(session_id = %ctx.session_id, error = %e, "approval request failed; auto-continuing");
                            ApprovalResponse::approve()
                        }
                        Err(_) => {
                            tracing::warn!(session_id = %ctx.session_id, checkpoint = %checkpoint, "approval timed out; auto-continuing");
                            ApprovalResponse::approve()
                        }
                    },
                }
            }
            None => {
                tokio::select! {
                    biased;
                    () = ctx.cancel.cancelled() => return Err(Error::Cancelled),
                    () = tokio::time::sleep(self.config.checkpoint_autocontinue) => {
                        ApprovalResponse::approve()
                    }
                }
            }
        };

        if !response.approved {
            return Err(Error::Rejected(checkpoint));
        }
        apply_modifications(ctx, response.modifications.as_ref());

        self.store
            .session_update(
                &ctx.session_id,
                SessionPatch::new().status(SessionStatus::Running),
            )
            .await?;
        Ok(())
    }

    /// Context shown to the human reviewer at a checkpoint.
    async fn checkpoint_payload(&self, ctx: &AgentContext, stage: Stage) -> Value {
        match stage {
            Stage::Clarify => {
                let plan = self
                    .store
                    .pipeline_data_get(&ctx.session_id, artifact::RESEARCH_PLAN)
                    .await
                    .ok()
                    .flatten()
                    .unwrap_or(Value::Null);
                json!({
                    "query": ctx.query,
                    "search_hint": ctx.search_hint,
                    "research_plan": plan,
                })
            }
            Stage::Retrieve => {
                let sources = self.store.sources_count(&ctx.session_id).await.unwrap_or(0);
                json!({"sources_count": sources})
            }
            _ => {
                let insights = self
                    .store
                    .pipeline_data_get(&ctx.session_id, artifact::KEY_INSIGHTS)
                    .await
                    .ok()
                    .flatten()
                    .unwrap_or(json!([]));
                json!({"key_insights": insights})
            }
        }
    }

    async fn finish_cancelled(
        &self,
        ctx: &AgentContext,
        reporter: &Arc<Reporter>,
    ) -> Result<RunOutcome> {
        tracing::info!(session_id = %ctx.session_id, "research cancelled");
        self.store
            .session_set_status(&ctx.session_id, SessionStatus::Cancelled, None)
            .await?;
        reporter
            .announce_terminal("cancelled", 0, "Research was cancelled by user")
            .await;
        Ok(RunOutcome {
            session_id: ctx.session_id.clone(),
            status: SessionStatus::Cancelled,
            error: None,
        })
    }

    async fn finish_rejected(
        &self,
        ctx: &AgentContext,
        reporter: &Arc<Reporter>,
        checkpoint: &str,
    ) -> Result<RunOutcome> {
        let message = format!("Research not approved at checkpoint '{checkpoint}'");
        tracing::info!(session_id = %ctx.session_id, checkpoint = %checkpoint, "research rejected");
        self.store
            .session_set_status(&ctx.session_id, SessionStatus::Rejected, Some(message.clone()))
            .await?;
        reporter.announce_terminal("rejected", 0, &message).await;
        Ok(RunOutcome {
            session_id: ctx.session_id.clone(),
            status: SessionStatus::Rejected,
            error: Some(message),
        })
    }

    async fn finish_failed(
        &self,
        ctx: &AgentContext,
        reporter: &Arc<Reporter>,
        error: &Error,
    ) -> Result<RunOutcome> {
        let message = error.to_string();
        tracing::error!(session_id = %ctx.session_id, error = %message, "research failed");
        self.store
            .session_set_status(&ctx.session_id, SessionStatus::Failed, Some(message.clone()))
            .await?;
        self.store
            .session_update(&ctx.session_id, SessionPatch::new().push_error(message.clone()))
            .await?;
        reporter
            .announce_terminal("failed", 0, &format!("Research failed: {message}"))
            .await;
        Ok(RunOutcome {
            session_id: ctx.session_id.clone(),
            status: SessionStatus::Failed,
            error: Some(message),
        })
    }
}

/// Apply supervised-mode modifications. The stored original query is
/// never touched; an explicit query modification only changes what the
/// retrieval stage searches for.
fn apply_modifications(ctx: &mut AgentContext, modifications: Option<&Value>) {
    let Some(modifications) = modifications else {
        return;
    };
    if let Some(query) = modifications["query"].as_str() {
        ctx.effective_query = query.to_string();
    }
    if let Some(areas) = modifications["focus_areas"].as_array() {
        ctx.params.focus_areas = areas
            .iter()
            .filter_map(Value::as_str)
            .map(ToString::to_string)
            .collect();
    }
}

/// Folds stage reports into weighted overall progress, persists them and
/// fans them out on the bus. Store failures are logged, never raised.
struct Reporter {
    session_id: String,
    store: Arc<dyn ResearchStore>,
    bus: Arc<ProgressBus>,
    tracker: Mutex<StageTracker>,
}

impl Reporter {
    fn overall_for(&self, stage: Stage, status: &str, progress: u8) -> u8 {
        let mut tracker = self.tracker.lock();
        tracker.update(stage, status, progress);
        tracker.overall()
    }

    fn overall(&self) -> u8 {
        self.tracker.lock().overall()
    }

    /// Orchestrator-level phase announcement.
    async fn announce(&self, status: &str, message: &str) {
        let event = ProgressEvent {
            session_id: self.session_id.clone(),
            agent: "orchestrator".to_string(),
            status: status.to_string(),
            progress: 0,
            overall_progress: self.overall(),
            message: Some(message.to_string()),
            error: None,
            timestamp: chrono::Utc::now(),
        };
        self.bus.publish(event).await;
    }

    /// Terminal event for the session.
    async fn announce_terminal(&self, status: &str, progress: u8, message: &str) {
        let overall = if status == "completed" { 100 } else { self.overall() };
        let event = ProgressEvent {
            session_id: self.session_id.clone(),
            agent: "orchestrator".to_string(),
            status: status.to_string(),
            progress,
            overall_progress: overall,
            message: Some(message.to_string()),
            error: (status == "failed").then(|| message.to_string()),
            timestamp: chrono::Utc::now(),
        };
        self.bus.publish(event).await;
    }
}

#[async_trait::async_trait]
impl ProgressSink for Reporter {
    async fn report(
        &self,
        stage: Stage,
        status: &str,
        progress: u8,
        message: Option<String>,
        error: Option<String>,
    ) {
        let overall = self.overall_for(stage, status, progress);

        let state = StageState {
            status: status.to_string(),
            progress,
            message: message.clone(),
            error: error.clone(),
        };
        let patch = SessionPatch::new()
            .stage_state(stage.as_str(), state)
            .overall_progress(overall);
        if let Err(e) = self.store.session_update(&self.session_id, patch).await {
            // StoreFail during progress persistence: observability event,
            // pipeline continues.
            tracing::warn!(session_id = %self.session_id, error = %e, "failed to persist progress");
        }

        let event = ProgressEvent {
            session_id: self.session_id.clone(),
            agent: stage.as_str().to_string(),
            status: status.to_string(),
            progress,
            overall_progress: overall,
            message,
            error,
            timestamp: chrono::Utc::now(),
        };
        self.bus.publish(event).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ResearchParams;

    #[test]
    fn test_apply_modifications_preserves_query() {
        let store: Arc<dyn ResearchStore> = Arc::new(crate::store::MemoryStore::new());
        let llm: Arc<dyn LanguageModel> = Arc::new(crate::testing::MockLanguageModel::new());
        let mut ctx = AgentContext {
            session_id: "s-1".to_string(),
            query: "original".to_string(),
            effective_query: "original".to_string(),
            search_hint: None,
            params: ResearchParams::default(),
            store,
            llm,
            config: ResearchConfig::default(),
            cancel: CancelToken::new(),
            progress: Arc::new(crate::agents::NullProgressSink),
        };

        apply_modifications(
            &mut ctx,
            Some(&json!({"query": "narrowed", "focus_areas": ["policy"]})),
        );
        assert_eq!(ctx.query, "original");
        assert_eq!(ctx.effective_query, "narrowed");
        assert_eq!(ctx.params.focus_areas, vec!["policy"]);

        apply_modifications(&mut ctx, None);
        assert_eq!(ctx.effective_query, "narrowed");
    }
}
