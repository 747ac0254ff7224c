// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! The persistence seam.
//!
//! Stages never pass raw payloads through an in-memory context: a stage
//! reads its inputs from the store by session id and writes its outputs
//! back before returning. [`ResearchStore`] is the minimum operation set
//! the orchestrator requires; every call is atomic on its own and no
//! multi-call transaction is assumed.
//!
//! [`MemoryStore`] is the in-process implementation used by tests and
//! single-node deployments.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;

use crate::error::{Error, Result};
use crate::models::{Finding, Report, Session, SessionStatus, Source, StageState};

/// A partial update applied to a session document.
#[derive(Debug, Clone, Default)]
pub struct SessionPatch {
    /// New lifecycle status.
    pub status: Option<SessionStatus>,
    /// New current phase name.
    pub current_phase: Option<String>,
    /// New overall progress.
    pub overall_progress: Option<u8>,
    /// Upsert one stage-state entry.
    pub stage_state: Option<(String, StageState)>,
    /// Replace the per-provider source counters.
    pub sources_count: Option<HashMap<String, usize>>,
    /// Replace the finding counter.
    pub findings_count: Option<usize>,
    /// Append one entry to `agents_executed`.
    pub push_agent_executed: Option<String>,
    /// Append one entry to the non-fatal error list.
    pub push_error: Option<String>,
    /// Set the terminal error message.
    pub error_message: Option<String>,
    /// Stamp the run start.
    pub started_at: Option<DateTime<Utc>>,
    /// Stamp the run completion.
    pub completed_at: Option<DateTime<Utc>>,
}

impl SessionPatch {
    /// Empty patch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the status.
    #[must_use]
    pub fn status(mut self, status: SessionStatus) -> Self {
        self.status = Some(status);
        self
    }

    /// Set the current phase.
    #[must_use]
    pub fn current_phase(mut self, phase: impl Into<String>) -> Self {
        self.current_phase = Some(phase.into());
        self
    }

    /// Set the overall progress.
    #[must_use]
    pub fn overall_progress(mut self, progress: u8) -> Self {
        self.overall_progress = Some(progress);
        self
    }

    /// Upsert a stage-state entry.
    #[must_use]
    pub fn stage_state(mut self, stage: impl Into<String>, state: StageState) -> Self {
        self.stage_state = Some((stage.into(), state));
        self
    }

    /// Replace the source counters.
    #[must_use]
    pub fn sources_count(mut self, counts: HashMap<String, usize>) -> Self {
        self.sources_count = Some(counts);
        self
    }

    /// Replace the finding counter.
    #[must_use]
    pub fn findings_count(mut self, count: usize) -> Self {
        self.findings_count = Some(count);
        self
    }

    /// Append to `agents_executed`.
    #[must_use]
    pub fn agent_executed(mut self, agent: impl Into<String>) -> Self {
        self.push_agent_executed = Some(agent.into());
        self
    }

    /// Append a non-fatal error.
    #[must_use]
    pub fn push_error(mut self, error: impl Into<String>) -> Self {
        self.push_error = Some(error.into());
        self
    }

    /// Stamp the run start.
    #[must_use]
    pub fn started_now(mut self) -> Self {
        self.started_at = Some(Utc::now());
        self
    }
}

/// Durable storage consumed by the orchestrator and the stages.
#[async_trait]
pub trait ResearchStore: Send + Sync {
    /// Insert a new session document.
    async fn session_insert(&self, session: Session) -> Result<()>;

    /// Fetch a session by id.
    async fn session_get(&self, session_id: &str) -> Result<Session>;

    /// Apply a partial update to a session.
    async fn session_update(&self, session_id: &str, patch: SessionPatch) -> Result<()>;

    /// Transition a session's status, optionally recording an error
    /// message. Implementations must refuse transitions out of a terminal
    /// status, making a terminal state reachable at most once.
    async fn session_set_status(
        &self,
        session_id: &str,
        status: SessionStatus,
        error: Option<String>,
    ) -> Result<()>;

    /// Append sources for a session.
    async fn sources_append(&self, session_id: &str, sources: Vec<Source>) -> Result<()>;

    /// List all sources for a session, in insertion order.
    async fn sources_list(&self, session_id: &str) -> Result<Vec<Source>>;

    /// Count sources for a session.
    async fn sources_count(&self, session_id: &str) -> Result<usize>;

    /// Append findings for a session.
    async fn findings_append(&self, session_id: &str, findings: Vec<Finding>) -> Result<()>;

    /// List all findings for a session, in insertion order.
    async fn findings_list(&self, session_id: &str) -> Result<Vec<Finding>>;

    /// Write one pipeline artifact.
    async fn pipeline_data_put(
        &self,
        session_id: &str,
        key: &str,
        value: serde_json::Value,
    ) -> Result<()>;

    /// Read one pipeline artifact. `Ok(None)` when absent.
    async fn pipeline_data_get(&self, session_id: &str, key: &str)
        -> Result<Option<serde_json::Value>>;

    /// Store the final report.
    async fn report_insert(&self, session_id: &str, report: Report) -> Result<()>;

    /// Fetch the final report, if one was stored.
    async fn report_get(&self, session_id: &str) -> Result<Option<Report>>;
}

/// In-process store used by tests and single-node deployments.
///
/// All collections are keyed by session id; data is lost when the store
/// is dropped.
#[derive(Default)]
pub struct MemoryStore {
    sessions: DashMap<String, Session>,
    sources: DashMap<String, Vec<Source>>,
    findings: DashMap<String, Vec<Finding>>,
    pipeline_data: DashMap<String, HashMap<String, serde_json::Value>>,
    reports: DashMap<String, Report>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ResearchStore for MemoryStore {
    async fn session_insert(&self, session: Session) -> Result<()> {
        self.sessions.insert(session.id.clone(), session);
        Ok(())
    }

    async fn session_get(&self, session_id: &str) -> Result<Session> {
        self.sessions
            .get(session_id)
            .map(|entry| entry.clone())
            .ok_or_else(|| Error::store(format!("session '{session_id}' not found")))
    }

    async fn session_update(&self, session_id: &str, patch: SessionPatch) -> Result<()> {
        let mut entry = self
            .sessions
            .get_mut(session_id)
            .ok_or_else(|| Error::store(format!("session '{session_id}' not found")))?;
        let session = entry.value_mut();
        let was_terminal = session.status.is_terminal();

        if let Some(status) = patch.status {
            if was_terminal {
                tracing::warn!(
                    session_id,
                    from = session.status.as_str(),
                    to = status.as_str(),
                    "ignoring status transition out of terminal state"
                );
            } else {
                session.status = status;
            }
        }
        if let Some(phase) = patch.current_phase {
            session.current_phase = Some(phase);
        }
        if let Some(progress) = patch.overall_progress {
            // Overall progress is monotonic within a run.
            session.overall_progress = session.overall_progress.max(progress);
        }
        if let Some((stage, state)) = patch.stage_state {
            session.stage_states.insert(stage, state);
        }
        if let Some(counts) = patch.sources_count {
            session.sources_count = counts;
        }
        if let Some(count) = patch.findings_count {
            session.findings_count = count;
        }
        if let Some(agent) = patch.push_agent_executed {
            session.agents_executed.push(agent);
        }
        if let Some(error) = patch.push_error {
            session.errors.push(error);
        }
        if let Some(message) = patch.error_message {
            session.error_message = Some(message);
        }
        if let Some(at) = patch.started_at {
            session.started_at = Some(at);
        }
        if let Some(at) = patch.completed_at {
            // A terminal session keeps its original completion stamp.
            if !was_terminal {
                session.completed_at = Some(at);
            }
        }
        Ok(())
    }

    async fn session_set_status(
        &self,
        session_id: &str,
        status: SessionStatus,
        error: Option<String>,
    ) -> Result<()> {
        let mut patch = SessionPatch::new().status(status);
        if let Some(message) = error {
            patch.error_message = Some(message);
        }
        if status.is_terminal() {
            patch.completed_at = Some(Utc::now());
        }
        self.session_update(session_id, patch).await
    }

    async fn sources_append(&self, session_id: &str, sources: Vec<Source>) -> Result<()> {
        self.sources
            .entry(session_id.to_string())
            .or_default()
            .extend(sources);
        Ok(())
    }

    async fn sources_list(&self, session_id: &str) -> Result<Vec<Source>> {
        Ok(self
            .sources
            .get(session_id)
            .map(|entry| entry.clone())
            .unwrap_or_default())
    }

    async fn sources_count(&self, session_id: &str) -> Result<usize> {
        Ok(self.sources.get(session_id).map_or(0, |entry| entry.len()))
    }

    async fn findings_append(&self, session_id: &str, findings: Vec<Finding>) -> Result<()> {
        self.findings
            .entry(session_id.to_string())
            .or_default()
            .extend(findings);
        Ok(())
    }

    async fn findings_list(&self, session_id: &str) -> Result<Vec<Finding>> {
        Ok(self
            .findings
            .get(session_id)
            .map(|entry| entry.clone())
            .unwrap_or_default())
    }

    async fn pipeline_data_put(
        &self,
        session_id: &str,
        key: &str,
        value: serde_json::Value,
    ) -> Result<()> {
        self.pipeline_data
            .entry(session_id.to_string())
            .or_default()
            .insert(key.to_string(), value);
        Ok(())
    }

    async fn pipeline_data_get(
        &self,
        session_id: &str,
        key: &str,
    ) -> Result<Option<serde_json::Value>> {
        Ok(self
            .pipeline_data
            .get(session_id)
            .and_then(|entry| entry.get(key).cloned()))
    }

    async fn report_insert(&self, session_id: &str, report: Report) -> Result<()> {
        self.reports.insert(session_id.to_string(), report);
        Ok(())
    }

    async fn report_get(&self, session_id: &str) -> Result<Option<Report>> {
        Ok(self.reports.get(session_id).map(|entry| entry.clone()))
    }
}
